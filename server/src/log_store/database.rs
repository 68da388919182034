//! Session log kept in a SQL database.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::ActiveValue::Set;
use sea_orm::{ConnectOptions, Database, QuerySelect};

use super::{check_transition, LogRecord, LogStore, SessionState};
use crate::database::entity::file_upload_log::{self, Entity as FileUploadLog};
use crate::database::migration::{Migrator, MigratorTrait};
use crate::error::{ServerError, ServerResult};
use csvgate::session::SessionToken;

/// A log store backed by sea-orm.
///
/// The array columns are stored as JSON text.
#[derive(Debug, Clone)]
pub struct DatabaseLogStore {
    db: DatabaseConnection,
}

impl DatabaseLogStore {
    pub async fn connect(url: &str) -> ServerResult<Self> {
        let mut options = ConnectOptions::new(url.to_owned());
        options.sqlx_logging(false);

        let db = Database::connect(options)
            .await
            .map_err(ServerError::database_error)?;

        Ok(Self { db })
    }

    /// Returns the underlying connection, for tests and tooling that need
    /// to reach the log table directly.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Applies an update to one session's row.
    async fn update_session(
        &self,
        token: &SessionToken,
        columns: Vec<(file_upload_log::Column, SimpleExpr)>,
    ) -> ServerResult<()> {
        let mut update = FileUploadLog::update_many();
        for (column, value) in columns {
            update = update.col_expr(column, value);
        }

        let result = update
            .filter(file_upload_log::Column::SessionToken.eq(token.as_str()))
            .exec(&self.db)
            .await
            .map_err(ServerError::database_error)?;

        if result.rows_affected == 0 {
            return Err(ServerError::log_store_error(anyhow!(
                "No log record for session {}",
                token
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl LogStore for DatabaseLogStore {
    async fn ensure_schema(&self) -> ServerResult<()> {
        Migrator::up(&self.db, None)
            .await
            .map_err(ServerError::database_error)
    }

    async fn record_session_start(&self, token: &SessionToken) -> ServerResult<()> {
        let existing = FileUploadLog::find_by_id(token.as_str())
            .one(&self.db)
            .await
            .map_err(ServerError::database_error)?;

        if existing.is_some() {
            tracing::debug!(session = %token, "Session already has a log record");
            return Ok(());
        }

        let model = file_upload_log::ActiveModel {
            session_token: Set(token.as_str().to_owned()),
            start_time: Set(Utc::now()),
            end_time: Set(None),
            cleanup_time: Set(None),
            table_names: Set("[]".to_string()),
            file_names: Set("[]".to_string()),
        };

        FileUploadLog::insert(model)
            .exec(&self.db)
            .await
            .map_err(ServerError::database_error)?;

        Ok(())
    }

    async fn record_session_end(&self, token: &SessionToken) -> ServerResult<()> {
        check_transition(self, token, SessionState::Finalized).await?;

        self.update_session(
            token,
            vec![(file_upload_log::Column::EndTime, Expr::value(Utc::now()))],
        )
        .await
    }

    async fn record_tables_loaded(
        &self,
        token: &SessionToken,
        table_names: &[String],
        file_names: &[String],
    ) -> ServerResult<()> {
        check_transition(self, token, SessionState::Finalized).await?;

        let table_names = serde_json::to_string(table_names).map_err(ServerError::log_store_error)?;
        let file_names = serde_json::to_string(file_names).map_err(ServerError::log_store_error)?;

        self.update_session(
            token,
            vec![
                (file_upload_log::Column::EndTime, Expr::value(Utc::now())),
                (file_upload_log::Column::TableNames, Expr::value(table_names)),
                (file_upload_log::Column::FileNames, Expr::value(file_names)),
            ],
        )
        .await
    }

    async fn record_cleanup(&self, token: &SessionToken) -> ServerResult<()> {
        check_transition(self, token, SessionState::Cleaned).await?;

        self.update_session(
            token,
            vec![(file_upload_log::Column::CleanupTime, Expr::value(Utc::now()))],
        )
        .await
    }

    async fn stale_sessions(&self, grace: Duration) -> ServerResult<Vec<String>> {
        let grace = chrono::Duration::from_std(grace).map_err(ServerError::log_store_error)?;
        let cutoff = Utc::now() - grace;

        FileUploadLog::find()
            .select_only()
            .column(file_upload_log::Column::SessionToken)
            .distinct()
            .filter(file_upload_log::Column::EndTime.is_not_null())
            .filter(file_upload_log::Column::CleanupTime.is_null())
            .filter(file_upload_log::Column::EndTime.lte(cutoff))
            .into_tuple::<String>()
            .all(&self.db)
            .await
            .map_err(ServerError::database_error)
    }

    async fn find_session(&self, token: &SessionToken) -> ServerResult<Option<LogRecord>> {
        let model = FileUploadLog::find_by_id(token.as_str())
            .one(&self.db)
            .await
            .map_err(ServerError::database_error)?;

        model.map(LogRecord::try_from).transpose()
    }
}

impl TryFrom<file_upload_log::Model> for LogRecord {
    type Error = ServerError;

    fn try_from(model: file_upload_log::Model) -> ServerResult<Self> {
        let table_names =
            serde_json::from_str(&model.table_names).map_err(ServerError::log_store_error)?;
        let file_names =
            serde_json::from_str(&model.file_names).map_err(ServerError::log_store_error)?;

        Ok(Self {
            session_token: model.session_token,
            start_time: model.start_time,
            end_time: model.end_time,
            cleanup_time: model.cleanup_time,
            table_names,
            file_names,
        })
    }
}
