//! Session log entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "file_upload_log")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub session_token: String,
    pub start_time: ChronoDateTimeUtc,
    pub end_time: Option<ChronoDateTimeUtc>,
    pub cleanup_time: Option<ChronoDateTimeUtc>,
    /// JSON array of table names
    pub table_names: String,
    /// JSON array of file names, parallel to `table_names`
    pub file_names: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
