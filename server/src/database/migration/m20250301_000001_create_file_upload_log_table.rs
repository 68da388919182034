use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250301_000001_create_file_upload_log_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FileUploadLog::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FileUploadLog::SessionToken)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(FileUploadLog::StartTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(FileUploadLog::EndTime).timestamp_with_time_zone().null())
                    .col(
                        ColumnDef::new(FileUploadLog::CleanupTime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(FileUploadLog::TableNames).text().not_null())
                    .col(ColumnDef::new(FileUploadLog::FileNames).text().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-file_upload_log-end_time")
                    .table(FileUploadLog::Table)
                    .col(FileUploadLog::EndTime)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FileUploadLog::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum FileUploadLog {
    Table,
    SessionToken,
    StartTime,
    EndTime,
    CleanupTime,
    TableNames,
    FileNames,
}
