//! Creates the `click_events` table, one row per successful redirect.

use sea_orm_migration::prelude::*;

use crate::m20260301_000001_url_mappings::UrlMappings;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ClickEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ClickEvents::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ClickEvents::UrlMappingId).uuid().not_null())
                    .col(
                        ColumnDef::new(ClickEvents::ClickedAtSeconds)
                            .big_integer()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_click_events_url_mapping_id")
                            .from(ClickEvents::Table, ClickEvents::UrlMappingId)
                            .to(UrlMappings::Table, UrlMappings::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Range scans are always per mapping, ordered by time
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_click_events_mapping_time")
                    .table(ClickEvents::Table)
                    .col(ClickEvents::UrlMappingId)
                    .col(ClickEvents::ClickedAtSeconds)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_click_events_mapping_time")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ClickEvents::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ClickEvents {
    Table,
    Id,
    UrlMappingId,
    ClickedAtSeconds,
}
