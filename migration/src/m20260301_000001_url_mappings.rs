//! Creates the `url_mappings` table.
//!
//! `short_code` carries the unique constraint that creation relies on to
//! detect collisions.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UrlMappings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UrlMappings::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(UrlMappings::OriginalUrl).text().not_null())
                    .col(
                        ColumnDef::new(UrlMappings::ShortCode)
                            .string_len(8)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(UrlMappings::OwnerId).uuid().not_null())
                    .col(
                        ColumnDef::new(UrlMappings::OwnerUsername)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UrlMappings::CreatedAtSeconds)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UrlMappings::ClickCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_url_mappings_owner_id")
                    .table(UrlMappings::Table)
                    .col(UrlMappings::OwnerId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_url_mappings_owner_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(UrlMappings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum UrlMappings {
    Table,
    Id,
    OriginalUrl,
    ShortCode,
    OwnerId,
    OwnerUsername,
    CreatedAtSeconds,
    ClickCount,
}
