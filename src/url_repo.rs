use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DbConn, DbErr, EntityTrait, QueryFilter,
    QueryOrder, SqlErr,
};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use crate::{config::db_conn_capsule, orm::url_mapping, short_code::ShortCode};

/// The user a mapping is attributed to.
///
/// Users are owned by an external identity provider; the display name is
/// copied onto each mapping at creation time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Owner {
    pub id: Uuid,
    pub username: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewUrlMapping {
    pub original_url: String,
    pub short_code: ShortCode,
    pub owner: Owner,
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlMapping {
    pub id: Uuid,
    pub original_url: String,
    pub short_code: ShortCode,
    pub owner: Owner,
    pub created_at: OffsetDateTime,
    pub click_count: u64,
}

#[derive(Debug, Error)]
pub enum SaveUrlError {
    #[error("short code {0} is already taken")]
    ShortCodeTaken(ShortCode),
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error),
}

pub fn url_repository_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn UrlRepository> {
    let db = get.as_ref(db_conn_capsule).clone();
    Arc::new(UrlRepositoryImpl { db })
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UrlRepository: Send + Sync {
    /// Persists a new mapping with a zero click count.
    ///
    /// Returns [`SaveUrlError::ShortCodeTaken`] when the unique index on the
    /// short code rejects the row; nothing is written in that case.
    async fn insert_url(&self, url: NewUrlMapping) -> Result<UrlMapping, SaveUrlError>;

    async fn retrieve_by_short_code(
        &self,
        short_code: &ShortCode,
    ) -> anyhow::Result<Option<UrlMapping>>;

    async fn retrieve_by_owner(&self, owner_id: Uuid) -> anyhow::Result<Vec<UrlMapping>>;

    /// Removes the mapping along with its click events.
    async fn delete_url(&self, id: Uuid) -> anyhow::Result<bool>;
}

struct UrlRepositoryImpl {
    db: DbConn,
}

#[async_trait]
impl UrlRepository for UrlRepositoryImpl {
    #[instrument(skip(self))]
    async fn insert_url(&self, url: NewUrlMapping) -> Result<UrlMapping, SaveUrlError> {
        let short_code = url.short_code.clone();
        let to_insert = url_mapping::ActiveModel {
            id: Set(Uuid::new_v4()),
            original_url: Set(url.original_url),
            short_code: Set(url.short_code.into_inner()),
            owner_id: Set(url.owner.id),
            owner_username: Set(url.owner.username),
            created_at_seconds: Set(url.created_at.unix_timestamp()),
            click_count: Set(0),
        };

        match to_insert.insert(&self.db).await {
            Ok(model) => model
                .try_into()
                .context("Failed to convert inserted url_mapping")
                .map_err(SaveUrlError::Internal),
            Err(err) if is_unique_violation(&err) => Err(SaveUrlError::ShortCodeTaken(short_code)),
            Err(err) => Err(SaveUrlError::Internal(
                anyhow::Error::new(err).context("Failed to insert url_mapping"),
            )),
        }
    }

    #[instrument(skip(self))]
    async fn retrieve_by_short_code(
        &self,
        short_code: &ShortCode,
    ) -> anyhow::Result<Option<UrlMapping>> {
        url_mapping::Entity::find()
            .filter(url_mapping::Column::ShortCode.eq(short_code.as_str()))
            .one(&self.db)
            .await
            .context("Failed to query url_mapping by short code")?
            .map(UrlMapping::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn retrieve_by_owner(&self, owner_id: Uuid) -> anyhow::Result<Vec<UrlMapping>> {
        url_mapping::Entity::find()
            .filter(url_mapping::Column::OwnerId.eq(owner_id))
            .order_by_asc(url_mapping::Column::CreatedAtSeconds)
            .all(&self.db)
            .await
            .context("Failed to query url_mappings by owner")?
            .into_iter()
            .map(UrlMapping::try_from)
            .collect()
    }

    #[instrument(skip(self))]
    async fn delete_url(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = url_mapping::Entity::delete_by_id(id)
            .exec(&self.db)
            .await
            .context("Failed to delete url_mapping")?;
        Ok(result.rows_affected > 0)
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

impl TryFrom<url_mapping::Model> for UrlMapping {
    type Error = anyhow::Error;

    fn try_from(
        url_mapping::Model {
            id,
            original_url,
            short_code,
            owner_id,
            owner_username,
            created_at_seconds,
            click_count,
        }: url_mapping::Model,
    ) -> Result<Self, Self::Error> {
        Ok(Self {
            id,
            original_url,
            short_code: ShortCode::new(short_code).context("Stored short code is invalid")?,
            owner: Owner {
                id: owner_id,
                username: owner_username,
            },
            created_at: OffsetDateTime::from_unix_timestamp(created_at_seconds)
                .context("Stored created_at is out of range")?,
            click_count: u64::try_from(click_count).context("Stored click_count is negative")?,
        })
    }
}
