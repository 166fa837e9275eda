use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DbConn, EntityTrait,
    ExprTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
    sea_query::Expr,
};
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    config::db_conn_capsule,
    orm::{click_event, url_mapping},
};

/// `clicked_at_seconds` truncated to whole days since the unix epoch (UTC).
const DAY_EXPR: &str = "clicked_at_seconds / 86400";

/// A single recorded redirect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClickEvent {
    pub id: Uuid,
    pub url_mapping_id: Uuid,
    pub clicked_at: OffsetDateTime,
}

/// Number of clicks on one UTC day, the day given as days since the unix epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DayCount {
    pub epoch_day: i64,
    pub clicks: u64,
}

pub fn click_repository_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn ClickRepository> {
    let db = get.as_ref(db_conn_capsule).clone();
    Arc::new(ClickRepositoryImpl { db })
}

/// Click event log and the click counter derived from it.
///
/// Both writers here take the mapping's row lock with their first statement,
/// so a click and a reconciliation of the same mapping never interleave.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClickRepository: Send + Sync {
    /// Adds one to the mapping's click count and appends the click event in
    /// a single transaction.
    /// Returns `None`, writing nothing, if the mapping no longer exists.
    async fn record_click(
        &self,
        url_mapping_id: Uuid,
        clicked_at: OffsetDateTime,
    ) -> anyhow::Result<Option<ClickEvent>>;

    /// Clicks per UTC day on any of `url_mapping_ids` within `[start, end]`,
    /// oldest day first. Days without clicks are omitted.
    async fn daily_click_counts(
        &self,
        url_mapping_ids: &[Uuid],
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> anyhow::Result<Vec<DayCount>>;

    async fn count_clicks(&self, url_mapping_id: Uuid) -> anyhow::Result<u64>;

    /// Overwrites the mapping's click count with the number of logged events.
    /// Returns `None` if the mapping does not exist.
    async fn reconcile_click_count(&self, url_mapping_id: Uuid) -> anyhow::Result<Option<u64>>;
}

struct ClickRepositoryImpl {
    db: DbConn,
}

#[async_trait]
impl ClickRepository for ClickRepositoryImpl {
    #[instrument(skip(self))]
    async fn record_click(
        &self,
        url_mapping_id: Uuid,
        clicked_at: OffsetDateTime,
    ) -> anyhow::Result<Option<ClickEvent>> {
        let txn = self
            .db
            .begin()
            .await
            .context("Failed to begin click transaction")?;

        let counted = url_mapping::Entity::update_many()
            .col_expr(
                url_mapping::Column::ClickCount,
                Expr::col(url_mapping::Column::ClickCount).add(1),
            )
            .filter(url_mapping::Column::Id.eq(url_mapping_id))
            .exec(&txn)
            .await
            .context("Failed to increment click_count")?;
        if counted.rows_affected == 0 {
            txn.rollback()
                .await
                .context("Failed to roll back click transaction")?;
            return Ok(None);
        }

        let to_insert = click_event::ActiveModel {
            id: Set(Uuid::new_v4()),
            url_mapping_id: Set(url_mapping_id),
            clicked_at_seconds: Set(clicked_at.unix_timestamp()),
        };
        let inserted = to_insert
            .insert(&txn)
            .await
            .context("Failed to insert click_event")?;

        txn.commit()
            .await
            .context("Failed to commit click transaction")?;
        inserted.try_into().map(Some)
    }

    #[instrument(skip(self))]
    async fn daily_click_counts(
        &self,
        url_mapping_ids: &[Uuid],
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> anyhow::Result<Vec<DayCount>> {
        if url_mapping_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<(i64, i64)> = click_event::Entity::find()
            .select_only()
            .column_as(Expr::cust(DAY_EXPR), "epoch_day")
            .column_as(click_event::Column::Id.count(), "clicks")
            .filter(click_event::Column::UrlMappingId.is_in(url_mapping_ids.iter().copied()))
            .filter(
                click_event::Column::ClickedAtSeconds
                    .between(start.unix_timestamp(), end.unix_timestamp()),
            )
            .group_by(Expr::cust(DAY_EXPR))
            .order_by_asc(Expr::cust("epoch_day"))
            .into_tuple::<(i64, i64)>()
            .all(&self.db)
            .await
            .context("Failed to count click_events per day")?;

        rows.into_iter()
            .map(|(epoch_day, clicks)| {
                Ok(DayCount {
                    epoch_day,
                    clicks: u64::try_from(clicks).context("Negative click count per day")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn count_clicks(&self, url_mapping_id: Uuid) -> anyhow::Result<u64> {
        count_events(&self.db, url_mapping_id).await
    }

    #[instrument(skip(self))]
    async fn reconcile_click_count(&self, url_mapping_id: Uuid) -> anyhow::Result<Option<u64>> {
        let txn = self
            .db
            .begin()
            .await
            .context("Failed to begin reconcile transaction")?;

        // NOTE: no-op write so the row lock is held before the events are counted
        let locked = url_mapping::Entity::update_many()
            .col_expr(
                url_mapping::Column::ClickCount,
                Expr::col(url_mapping::Column::ClickCount),
            )
            .filter(url_mapping::Column::Id.eq(url_mapping_id))
            .exec(&txn)
            .await
            .context("Failed to lock url_mapping")?;
        if locked.rows_affected == 0 {
            txn.rollback()
                .await
                .context("Failed to roll back reconcile transaction")?;
            return Ok(None);
        }

        let click_count = count_events(&txn, url_mapping_id).await?;
        url_mapping::Entity::update_many()
            .col_expr(
                url_mapping::Column::ClickCount,
                Expr::value(i64::try_from(click_count).context("click_count overflows i64")?),
            )
            .filter(url_mapping::Column::Id.eq(url_mapping_id))
            .exec(&txn)
            .await
            .context("Failed to set click_count")?;

        txn.commit()
            .await
            .context("Failed to commit reconcile transaction")?;
        Ok(Some(click_count))
    }
}

async fn count_events(db: &impl ConnectionTrait, url_mapping_id: Uuid) -> anyhow::Result<u64> {
    click_event::Entity::find()
        .filter(click_event::Column::UrlMappingId.eq(url_mapping_id))
        .count(db)
        .await
        .context("Failed to count click_events")
}

impl TryFrom<click_event::Model> for ClickEvent {
    type Error = anyhow::Error;

    fn try_from(
        click_event::Model {
            id,
            url_mapping_id,
            clicked_at_seconds,
        }: click_event::Model,
    ) -> Result<Self, Self::Error> {
        Ok(Self {
            id,
            url_mapping_id,
            clicked_at: OffsetDateTime::from_unix_timestamp(clicked_at_seconds)
                .context("Stored clicked_at is out of range")?,
        })
    }
}
