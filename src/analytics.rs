use std::sync::Arc;

use async_trait::async_trait;
use rearch::CapsuleHandle;
use serde::Serialize;
use thiserror::Error;
use time::{
    Date, Duration, OffsetDateTime, format_description::BorrowedFormatItem,
    macros::{format_description, time},
};
use tracing::instrument;

use crate::{
    click_repo::{ClickRepository, DayCount, click_repository_capsule},
    short_code::ShortCode,
    url_repo::{Owner, UrlRepository, url_repository_capsule},
};

/// Window used when the caller gives no explicit bounds.
pub const DEFAULT_RANGE_DAYS: i64 = 30;

/// Julian day number of 1970-01-01.
const UNIX_EPOCH_JULIAN_DAY: i32 = 2_440_588;

const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

time::serde::format_description!(calendar_date, Date, "[year]-[month]-[day]");

/// One histogram bucket: the number of clicks on a calendar day (UTC).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DailyClicks {
    #[serde(with = "calendar_date")]
    pub date: Date,
    pub count: u64,
}

/// An inclusive `[start, end]` instant range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("invalid date {date:?}, expected YYYY-MM-DD: {source}")]
    InvalidDate {
        date: String,
        source: time::error::Parse,
    },
    #[error("store unavailable: {0}")]
    StoreUnavailable(anyhow::Error),
}

impl DateRange {
    /// Builds a range from optional `YYYY-MM-DD` bounds.
    ///
    /// A start date begins at `00:00:00` and an end date runs through
    /// `23:59:59`, both in UTC. Missing bounds default to the last
    /// [`DEFAULT_RANGE_DAYS`] days ending at `now`.
    ///
    /// # Errors
    /// Will return [`Err`] if either date does not parse.
    pub fn from_query(
        start_date: Option<&str>,
        end_date: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<Self, AnalyticsError> {
        let start = match start_date {
            Some(date) => parse_date(date)?.midnight().assume_utc(),
            None => now - Duration::days(DEFAULT_RANGE_DAYS),
        };
        let end = match end_date {
            Some(date) => parse_date(date)?.with_time(time!(23:59:59)).assume_utc(),
            None => now,
        };
        Ok(Self { start, end })
    }
}

fn parse_date(date: &str) -> Result<Date, AnalyticsError> {
    Date::parse(date, DATE_FORMAT).map_err(|source| AnalyticsError::InvalidDate {
        date: date.to_owned(),
        source,
    })
}

pub fn analytics_service_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn AnalyticsService> {
    let url_repo = Arc::clone(get.as_ref(url_repository_capsule));
    let click_repo = Arc::clone(get.as_ref(click_repository_capsule));
    Arc::new(AnalyticsServiceImpl {
        url_repo,
        click_repo,
    })
}

/// Per-day click histograms.
///
/// Ownership is not checked here; callers gate access with
/// `UrlService::does_url_belong_to_user` first.
#[async_trait]
pub trait AnalyticsService: Send + Sync {
    /// Sparse, ascending histogram for one short code.
    /// Unknown or malformed codes yield an empty histogram.
    async fn click_histogram(
        &self,
        short_code: &str,
        range: DateRange,
    ) -> Result<Vec<DailyClicks>, AnalyticsError>;

    /// Histogram over every mapping the owner has created.
    async fn total_clicks_by_owner(
        &self,
        owner: &Owner,
        range: DateRange,
    ) -> Result<Vec<DailyClicks>, AnalyticsError>;
}

struct AnalyticsServiceImpl {
    url_repo: Arc<dyn UrlRepository>,
    click_repo: Arc<dyn ClickRepository>,
}

#[async_trait]
impl AnalyticsService for AnalyticsServiceImpl {
    #[instrument(skip(self))]
    async fn click_histogram(
        &self,
        short_code: &str,
        range: DateRange,
    ) -> Result<Vec<DailyClicks>, AnalyticsError> {
        let Ok(short_code) = ShortCode::new(short_code.to_owned()) else {
            return Ok(Vec::new());
        };
        let Some(mapping) = self
            .url_repo
            .retrieve_by_short_code(&short_code)
            .await
            .map_err(AnalyticsError::StoreUnavailable)?
        else {
            return Ok(Vec::new());
        };

        let day_counts = self
            .click_repo
            .daily_click_counts(&[mapping.id], range.start, range.end)
            .await
            .map_err(AnalyticsError::StoreUnavailable)?;
        to_daily_clicks(day_counts)
    }

    #[instrument(skip(self))]
    async fn total_clicks_by_owner(
        &self,
        owner: &Owner,
        range: DateRange,
    ) -> Result<Vec<DailyClicks>, AnalyticsError> {
        let mapping_ids: Vec<_> = self
            .url_repo
            .retrieve_by_owner(owner.id)
            .await
            .map_err(AnalyticsError::StoreUnavailable)?
            .into_iter()
            .map(|mapping| mapping.id)
            .collect();

        let day_counts = self
            .click_repo
            .daily_click_counts(&mapping_ids, range.start, range.end)
            .await
            .map_err(AnalyticsError::StoreUnavailable)?;
        to_daily_clicks(day_counts)
    }
}

fn to_daily_clicks(day_counts: Vec<DayCount>) -> Result<Vec<DailyClicks>, AnalyticsError> {
    day_counts
        .into_iter()
        .map(|DayCount { epoch_day, clicks }| {
            let date = i32::try_from(epoch_day)
                .ok()
                .and_then(|day| day.checked_add(UNIX_EPOCH_JULIAN_DAY))
                .and_then(|julian_day| Date::from_julian_day(julian_day).ok())
                .ok_or_else(|| {
                    AnalyticsError::StoreUnavailable(anyhow::anyhow!(
                        "Click day {epoch_day} is out of range"
                    ))
                })?;
            Ok(DailyClicks {
                date,
                count: clicks,
            })
        })
        .collect()
}
