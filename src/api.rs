use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::url_repo::UrlMapping;

#[derive(Deserialize)]
pub struct CreateUrlPayload {
    #[serde(alias = "originalUrl")]
    pub original_url: String,
}

/// Optional `YYYY-MM-DD` bounds for analytics requests.
#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQuery {
    #[serde(alias = "startDate")]
    pub start_date: Option<String>,
    #[serde(alias = "endDate")]
    pub end_date: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MappingView {
    pub id: Uuid,
    pub original_url: String,
    pub short_code: String,
    pub click_count: u64,
    /// Timestamp in RFC 3339 format
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub owner_username: String,
}

#[derive(Debug, Serialize)]
pub struct ClickCountView {
    pub click_count: u64,
}

#[derive(Serialize)]
pub struct Error {
    pub error: String,
    pub error_id: String,
}

impl From<UrlMapping> for MappingView {
    fn from(
        UrlMapping {
            id,
            original_url,
            short_code,
            owner,
            created_at,
            click_count,
        }: UrlMapping,
    ) -> Self {
        Self {
            id,
            original_url,
            short_code: short_code.into_inner(),
            click_count,
            created_at,
            owner_username: owner.username,
        }
    }
}
