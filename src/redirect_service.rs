use std::sync::Arc;

use async_trait::async_trait;
use rearch::CapsuleHandle;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::instrument;

use crate::{
    click_repo::{ClickRepository, click_repository_capsule},
    short_code::ShortCode,
    url_repo::{UrlRepository, url_repository_capsule},
};

#[derive(Debug, PartialEq, Eq)]
pub struct Redirect {
    pub url: String,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("short code not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    StoreUnavailable(anyhow::Error),
}

pub fn redirect_service_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn RedirectService> {
    let url_repo = Arc::clone(get.as_ref(url_repository_capsule));
    let click_repo = Arc::clone(get.as_ref(click_repository_capsule));
    Arc::new(RedirectServiceImpl {
        url_repo,
        click_repo,
    })
}

#[async_trait]
pub trait RedirectService: Send + Sync {
    /// Looks up the destination for `short_code` and counts the visit.
    ///
    /// Every successful call appends exactly one click event and bumps the
    /// click count by one, atomically.
    async fn resolve(&self, short_code: &str) -> Result<Redirect, ResolveError>;
}

struct RedirectServiceImpl {
    url_repo: Arc<dyn UrlRepository>,
    click_repo: Arc<dyn ClickRepository>,
}

#[async_trait]
impl RedirectService for RedirectServiceImpl {
    #[instrument(skip(self))]
    async fn resolve(&self, short_code: &str) -> Result<Redirect, ResolveError> {
        let short_code =
            ShortCode::new(short_code.to_owned()).map_err(|_| ResolveError::NotFound)?;
        let mapping = self
            .url_repo
            .retrieve_by_short_code(&short_code)
            .await
            .map_err(ResolveError::StoreUnavailable)?
            .ok_or(ResolveError::NotFound)?;

        // NOTE: None means the mapping was deleted after the lookup above
        self.click_repo
            .record_click(mapping.id, OffsetDateTime::now_utc())
            .await
            .map_err(ResolveError::StoreUnavailable)?
            .ok_or(ResolveError::NotFound)?;

        Ok(Redirect {
            url: normalize_destination(&mapping.original_url),
        })
    }
}

/// Prefixes `https://` unless the URL already names an `http` or `https`
/// scheme. The stored URL is left untouched.
#[must_use]
pub fn normalize_destination(original_url: &str) -> String {
    if original_url.starts_with("http://") || original_url.starts_with("https://") {
        original_url.to_owned()
    } else {
        format!("https://{original_url}")
    }
}
