use std::sync::Arc;

use async_trait::async_trait;
use rearch::CapsuleHandle;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::{
    api::MappingView,
    click_repo::{ClickRepository, click_repository_capsule},
    short_code::{ShortCode, ShortCodeGenerator, short_code_generator_capsule},
    url_repo::{NewUrlMapping, Owner, SaveUrlError, UrlRepository, url_repository_capsule},
};

/// Consecutive short-code collisions tolerated before giving up.
pub const MAX_SHORT_CODE_ATTEMPTS: usize = 5;

pub fn url_service_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> Arc<dyn UrlService> {
    let url_repo = Arc::clone(get.as_ref(url_repository_capsule));
    let click_repo = Arc::clone(get.as_ref(click_repository_capsule));
    let generator = Arc::clone(get.as_ref(short_code_generator_capsule));
    Arc::new(UrlServiceImpl {
        url_repo,
        click_repo,
        generator,
    })
}

#[async_trait]
pub trait UrlService: Send + Sync {
    async fn create_short_url(
        &self,
        original_url: &str,
        owner: &Owner,
    ) -> Result<MappingView, CreateUrlError>;

    async fn list_urls(&self, owner: &Owner) -> Result<Vec<MappingView>, StoreUnavailable>;

    /// `false` for unknown or malformed short codes.
    async fn does_url_belong_to_user(
        &self,
        short_code: &str,
        owner: &Owner,
    ) -> Result<bool, StoreUnavailable>;

    async fn delete_url(&self, short_code: &str, owner: &Owner) -> Result<(), DeleteUrlError>;

    /// Overwrites the click count with the number of recorded click events.
    async fn reconcile_click_count(&self, short_code: &str) -> Result<u64, ReconcileError>;
}

#[derive(Debug, Error)]
#[error("store unavailable: {0}")]
pub struct StoreUnavailable(pub anyhow::Error);

#[derive(Debug, Error)]
pub enum CreateUrlError {
    #[error("no unused short code found after {attempts} attempts")]
    KeyspaceExhausted { attempts: usize },
    #[error("store unavailable: {0}")]
    StoreUnavailable(anyhow::Error), // NOTE: no #[from] so we have to be explicit
}

#[derive(Debug, Error)]
pub enum DeleteUrlError {
    #[error("short code not found")]
    NotFound,
    #[error("short code belongs to another user")]
    AuthorizationDenied,
    #[error("store unavailable: {0}")]
    StoreUnavailable(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("short code not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    StoreUnavailable(anyhow::Error),
}

struct UrlServiceImpl {
    url_repo: Arc<dyn UrlRepository>,
    click_repo: Arc<dyn ClickRepository>,
    generator: Arc<dyn ShortCodeGenerator>,
}

#[async_trait]
impl UrlService for UrlServiceImpl {
    #[instrument(skip(self))]
    async fn create_short_url(
        &self,
        original_url: &str,
        owner: &Owner,
    ) -> Result<MappingView, CreateUrlError> {
        let created_at = OffsetDateTime::now_utc();

        // NOTE: no existence check up front; the unique index decides and we retry on conflict
        for attempt in 1..=MAX_SHORT_CODE_ATTEMPTS {
            let to_save = NewUrlMapping {
                original_url: original_url.to_owned(),
                short_code: self.generator.generate(),
                owner: owner.clone(),
                created_at,
            };

            match self.url_repo.insert_url(to_save).await {
                Ok(mapping) => {
                    info!(short_code = %mapping.short_code, "Created short URL");
                    return Ok(mapping.into());
                }
                Err(SaveUrlError::ShortCodeTaken(short_code)) => {
                    warn!(attempt, %short_code, "Generated short code that was already taken");
                }
                Err(SaveUrlError::Internal(err)) => {
                    return Err(CreateUrlError::StoreUnavailable(
                        err.context("Failed to persist new short URL"),
                    ));
                }
            }
        }

        Err(CreateUrlError::KeyspaceExhausted {
            attempts: MAX_SHORT_CODE_ATTEMPTS,
        })
    }

    #[instrument(skip(self))]
    async fn list_urls(&self, owner: &Owner) -> Result<Vec<MappingView>, StoreUnavailable> {
        let mappings = self
            .url_repo
            .retrieve_by_owner(owner.id)
            .await
            .map_err(StoreUnavailable)?;
        Ok(mappings.into_iter().map(MappingView::from).collect())
    }

    #[instrument(skip(self))]
    async fn does_url_belong_to_user(
        &self,
        short_code: &str,
        owner: &Owner,
    ) -> Result<bool, StoreUnavailable> {
        let Ok(short_code) = ShortCode::new(short_code.to_owned()) else {
            return Ok(false);
        };
        let mapping = self
            .url_repo
            .retrieve_by_short_code(&short_code)
            .await
            .map_err(StoreUnavailable)?;
        Ok(mapping.is_some_and(|mapping| mapping.owner.id == owner.id))
    }

    #[instrument(skip(self))]
    async fn delete_url(&self, short_code: &str, owner: &Owner) -> Result<(), DeleteUrlError> {
        let short_code =
            ShortCode::new(short_code.to_owned()).map_err(|_| DeleteUrlError::NotFound)?;
        let mapping = self
            .url_repo
            .retrieve_by_short_code(&short_code)
            .await
            .map_err(DeleteUrlError::StoreUnavailable)?
            .ok_or(DeleteUrlError::NotFound)?;
        if mapping.owner.id != owner.id {
            return Err(DeleteUrlError::AuthorizationDenied);
        }

        match self.url_repo.delete_url(mapping.id).await {
            Ok(true) => {
                info!(%short_code, "Deleted short URL");
                Ok(())
            }
            // NOTE: lost a race with a concurrent delete
            Ok(false) => Err(DeleteUrlError::NotFound),
            Err(err) => Err(DeleteUrlError::StoreUnavailable(err)),
        }
    }

    #[instrument(skip(self))]
    async fn reconcile_click_count(&self, short_code: &str) -> Result<u64, ReconcileError> {
        let short_code =
            ShortCode::new(short_code.to_owned()).map_err(|_| ReconcileError::NotFound)?;
        let mapping = self
            .url_repo
            .retrieve_by_short_code(&short_code)
            .await
            .map_err(ReconcileError::StoreUnavailable)?
            .ok_or(ReconcileError::NotFound)?;

        let click_count = self
            .click_repo
            .reconcile_click_count(mapping.id)
            .await
            .map_err(ReconcileError::StoreUnavailable)?
            .ok_or(ReconcileError::NotFound)?;
        if click_count != mapping.click_count {
            warn!(
                %short_code,
                stored = mapping.click_count,
                recorded = click_count,
                "Click count drifted from the click event log"
            );
        }
        Ok(click_count)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{collections::HashSet, sync::Mutex};

    use mockall::predicate::*;
    use uuid::Uuid;

    use crate::{
        click_repo::MockClickRepository,
        short_code::{MockShortCodeGenerator, RandomShortCodeGenerator, SHORT_CODE_LEN},
        url_repo::{MockUrlRepository, UrlMapping},
    };

    use super::*;

    fn owner(username: &str) -> Owner {
        Owner {
            id: Uuid::new_v4(),
            username: username.to_owned(),
        }
    }

    fn code(code: &str) -> ShortCode {
        ShortCode::new(code.to_owned()).unwrap()
    }

    fn saved(url: NewUrlMapping) -> UrlMapping {
        UrlMapping {
            id: Uuid::new_v4(),
            original_url: url.original_url,
            short_code: url.short_code,
            owner: url.owner,
            created_at: url.created_at,
            click_count: 0,
        }
    }

    fn mapping(short_code: &str, owner: &Owner, click_count: u64) -> UrlMapping {
        UrlMapping {
            id: Uuid::new_v4(),
            original_url: "https://a.example/page".to_owned(),
            short_code: code(short_code),
            owner: owner.clone(),
            created_at: OffsetDateTime::now_utc(),
            click_count,
        }
    }

    fn service(
        url_repo: MockUrlRepository,
        click_repo: MockClickRepository,
        generator: impl ShortCodeGenerator + 'static,
    ) -> UrlServiceImpl {
        UrlServiceImpl {
            url_repo: Arc::new(url_repo),
            click_repo: Arc::new(click_repo),
            generator: Arc::new(generator),
        }
    }

    #[tokio::test]
    async fn test_create_short_url_success() {
        let alice = owner("alice");
        let mut generator = MockShortCodeGenerator::new();
        generator
            .expect_generate()
            .once()
            .return_once(|| code("abcDEF12"));

        let mut mock_repo = MockUrlRepository::new();
        let expected_owner = alice.clone();
        mock_repo
            .expect_insert_url()
            .withf(move |url| {
                url.original_url == "https://a.example/page"
                    && url.short_code.as_str() == "abcDEF12"
                    && url.owner == expected_owner
            })
            .once()
            .return_once(|url| Ok(saved(url)));

        let service = service(mock_repo, MockClickRepository::new(), generator);
        let view = service
            .create_short_url("https://a.example/page", &alice)
            .await
            .unwrap();

        assert_eq!(view.short_code, "abcDEF12");
        assert_eq!(view.original_url, "https://a.example/page");
        assert_eq!(view.click_count, 0);
        assert_eq!(view.owner_username, "alice");
    }

    #[tokio::test]
    async fn test_create_short_url_retries_on_collision() {
        let mut generator = MockShortCodeGenerator::new();
        let mut candidates = vec![code("taken001"), code("taken002"), code("freeCode")].into_iter();
        generator
            .expect_generate()
            .times(3)
            .returning(move || candidates.next().unwrap());

        let mut mock_repo = MockUrlRepository::new();
        mock_repo
            .expect_insert_url()
            .times(3)
            .returning(|url| {
                if url.short_code.as_str().starts_with("taken") {
                    Err(SaveUrlError::ShortCodeTaken(url.short_code))
                } else {
                    Ok(saved(url))
                }
            });

        let service = service(mock_repo, MockClickRepository::new(), generator);
        let view = service
            .create_short_url("example.com", &owner("bob"))
            .await
            .unwrap();
        assert_eq!(view.short_code, "freeCode");
    }

    #[tokio::test]
    async fn test_create_short_url_keyspace_exhausted() {
        let mut generator = MockShortCodeGenerator::new();
        generator
            .expect_generate()
            .times(MAX_SHORT_CODE_ATTEMPTS)
            .returning(|| code("sameCode"));

        let mut mock_repo = MockUrlRepository::new();
        mock_repo
            .expect_insert_url()
            .times(MAX_SHORT_CODE_ATTEMPTS)
            .returning(|url| Err(SaveUrlError::ShortCodeTaken(url.short_code)));

        let service = service(mock_repo, MockClickRepository::new(), generator);
        let err = service
            .create_short_url("https://example.com", &owner("carol"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CreateUrlError::KeyspaceExhausted { attempts } if attempts == MAX_SHORT_CODE_ATTEMPTS
        ));
    }

    #[tokio::test]
    async fn test_create_short_url_store_error_is_not_retried() {
        let mut mock_repo = MockUrlRepository::new();
        mock_repo
            .expect_insert_url()
            .once()
            .return_once(|_| Err(SaveUrlError::Internal(anyhow::anyhow!("connection reset"))));

        let service = service(mock_repo, MockClickRepository::new(), RandomShortCodeGenerator);
        let err = service
            .create_short_url("https://example.com", &owner("dave"))
            .await
            .unwrap_err();
        assert!(matches!(err, CreateUrlError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_create_short_url_codes_are_unique() {
        let taken = Arc::new(Mutex::new(HashSet::new()));
        let mut mock_repo = MockUrlRepository::new();
        mock_repo.expect_insert_url().returning({
            let taken = Arc::clone(&taken);
            move |url| {
                if taken.lock().unwrap().insert(url.short_code.clone()) {
                    Ok(saved(url))
                } else {
                    Err(SaveUrlError::ShortCodeTaken(url.short_code))
                }
            }
        });

        let service = service(mock_repo, MockClickRepository::new(), RandomShortCodeGenerator);
        let erin = owner("erin");
        let mut seen = HashSet::new();
        for i in 0..10_000 {
            let view = service
                .create_short_url(&format!("https://example.com/{i}"), &erin)
                .await
                .unwrap();
            assert_eq!(view.short_code.len(), SHORT_CODE_LEN);
            assert!(view.short_code.chars().all(|c| c.is_ascii_alphanumeric()));
            assert!(seen.insert(view.short_code));
        }
    }

    #[tokio::test]
    async fn test_list_urls_maps_to_views() {
        let frank = owner("frank");
        let stored = vec![mapping("code0001", &frank, 4), mapping("code0002", &frank, 0)];
        let mut mock_repo = MockUrlRepository::new();
        mock_repo
            .expect_retrieve_by_owner()
            .with(eq(frank.id))
            .once()
            .return_once(move |_| Ok(stored));

        let service = service(mock_repo, MockClickRepository::new(), RandomShortCodeGenerator);
        let views = service.list_urls(&frank).await.unwrap();
        assert_eq!(
            views
                .iter()
                .map(|view| (view.short_code.as_str(), view.click_count))
                .collect::<Vec<_>>(),
            vec![("code0001", 4), ("code0002", 0)]
        );
        assert!(views.iter().all(|view| view.owner_username == "frank"));
    }

    #[tokio::test]
    async fn test_does_url_belong_to_user() {
        let grace = owner("grace");
        let heidi = owner("heidi");
        let stored = mapping("grace001", &grace, 0);
        let mut mock_repo = MockUrlRepository::new();
        mock_repo
            .expect_retrieve_by_short_code()
            .with(eq(code("grace001")))
            .times(2)
            .returning(move |_| Ok(Some(stored.clone())));
        mock_repo
            .expect_retrieve_by_short_code()
            .with(eq(code("missing1")))
            .once()
            .returning(|_| Ok(None));

        let service = service(mock_repo, MockClickRepository::new(), RandomShortCodeGenerator);
        assert!(service.does_url_belong_to_user("grace001", &grace).await.unwrap());
        assert!(!service.does_url_belong_to_user("grace001", &heidi).await.unwrap());
        assert!(!service.does_url_belong_to_user("missing1", &grace).await.unwrap());
        // NOTE: malformed codes never reach the repository
        assert!(!service.does_url_belong_to_user("no/such", &grace).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_url_checks_owner() {
        let ivan = owner("ivan");
        let judy = owner("judy");
        let stored = mapping("ivan0001", &ivan, 2);
        let stored_id = stored.id;
        let mut mock_repo = MockUrlRepository::new();
        mock_repo
            .expect_retrieve_by_short_code()
            .times(2)
            .returning(move |_| Ok(Some(stored.clone())));
        mock_repo
            .expect_delete_url()
            .with(eq(stored_id))
            .once()
            .return_once(|_| Ok(true));

        let service = service(mock_repo, MockClickRepository::new(), RandomShortCodeGenerator);
        assert!(matches!(
            service.delete_url("ivan0001", &judy).await.unwrap_err(),
            DeleteUrlError::AuthorizationDenied
        ));
        service.delete_url("ivan0001", &ivan).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_url_not_found() {
        let mut mock_repo = MockUrlRepository::new();
        mock_repo
            .expect_retrieve_by_short_code()
            .once()
            .return_once(|_| Ok(None));

        let service = service(mock_repo, MockClickRepository::new(), RandomShortCodeGenerator);
        assert!(matches!(
            service.delete_url("missing1", &owner("ken")).await.unwrap_err(),
            DeleteUrlError::NotFound
        ));
    }

    #[tokio::test]
    async fn test_reconcile_click_count_uses_event_log() {
        let leo = owner("leo");
        let stored = mapping("leo00001", &leo, 7);
        let stored_id = stored.id;
        let mut mock_repo = MockUrlRepository::new();
        mock_repo
            .expect_retrieve_by_short_code()
            .once()
            .return_once(move |_| Ok(Some(stored)));

        let mut click_repo = MockClickRepository::new();
        click_repo
            .expect_reconcile_click_count()
            .with(eq(stored_id))
            .once()
            .return_once(|_| Ok(Some(5)));

        let service = service(mock_repo, click_repo, RandomShortCodeGenerator);
        assert_eq!(service.reconcile_click_count("leo00001").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_reconcile_click_count_mapping_deleted_meanwhile() {
        let leo = owner("leo");
        let mut mock_repo = MockUrlRepository::new();
        mock_repo
            .expect_retrieve_by_short_code()
            .once()
            .return_once(move |_| Ok(Some(mapping("leo00001", &leo, 7))));

        let mut click_repo = MockClickRepository::new();
        click_repo
            .expect_reconcile_click_count()
            .once()
            .return_once(|_| Ok(None));

        let service = service(mock_repo, click_repo, RandomShortCodeGenerator);
        assert!(matches!(
            service.reconcile_click_count("leo00001").await.unwrap_err(),
            ReconcileError::NotFound
        ));
    }

    #[tokio::test]
    async fn test_reconcile_click_count_not_found() {
        let service = service(
            MockUrlRepository::new(),
            MockClickRepository::new(),
            RandomShortCodeGenerator,
        );
        assert!(matches!(
            service.reconcile_click_count("doesnotexist").await.unwrap_err(),
            ReconcileError::NotFound
        ));
    }
}
