use std::fmt::Debug;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::IntoResponse,
    routing,
};
use rearch::Container;
use tally_short::{
    analytics::{AnalyticsError, DateRange, analytics_service_capsule},
    api::{AnalyticsQuery, ClickCountView, CreateUrlPayload, Error},
    config,
    redirect_service::{self, ResolveError, redirect_service_capsule},
    url_repo::Owner,
    url_service::{
        CreateUrlError, DeleteUrlError, ReconcileError, StoreUnavailable, url_service_capsule,
    },
};
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tracing::{error, info, instrument};
use uuid::Uuid;

const USER_ID_HEADER: &str = "x-user-id";
const USERNAME_HEADER: &str = "x-username";

type ErrorResponse = (StatusCode, Json<Error>);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let container = config::init_container().await?;

    let app = Router::new()
        .route("/{short_code}", routing::get(redirect))
        .route("/api/url/shorten", routing::post(shorten))
        .route("/api/url/myurls", routing::get(my_urls))
        .route("/api/url/totals", routing::get(my_totals))
        .route("/api/url/analytics/{short_code}", routing::get(analytics))
        .route("/api/url/{short_code}", routing::delete(delete_url))
        .route("/api/url/{short_code}/reconcile", routing::post(reconcile))
        .with_state(container.clone());

    let listener = TcpListener::bind(container.read(config::addr_capsule)).await?;
    info!(addr = %listener.local_addr()?, "Started listening on TCP");
    axum::serve(listener, app).await?;
    Ok(())
}

/// The authenticated caller, as asserted by the fronting identity provider.
#[derive(Debug)]
struct Caller(Owner);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ErrorResponse;

    async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
        owner_from_headers(&parts.headers)
            .map(Self)
            .ok_or_else(|| {
                let err_uuid = Uuid::new_v4();
                info!(?err_uuid, "Request is missing valid identity headers");
                error_response(StatusCode::UNAUTHORIZED, "Unauthorized", err_uuid)
            })
    }
}

fn owner_from_headers(headers: &HeaderMap) -> Option<Owner> {
    let id = headers.get(USER_ID_HEADER)?.to_str().ok()?.parse().ok()?;
    let username = headers.get(USERNAME_HEADER)?.to_str().ok()?.trim();
    if username.is_empty() {
        return None;
    }
    Some(Owner {
        id,
        username: username.to_owned(),
    })
}

#[instrument(skip(container))]
async fn redirect(
    State(container): State<Container>,
    Path(short_code): Path<String>,
) -> impl IntoResponse {
    container
        .read(redirect_service_capsule)
        .resolve(&short_code)
        .await
        .map(|redirect_service::Redirect { url }| (StatusCode::FOUND, [(header::LOCATION, url)]))
        .map_err(|error: ResolveError| {
            let err_uuid = Uuid::new_v4();
            match error {
                ResolveError::NotFound => {
                    error_response(StatusCode::NOT_FOUND, "Not found", err_uuid)
                }
                ResolveError::StoreUnavailable(_) => internal_error(err_uuid, &error),
            }
        })
}

#[instrument(skip(container))]
async fn shorten(
    State(container): State<Container>,
    Caller(owner): Caller,
    Json(CreateUrlPayload { original_url }): Json<CreateUrlPayload>,
) -> impl IntoResponse {
    container
        .read(url_service_capsule)
        .create_short_url(&original_url, &owner)
        .await
        .map(|mapping| (StatusCode::CREATED, Json(mapping)))
        .map_err(|error: CreateUrlError| {
            let err_uuid = Uuid::new_v4();
            match error {
                CreateUrlError::KeyspaceExhausted { .. } => {
                    error!(?err_uuid, ?error, "Could not allocate a short code");
                    error_response(
                        StatusCode::SERVICE_UNAVAILABLE,
                        &error.to_string(),
                        err_uuid,
                    )
                }
                CreateUrlError::StoreUnavailable(_) => internal_error(err_uuid, &error),
            }
        })
}

#[instrument(skip(container))]
async fn my_urls(State(container): State<Container>, Caller(owner): Caller) -> impl IntoResponse {
    container
        .read(url_service_capsule)
        .list_urls(&owner)
        .await
        .map(Json)
        .map_err(|error: StoreUnavailable| internal_error(Uuid::new_v4(), &error))
}

#[instrument(skip(container))]
async fn analytics(
    State(container): State<Container>,
    Caller(owner): Caller,
    Path(short_code): Path<String>,
    Query(AnalyticsQuery {
        start_date,
        end_date,
    }): Query<AnalyticsQuery>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let belongs_to_caller = container
        .read(url_service_capsule)
        .does_url_belong_to_user(&short_code, &owner)
        .await
        .map_err(|error| internal_error(Uuid::new_v4(), &error))?;
    if !belongs_to_caller {
        let err_uuid = Uuid::new_v4();
        info!(?err_uuid, %short_code, "Caller does not own the short code");
        return Err(error_response(StatusCode::FORBIDDEN, "Forbidden", err_uuid));
    }

    let range = DateRange::from_query(
        start_date.as_deref(),
        end_date.as_deref(),
        OffsetDateTime::now_utc(),
    )
    .map_err(analytics_error)?;
    container
        .read(analytics_service_capsule)
        .click_histogram(&short_code, range)
        .await
        .map(Json)
        .map_err(analytics_error)
}

#[instrument(skip(container))]
async fn my_totals(
    State(container): State<Container>,
    Caller(owner): Caller,
    Query(AnalyticsQuery {
        start_date,
        end_date,
    }): Query<AnalyticsQuery>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let range = DateRange::from_query(
        start_date.as_deref(),
        end_date.as_deref(),
        OffsetDateTime::now_utc(),
    )
    .map_err(analytics_error)?;
    container
        .read(analytics_service_capsule)
        .total_clicks_by_owner(&owner, range)
        .await
        .map(Json)
        .map_err(analytics_error)
}

#[instrument(skip(container))]
async fn delete_url(
    State(container): State<Container>,
    Caller(owner): Caller,
    Path(short_code): Path<String>,
) -> impl IntoResponse {
    container
        .read(url_service_capsule)
        .delete_url(&short_code, &owner)
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(|error: DeleteUrlError| {
            let err_uuid = Uuid::new_v4();
            match error {
                DeleteUrlError::NotFound => {
                    error_response(StatusCode::NOT_FOUND, "Not found", err_uuid)
                }
                DeleteUrlError::AuthorizationDenied => {
                    info!(?err_uuid, ?error, "Caller tried to delete a foreign short code");
                    error_response(StatusCode::FORBIDDEN, "Forbidden", err_uuid)
                }
                DeleteUrlError::StoreUnavailable(_) => internal_error(err_uuid, &error),
            }
        })
}

#[instrument(skip(container))]
async fn reconcile(
    State(container): State<Container>,
    Caller(owner): Caller,
    Path(short_code): Path<String>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let url_service = container.read(url_service_capsule);
    let belongs_to_caller = url_service
        .does_url_belong_to_user(&short_code, &owner)
        .await
        .map_err(|error| internal_error(Uuid::new_v4(), &error))?;
    if !belongs_to_caller {
        return Err(error_response(
            StatusCode::FORBIDDEN,
            "Forbidden",
            Uuid::new_v4(),
        ));
    }

    url_service
        .reconcile_click_count(&short_code)
        .await
        .map(|click_count| Json(ClickCountView { click_count }))
        .map_err(|error: ReconcileError| {
            let err_uuid = Uuid::new_v4();
            match error {
                ReconcileError::NotFound => {
                    error_response(StatusCode::NOT_FOUND, "Not found", err_uuid)
                }
                ReconcileError::StoreUnavailable(_) => internal_error(err_uuid, &error),
            }
        })
}

fn analytics_error(error: AnalyticsError) -> ErrorResponse {
    let err_uuid = Uuid::new_v4();
    match error {
        AnalyticsError::InvalidDate { .. } => {
            info!(?err_uuid, ?error, "User submitted a bad request");
            error_response(StatusCode::BAD_REQUEST, &error.to_string(), err_uuid)
        }
        AnalyticsError::StoreUnavailable(_) => internal_error(err_uuid, &error),
    }
}

fn internal_error(err_uuid: Uuid, error: &impl Debug) -> ErrorResponse {
    error!(?err_uuid, ?error, "Encountered an error during a request");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error",
        err_uuid,
    )
}

fn error_response(status: StatusCode, message: &str, err_uuid: Uuid) -> ErrorResponse {
    (
        status,
        Json(Error {
            error: message.to_owned(),
            error_id: err_uuid.to_string(),
        }),
    )
}
