use std::str::FromStr;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use staysync_core::db::ConflictFilter;
use staysync_core::models::{
    Channel, ChannelLink, ChannelLinkId, Conflict, ConflictId, ConflictStatus, Event, EventId,
    Listing, ListingId,
};
use staysync_core::{BlockPayload, ImportOutcome, ImportPayload, ImportResult, SyncEngine};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::AppError;

const FEED_PREFIX: &str = "/ics/";
const FEED_SUFFIX: &str = ".ics";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    engine: Arc<SyncEngine>,
}

impl AppState {
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self, staysync_core::Error> {
        let engine = SyncEngine::open(&config.database_path, config.token_secret.as_bytes())?;
        Ok(Self::new(config, engine))
    }

    pub fn new(config: Arc<AppConfig>, engine: SyncEngine) -> Self {
        Self {
            config,
            engine: Arc::new(engine),
        }
    }

    /// Run a synchronous engine call on the blocking pool
    async fn run<T, F>(&self, work: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&SyncEngine) -> staysync_core::Result<T> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || work(&engine))
            .await
            .map_err(|err| AppError::internal(format!("engine task failed: {err}")))?
            .map_err(AppError::from)
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/listings", get(list_listings).post(create_listing))
        .route("/listings/{listing_id}", get(get_listing))
        .route("/listings/{listing_id}/deactivate", post(deactivate_listing))
        .route("/listings/{listing_id}/events", get(list_events))
        .route("/listings/{listing_id}/events/imported", post(import_event))
        .route("/listings/{listing_id}/blocks", post(create_block))
        .route("/listings/{listing_id}/channel-links", post(create_channel_link))
        .route("/channel-links/{link_id}/deactivate", post(deactivate_channel_link))
        .route("/events/{event_id}/cancel", post(cancel_event))
        .route("/conflicts", get(list_conflicts))
        .route("/conflicts/{conflict_id}/resolve", post(resolve_conflict))
        .route("/ics/{file}", get(feed))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "request",
                method = %request.method(),
                path = %loggable_path(request.uri().path()),
            )
        }))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

#[derive(Debug, Deserialize)]
struct CreateListingRequest {
    name: String,
    timezone: Option<String>,
}

async fn list_listings(State(state): State<AppState>) -> Result<Json<Vec<Listing>>, AppError> {
    let listings = state.run(|engine| engine.list_listings()).await?;
    Ok(Json(listings))
}

async fn create_listing(
    State(state): State<AppState>,
    request: Result<Json<CreateListingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Listing>), AppError> {
    let Json(request) = request?;
    let listing = state
        .run(move |engine| engine.create_listing(&request.name, request.timezone.as_deref()))
        .await?;
    Ok((StatusCode::CREATED, Json(listing)))
}

async fn get_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
) -> Result<Json<Listing>, AppError> {
    let listing_id: ListingId = parse_id(&listing_id, "listing")?;
    let listing = state
        .run(move |engine| engine.get_listing(listing_id))
        .await?;
    Ok(Json(listing))
}

async fn deactivate_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
) -> Result<Json<Listing>, AppError> {
    let listing_id: ListingId = parse_id(&listing_id, "listing")?;
    let listing = state
        .run(move |engine| engine.deactivate_listing(listing_id))
        .await?;
    Ok(Json(listing))
}

async fn list_events(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
) -> Result<Json<Vec<Event>>, AppError> {
    let listing_id: ListingId = parse_id(&listing_id, "listing")?;
    let events = state
        .run(move |engine| engine.list_events(listing_id))
        .await?;
    Ok(Json(events))
}

async fn import_event(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
    payload: Result<Json<ImportPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<ImportResult>), AppError> {
    let listing_id: ListingId = parse_id(&listing_id, "listing")?;
    let Json(payload) = payload?;
    let result = state
        .run(move |engine| engine.import_event(listing_id, &payload))
        .await?;
    let status = match result.outcome {
        ImportOutcome::Unchanged => StatusCode::OK,
        ImportOutcome::Created | ImportOutcome::Modified => StatusCode::CREATED,
    };
    Ok((status, Json(result)))
}

async fn create_block(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
    payload: Result<Json<BlockPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<ImportResult>), AppError> {
    let listing_id: ListingId = parse_id(&listing_id, "listing")?;
    let Json(payload) = payload?;
    let result = state
        .run(move |engine| engine.create_block(listing_id, &payload))
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

#[derive(Debug, Deserialize)]
struct CreateLinkRequest {
    channel: Channel,
}

#[derive(Debug, Serialize)]
struct LinkResponse {
    #[serde(flatten)]
    link: ChannelLink,
    export_path: String,
    export_url: String,
}

impl LinkResponse {
    fn new(link: ChannelLink, config: &AppConfig) -> Self {
        let export_path = feed_path(&link.export_token);
        Self {
            export_url: config.feed_url(&export_path),
            export_path,
            link,
        }
    }
}

async fn create_channel_link(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
    request: Result<Json<CreateLinkRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<LinkResponse>), AppError> {
    let listing_id: ListingId = parse_id(&listing_id, "listing")?;
    let Json(request) = request?;
    let link = state
        .run(move |engine| engine.create_channel_link(listing_id, request.channel))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(LinkResponse::new(link, &state.config)),
    ))
}

async fn deactivate_channel_link(
    State(state): State<AppState>,
    Path(link_id): Path<String>,
) -> Result<Json<LinkResponse>, AppError> {
    let link_id: ChannelLinkId = parse_id(&link_id, "channel link")?;
    let link = state
        .run(move |engine| engine.deactivate_channel_link(link_id))
        .await?;
    Ok(Json(LinkResponse::new(link, &state.config)))
}

async fn cancel_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<Event>, AppError> {
    let event_id: EventId = parse_id(&event_id, "event")?;
    let event = state
        .run(move |engine| engine.cancel_event(event_id))
        .await?;
    Ok(Json(event))
}

#[derive(Debug, Deserialize)]
struct ConflictQuery {
    listing_id: Option<String>,
    status: Option<String>,
}

impl ConflictQuery {
    fn into_filter(self) -> Result<ConflictFilter, AppError> {
        let listing_id = non_empty(self.listing_id)
            .map(|raw| {
                ListingId::from_str(&raw)
                    .map_err(|_| AppError::bad_request(format!("invalid listing_id `{raw}`")))
            })
            .transpose()?;
        let status = non_empty(self.status)
            .map(|raw| raw.to_ascii_uppercase().parse::<ConflictStatus>())
            .transpose()?;
        Ok(ConflictFilter { listing_id, status })
    }
}

async fn list_conflicts(
    State(state): State<AppState>,
    query: Result<Query<ConflictQuery>, QueryRejection>,
) -> Result<Json<Vec<Conflict>>, AppError> {
    let Query(query) = query?;
    let filter = query.into_filter()?;
    let conflicts = state
        .run(move |engine| engine.list_conflicts(filter))
        .await?;
    Ok(Json(conflicts))
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    winning_event_id: EventId,
    note: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResolveResponse {
    #[serde(flatten)]
    conflict: Conflict,
    shadowed_event_ids: Vec<EventId>,
    deferred_event_ids: Vec<EventId>,
}

async fn resolve_conflict(
    State(state): State<AppState>,
    Path(conflict_id): Path<String>,
    request: Result<Json<ResolveRequest>, JsonRejection>,
) -> Result<Json<ResolveResponse>, AppError> {
    let conflict_id: ConflictId = parse_id(&conflict_id, "conflict")?;
    let Json(request) = request?;
    let resolution = state
        .run(move |engine| {
            engine.resolve_conflict(conflict_id, request.winning_event_id, request.note)
        })
        .await?;
    Ok(Json(ResolveResponse {
        conflict: resolution.conflict,
        shadowed_event_ids: resolution.shadowed,
        deferred_event_ids: resolution.deferred,
    }))
}

async fn feed(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let token = file
        .strip_suffix(FEED_SUFFIX)
        .ok_or_else(|| staysync_core::Error::not_found("feeds are served as .ics files"))?
        .to_string();
    let calendar = state.run(move |engine| engine.render_feed(&token)).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/calendar; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        calendar,
    ))
}

/// Path a channel polls for the feed of `token`
fn feed_path(token: &str) -> String {
    format!("{FEED_PREFIX}{token}{FEED_SUFFIX}")
}

/// Request path as logged; feed tokens are credentials
fn loggable_path(path: &str) -> String {
    if path.starts_with(FEED_PREFIX) {
        format!("{FEED_PREFIX}[REDACTED]{FEED_SUFFIX}")
    } else {
        path.to_string()
    }
}

/// Malformed identifiers cannot name anything that exists
fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, AppError> {
    raw.parse()
        .map_err(|_| staysync_core::Error::not_found(format!("{what} {raw}")).into())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
