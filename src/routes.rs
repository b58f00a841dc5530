use std::collections::HashMap;
use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{error, info};

use crate::db::{Category, Database, Entry, Feed};
use crate::error::{parse_id, IngestError, ValidationError};
use crate::freshness::{FeedStatus, FreshnessTracker};
use crate::ingest::Ingestor;
use crate::ordering::{self, CreateError};

pub struct AppState {
    pub db: Arc<Database>,
    pub ingestor: Arc<Ingestor>,
    pub freshness: Arc<FreshnessTracker>,
    pub per_page: i64,
    /// Flips to `true` on shutdown; handed to manually triggered refreshes
    pub shutdown: watch::Receiver<bool>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/refresh", post(refresh))
        .route("/refresh/status", get(refresh_status))
        .route("/api/category/", get(list_categories).post(create_category))
        .route(
            "/api/category/:id",
            get(get_category).put(update_category).delete(delete_category),
        )
        .route("/api/category/:id/move_up", post(move_category_up))
        .route("/api/category/:id/move_down", post(move_category_down))
        .route("/api/feed/", post(add_feed))
        .route("/api/feed/:id", put(update_feed).delete(delete_feed))
        .route("/api/feed/:id/refresh", post(refresh_feed))
        .route("/api/feed/:id/entries", get(feed_entries))
        .route("/api/entry/search", get(search_entries))
        .route("/api/entry/:id", get(get_entry))
        .route("/api/status", get(unread_status))
        .with_state(state)
}

#[derive(Serialize)]
pub struct FeedWithStatus {
    #[serde(flatten)]
    pub feed: Feed,
    #[serde(flatten)]
    pub status: FeedStatus,
}

#[derive(Serialize)]
pub struct CategoryWithFeeds {
    #[serde(flatten)]
    pub category: Category,
    pub feeds: Vec<FeedWithStatus>,
}

#[derive(Serialize)]
pub struct EntryView {
    #[serde(flatten)]
    pub entry: Entry,
    pub new_entry: bool,
}

// Template structs
#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub categories: Vec<CategoryWithFeeds>,
    pub uncategorized: Vec<FeedWithStatus>,
    pub refreshing: bool,
}

#[derive(Template)]
#[template(path = "refresh_button.html")]
pub struct RefreshButtonTemplate {
    pub refreshing: bool,
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

/// Request failure, rendered as `{"status": "fail", "message": ...}`.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    NotFound(&'static str),
    /// The remote feed could not be fetched
    Upstream(String),
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Validation(message) => (StatusCode::BAD_REQUEST, message),
            AppError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} doesn't exist", what)),
            AppError::Upstream(message) => (StatusCode::BAD_GATEWAY, message),
            AppError::Internal(err) => {
                error!(error = %format!("{:#}", err), "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error".to_string(),
                )
            }
        };
        (status, Json(json!({ "status": "fail", "message": message }))).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<CreateError> for AppError {
    fn from(err: CreateError) -> Self {
        match err {
            CreateError::Validation(e) => e.into(),
            CreateError::Storage(e) => AppError::Internal(e),
        }
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Network(_) | IngestError::Timeout(_) | IngestError::HttpStatus(_) => {
                AppError::Upstream(err.to_string())
            }
            IngestError::Parse(_) => AppError::Validation(err.to_string()),
            IngestError::Storage(_) | IngestError::Cancelled => {
                AppError::Internal(anyhow::Error::new(err))
            }
        }
    }
}

type ApiResult = Result<Json<Value>, AppError>;

fn parse_page(raw: Option<&str>) -> Result<i64, ValidationError> {
    match raw {
        None => Ok(1),
        Some(raw) => match parse_id(raw)? {
            page if page >= 1 => Ok(page),
            _ => Err(ValidationError::WrongParameter(raw.to_string())),
        },
    }
}

/// Row offset of a page. Pages whose rows cannot be addressed are rejected.
fn page_offset(page: i64, per_page: i64) -> Result<i64, ValidationError> {
    page.checked_sub(1)
        .and_then(|p| p.checked_mul(per_page))
        .filter(|offset| offset.checked_add(per_page).is_some())
        .ok_or_else(|| ValidationError::WrongParameter(page.to_string()))
}

async fn validate_category(db: &Database, category: Option<i64>) -> Result<(), AppError> {
    if let Some(id) = category {
        if db.get_category(id).await?.is_none() {
            return Err(ValidationError::WrongParameter(id.to_string()).into());
        }
    }
    Ok(())
}

fn validate_feed_url(raw: &str) -> Result<String, ValidationError> {
    let raw = raw.trim();
    match url::Url::parse(raw) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => Ok(raw.to_string()),
        _ => Err(ValidationError::WrongParameter(raw.to_string())),
    }
}

/// Live categories in display order with their feeds, plus feeds without a category.
async fn load_groups(
    state: &AppState,
) -> anyhow::Result<(Vec<CategoryWithFeeds>, Vec<FeedWithStatus>)> {
    let categories = state.db.list_categories().await?;
    let feeds = state.db.list_ingestable_feeds().await?;
    let mut statuses = state.freshness.status_for_feeds(&feeds).await?;

    let mut by_category: HashMap<Option<i64>, Vec<FeedWithStatus>> = HashMap::new();
    for feed in feeds {
        let status = statuses.remove(&feed.id).unwrap_or(FeedStatus {
            un_read: 0,
            new_entries: false,
        });
        by_category
            .entry(feed.category_id)
            .or_default()
            .push(FeedWithStatus { feed, status });
    }

    let uncategorized = by_category.remove(&None).unwrap_or_default();
    let groups = categories
        .into_iter()
        .map(|category| {
            let feeds = by_category.remove(&Some(category.id)).unwrap_or_default();
            CategoryWithFeeds { category, feeds }
        })
        .collect();

    Ok((groups, uncategorized))
}

// Route handlers
pub async fn index(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let (categories, uncategorized) = load_groups(&state).await?;
    let refreshing = state.ingestor.is_refreshing().await;

    Ok(HtmlTemplate(IndexTemplate {
        categories,
        uncategorized,
        refreshing,
    }))
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ingestor = state.ingestor.clone();
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = ingestor.refresh_all_feeds(shutdown).await {
            error!("Manual refresh failed: {}", e);
        }
    });

    HtmlTemplate(RefreshButtonTemplate { refreshing: true })
}

pub async fn refresh_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let refreshing = state.ingestor.is_refreshing().await;
    HtmlTemplate(RefreshButtonTemplate { refreshing })
}

pub async fn list_categories(State(state): State<Arc<AppState>>) -> ApiResult {
    let (categories, uncategorized) = load_groups(&state).await?;
    Ok(Json(json!({
        "status": "ok",
        "categories": categories,
        "uncategorized": uncategorized,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CategoryForm {
    pub title: Option<String>,
}

pub async fn create_category(
    State(state): State<Arc<AppState>>,
    Json(form): Json<CategoryForm>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let title = form.title.ok_or(ValidationError::MissingField("title"))?;
    let category = ordering::create_category(&state.db, &title).await?;
    info!(category_id = category.id, "Category created");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "ok", "category": category })),
    ))
}

pub async fn get_category(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id(&id)?;
    let category = state
        .db
        .get_category(id)
        .await?
        .ok_or(AppError::NotFound("Category"))?;
    Ok(Json(json!({ "status": "ok", "category": category })))
}

pub async fn update_category(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(form): Json<CategoryForm>,
) -> ApiResult {
    let id = parse_id(&id)?;
    let title = form.title.ok_or(ValidationError::MissingField("title"))?;
    let title = ordering::validate_title(&title)?;

    if !state.db.update_category_title(id, title).await? {
        return Err(AppError::NotFound("Category"));
    }
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn delete_category(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id(&id)?;
    if !state.db.delete_category(id).await? {
        return Err(AppError::NotFound("Category"));
    }
    info!(category_id = id, "Category deleted");
    Ok(Json(json!({ "status": "ok" })))
}

fn move_response(outcome: Option<ordering::MoveOutcome>) -> ApiResult {
    let outcome = outcome.ok_or(AppError::NotFound("Category"))?;
    Ok(Json(match outcome.message() {
        Some(message) => json!({ "status": "ok", "message": message }),
        None => json!({ "status": "ok" }),
    }))
}

pub async fn move_category_up(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id(&id)?;
    move_response(ordering::move_up(&state.db, id).await?)
}

pub async fn move_category_down(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id(&id)?;
    move_response(ordering::move_down(&state.db, id).await?)
}

#[derive(Debug, Deserialize)]
pub struct FeedForm {
    pub feed_url: Option<String>,
    pub category: Option<i64>,
}

/// Subscribe to a feed URL, optionally inside a category.
pub async fn add_feed(
    State(state): State<Arc<AppState>>,
    Json(form): Json<FeedForm>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let feed_url = form.feed_url.ok_or(ValidationError::MissingField("feed_url"))?;
    let feed_url = validate_feed_url(&feed_url)?;
    validate_category(&state.db, form.category).await?;

    let (feed, stats) = state.ingestor.create_feed(&feed_url, form.category).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "ok", "feed": feed, "entries": stats })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct FeedUpdateForm {
    pub feed_url: Option<String>,
    pub title: Option<String>,
    /// Absent keeps the current category, null moves the feed out of it
    #[serde(default, deserialize_with = "present")]
    pub category: Option<Option<i64>>,
    pub site_favicon_url: Option<String>,
}

/// Tells a field sent as null apart from one left out.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub async fn update_feed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(form): Json<FeedUpdateForm>,
) -> ApiResult {
    let id = parse_id(&id)?;
    let feed = state.db.get_feed(id).await?.ok_or(AppError::NotFound("Feed"))?;

    let feed_url = match form.feed_url {
        Some(url) => validate_feed_url(&url)?,
        None => feed.feed_url,
    };
    let title = match form.title.as_deref().map(str::trim) {
        Some("") => return Err(ValidationError::MissingField("title").into()),
        Some(title) => title.to_string(),
        None => feed.title,
    };
    let category_id = match form.category {
        Some(category) => {
            validate_category(&state.db, category).await?;
            category
        }
        None => feed.category_id,
    };
    let favicon = form.site_favicon_url.or(feed.site_favicon_url);

    if !state
        .db
        .update_feed(id, &feed_url, &title, category_id, favicon.as_deref())
        .await?
    {
        return Err(AppError::NotFound("Feed"));
    }
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn delete_feed(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id(&id)?;
    if !state.db.delete_feed(id).await? {
        return Err(AppError::NotFound("Feed"));
    }
    info!(feed_id = id, "Feed deleted");
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn refresh_feed(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id(&id)?;
    let feed = state.db.get_feed(id).await?.ok_or(AppError::NotFound("Feed"))?;

    let stats = state.ingestor.refresh_feed_metadata(&feed).await?;
    let feed = state.db.get_feed(id).await?.ok_or(AppError::NotFound("Feed"))?;
    Ok(Json(json!({ "status": "ok", "feed": feed, "entries": stats })))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

/// Entries of a feed, newest first. Listing counts as reading the feed.
pub async fn feed_entries(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult {
    let id = parse_id(&id)?;
    let page = parse_page(query.page.as_deref())?;
    let offset = page_offset(page, state.per_page)?;
    let feed = state.db.get_feed(id).await?.ok_or(AppError::NotFound("Feed"))?;

    let entries = state
        .db
        .list_entries_for_feed(id, offset, state.per_page)
        .await?;
    let total = state.db.count_entries_for_feed(id).await?;

    let previous_read = feed.last_read_at;
    let entries: Vec<EntryView> = entries
        .into_iter()
        .map(|entry| EntryView {
            new_entry: previous_read.map_or(true, |read| entry.created_at > read),
            entry,
        })
        .collect();
    state.db.touch_feed_read(id, Utc::now()).await?;

    let next_page = (offset + state.per_page < total).then(|| page + 1);
    Ok(Json(json!({
        "status": "ok",
        "feed": feed,
        "entries": entries,
        "page": page,
        "next_page": next_page,
    })))
}

/// A single entry. The first fetch marks it read.
pub async fn get_entry(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id(&id)?;
    let mut entry = state.db.get_entry(id).await?.ok_or(AppError::NotFound("Entry"))?;

    if entry.read_at.is_none() {
        let now = Utc::now();
        if state.db.mark_entry_read(id, now).await? {
            entry.read_at = Some(now);
        }
    }
    Ok(Json(json!({ "status": "ok", "entry": entry })))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub phrase: Option<String>,
    pub page: Option<String>,
}

pub async fn search_entries(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> ApiResult {
    let phrase = query
        .phrase
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or(ValidationError::MissingField("phrase"))?;
    let page = parse_page(query.page.as_deref())?;
    let offset = page_offset(page, state.per_page)?;

    // One extra row tells whether a further page exists
    let mut entries = state
        .db
        .search_entries(phrase, offset, state.per_page + 1)
        .await?;
    let has_more = entries.len() as i64 > state.per_page;
    entries.truncate(state.per_page as usize);

    let next_page = has_more.then(|| {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("phrase", phrase)
            .append_pair("page", &(page + 1).to_string())
            .finish();
        format!("/api/entry/search?{}", query)
    });

    Ok(Json(json!({
        "status": "ok",
        "entries": entries,
        "page": page,
        "next_page": next_page,
    })))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub ids: Option<String>,
}

pub async fn unread_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> ApiResult {
    let ids = query
        .ids
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_id)
        .collect::<Result<Vec<i64>, _>>()?;

    let status = state.freshness.unread_status(&ids).await?;
    Ok(Json(json!({ "status": "ok", "feeds": status })))
}
