use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use habrsearch_core::persist::dump_files;
use habrsearch_core::{
    Article, ArticleId, Comment, Error, ListRequest, Page, RankingConfig, Repository, SearchRequest, SearchResult,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path as FsPath, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const SITE: &str = "https://habr.com";

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub admin_token: Option<String>,
    /// Served under `/images`, where article views point for `has_image` posts.
    pub images_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, admin_token: Option<String>) -> Self {
        Self { repo, admin_token, images_dir: None }
    }

    pub fn with_images(mut self, dir: impl Into<PathBuf>) -> Self {
        self.images_dir = Some(dir.into());
        self
    }

    /// Admin token comes from `ADMIN_TOKEN`; without it config updates are refused.
    pub fn from_env(repo: Arc<Repository>) -> Self {
        Self::new(repo, std::env::var("ADMIN_TOKEN").ok())
    }
}

pub fn build_app(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/api/search", get(search_handler))
        .route("/api/posts", get(list_handler))
        .route("/api/posts/:id", get(post_handler))
        .route("/api/configure/:ns", post(configure_handler));
    if let Some(dir) = &state.images_dir {
        router = router.nest_service("/images", ServeDir::new(dir));
    }
    router.with_state(state).layer(cors_from_env()).layer(TraceLayer::new_for_http())
}

// CORS_ALLOW_ORIGIN is a comma-separated origin list; unset or empty allows any.
fn cors_from_env() -> CorsLayer {
    let origins: Vec<_> = std::env::var("CORS_ALLOW_ORIGIN")
        .map(|val| val.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_default();
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(AllowOrigin::list(origins))
    }
}

#[derive(Debug)]
pub enum ApiError {
    Repo(Error),
    BadRequest(String),
    Unauthorized(&'static str),
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Repo(err)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Repo(Error::NotReady) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Repo(Error::InvalidNamespace(_)) => StatusCode::BAD_REQUEST,
            ApiError::Repo(err) if err.is_not_found() => StatusCode::NOT_FOUND,
            ApiError::Repo(_) => StatusCode::BAD_GATEWAY,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match self {
            ApiError::Repo(err) => err.to_string(),
            ApiError::BadRequest(msg) | ApiError::Internal(msg) => msg,
            ApiError::Unauthorized(msg) => msg.to_string(),
        };
        if status.is_server_error() {
            warn!(%status, %error, "request failed");
        }
        (status, Json(ErrorResponse { success: false, error })).into_response()
    }
}

/// Run a repository call off the async workers.
async fn run<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Repository) -> habrsearch_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let repo = state.repo.clone();
    tokio::task::spawn_blocking(move || f(&repo)).await.map_err(|e| ApiError::Internal(e.to_string()))?.map_err(ApiError::from)
}

#[derive(Debug, Serialize)]
pub struct ArticleView {
    #[serde(flatten)]
    pub article: Article,
    pub link: String,
    pub image: String,
}

impl From<Article> for ArticleView {
    fn from(article: Article) -> Self {
        let link = format!("{SITE}/post/{}/", article.id);
        let image = if article.has_image { format!("/images/{}.jpeg", article.id) } else { String::new() };
        Self { article, link, image }
    }
}

#[derive(Debug, Serialize)]
pub struct CommentView {
    #[serde(flatten)]
    pub comment: Comment,
    pub link: String,
}

impl From<Comment> for CommentView {
    fn from(comment: Comment) -> Self {
        let link = format!("{SITE}/post/{}/#comment_{}", comment.article_id, comment.id);
        Self { comment, link }
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total_count: usize,
    pub elapsed_ms: u64,
    pub success: bool,
}

impl<T> ListResponse<T> {
    fn from_result<E>(res: SearchResult<E>) -> Self
    where
        T: From<E>,
    {
        Self {
            items: res.items.into_iter().map(T::from).collect(),
            total_count: res.total,
            elapsed_ms: res.elapsed.as_millis() as u64,
            success: true,
        }
    }
}

/// Numbers that fail to parse count as absent.
fn lenient<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
{
    let raw: Option<String> = Option::deserialize(de)?;
    Ok(raw.and_then(|s| s.trim().parse().ok()))
}

/// `1`, any positive number, or `true`.
fn flag<'de, D>(de: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(de)?;
    Ok(match raw.as_deref().map(str::trim) {
        Some("true") => true,
        Some(s) => s.parse::<u64>().map_or(false, |n| n > 0),
        None => false,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
    #[serde(default, deserialize_with = "lenient")]
    pub limit: Option<usize>,
    #[serde(default, deserialize_with = "lenient")]
    pub offset: Option<usize>,
    #[serde(default)]
    pub sort_by: String,
    #[serde(default, deserialize_with = "flag")]
    pub sort_desc: bool,
    #[serde(default)]
    pub search_type: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub user: String,
    #[serde(default, deserialize_with = "lenient")]
    pub limit: Option<usize>,
    #[serde(default, deserialize_with = "lenient")]
    pub offset: Option<usize>,
    /// Unsigned on the wire: `-1` or any other non-number means unset.
    #[serde(default, deserialize_with = "lenient")]
    pub start_time: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub end_time: Option<u64>,
    #[serde(default, deserialize_with = "flag")]
    pub with_comments: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct PostParams {
    #[serde(default, deserialize_with = "flag")]
    pub with_comments: bool,
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.repo.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Result<Response, ApiError> {
    let mut req = SearchRequest::new(params.query).page(params.offset, params.limit);
    if !params.sort_by.is_empty() {
        req = req.sort_by(params.sort_by, params.sort_desc);
    }
    match params.search_type.as_str() {
        "" | "posts" => {
            let res = run(&state, move |repo| repo.search_articles(&req)).await?;
            Ok(Json(ListResponse::<ArticleView>::from_result(res)).into_response())
        }
        "comments" => {
            let res = run(&state, move |repo| repo.search_comments(&req)).await?;
            Ok(Json(ListResponse::<CommentView>::from_result(res)).into_response())
        }
        _ => Err(ApiError::BadRequest("invalid search_type, valid values are 'comments' or 'posts'".into())),
    }
}

pub async fn list_handler(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse<ArticleView>>, ApiError> {
    let req = ListRequest {
        page: Page::new(params.offset, params.limit),
        author: Some(params.user),
        start_time: params.start_time.and_then(|t| i64::try_from(t).ok()),
        end_time: params.end_time.and_then(|t| i64::try_from(t).ok()),
        include_comments: params.with_comments,
    };
    let res = run(&state, move |repo| repo.list_articles(&req)).await?;
    Ok(Json(ListResponse::from_result(res)))
}

pub async fn post_handler(
    State(state): State<AppState>,
    Path(id): Path<ArticleId>,
    Query(params): Query<PostParams>,
) -> Result<Json<ArticleView>, ApiError> {
    let article = run(&state, move |repo| repo.get_article(id, params.with_comments)).await?;
    Ok(Json(ArticleView::from(article)))
}

pub async fn configure_handler(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    authorize(&state, &headers)?;
    let cfg: RankingConfig = serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    run(&state, move |repo| repo.set_config(&ns, cfg)).await?;
    Ok("ok")
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(required) = &state.admin_token else {
        return Err(ApiError::Unauthorized("ADMIN_TOKEN not set"));
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err(ApiError::Unauthorized("invalid admin token"))
    }
}

/// Reload dumps (when a dump directory is given) and resync the repository.
pub fn resync_once(repo: &Repository, dump_path: Option<&FsPath>) -> anyhow::Result<()> {
    if let Some(dir) = dump_path {
        let stats = repo.restore(dump_files(dir)?)?;
        info!(loaded = stats.loaded, failed = stats.failed, "dumps reloaded");
    }
    repo.resync()?;
    Ok(())
}

/// Run [`resync_once`] every `period`, starting one period from now.
pub fn spawn_resync(repo: Arc<Repository>, dump_path: Option<PathBuf>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            ticker.tick().await;
            info!("syncing");
            let (repo, dump_path) = (repo.clone(), dump_path.clone());
            match tokio::task::spawn_blocking(move || resync_once(&repo, dump_path.as_deref())).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "resync failed"),
                Err(err) => warn!(error = %err, "resync task panicked"),
            }
        }
    })
}
