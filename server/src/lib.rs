use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bm25_core::config::MAX_K;
use bm25_core::{CancellationToken, DocId, FsBackend, SearchEngine, SharedEngine, Tokenizer};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_k")]
    pub k: i64,
}
fn default_k() -> i64 { 10 }

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_ms: u128,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub score: f32,
    pub snippet: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub index_dir: PathBuf,
    /// Load raw document text for snippets and `/doc`.
    pub load_corpus: bool,
    pub admin_token: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SharedEngine>,
    pub config: Arc<ServerConfig>,
}

/// Error body plus status; core errors map onto client or server faults.
#[derive(Debug)]
pub struct ApiError(StatusCode, String);

impl From<bm25_core::Error> for ApiError {
    fn from(e: bm25_core::Error) -> Self {
        let status = match e {
            bm25_core::Error::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

fn load_engine(config: &ServerConfig) -> bm25_core::Result<SearchEngine> {
    SearchEngine::load(&FsBackend::new(&config.index_dir), config.load_corpus)
}

/// Serve the index in `index_dir`, reading `ADMIN_TOKEN` from the environment.
pub fn build_app(index_dir: String) -> Result<Router> {
    build_app_with(ServerConfig {
        index_dir: PathBuf::from(index_dir),
        load_corpus: true,
        admin_token: std::env::var("ADMIN_TOKEN").ok(),
    })
}

pub fn build_app_with(config: ServerConfig) -> Result<Router> {
    // Load index at startup
    let engine = load_engine(&config)?;
    let app_state = AppState { engine: Arc::new(SharedEngine::new(engine)), config: Arc::new(config) };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/doc/:doc_id", get(doc_handler))
        .route("/index/reload", post(reload_handler))
        .with_state(app_state)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http());
    Ok(app)
}

/// CORS_ALLOW_ORIGIN is a comma-separated origin list; unset or empty allows any origin.
fn cors_layer() -> CorsLayer {
    let origins: Vec<_> = std::env::var("CORS_ALLOW_ORIGIN")
        .map(|val| val.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_default();
    let allow = if origins.is_empty() { AllowOrigin::any() } else { AllowOrigin::list(origins) };
    CorsLayer::new().allow_origin(allow).allow_methods(Any).allow_headers(Any)
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let start = std::time::Instant::now();
    let k = usize::try_from(params.k)
        .ok()
        .filter(|&k| k <= MAX_K)
        .ok_or_else(|| bm25_core::Error::InvalidParameter(format!("k must lie in [0, {MAX_K}], got {}", params.k)))?;

    let engine = state.engine.current();
    let retrieval = engine.search_with(&params.q, k, &CancellationToken::new())?;

    let query_terms: HashSet<String> = engine.tokenizer().tokenize_terms(&params.q).into_iter().collect();
    let results = retrieval
        .hits
        .into_iter()
        .map(|hit| SearchHit {
            doc_id: hit.doc_id,
            score: hit.score,
            snippet: engine.document(hit.doc_id).and_then(|text| snippet(text, engine.tokenizer(), &query_terms)),
        })
        .collect();

    let elapsed = start.elapsed();
    Ok(Json(SearchResponse {
        query: params.q,
        took_ms: elapsed.as_millis(),
        took_s: elapsed.as_secs_f64(),
        total_hits: retrieval.candidates,
        results,
    }))
}

pub async fn doc_handler(
    State(state): State<AppState>,
    Path(doc_id): Path<DocId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let engine = state.engine.current();
    if doc_id >= engine.index().num_docs() {
        return Err(ApiError(StatusCode::NOT_FOUND, format!("no document {doc_id}")));
    }
    let mut obj = serde_json::json!({
        "doc_id": doc_id,
        "length": engine.index().doc_len(doc_id),
    });
    if let Some(text) = engine.document(doc_id) {
        obj["text"] = serde_json::Value::String(text.to_string());
    }
    Ok(Json(obj))
}

/// Reload the artifact from disk and swap it in; queries in flight keep the old index.
async fn reload_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers)?;
    let config = Arc::clone(&state.config);
    let engine = tokio::task::spawn_blocking(move || load_engine(&config))
        .await
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))??;
    let num_docs = engine.index().num_docs();
    let num_terms = engine.index().vocabulary().len();
    state.engine.replace(engine);
    tracing::info!(num_docs, num_terms, "index reloaded");
    Ok(Json(serde_json::json!({ "num_docs": num_docs, "num_terms": num_terms })))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let required = match &state.config.admin_token {
        Some(t) => t,
        None => return Err(ApiError(StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err(ApiError(StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}

/// Up to ~300 bytes around the first token matching a query term, with
/// every matching token wrapped in `<em>`.
fn snippet(text: &str, tokenizer: &Tokenizer, query_terms: &HashSet<String>) -> Option<String> {
    if text.is_empty() { return None; }
    let is_hit = |token: &str| tokenizer.tokenize_terms(token).iter().any(|t| query_terms.contains(t));
    let first_idx = tokenizer.pattern().find_iter(text).find(|m| is_hit(m.as_str())).map(|m| m.start());
    let (start, end) = match first_idx {
        Some(idx) => (
            char_boundary_before(text, idx.saturating_sub(100)),
            char_boundary_before(text, (idx + 200).min(text.len())),
        ),
        None => (0, text.char_indices().nth(200).map_or(text.len(), |(i, _)| i)),
    };
    Some(highlight_terms(&text[start..end], tokenizer, is_hit))
}

fn char_boundary_before(text: &str, mut idx: usize) -> usize {
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

// Single pass over the window, so inserted tags are never matched again.
fn highlight_terms(window: &str, tokenizer: &Tokenizer, is_hit: impl Fn(&str) -> bool) -> String {
    let mut out = String::with_capacity(window.len() + 16);
    let mut last = 0;
    for m in tokenizer.pattern().find_iter(window) {
        if is_hit(m.as_str()) {
            out.push_str(&window[last..m.start()]);
            out.push_str("<em>");
            out.push_str(m.as_str());
            out.push_str("</em>");
            last = m.end();
        }
    }
    out.push_str(&window[last..]);
    out
}
