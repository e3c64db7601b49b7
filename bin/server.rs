// eCFR Agency Ingest - Web Server
// REST API with Axum over the reconciled SQLite store

use axum::{
    extract::{Query, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use ecfr_ingest::{
    agency_checksums, complexity_scores, list_agencies, recent_changes, verify_count,
    word_count_stats, AgencyChecksum, AgencySummary, ChangeRecord, ComplexityScore, Config,
    ConnectionPool, HttpSource, IngestError, IngestReport, Ingestor, WordCountStats,
};
use ecfr_ingest::ledger::DEFAULT_HISTORY_LIMIT;

/// Shared application state
#[derive(Clone)]
struct AppState {
    pool: ConnectionPool,
    config: Arc<Config>,
}

// ============================================================================
// Errors
// ============================================================================

/// Handler failure, rendered as `{ error, message }`
#[derive(Debug)]
enum ApiError {
    /// Upstream fetch failed
    Upstream { error: &'static str, message: String },
    /// Snapshot rejected under the abort policy
    Rejected { error: &'static str, message: String },
    Internal { error: &'static str, message: String },
}

impl ApiError {
    fn internal(error: &'static str, err: impl std::fmt::Display) -> Self {
        ApiError::Internal {
            error,
            message: err.to_string(),
        }
    }

    fn from_ingest(err: IngestError) -> Self {
        let error = "Failed to download and store agencies";
        match err {
            IngestError::SourceUnavailable(_) => ApiError::Upstream {
                error,
                message: err.to_string(),
            },
            IngestError::MalformedRecord(_) => ApiError::Rejected {
                error,
                message: err.to_string(),
            },
            IngestError::StorageUnavailable { .. } => ApiError::internal(error, err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::Upstream { error, message } => (StatusCode::BAD_GATEWAY, error, message),
            ApiError::Rejected { error, message } => (StatusCode::UNPROCESSABLE_ENTITY, error, message),
            ApiError::Internal { error, message } => (StatusCode::INTERNAL_SERVER_ERROR, error, message),
        };
        error!(status = status.as_u16(), "{}: {}", error, message);

        (status, Json(json!({ "error": error, "message": message }))).into_response()
    }
}

/// Run blocking store work off the async runtime.
async fn blocking<T, F>(error: &'static str, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ApiError::internal(error, format!("{:#}", e))),
        Err(join) => Err(ApiError::internal(error, join)),
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Serialize)]
struct DownloadResponse {
    message: &'static str,
    stored: bool,
    total_agencies: usize,
    stored_agencies: i64,
    report: IngestReport,
}

#[derive(Serialize)]
struct AgenciesResponse {
    agencies: Vec<AgencySummary>,
    message: &'static str,
}

#[derive(Serialize)]
struct WordCountRow {
    name: String,
    short_name: Option<String>,
    word_count: i64,
    cfr_reference_count: i64,
    checksum: String,
}

impl From<AgencySummary> for WordCountRow {
    fn from(agency: AgencySummary) -> Self {
        Self {
            name: agency.name,
            short_name: agency.short_name,
            word_count: agency.word_count,
            cfr_reference_count: agency.cfr_reference_count,
            checksum: agency.checksum,
        }
    }
}

#[derive(Serialize)]
struct WordCountResponse {
    summary: WordCountStats,
    agencies: Vec<WordCountRow>,
    message: &'static str,
}

#[derive(Serialize)]
struct ChecksumsResponse {
    checksums: Vec<AgencyChecksum>,
    message: &'static str,
}

#[derive(Serialize)]
struct HistoryResponse {
    changes: Vec<ChangeRecord>,
    total_changes: usize,
    message: &'static str,
}

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct ComplexityResponse {
    complexity_analysis: Vec<ComplexityScore>,
    description: &'static str,
    message: &'static str,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /health - Health check
async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": ecfr_ingest::VERSION }))
}

/// POST /ecfr/download - Fetch the upstream snapshot and reconcile it
async fn download_agencies(State(state): State<AppState>) -> Result<Json<DownloadResponse>, ApiError> {
    let pool = state.pool.clone();
    let config = state.config.clone();

    let outcome = tokio::task::spawn_blocking(move || -> Result<(IngestReport, i64), ApiError> {
        let source = HttpSource::new(config.source_url.clone())
            .map_err(|e| ApiError::from_ingest(e.into()))?;
        let report = Ingestor::new(pool.clone(), config.malformed_policy)
            .ingest_from(&source)
            .map_err(ApiError::from_ingest)?;

        let stored = pool
            .get()
            .map_err(|e| ApiError::internal("Failed to count stored agencies", e))?;
        let count = verify_count(&stored)
            .map_err(|e| ApiError::internal("Failed to count stored agencies", e))?;

        Ok((report, count))
    })
    .await
    .map_err(|e| ApiError::internal("Failed to download and store agencies", e))?;

    let (report, stored_agencies) = outcome?;
    info!(
        created = report.created,
        updated = report.updated,
        unchanged = report.unchanged,
        "download complete"
    );

    Ok(Json(DownloadResponse {
        message: "eCFR agencies data downloaded and stored successfully",
        stored: true,
        total_agencies: report.top_level_processed,
        stored_agencies,
        report,
    }))
}

/// GET /ecfr/agencies - Stored top-level agencies
async fn get_agencies(State(state): State<AppState>) -> Result<Json<AgenciesResponse>, ApiError> {
    let agencies = blocking("Failed to fetch stored agencies", move || {
        let conn = state.pool.get()?;
        list_agencies(&conn)
    })
    .await?;

    Ok(Json(AgenciesResponse {
        agencies,
        message: "Returned stored agencies successfully",
    }))
}

/// GET /ecfr/analysis/word-count - Summary plus per-agency word counts
async fn get_word_count(State(state): State<AppState>) -> Result<Json<WordCountResponse>, ApiError> {
    let (summary, agencies) = blocking("Failed to generate word count analysis", move || {
        let conn = state.pool.get()?;
        Ok((word_count_stats(&conn)?, list_agencies(&conn)?))
    })
    .await?;

    Ok(Json(WordCountResponse {
        summary,
        agencies: agencies.into_iter().map(WordCountRow::from).collect(),
        message: "Word count analysis completed successfully",
    }))
}

/// GET /ecfr/analysis/checksums - Current checksum per agency
async fn get_checksums(State(state): State<AppState>) -> Result<Json<ChecksumsResponse>, ApiError> {
    let checksums = blocking("Failed to fetch agency checksums", move || {
        let conn = state.pool.get()?;
        agency_checksums(&conn)
    })
    .await?;

    Ok(Json(ChecksumsResponse {
        checksums,
        message: "Agency checksums retrieved successfully",
    }))
}

/// GET /ecfr/analysis/history?limit=N - Most recent changes
async fn get_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let changes = blocking("Failed to fetch historical changes", move || {
        let conn = state.pool.get()?;
        recent_changes(&conn, limit)
    })
    .await?;

    Ok(Json(HistoryResponse {
        total_changes: changes.len(),
        changes,
        message: "Historical changes retrieved successfully",
    }))
}

/// GET /ecfr/analysis/complexity - Regulatory complexity ranking
async fn get_complexity(State(state): State<AppState>) -> Result<Json<ComplexityResponse>, ApiError> {
    let complexity_analysis = blocking("Failed to calculate complexity score", move || {
        let conn = state.pool.get()?;
        complexity_scores(&conn)
    })
    .await?;

    Ok(Json(ComplexityResponse {
        complexity_analysis,
        description: "Regulatory Complexity Score combines word count (70%) and CFR reference count (30%) to measure agency regulatory burden",
        message: "Complexity analysis completed successfully",
    }))
}

async fn not_found(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Not Found", "message": format!("No route for {}", uri.path()) })),
    )
}

fn app(state: AppState) -> Router {
    let ecfr_routes = Router::new()
        .route("/download", post(download_agencies))
        .route("/agencies", get(get_agencies))
        .route("/analysis/word-count", get(get_word_count))
        .route("/analysis/checksums", get(get_checksums))
        .route("/analysis/history", get(get_history))
        .route("/analysis/complexity", get(get_complexity));

    Router::new()
        .route("/health", get(health_check))
        .nest("/ecfr", ecfr_routes)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    println!("🌐 eCFR Agency Ingest - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = Config::from_env()?;
    let pool = ConnectionPool::open(&config.database_path, config.pool_options())?;
    println!("✓ Database opened: {:?} ({} connections)", config.database_path, pool.size());

    let addr = format!("0.0.0.0:{}", config.port);
    let state = AppState {
        pool,
        config: Arc::new(config),
    };

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/ecfr/agencies", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app(state)).await?;

    Ok(())
}
