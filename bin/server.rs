// Bee Profile Aggregator - Web Server
// Read-only REST API over the last completed aggregation run

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use bee_profile::{
    init_logging, AppConfig, BeeProfile, ConservationStatus, ProfileStore, SpeciesKey,
    SqliteProfileStore, StoreError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
struct AppState {
    store: Arc<dyn ProfileStore>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response()
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        }),
    )
        .into_response()
}

fn store_error(context: &str, e: StoreError) -> Response {
    if e.is_not_found() {
        return error_response(StatusCode::NOT_FOUND, e.to_string());
    }
    error!("Error {}: {}", context, e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Profile listing entry (simplified for API)
#[derive(Serialize)]
struct ProfileSummaryResponse {
    species_key: String,
    scientific_name: String,
    family: Option<String>,
    conservation_status: &'static str,
    status_confidence: String,
    status_source_provider: String,
    contributing_records: usize,
    completeness: f64,
}

impl From<BeeProfile> for ProfileSummaryResponse {
    fn from(profile: BeeProfile) -> Self {
        Self {
            species_key: profile.species_key.to_string(),
            conservation_status: profile.conservation_status.code(),
            status_confidence: format!("{:?}", profile.status_confidence),
            status_source_provider: profile.status_source_provider.code().to_string(),
            contributing_records: profile.contributing_records.len(),
            completeness: profile.completeness(),
            scientific_name: profile.scientific_name,
            family: profile.family,
        }
    }
}

#[derive(Deserialize)]
struct ProfileFilter {
    /// Status code, e.g. `EN`
    status: Option<String>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    ApiResponse::ok("OK")
}

/// GET /api/profiles?status=EN - List profiles of the last run
async fn list_profiles(
    State(state): State<AppState>,
    Query(filter): Query<ProfileFilter>,
) -> impl IntoResponse {
    let wanted = match filter.status.as_deref() {
        None => None,
        Some(code) => match ConservationStatus::from_code(code) {
            Some(status) => Some(status),
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Unknown status code: {:?}", code),
                )
            }
        },
    };

    let profiles = match state.store.list_profiles() {
        Ok(iter) => iter.collect::<Result<Vec<_>, _>>(),
        Err(e) => Err(e),
    };

    match profiles {
        Ok(profiles) => {
            let response: Vec<ProfileSummaryResponse> = profiles
                .into_iter()
                .filter(|p| wanted.map_or(true, |status| p.conservation_status == status))
                .map(|p| p.into())
                .collect();

            ApiResponse::ok(response)
        }
        Err(e) => store_error("listing profiles", e),
    }
}

/// GET /api/profiles/:name - One full profile by (URL-encoded) scientific name
async fn get_profile(State(state): State<AppState>, Path(name): Path<String>) -> impl IntoResponse {
    // Decode URL-encoded name
    let decoded_name = urlencoding::decode(&name)
        .unwrap_or_else(|_| name.clone().into())
        .into_owned();

    match state.store.get_profile(&SpeciesKey::from_scientific_name(&decoded_name)) {
        Ok(profile) => ApiResponse::ok(profile),
        Err(e) => store_error("getting profile", e),
    }
}

/// GET /api/review - Entities the resolver refused to merge
async fn needs_review(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.needs_review() {
        Ok(entries) => ApiResponse::ok(entries),
        Err(e) => store_error("getting review list", e),
    }
}

/// GET /api/runs/latest - Metadata of the last completed run
async fn latest_run(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.last_run() {
        Ok(Some(run)) => ApiResponse::ok(run),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "no completed run".to_string()),
        Err(e) => store_error("getting last run", e),
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    let config = AppConfig::load().expect("Failed to load configuration");
    init_logging(&config.log_filter);

    println!("🌐 Bee Profile Aggregator - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if !config.database_path.exists() {
        eprintln!("❌ Database not found at {:?}", config.database_path);
        eprintln!("   Run: bee-profile aggregate <input.json>");
        eprintln!("   to build profiles first.");
        std::process::exit(1);
    }

    let store = SqliteProfileStore::open(&config.database_path).expect("Failed to open database");
    info!(path = %config.database_path.display(), "database opened");

    // Create shared state
    let state = AppState {
        store: Arc::new(store),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/profiles", get(list_profiles))
        .route("/profiles/:name", get(get_profile))
        .route("/review", get(needs_review))
        .route("/runs/latest", get(latest_run))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.server_addr)
        .await
        .expect("Failed to bind to address");

    println!("\n🚀 Server running on http://{}", config.server_addr);
    println!("   API: http://{}/api/profiles", config.server_addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
