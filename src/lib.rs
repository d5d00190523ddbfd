use axum::{
    Router,
    extract::{DefaultBodyLimit, FromRef, Request},
    http::{HeaderName, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod auth;
pub mod config;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod resolver;
pub mod storage;
pub mod uploads;

// Routers grouped by audience (public, authenticated, master).
pub mod routes;
use routes::{authenticated, master, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use repository::{PostgresRepository, Repository, RepositoryState};
pub use storage::{LocalStorage, MockStorageService, StorageService, StorageState};

/// Headroom on top of the image ceiling for the other multipart fields.
const BODY_LIMIT_HEADROOM: usize = 1024 * 1024;

/// ApiDoc
///
/// OpenAPI document for every route, served at `/api-docs/openapi.json` and browsable
/// through Swagger UI.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::login, handlers::logout, handlers::list_portfolios, handlers::get_portfolio,
        handlers::get_product_at_position, handlers::serve_image, handlers::get_me,
        handlers::update_shop, handlers::create_product, handlers::add_product_image,
        handlers::list_admins, handlers::create_admin, handlers::get_admin,
        handlers::update_admin, handlers::delete_admin
    ),
    components(
        schemas(
            models::Role, models::LoginRequest, models::LoginResponse, models::AccountProfile,
            models::CreateAccountRequest, models::UpdateAccountRequest, models::PortfolioPage,
            models::PortfolioSummary, models::PortfolioDetail, models::ProductSummary,
            models::ResolvedProduct, models::OwnerShop, models::ImageView,
            models::ProductResponse, models::ImageResponse,
        )
    ),
    tags(
        (name = "portfolio-storefront", description = "Portfolio & storefront API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single shared container of services and configuration, cloned into every
/// request.
#[derive(Clone)]
pub struct AppState {
    pub repo: RepositoryState,
    pub storage: StorageState,
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for StorageState {
    fn from_ref(app_state: &AppState) -> StorageState {
        app_state.storage.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// Keeps files still in the staging area out of the static `/uploads` mount.
async fn hide_staged_files(request: Request, next: Next) -> Response {
    let path = request.uri().path();
    let decoded = urlencoding::decode(path)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| path.to_string());

    let staged = decoded
        .split(['/', '\\'])
        .any(|segment| segment == storage::STAGING_DIR);
    if staged {
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(request).await
}

/// The body-limit and timeout layers answer with plain-text 413 and 408 responses.
/// Both are rewritten into the `{error}` envelope: an oversized body is a validation
/// failure, a timeout an internal one.
async fn layer_rejections_as_json(response: Response) -> Response {
    match response.status() {
        StatusCode::PAYLOAD_TOO_LARGE => {
            AppError::validation("Request body is too large").into_response()
        }
        StatusCode::REQUEST_TIMEOUT => {
            AppError::Internal("request timed out".to_string()).into_response()
        }
        _ => response,
    }
}

/// create_router
///
/// Assembles every route behind the authorization gate, then applies the body limit,
/// request timeout, the JSON rewrite of their rejections, the request-id/tracing stack
/// and CORS, innermost first.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let uploads = Router::new()
        .fallback_service(ServeDir::new(&state.config.upload_dir))
        .layer(middleware::from_fn(hide_staged_files));

    let body_limit = state.config.max_upload_bytes + BODY_LIMIT_HEADROOM;
    let request_timeout = state.config.request_timeout;

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(authenticated::authenticated_routes())
        .nest("/master", master::master_routes())
        .nest_service("/uploads", uploads)
        // Every route, documentation and static files included, passes the gate.
        .layer(middleware::from_fn_with_state(
            state.clone(),
            gate::authorization_gate,
        ))
        .with_state(state);

    base_router
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(DefaultBodyLimit::disable())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::map_response(layer_rejections_as_json))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span for one request, carrying method, URI and the `x-request-id` so every log
/// line of the request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
