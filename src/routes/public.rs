use crate::{AppState, handlers};
use axum::{
    Router,
    response::Redirect,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without a session: health, login/logout, the portfolio
/// gallery, portfolio pages, positional product pages and stored images. Static
/// `/uploads/*` files are mounted separately in `create_router`.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for load balancers.
        .route("/health", get(|| async { "ok" }))
        .route("/", get(|| async { Redirect::to("/portfolios") }))
        .route("/auth/login", post(handlers::login))
        .route("/auth/logout", post(handlers::logout))
        // GET /portfolios?page=&limit=
        // Only accounts owning at least one product are listed.
        .route("/portfolios", get(handlers::list_portfolios))
        .route("/portfolio/{slug}", get(handlers::get_portfolio))
        // GET /portfolio/{slug}/products/{position}
        // Position is 1-based and recomputed on every read.
        .route(
            "/portfolio/{slug}/products/{position}",
            get(handlers::get_product_at_position),
        )
        // GET /images/{*path}
        // Traversal segments are stripped before the file is looked up.
        .route("/images/{*path}", get(handlers::serve_image))
}
