use crate::{AppState, handlers};
use axum::{
    Router,
    routing::get,
};

/// Master Router Module
///
/// Account management, nested under `/master`. The gate rejects every role other
/// than MASTER on this prefix before a handler runs. MASTER accounts themselves never
/// appear here.
pub fn master_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/admins",
            get(handlers::list_admins).post(handlers::create_admin),
        )
        // GET/PUT/DELETE /admins/{id}
        // Delete cascades to products and images and removes their files.
        .route(
            "/admins/{id}",
            get(handlers::get_admin)
                .put(handlers::update_admin)
                .delete(handlers::delete_admin),
        )
}
