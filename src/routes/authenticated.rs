use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Authenticated Router Module
///
/// Owner-facing endpoints. Every handler takes the `AuthUser` extractor, which reads
/// the claims the gate attached and confirms the account still exists. Ownership of
/// the target slug or product is checked inside the handler.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        .route("/me", get(handlers::get_me))
        // PUT /me/shop
        // Multipart: shopName, description, themeColor, optional cover image.
        .route("/me/shop", put(handlers::update_shop))
        // POST /portfolio/{slug}/products
        // The slug must be the requester's own.
        .route("/portfolio/{slug}/products", post(handlers::create_product))
        // POST /products/{id}/images
        // At most four secondary images per product.
        .route("/products/{id}/images", post(handlers::add_product_image))
}
