use thiserror::Error;

use crate::{
    error::AppError,
    models::{ImageView, OwnerShop, ResolvedProduct},
    repository::{Repository, RepositoryError},
};

/// Public URL prefix under which every stored upload is served.
pub const UPLOADS_ROOT: &str = "/uploads/";

/// Served in place of a product that has no primary image.
pub const PLACEHOLDER_IMAGE: &str = "/default-product.png";

/// ResolveError
///
/// Ways a `(slug, position)` lookup can fail. All but `Repository` are client-facing
/// and never retried.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Position must be a positive integer")]
    InvalidPosition,
    #[error("Portfolio not found")]
    OwnerNotFound,
    #[error("No products found for this portfolio")]
    NoProducts,
    #[error("Position {position} exceeds total product count {total}")]
    PositionOutOfRange { position: i64, total: i64 },
    // Removed between listing the owner's ids and loading the record.
    #[error("Product not found")]
    ProductVanished,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::InvalidPosition => AppError::validation(err.to_string()),
            ResolveError::Repository(e) => AppError::Repository(e),
            other => AppError::not_found(other.to_string()),
        }
    }
}

/// Parses a raw path segment into a position. Anything that is not an integer ≥ 1 is
/// rejected.
pub fn parse_position(raw: &str) -> Result<i64, ResolveError> {
    match raw.trim().parse::<i64>() {
        Ok(position) if position >= 1 => Ok(position),
        _ => Err(ResolveError::InvalidPosition),
    }
}

/// resolve
///
/// Returns the product at 1-based `position` in the catalog of the account owning
/// `slug`, ordered by `(created_at, id)`.
///
/// The position is recomputed from the owner's full product list on every call, so
/// `position` and `total_products` agree with each other at the instant of the read
/// but may shift once products are added or removed.
pub async fn resolve(
    repo: &dyn Repository,
    slug: &str,
    position: i64,
) -> Result<ResolvedProduct, ResolveError> {
    if position < 1 {
        return Err(ResolveError::InvalidPosition);
    }

    let owner = repo
        .get_account_by_slug(slug)
        .await?
        .ok_or(ResolveError::OwnerNotFound)?;

    let ids = repo.list_product_ids(owner.id).await?;
    if ids.is_empty() {
        return Err(ResolveError::NoProducts);
    }

    let total = ids.len() as i64;
    let Some(&product_id) = ids.get((position - 1) as usize) else {
        return Err(ResolveError::PositionOutOfRange { position, total });
    };

    let product = repo
        .get_product(product_id)
        .await?
        .ok_or(ResolveError::ProductVanished)?;
    let images = repo.get_product_images(product.id).await?;

    tracing::debug!(slug, position, total, product_id, "resolved product position");

    Ok(ResolvedProduct {
        id: product.id,
        name: product.name,
        description: product.description,
        price: product.price,
        external_link: product.external_link,
        created_at: product.created_at,
        image: primary_image_path(product.primary_image_path.as_deref()),
        images: images
            .iter()
            .map(|img| ImageView {
                id: img.id,
                path: normalize_image_path(&img.path),
            })
            .collect(),
        owner: OwnerShop {
            profile_slug: owner.profile_slug,
            shop_name: owner.shop_name,
            theme_color: owner.theme_color,
            description: owner.description,
        },
        position,
        total_products: total,
    })
}

/// normalize_image_path
///
/// Rewrites a stored path so it is served from `/uploads/`. Paths already under that
/// root are returned unchanged; a bare filename, a path with a leading `/`, or one
/// starting with `uploads/` all end up as `/uploads/<rest>`.
pub fn normalize_image_path(path: &str) -> String {
    if path.starts_with(UPLOADS_ROOT) {
        return path.to_string();
    }
    let relative = path.trim_start_matches('/');
    let relative = relative.strip_prefix("uploads/").unwrap_or(relative);
    format!("{UPLOADS_ROOT}{relative}")
}

/// Normalizes a product's primary image, falling back to the placeholder.
pub fn primary_image_path(path: Option<&str>) -> String {
    normalize_optional_path(path).unwrap_or_else(|| PLACEHOLDER_IMAGE.to_string())
}

/// Normalizes an optional path; empty strings count as absent.
pub fn normalize_optional_path(path: Option<&str>) -> Option<String> {
    path.map(str::trim)
        .filter(|p| !p.is_empty())
        .map(normalize_image_path)
}
