//! Image Upload Guard and the staged write path shared by every image upload.
//!
//! Validation order for a secondary image is fixed: ownership, then the per-product
//! image count, then MIME type and size. Nothing is written until all of them pass.
//! Writes then go file-to-staging, metadata record, publish; a failure at any step
//! leaves neither a public file nor a dangling record.

use axum::{body::Bytes, extract::multipart::Field};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Account, NewProduct, Product, ProductImage, ShopUpdate},
    repository::{Repository, RepositoryError},
    storage::StorageService,
};

/// Secondary images a single product may hold.
pub const MAX_SECONDARY_IMAGES: usize = 4;

/// Accepted MIME types and the extension each is stored under.
pub const ALLOWED_IMAGE_TYPES: [(&str, &str); 3] = [
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
];

/// ImageUpload
///
/// An image read from a multipart field, not yet validated.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl ImageUpload {
    /// Reads a multipart field fully into memory. The router's body limit bounds it.
    pub async fn from_field(field: Field<'_>) -> AppResult<Self> {
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::validation(format!("Invalid upload: {e}")))?;
        Ok(Self {
            content_type,
            bytes,
        })
    }
}

/// UploadPolicy
///
/// Type and size rules applied to every uploaded image. The ceiling comes from
/// configuration.
#[derive(Debug, Clone, Copy)]
pub struct UploadPolicy {
    pub max_bytes: usize,
}

impl UploadPolicy {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Validates type and size, returning the extension to store the file under.
    pub fn check(&self, upload: &ImageUpload) -> AppResult<&'static str> {
        let declared = upload.content_type.as_deref().unwrap_or_default();
        let extension = ALLOWED_IMAGE_TYPES
            .iter()
            .find(|(mime, _)| mime.eq_ignore_ascii_case(declared))
            .map(|(_, ext)| *ext)
            .ok_or_else(|| AppError::validation("Only JPEG, PNG, and WebP images allowed"))?;

        if upload.bytes.is_empty() {
            return Err(AppError::validation("No image file provided"));
        }
        if upload.bytes.len() > self.max_bytes {
            return Err(AppError::validation(format!(
                "Image must be at most {} bytes",
                self.max_bytes
            )));
        }
        Ok(extension)
    }
}

/// check_secondary_image
///
/// Runs every check for adding a secondary image to `product_id` on behalf of
/// `requester`, in order: ownership, count, type and size. Returns the extension to
/// store the file under. Performs no writes.
pub async fn check_secondary_image(
    repo: &dyn Repository,
    policy: UploadPolicy,
    product_id: i64,
    requester: Uuid,
    upload: Option<&ImageUpload>,
) -> AppResult<&'static str> {
    let product = repo
        .get_product(product_id)
        .await?
        .filter(|p| p.owner_id == requester)
        .ok_or_else(|| AppError::not_found("Product not found"))?;

    let existing = repo.get_product_images(product.id).await?.len();
    if existing >= MAX_SECONDARY_IMAGES {
        return Err(AppError::validation(format!(
            "Maximum {MAX_SECONDARY_IMAGES} additional images allowed"
        )));
    }

    let upload = upload.ok_or_else(|| AppError::validation("No image provided"))?;
    policy.check(upload)
}

/// store_secondary_image
///
/// Stages the file, records it, then publishes it. If publishing fails the record is
/// deleted again.
pub async fn store_secondary_image(
    repo: &dyn Repository,
    storage: &dyn StorageService,
    product_id: i64,
    bytes: &[u8],
    extension: &str,
) -> AppResult<ProductImage> {
    let staged = storage.stage(bytes, extension).await?;

    // On error the staged upload is dropped here and its file discarded.
    let image = repo
        .add_product_image(product_id, &staged.public_path(), MAX_SECONDARY_IMAGES)
        .await
        .map_err(|e| match e {
            RepositoryError::NotFound => AppError::not_found("Product not found"),
            other => AppError::Repository(other),
        })?;

    if let Err(e) = storage.commit(staged).await {
        if let Err(undo) = repo.delete_product_image(image.id).await {
            tracing::error!(image_id = image.id, error = ?undo, "failed to roll back image record");
        }
        return Err(e.into());
    }

    tracing::info!(product_id, image_id = image.id, "secondary image stored");
    Ok(image)
}

/// create_product_with_image
///
/// Creates a product whose optional primary image follows the same staged protocol:
/// the product row is removed again if the image cannot be published.
pub async fn create_product_with_image(
    repo: &dyn Repository,
    storage: &dyn StorageService,
    owner_id: Uuid,
    mut product: NewProduct,
    image: Option<(&[u8], &str)>,
) -> AppResult<Product> {
    let staged = match image {
        Some((bytes, extension)) => Some(storage.stage(bytes, extension).await?),
        None => None,
    };
    product.primary_image_path = staged.as_ref().map(|s| s.public_path());

    let created = repo.create_product(owner_id, product).await?;

    if let Some(staged) = staged {
        if let Err(e) = storage.commit(staged).await {
            if let Err(undo) = repo.delete_product(created.id).await {
                tracing::error!(product_id = created.id, error = ?undo, "failed to roll back product");
            }
            return Err(e.into());
        }
    }

    tracing::info!(product_id = created.id, %owner_id, "product created");
    Ok(created)
}

/// replace_shop_cover
///
/// Updates the owner's shop fields. A new cover is staged, recorded, then published,
/// like product images. A failed publish points the record back at the previous
/// cover; the previous cover file is deleted once the new one is in place.
pub async fn replace_shop_cover(
    repo: &dyn Repository,
    storage: &dyn StorageService,
    account: &Account,
    mut update: ShopUpdate,
    cover: Option<(&[u8], &str)>,
) -> AppResult<Account> {
    let staged = match cover {
        Some((bytes, extension)) => Some(storage.stage(bytes, extension).await?),
        None => None,
    };
    update.cover_image_path = staged.as_ref().map(|s| s.public_path());

    // A failed update drops the staged file with it.
    let updated = repo
        .update_shop(account.id, update)
        .await?
        .ok_or_else(|| AppError::not_found("Account not found"))?;

    let Some(staged) = staged else {
        return Ok(updated);
    };

    if let Err(e) = storage.commit(staged).await {
        if let Err(revert) = repo
            .set_cover_image(account.id, account.cover_image_path.as_deref())
            .await
        {
            tracing::error!(account_id = %account.id, error = ?revert, "failed to restore previous cover");
        }
        return Err(e.into());
    }

    if let Some(previous) = &account.cover_image_path {
        if let Err(e) = storage.remove(previous).await {
            tracing::warn!(path = %previous, error = ?e, "failed to remove previous cover");
        }
    }

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(content_type: &str, len: usize) -> ImageUpload {
        ImageUpload {
            content_type: Some(content_type.to_string()),
            bytes: Bytes::from(vec![0u8; len]),
        }
    }

    #[test]
    fn accepts_listed_types_with_their_extension() {
        let policy = UploadPolicy::new(1024);
        assert_eq!(policy.check(&upload("image/jpeg", 10)).ok(), Some("jpg"));
        assert_eq!(policy.check(&upload("image/png", 10)).ok(), Some("png"));
        assert_eq!(policy.check(&upload("IMAGE/WEBP", 10)).ok(), Some("webp"));
    }

    #[test]
    fn rejects_unlisted_type() {
        let policy = UploadPolicy::new(1024);
        let err = policy.check(&upload("application/pdf", 10)).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn rejects_missing_type_empty_and_oversized() {
        let policy = UploadPolicy::new(16);
        let missing = ImageUpload {
            content_type: None,
            bytes: Bytes::from_static(b"abc"),
        };
        assert!(policy.check(&missing).is_err());
        assert!(policy.check(&upload("image/png", 0)).is_err());
        assert!(policy.check(&upload("image/png", 16)).is_ok());
        assert!(policy.check(&upload("image/png", 17)).is_err());
    }
}
