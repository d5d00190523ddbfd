use crate::models::{
    Account, NewAccount, NewProduct, PortfolioRow, Product, ProductImage, Role, ShopUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// RepositoryError
///
/// Failures of the persistence layer. `Conflict` and `ImageLimitReached` are caused by
/// the request; everything else is an infrastructure failure.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Unique constraint violated (username or profile slug).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// The product already holds the maximum number of secondary images.
    #[error("image limit of {0} reached")]
    ImageLimitReached(usize),

    /// The row a write depends on does not exist.
    #[error("not found")]
    NotFound,
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Repository Trait
///
/// The abstract contract for all persistence operations. Handlers, the resolver and
/// the upload guard depend only on this trait, so tests can substitute an in-memory
/// implementation for Postgres.
///
/// **Send + Sync + async_trait** make `Arc<dyn Repository>` shareable across Axum's
/// task boundaries.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Accounts ---
    async fn get_account(&self, id: Uuid) -> RepoResult<Option<Account>>;
    async fn get_account_by_username(&self, username: &str) -> RepoResult<Option<Account>>;
    async fn get_account_by_slug(&self, slug: &str) -> RepoResult<Option<Account>>;
    // Fails with `Conflict` when the username or slug is taken.
    async fn create_account(&self, account: NewAccount) -> RepoResult<Account>;
    async fn list_accounts(&self, role: Role) -> RepoResult<Vec<Account>>;
    async fn master_exists(&self) -> RepoResult<bool>;
    // Absent fields are left untouched.
    async fn update_credentials(
        &self,
        id: Uuid,
        password_hash: Option<String>,
        credential_expiry: Option<DateTime<Utc>>,
    ) -> RepoResult<Option<Account>>;
    async fn update_shop(&self, id: Uuid, update: ShopUpdate) -> RepoResult<Option<Account>>;
    /// Sets the cover path outright; `None` clears it.
    async fn set_cover_image(&self, id: Uuid, path: Option<&str>) -> RepoResult<bool>;
    /// Deletes the account and, by cascade, its products and images. Returns every
    /// stored file path that belonged to it, or `None` if no such account existed.
    async fn delete_account(&self, id: Uuid) -> RepoResult<Option<Vec<String>>>;

    // --- Public Gallery ---
    // Only accounts owning at least one product are portfolios.
    async fn count_portfolios(&self) -> RepoResult<i64>;
    async fn list_portfolios(&self, offset: i64, limit: i64) -> RepoResult<Vec<PortfolioRow>>;

    // --- Products ---
    // Ordered by (created_at ASC, id ASC): index + 1 is the product's position.
    async fn list_product_ids(&self, owner_id: Uuid) -> RepoResult<Vec<i64>>;
    async fn list_products(&self, owner_id: Uuid) -> RepoResult<Vec<Product>>;
    async fn get_product(&self, id: i64) -> RepoResult<Option<Product>>;
    // Ordered by (created_at ASC, id ASC).
    async fn get_product_images(&self, product_id: i64) -> RepoResult<Vec<ProductImage>>;
    async fn create_product(&self, owner_id: Uuid, product: NewProduct) -> RepoResult<Product>;
    // Cascades to the product's images.
    async fn delete_product(&self, id: i64) -> RepoResult<bool>;
    /// Records a secondary image, re-checking the count against `max_images` under a
    /// lock on the product row so concurrent uploads cannot exceed it.
    async fn add_product_image(
        &self,
        product_id: i64,
        path: &str,
        max_images: usize,
    ) -> RepoResult<ProductImage>;
    async fn delete_product_image(&self, id: i64) -> RepoResult<bool>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

macro_rules! account_columns {
    () => {
        "id, username, password_hash, role, credential_expiry, profile_slug, \
         shop_name, description, theme_color, cover_image_path, created_at"
    };
}

macro_rules! product_columns {
    () => {
        "id, owner_id, name, description, price, primary_image_path, external_link, created_at"
    };
}

/// Maps a unique-constraint violation to `Conflict`; everything else stays a database error.
fn map_unique_violation(err: sqlx::Error) -> RepositoryError {
    match err.as_database_error() {
        Some(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(db.constraint().unwrap_or("unique").to_string())
        }
        _ => RepositoryError::Database(err),
    }
}

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by PostgreSQL.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_account(&self, id: Uuid) -> RepoResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(concat!(
            "SELECT ",
            account_columns!(),
            " FROM accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn get_account_by_username(&self, username: &str) -> RepoResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(concat!(
            "SELECT ",
            account_columns!(),
            " FROM accounts WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn get_account_by_slug(&self, slug: &str) -> RepoResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(concat!(
            "SELECT ",
            account_columns!(),
            " FROM accounts WHERE profile_slug = $1"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    /// create_account
    ///
    /// Inserts a new account. Unique violations on `username` or `profile_slug` are
    /// reported as `Conflict` instead of a generic database error.
    async fn create_account(&self, account: NewAccount) -> RepoResult<Account> {
        sqlx::query_as::<_, Account>(concat!(
            "INSERT INTO accounts (id, username, password_hash, role, credential_expiry, profile_slug, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW()) RETURNING ",
            account_columns!()
        ))
        .bind(Uuid::new_v4())
        .bind(&account.username)
        .bind(&account.password_hash)
        .bind(account.role)
        .bind(account.credential_expiry)
        .bind(&account.profile_slug)
        .fetch_one(&self.pool)
        .await
        .map_err(map_unique_violation)
    }

    async fn list_accounts(&self, role: Role) -> RepoResult<Vec<Account>> {
        let accounts = sqlx::query_as::<_, Account>(concat!(
            "SELECT ",
            account_columns!(),
            " FROM accounts WHERE role = $1 ORDER BY created_at DESC"
        ))
        .bind(role)
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    async fn master_exists(&self) -> RepoResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM accounts WHERE role = 'MASTER')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// update_credentials
    ///
    /// Uses `COALESCE` so only the provided fields change.
    async fn update_credentials(
        &self,
        id: Uuid,
        password_hash: Option<String>,
        credential_expiry: Option<DateTime<Utc>>,
    ) -> RepoResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(concat!(
            "UPDATE accounts \
             SET password_hash = COALESCE($2, password_hash), \
                 credential_expiry = COALESCE($3, credential_expiry) \
             WHERE id = $1 RETURNING ",
            account_columns!()
        ))
        .bind(id)
        .bind(password_hash)
        .bind(credential_expiry)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn update_shop(&self, id: Uuid, update: ShopUpdate) -> RepoResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(concat!(
            "UPDATE accounts \
             SET shop_name = COALESCE($2, shop_name), \
                 description = COALESCE($3, description), \
                 theme_color = COALESCE($4, theme_color), \
                 cover_image_path = COALESCE($5, cover_image_path) \
             WHERE id = $1 RETURNING ",
            account_columns!()
        ))
        .bind(id)
        .bind(update.shop_name)
        .bind(update.description)
        .bind(update.theme_color)
        .bind(update.cover_image_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn set_cover_image(&self, id: Uuid, path: Option<&str>) -> RepoResult<bool> {
        let result = sqlx::query("UPDATE accounts SET cover_image_path = $2 WHERE id = $1")
            .bind(id)
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// delete_account
    ///
    /// Collects the account's stored file paths and deletes the row inside one
    /// transaction; the foreign keys cascade to products and product images.
    async fn delete_account(&self, id: Uuid) -> RepoResult<Option<Vec<String>>> {
        let mut tx = self.pool.begin().await?;

        let paths = sqlx::query_scalar::<_, String>(
            r#"
            SELECT cover_image_path FROM accounts
             WHERE id = $1 AND cover_image_path IS NOT NULL
            UNION ALL
            SELECT primary_image_path FROM products
             WHERE owner_id = $1 AND primary_image_path IS NOT NULL
            UNION ALL
            SELECT i.path FROM product_images i
              JOIN products p ON p.id = i.product_id
             WHERE p.owner_id = $1
            "#,
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Ok(None);
        }

        tx.commit().await?;
        Ok(Some(paths))
    }

    async fn count_portfolios(&self) -> RepoResult<i64> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM accounts a \
             WHERE EXISTS (SELECT 1 FROM products p WHERE p.owner_id = a.id)",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    /// list_portfolios
    ///
    /// Newest accounts first. The newest product image is selected alongside so the
    /// gallery can fall back to it when no cover was uploaded.
    async fn list_portfolios(&self, offset: i64, limit: i64) -> RepoResult<Vec<PortfolioRow>> {
        let rows = sqlx::query_as::<_, PortfolioRow>(
            r#"
            SELECT a.id, a.profile_slug, a.shop_name, a.description, a.theme_color,
                   a.cover_image_path,
                   (SELECT p.primary_image_path FROM products p
                     WHERE p.owner_id = a.id AND p.primary_image_path IS NOT NULL
                     ORDER BY p.created_at DESC, p.id DESC
                     LIMIT 1) AS latest_product_image
              FROM accounts a
             WHERE EXISTS (SELECT 1 FROM products p WHERE p.owner_id = a.id)
             ORDER BY a.created_at DESC, a.id
             LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_product_ids(&self, owner_id: Uuid) -> RepoResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM products WHERE owner_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn list_products(&self, owner_id: Uuid) -> RepoResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(concat!(
            "SELECT ",
            product_columns!(),
            " FROM products WHERE owner_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(products)
    }

    async fn get_product(&self, id: i64) -> RepoResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(concat!(
            "SELECT ",
            product_columns!(),
            " FROM products WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(product)
    }

    async fn get_product_images(&self, product_id: i64) -> RepoResult<Vec<ProductImage>> {
        let images = sqlx::query_as::<_, ProductImage>(
            "SELECT id, product_id, path, created_at FROM product_images \
             WHERE product_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(images)
    }

    async fn create_product(&self, owner_id: Uuid, product: NewProduct) -> RepoResult<Product> {
        let created = sqlx::query_as::<_, Product>(concat!(
            "INSERT INTO products (owner_id, name, description, price, primary_image_path, external_link, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW()) RETURNING ",
            product_columns!()
        ))
        .bind(owner_id)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price)
        .bind(&product.primary_image_path)
        .bind(&product.external_link)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn delete_product(&self, id: i64) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// add_product_image
    ///
    /// `SELECT … FOR UPDATE` on the product row serializes concurrent uploads for the
    /// same product, so the count check and the insert see the same state.
    async fn add_product_image(
        &self,
        product_id: i64,
        path: &str,
        max_images: usize,
    ) -> RepoResult<ProductImage> {
        let mut tx = self.pool.begin().await?;

        sqlx::query_scalar::<_, i64>("SELECT id FROM products WHERE id = $1 FOR UPDATE")
            .bind(product_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM product_images WHERE product_id = $1",
        )
        .bind(product_id)
        .fetch_one(&mut *tx)
        .await?;

        if count >= max_images as i64 {
            return Err(RepositoryError::ImageLimitReached(max_images));
        }

        let image = sqlx::query_as::<_, ProductImage>(
            "INSERT INTO product_images (product_id, path, created_at) VALUES ($1, $2, NOW()) \
             RETURNING id, product_id, path, created_at",
        )
        .bind(product_id)
        .bind(path)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(image)
    }

    async fn delete_product_image(&self, id: i64) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM product_images WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
