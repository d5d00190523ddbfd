#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use portfolio_storefront::{
    AppConfig, AppState, create_router,
    auth::{SessionClaims, hash_password, issue_token},
    models::{
        Account, NewAccount, NewProduct, PortfolioRow, Product, ProductImage, Role, ShopUpdate,
    },
    repository::{RepoResult, Repository, RepositoryError, RepositoryState},
    storage::StorageState,
};
use rust_decimal::Decimal;
use std::{
    path::Path,
    sync::{Arc, Mutex},
};
use tokio::net::TcpListener;
use uuid::Uuid;

pub const TEST_SECRET: &str = "integration-test-secret";

/// Bytes standing in for an image; the guard checks declared type and size only.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake-image-payload";

#[derive(Default)]
struct State {
    accounts: Vec<Account>,
    products: Vec<Product>,
    images: Vec<ProductImage>,
    next_product_id: i64,
    next_image_id: i64,
    ticks: i64,
}

/// InMemoryRepository
///
/// `Repository` over plain vectors behind a mutex. Every insert gets a strictly later
/// `created_at`, so ordering by creation is deterministic. Deletes cascade like the
/// Postgres foreign keys.
pub struct InMemoryRepository {
    epoch: DateTime<Utc>,
    state: Mutex<State>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self {
            epoch: Utc::now() - Duration::days(1),
            state: Mutex::new(State::default()),
        }
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image_count(&self, product_id: i64) -> usize {
        let state = self.state.lock().unwrap();
        state.images.iter().filter(|i| i.product_id == product_id).count()
    }

    pub fn product_count(&self) -> usize {
        self.state.lock().unwrap().products.len()
    }

    /// Rewrites a product's creation time and moves its record to the end of storage,
    /// so ordering can only come from `(created_at, id)`.
    pub fn restamp_product(&self, product_id: i64, created_at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        let index = state.products.iter().position(|p| p.id == product_id).unwrap();
        let mut product = state.products.remove(index);
        product.created_at = created_at;
        state.products.push(product);
    }
}

impl State {
    fn tick(&mut self, epoch: DateTime<Utc>) -> DateTime<Utc> {
        self.ticks += 1;
        epoch + Duration::seconds(self.ticks)
    }

    fn sorted_products(&self, owner_id: Uuid) -> Vec<Product> {
        let mut products: Vec<Product> = self
            .products
            .iter()
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .collect();
        products.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        products
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_account(&self, id: Uuid) -> RepoResult<Option<Account>> {
        let state = self.state.lock().unwrap();
        Ok(state.accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn get_account_by_username(&self, username: &str) -> RepoResult<Option<Account>> {
        let state = self.state.lock().unwrap();
        Ok(state.accounts.iter().find(|a| a.username == username).cloned())
    }

    async fn get_account_by_slug(&self, slug: &str) -> RepoResult<Option<Account>> {
        let state = self.state.lock().unwrap();
        Ok(state.accounts.iter().find(|a| a.profile_slug == slug).cloned())
    }

    async fn create_account(&self, account: NewAccount) -> RepoResult<Account> {
        let mut state = self.state.lock().unwrap();
        if state.accounts.iter().any(|a| a.username == account.username) {
            return Err(RepositoryError::Conflict("accounts_username_key".into()));
        }
        if state.accounts.iter().any(|a| a.profile_slug == account.profile_slug) {
            return Err(RepositoryError::Conflict("accounts_profile_slug_key".into()));
        }
        let created_at = state.tick(self.epoch);
        let created = Account {
            id: Uuid::new_v4(),
            username: account.username,
            password_hash: account.password_hash,
            role: account.role,
            credential_expiry: account.credential_expiry,
            profile_slug: account.profile_slug,
            shop_name: None,
            description: None,
            theme_color: None,
            cover_image_path: None,
            created_at,
        };
        state.accounts.push(created.clone());
        Ok(created)
    }

    async fn list_accounts(&self, role: Role) -> RepoResult<Vec<Account>> {
        let state = self.state.lock().unwrap();
        let mut accounts: Vec<Account> =
            state.accounts.iter().filter(|a| a.role == role).cloned().collect();
        accounts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(accounts)
    }

    async fn master_exists(&self) -> RepoResult<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.accounts.iter().any(|a| a.role == Role::Master))
    }

    async fn update_credentials(
        &self,
        id: Uuid,
        password_hash: Option<String>,
        credential_expiry: Option<DateTime<Utc>>,
    ) -> RepoResult<Option<Account>> {
        let mut state = self.state.lock().unwrap();
        let Some(account) = state.accounts.iter_mut().find(|a| a.id == id) else {
            return Ok(None);
        };
        if let Some(hash) = password_hash {
            account.password_hash = hash;
        }
        if let Some(expiry) = credential_expiry {
            account.credential_expiry = Some(expiry);
        }
        Ok(Some(account.clone()))
    }

    async fn update_shop(&self, id: Uuid, update: ShopUpdate) -> RepoResult<Option<Account>> {
        let mut state = self.state.lock().unwrap();
        let Some(account) = state.accounts.iter_mut().find(|a| a.id == id) else {
            return Ok(None);
        };
        if update.shop_name.is_some() {
            account.shop_name = update.shop_name;
        }
        if update.description.is_some() {
            account.description = update.description;
        }
        if update.theme_color.is_some() {
            account.theme_color = update.theme_color;
        }
        if update.cover_image_path.is_some() {
            account.cover_image_path = update.cover_image_path;
        }
        Ok(Some(account.clone()))
    }

    async fn set_cover_image(&self, id: Uuid, path: Option<&str>) -> RepoResult<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(account) = state.accounts.iter_mut().find(|a| a.id == id) else {
            return Ok(false);
        };
        account.cover_image_path = path.map(str::to_string);
        Ok(true)
    }

    async fn delete_account(&self, id: Uuid) -> RepoResult<Option<Vec<String>>> {
        let mut state = self.state.lock().unwrap();
        let Some(index) = state.accounts.iter().position(|a| a.id == id) else {
            return Ok(None);
        };
        let account = state.accounts.remove(index);

        let product_ids: Vec<i64> = state
            .products
            .iter()
            .filter(|p| p.owner_id == id)
            .map(|p| p.id)
            .collect();

        let mut paths: Vec<String> = account.cover_image_path.into_iter().collect();
        paths.extend(
            state
                .products
                .iter()
                .filter(|p| p.owner_id == id)
                .filter_map(|p| p.primary_image_path.clone()),
        );
        paths.extend(
            state
                .images
                .iter()
                .filter(|i| product_ids.contains(&i.product_id))
                .map(|i| i.path.clone()),
        );

        state.products.retain(|p| p.owner_id != id);
        state.images.retain(|i| !product_ids.contains(&i.product_id));
        Ok(Some(paths))
    }

    async fn count_portfolios(&self) -> RepoResult<i64> {
        let state = self.state.lock().unwrap();
        let count = state
            .accounts
            .iter()
            .filter(|a| state.products.iter().any(|p| p.owner_id == a.id))
            .count();
        Ok(count as i64)
    }

    async fn list_portfolios(&self, offset: i64, limit: i64) -> RepoResult<Vec<PortfolioRow>> {
        let state = self.state.lock().unwrap();
        let mut owners: Vec<&Account> = state
            .accounts
            .iter()
            .filter(|a| state.products.iter().any(|p| p.owner_id == a.id))
            .collect();
        owners.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        Ok(owners
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|a| PortfolioRow {
                id: a.id,
                profile_slug: a.profile_slug.clone(),
                shop_name: a.shop_name.clone(),
                description: a.description.clone(),
                theme_color: a.theme_color.clone(),
                cover_image_path: a.cover_image_path.clone(),
                latest_product_image: state
                    .sorted_products(a.id)
                    .into_iter()
                    .rev()
                    .find_map(|p| p.primary_image_path),
            })
            .collect())
    }

    async fn list_product_ids(&self, owner_id: Uuid) -> RepoResult<Vec<i64>> {
        let state = self.state.lock().unwrap();
        Ok(state.sorted_products(owner_id).iter().map(|p| p.id).collect())
    }

    async fn list_products(&self, owner_id: Uuid) -> RepoResult<Vec<Product>> {
        let state = self.state.lock().unwrap();
        Ok(state.sorted_products(owner_id))
    }

    async fn get_product(&self, id: i64) -> RepoResult<Option<Product>> {
        let state = self.state.lock().unwrap();
        Ok(state.products.iter().find(|p| p.id == id).cloned())
    }

    async fn get_product_images(&self, product_id: i64) -> RepoResult<Vec<ProductImage>> {
        let state = self.state.lock().unwrap();
        let mut images: Vec<ProductImage> = state
            .images
            .iter()
            .filter(|i| i.product_id == product_id)
            .cloned()
            .collect();
        images.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(images)
    }

    async fn create_product(&self, owner_id: Uuid, product: NewProduct) -> RepoResult<Product> {
        let mut state = self.state.lock().unwrap();
        state.next_product_id += 1;
        let created_at = state.tick(self.epoch);
        let created = Product {
            id: state.next_product_id,
            owner_id,
            name: product.name,
            description: product.description,
            price: product.price,
            primary_image_path: product.primary_image_path,
            external_link: product.external_link,
            created_at,
        };
        state.products.push(created.clone());
        Ok(created)
    }

    async fn delete_product(&self, id: i64) -> RepoResult<bool> {
        let mut state = self.state.lock().unwrap();
        let before = state.products.len();
        state.products.retain(|p| p.id != id);
        state.images.retain(|i| i.product_id != id);
        Ok(state.products.len() < before)
    }

    async fn add_product_image(
        &self,
        product_id: i64,
        path: &str,
        max_images: usize,
    ) -> RepoResult<ProductImage> {
        let mut state = self.state.lock().unwrap();
        if !state.products.iter().any(|p| p.id == product_id) {
            return Err(RepositoryError::NotFound);
        }
        let count = state.images.iter().filter(|i| i.product_id == product_id).count();
        if count >= max_images {
            return Err(RepositoryError::ImageLimitReached(max_images));
        }
        state.next_image_id += 1;
        let created_at = state.tick(self.epoch);
        let image = ProductImage {
            id: state.next_image_id,
            product_id,
            path: path.to_string(),
            created_at,
        };
        state.images.push(image.clone());
        Ok(image)
    }

    async fn delete_product_image(&self, id: i64) -> RepoResult<bool> {
        let mut state = self.state.lock().unwrap();
        let before = state.images.len();
        state.images.retain(|i| i.id != id);
        Ok(state.images.len() < before)
    }
}

// --- Fixtures ---

pub fn test_config(upload_dir: &Path) -> AppConfig {
    AppConfig {
        jwt_secret: TEST_SECRET.to_string(),
        upload_dir: upload_dir.to_path_buf(),
        ..AppConfig::default()
    }
}

pub async fn seed_account(
    repo: &InMemoryRepository,
    username: &str,
    password: &str,
    role: Role,
    credential_expiry: Option<DateTime<Utc>>,
) -> Account {
    repo.create_account(NewAccount {
        username: username.to_string(),
        password_hash: hash_password(password).unwrap(),
        role,
        credential_expiry,
        profile_slug: format!("{}-shop", username.to_lowercase()),
    })
    .await
    .unwrap()
}

pub async fn seed_product(repo: &InMemoryRepository, owner: &Account, name: &str) -> Product {
    repo.create_product(
        owner.id,
        NewProduct {
            name: name.to_string(),
            description: format!("{name} description"),
            price: Decimal::new(1999, 2),
            primary_image_path: Some(format!("{}.png", name.to_lowercase())),
            external_link: None,
        },
    )
    .await
    .unwrap()
}

/// Signs a session for `account` exactly as login would.
pub fn token_for(account: &Account) -> String {
    let claims =
        SessionClaims::for_account(account, Utc::now(), std::time::Duration::from_secs(3600));
    issue_token(&claims, TEST_SECRET).unwrap()
}

pub fn build_app(
    repo: Arc<InMemoryRepository>,
    storage: StorageState,
    config: AppConfig,
) -> Router {
    create_router(AppState {
        repo: repo as RepositoryState,
        storage,
        config,
    })
}

/// Serves `router` on an ephemeral port and returns its base URL.
pub async fn spawn(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://127.0.0.1:{port}")
}

/// Regular files directly under `dir`, sorted. Ignores the staging directory.
pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// Regular files in the staging directory under `dir`.
pub fn staged_in(dir: &Path) -> Vec<String> {
    files_in(&dir.join(portfolio_storefront::storage::STAGING_DIR))
}
