use crate::{
    AppState,
    auth::{
        self, AuthUser, SESSION_COOKIE, SessionClaims, credential_expired, generate_profile_slug,
        hash_password, verify_password,
    },
    config::Env,
    error::{AppError, AppResult},
    models::{
        Account, AccountProfile, CreateAccountRequest, ImageResponse, LoginRequest, LoginResponse,
        NewAccount, NewProduct, PortfolioDetail, PortfolioPage, PortfolioSummary, ProductResponse,
        ProductSummary, ResolvedProduct, Role, ShopUpdate, UpdateAccountRequest,
    },
    resolver::{self, parse_position},
    storage::sanitize_key,
    uploads::{self, ImageUpload, UploadPolicy},
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: u32 = 12;
const MAX_PAGE_SIZE: u32 = 100;
/// Exclusive upper bound of a price; the column is NUMERIC(12, 2).
const PRICE_CEILING: i64 = 10_000_000_000;

// --- Query & Form Structs ---

/// PortfolioQuery
///
/// Pagination for the public gallery (GET /portfolios). Kept as raw strings so a bad
/// value is reported as a JSON validation error.
#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PortfolioQuery {
    /// 1-based page number (default 1).
    pub page: Option<String>,
    /// Page size (default 12, at most 100).
    pub limit: Option<String>,
}

fn parse_page_param(raw: Option<&str>, default: u32, name: &str) -> AppResult<u32> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(value) => match value.parse::<u32>() {
            Ok(n) if n >= 1 => Ok(n),
            _ => Err(AppError::validation(format!("{name} must be a positive integer"))),
        },
    }
}

/// MultipartForm
///
/// A multipart body split into text fields and file parts. A part is a file when it
/// carries a filename; an empty file input (blank filename, no bytes) is dropped.
struct MultipartForm {
    text: HashMap<String, String>,
    files: HashMap<String, ImageUpload>,
}

impl MultipartForm {
    async fn read(mut multipart: Multipart) -> AppResult<Self> {
        let mut form = Self {
            text: HashMap::new(),
            files: HashMap::new(),
        };

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::validation(format!("Invalid multipart body: {e}")))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            let file_name_given = field.file_name().map(|n| !n.is_empty());
            if let Some(has_name) = file_name_given {
                let upload = ImageUpload::from_field(field).await?;
                if has_name || !upload.bytes.is_empty() {
                    form.files.insert(name, upload);
                }
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::validation(format!("Invalid field {name}: {e}")))?;
                form.text.insert(name, value);
            }
        }

        Ok(form)
    }

    /// Trimmed text value; blank counts as absent.
    fn text(&self, name: &str) -> Option<String> {
        self.text
            .get(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn take_file(&mut self, name: &str) -> Option<ImageUpload> {
        self.files.remove(name)
    }
}

fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}

fn session_cookie(token: String, env: &Env) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(*env == Env::Production)
        .build()
}

// --- Session Handlers ---

/// login
///
/// [Public Route] Exchanges username and password for a session token, returned in
/// the body and as the `session` cookie. Non-MASTER accounts whose credential has
/// expired are refused.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session issued", body = LoginResponse),
        (status = 401, description = "Invalid credentials or password expired")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<LoginResponse>)> {
    let account = state
        .repo
        .get_account_by_username(payload.username.trim())
        .await?
        .filter(|account| verify_password(&payload.password, &account.password_hash))
        .ok_or_else(|| AppError::auth("Invalid credentials"))?;

    let now = Utc::now();
    if credential_expired(account.role, account.credential_expiry, now) {
        tracing::info!(account_id = %account.id, "login refused: credential expired");
        return Err(AppError::auth("Password expired"));
    }

    let claims = SessionClaims::for_account(&account, now, state.config.session_ttl);
    let token = auth::issue_token(&claims, &state.config.jwt_secret)?;

    tracing::info!(account_id = %account.id, role = account.role.as_str(), "session issued");

    let jar = jar.add(session_cookie(token.clone(), &state.config.env));
    Ok((
        jar,
        Json(LoginResponse {
            token,
            account_id: account.id,
            role: account.role,
            profile_slug: account.profile_slug,
            credential_expiry: account.credential_expiry,
        }),
    ))
}

/// logout
///
/// [Public Route] Clears the session cookie. Tokens are stateless, so a copied
/// bearer token stays valid until its `exp`.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Cookie cleared"))
)]
pub async fn logout(jar: CookieJar) -> (CookieJar, StatusCode) {
    let mut cleared = Cookie::build(SESSION_COOKIE).path("/").build();
    cleared.make_removal();
    (jar.add(cleared), StatusCode::NO_CONTENT)
}

// --- Public Gallery & Portfolio Handlers ---

/// list_portfolios
///
/// [Public Route] Paginated gallery of accounts that own at least one product, newest
/// account first.
#[utoipa::path(
    get,
    path = "/portfolios",
    params(PortfolioQuery),
    responses(
        (status = 200, description = "Gallery page", body = PortfolioPage),
        (status = 400, description = "Invalid pagination")
    )
)]
pub async fn list_portfolios(
    State(state): State<AppState>,
    Query(query): Query<PortfolioQuery>,
) -> AppResult<Json<PortfolioPage>> {
    let page = parse_page_param(query.page.as_deref(), 1, "page")?;
    let limit = parse_page_param(query.limit.as_deref(), DEFAULT_PAGE_SIZE, "limit")?.min(MAX_PAGE_SIZE);

    let total = state.repo.count_portfolios().await?;
    let offset = (i64::from(page) - 1) * i64::from(limit);
    let rows = state.repo.list_portfolios(offset, i64::from(limit)).await?;

    Ok(Json(PortfolioPage {
        data: rows.into_iter().map(PortfolioSummary::from).collect(),
        total,
        page,
        limit,
        total_pages: (total + i64::from(limit) - 1) / i64::from(limit),
    }))
}

/// get_portfolio
///
/// [Public Route] The owner's shop and catalog, each product tagged with the position
/// that addresses it.
#[utoipa::path(
    get,
    path = "/portfolio/{slug}",
    params(("slug" = String, Path, description = "Profile slug")),
    responses(
        (status = 200, description = "Portfolio", body = PortfolioDetail),
        (status = 404, description = "Unknown slug")
    )
)]
pub async fn get_portfolio(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> AppResult<Json<PortfolioDetail>> {
    let owner = state
        .repo
        .get_account_by_slug(&slug)
        .await?
        .ok_or_else(|| AppError::not_found("Portfolio not found"))?;

    let products = state.repo.list_products(owner.id).await?;

    Ok(Json(PortfolioDetail {
        profile: AccountProfile::from(&owner),
        products: products
            .iter()
            .enumerate()
            .map(|(index, product)| ProductSummary {
                position: index as i64 + 1,
                id: product.id,
                name: product.name.clone(),
                price: product.price,
                image: resolver::primary_image_path(product.primary_image_path.as_deref()),
            })
            .collect(),
    }))
}

/// get_product_at_position
///
/// [Public Route] The product at a 1-based position in the owner's catalog.
#[utoipa::path(
    get,
    path = "/portfolio/{slug}/products/{position}",
    params(
        ("slug" = String, Path, description = "Profile slug"),
        ("position" = i64, Path, description = "1-based position in the owner's catalog")
    ),
    responses(
        (status = 200, description = "Product", body = ResolvedProduct),
        (status = 400, description = "Position is not a positive integer"),
        (status = 404, description = "Owner, products or position not found")
    )
)]
pub async fn get_product_at_position(
    State(state): State<AppState>,
    Path((slug, position)): Path<(String, String)>,
) -> AppResult<Json<ResolvedProduct>> {
    let position = parse_position(&position)?;
    let product = resolver::resolve(state.repo.as_ref(), &slug, position).await?;
    Ok(Json(product))
}

fn content_type_for(key: &str) -> &'static str {
    let extension = key.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

/// serve_image
///
/// [Public Route] Streams a stored file by its path relative to the upload root.
/// Traversal segments are stripped before lookup.
#[utoipa::path(
    get,
    path = "/images/{path}",
    params(("path" = String, Path, description = "Path relative to the upload root")),
    responses(
        (status = 200, description = "File bytes"),
        (status = 404, description = "Image not found")
    )
)]
pub async fn serve_image(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> AppResult<impl IntoResponse> {
    let key = sanitize_key(&path);
    let bytes = state
        .storage
        .read(&key)
        .await?
        .ok_or_else(|| AppError::not_found("Image not found"))?;

    Ok(([(header::CONTENT_TYPE, content_type_for(&key))], bytes))
}

// --- Authenticated Handlers ---

/// get_me
///
/// [Authenticated Route] The requester's own account, without the password hash.
#[utoipa::path(
    get,
    path = "/me",
    responses((status = 200, description = "Profile", body = AccountProfile))
)]
pub async fn get_me(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<AccountProfile>> {
    let account = state
        .repo
        .get_account(id)
        .await?
        .ok_or_else(|| AppError::auth("Unauthorized"))?;
    Ok(Json(AccountProfile::from(&account)))
}

/// update_shop
///
/// [Authenticated Route] Multipart update of the requester's shop: `shopName`,
/// `description`, `themeColor` (`#rrggbb`) and an optional `cover` image. Absent
/// fields are left unchanged.
#[utoipa::path(
    put,
    path = "/me/shop",
    responses(
        (status = 200, description = "Updated profile", body = AccountProfile),
        (status = 400, description = "Invalid field or image")
    )
)]
pub async fn update_shop(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<AccountProfile>> {
    let mut form = MultipartForm::read(multipart).await?;

    if form.text.contains_key("shopName") && form.text("shopName").is_none() {
        return Err(AppError::validation("Shop name cannot be empty"));
    }
    let theme_color = form.text("themeColor");
    if let Some(color) = &theme_color {
        if !is_hex_color(color) {
            return Err(AppError::validation("Theme color must look like #rrggbb"));
        }
    }

    let update = ShopUpdate {
        shop_name: form.text("shopName"),
        description: form.text.get("description").map(|d| d.trim().to_string()),
        theme_color,
        cover_image_path: None,
    };

    let policy = UploadPolicy::new(state.config.max_upload_bytes);
    let cover = form.take_file("cover");
    let extension = cover.as_ref().map(|c| policy.check(c)).transpose()?;

    let account = state
        .repo
        .get_account(id)
        .await?
        .ok_or_else(|| AppError::auth("Unauthorized"))?;

    let cover = cover
        .as_ref()
        .zip(extension)
        .map(|(c, ext)| (&c.bytes[..], ext));
    let updated =
        uploads::replace_shop_cover(state.repo.as_ref(), state.storage.as_ref(), &account, update, cover)
            .await?;

    Ok(Json(AccountProfile::from(&updated)))
}

/// create_product
///
/// [Authenticated Route] Multipart product creation in the requester's own catalog:
/// `name`, `description`, `price`, `link` and an optional primary `image`.
#[utoipa::path(
    post,
    path = "/portfolio/{slug}/products",
    params(("slug" = String, Path, description = "Profile slug of the requester")),
    responses(
        (status = 201, description = "Created", body = ProductResponse),
        (status = 400, description = "Invalid field or image"),
        (status = 401, description = "Slug belongs to another account")
    )
)]
pub async fn create_product(
    user: AuthUser,
    State(state): State<AppState>,
    Path(slug): Path<String>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<ProductResponse>)> {
    if user.profile_slug != slug {
        return Err(AppError::auth("Unauthorized"));
    }

    let mut form = MultipartForm::read(multipart).await?;

    let name = form
        .text("name")
        .ok_or_else(|| AppError::validation("Product name is required"))?;
    let price = form
        .text("price")
        .ok_or_else(|| AppError::validation("Price is required"))?
        .parse::<Decimal>()
        .map_err(|_| AppError::validation("Price must be a number"))?;
    if price.is_sign_negative() {
        return Err(AppError::validation("Price cannot be negative"));
    }
    let price = price.round_dp(2);
    if price >= Decimal::from(PRICE_CEILING) {
        return Err(AppError::validation(format!("Price must be below {PRICE_CEILING}")));
    }

    let image = form.take_file("image");
    let policy = UploadPolicy::new(state.config.max_upload_bytes);
    let extension = image.as_ref().map(|i| policy.check(i)).transpose()?;

    let product = NewProduct {
        name,
        description: form.text("description").unwrap_or_default(),
        price,
        primary_image_path: None,
        external_link: form.text("link"),
    };

    let image = image
        .as_ref()
        .zip(extension)
        .map(|(i, ext)| (&i.bytes[..], ext));
    let created = uploads::create_product_with_image(
        state.repo.as_ref(),
        state.storage.as_ref(),
        user.id,
        product,
        image,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(ProductResponse::from(&created))))
}

/// add_product_image
///
/// [Authenticated Route] Adds a secondary image (multipart field `image`) to one of
/// the requester's products. Ownership, count, type and size are all checked before
/// anything is written.
#[utoipa::path(
    post,
    path = "/products/{id}/images",
    params(("id" = i64, Path, description = "Product ID")),
    responses(
        (status = 201, description = "Image stored", body = ImageResponse),
        (status = 400, description = "Limit reached, wrong type or too large"),
        (status = 404, description = "Product not found or not owned")
    )
)]
pub async fn add_product_image(
    AuthUser { id: requester, .. }: AuthUser,
    State(state): State<AppState>,
    Path(product_id): Path<i64>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<ImageResponse>)> {
    let mut form = MultipartForm::read(multipart).await?;
    let upload = form.take_file("image");

    let policy = UploadPolicy::new(state.config.max_upload_bytes);
    let extension = uploads::check_secondary_image(
        state.repo.as_ref(),
        policy,
        product_id,
        requester,
        upload.as_ref(),
    )
    .await?;

    let bytes = upload.map(|u| u.bytes).unwrap_or_default();
    let image = uploads::store_secondary_image(
        state.repo.as_ref(),
        state.storage.as_ref(),
        product_id,
        &bytes,
        extension,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(ImageResponse::from(&image))))
}

// --- Master Handlers ---

/// Loads an account the master may manage. MASTER accounts are reported as absent.
async fn managed_account(state: &AppState, id: Uuid) -> AppResult<Account> {
    state
        .repo
        .get_account(id)
        .await?
        .filter(|account| account.role != Role::Master)
        .ok_or_else(|| AppError::not_found("Account not found"))
}

/// list_admins
///
/// [Master Route] Every ADMIN and USER account, newest first.
#[utoipa::path(
    get,
    path = "/master/admins",
    responses((status = 200, description = "Managed accounts", body = [AccountProfile]))
)]
pub async fn list_admins(State(state): State<AppState>) -> AppResult<Json<Vec<AccountProfile>>> {
    let mut accounts = state.repo.list_accounts(Role::Admin).await?;
    accounts.extend(state.repo.list_accounts(Role::User).await?);
    accounts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(accounts.iter().map(AccountProfile::from).collect()))
}

/// create_admin
///
/// [Master Route] Provisions an ADMIN (default) or USER account. The profile slug is
/// generated from the username unless one is given.
#[utoipa::path(
    post,
    path = "/master/admins",
    request_body = CreateAccountRequest,
    responses(
        (status = 201, description = "Created", body = AccountProfile),
        (status = 400, description = "Invalid input or username/slug taken")
    )
)]
pub async fn create_admin(
    State(state): State<AppState>,
    Json(payload): Json<CreateAccountRequest>,
) -> AppResult<(StatusCode, Json<AccountProfile>)> {
    let username = payload.username.trim();
    if username.is_empty() || payload.password.is_empty() {
        return Err(AppError::validation("Username and password are required"));
    }

    let role = payload.role.unwrap_or(Role::Admin);
    if role == Role::Master {
        return Err(AppError::validation("MASTER accounts cannot be created"));
    }

    let profile_slug = match payload.profile_slug.as_deref().map(str::trim) {
        Some(slug) if !slug.is_empty() => {
            let valid = slug
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
            if !valid {
                return Err(AppError::validation(
                    "Profile slug may only contain lowercase letters, digits and '-'",
                ));
            }
            slug.to_string()
        }
        _ => generate_profile_slug(username),
    };

    let account = state
        .repo
        .create_account(NewAccount {
            username: username.to_string(),
            password_hash: hash_password(&payload.password)?,
            role,
            credential_expiry: payload.credential_expiry,
            profile_slug,
        })
        .await?;

    tracing::info!(account_id = %account.id, role = role.as_str(), "account provisioned");
    Ok((StatusCode::CREATED, Json(AccountProfile::from(&account))))
}

/// get_admin
///
/// [Master Route] One managed account.
#[utoipa::path(
    get,
    path = "/master/admins/{id}",
    params(("id" = Uuid, Path, description = "Account ID")),
    responses(
        (status = 200, description = "Found", body = AccountProfile),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_admin(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AccountProfile>> {
    let account = managed_account(&state, id).await?;
    Ok(Json(AccountProfile::from(&account)))
}

/// update_admin
///
/// [Master Route] Resets the password and/or moves the credential expiry. Sessions
/// already issued keep the expiry captured in their token; the new value applies from
/// the next login.
#[utoipa::path(
    put,
    path = "/master/admins/{id}",
    params(("id" = Uuid, Path, description = "Account ID")),
    request_body = UpdateAccountRequest,
    responses(
        (status = 200, description = "Updated", body = AccountProfile),
        (status = 404, description = "Not found")
    )
)]
pub async fn update_admin(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAccountRequest>,
) -> AppResult<Json<AccountProfile>> {
    managed_account(&state, id).await?;

    let password_hash = match payload.password.as_deref() {
        Some("") => return Err(AppError::validation("Password cannot be empty")),
        Some(password) => Some(hash_password(password)?),
        None => None,
    };

    let account = state
        .repo
        .update_credentials(id, password_hash, payload.credential_expiry)
        .await?
        .ok_or_else(|| AppError::not_found("Account not found"))?;

    Ok(Json(AccountProfile::from(&account)))
}

/// delete_admin
///
/// [Master Route] Hard-deletes an account with its products and images, then removes
/// their stored files. File removal is best-effort.
#[utoipa::path(
    delete,
    path = "/master/admins/{id}",
    params(("id" = Uuid, Path, description = "Account ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_admin(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    managed_account(&state, id).await?;

    let paths = state
        .repo
        .delete_account(id)
        .await?
        .ok_or_else(|| AppError::not_found("Account not found"))?;

    for path in &paths {
        if let Err(e) = state.storage.remove(path).await {
            tracing::warn!(%path, error = ?e, "failed to remove file of deleted account");
        }
    }

    tracing::info!(account_id = %id, files = paths.len(), "account deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_params_default_and_reject_zero() {
        assert_eq!(parse_page_param(None, 12, "limit").ok(), Some(12));
        assert_eq!(parse_page_param(Some(" 3 "), 1, "page").ok(), Some(3));
        assert!(parse_page_param(Some("0"), 1, "page").is_err());
        assert!(parse_page_param(Some("x"), 1, "page").is_err());
    }

    #[test]
    fn theme_color_must_be_six_hex_digits() {
        assert!(is_hex_color("#a1B2c3"));
        assert!(!is_hex_color("a1b2c3"));
        assert!(!is_hex_color("#abc"));
        assert!(!is_hex_color("#gggggg"));
    }

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(content_type_for("a/b.PNG"), "image/png");
        assert_eq!(content_type_for("x.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
