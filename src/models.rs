use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Core Records (Mapped to Database) ---

/// Role
///
/// Access tier carried by every account and every session token. Stored as the
/// Postgres enum `account_role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, sqlx::Type)]
#[sqlx(type_name = "account_role", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
#[ts(export)]
pub enum Role {
    Master,
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "MASTER",
            Role::Admin => "ADMIN",
            Role::User => "USER",
        }
    }
}

/// Account
///
/// Row of the `accounts` table. Never serialized directly: the password hash stays
/// server-side and responses go through `AccountProfile`.
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    // MASTER accounts are exempt from expiry even when this is set.
    pub credential_expiry: Option<DateTime<Utc>>,
    pub profile_slug: String,
    pub shop_name: Option<String>,
    pub description: Option<String>,
    pub theme_color: Option<String>,
    pub cover_image_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Product
///
/// Row of the `products` table. Its position within the owner's catalog is not stored;
/// see `resolver`.
#[derive(Debug, Clone, FromRow)]
pub struct Product {
    pub id: i64,
    pub owner_id: Uuid,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub primary_image_path: Option<String>,
    pub external_link: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// ProductImage
///
/// A secondary image of a product. At most four exist per product.
#[derive(Debug, Clone, FromRow)]
pub struct ProductImage {
    pub id: i64,
    pub product_id: i64,
    pub path: String,
    pub created_at: DateTime<Utc>,
}

/// PortfolioRow
///
/// One gallery entry as read from the database: the account's shop fields plus the
/// image of its newest product, used when no cover was uploaded.
#[derive(Debug, Clone, FromRow)]
pub struct PortfolioRow {
    pub id: Uuid,
    pub profile_slug: String,
    pub shop_name: Option<String>,
    pub description: Option<String>,
    pub theme_color: Option<String>,
    pub cover_image_path: Option<String>,
    pub latest_product_image: Option<String>,
}

// --- Repository Inputs ---

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub credential_expiry: Option<DateTime<Utc>>,
    pub profile_slug: String,
}

/// ShopUpdate
///
/// Owner-editable shop fields. `cover_image_path` replaces the stored cover only when
/// `Some`.
#[derive(Debug, Clone, Default)]
pub struct ShopUpdate {
    pub shop_name: Option<String>,
    pub description: Option<String>,
    pub theme_color: Option<String>,
    pub cover_image_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub primary_image_path: Option<String>,
    pub external_link: Option<String>,
}

// --- Request Payloads ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// CreateAccountRequest
///
/// Master-only payload for provisioning an admin (or plain user) account.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreateAccountRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    #[ts(type = "string | null")]
    pub credential_expiry: Option<DateTime<Utc>>,
    /// Generated from the username when omitted.
    #[serde(default)]
    pub profile_slug: Option<String>,
    /// ADMIN when omitted. MASTER is rejected.
    #[serde(default)]
    pub role: Option<Role>,
}

/// UpdateAccountRequest
///
/// Partial update of an account's credential; absent fields are left untouched.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateAccountRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "string | null")]
    pub credential_expiry: Option<DateTime<Utc>>,
}

// --- Response Payloads ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct LoginResponse {
    pub token: String,
    pub account_id: Uuid,
    pub role: Role,
    pub profile_slug: String,
    #[ts(type = "string | null")]
    pub credential_expiry: Option<DateTime<Utc>>,
}

/// AccountProfile
///
/// Public-safe view of an account, returned by `/me` and the master's admin routes.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AccountProfile {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    #[ts(type = "string | null")]
    pub credential_expiry: Option<DateTime<Utc>>,
    pub profile_slug: String,
    pub shop_name: Option<String>,
    pub description: Option<String>,
    pub theme_color: Option<String>,
    pub cover_image: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// PortfolioSummary
///
/// One card of the public gallery.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PortfolioSummary {
    pub id: Uuid,
    pub profile_slug: String,
    pub shop_name: Option<String>,
    pub description: Option<String>,
    pub cover_image: Option<String>,
    pub theme_color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PortfolioPage {
    pub data: Vec<PortfolioSummary>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: i64,
}

/// OwnerShop
///
/// The owner's shop metadata bundled with a resolved product.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct OwnerShop {
    pub profile_slug: String,
    pub shop_name: Option<String>,
    pub theme_color: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ImageView {
    pub id: i64,
    pub path: String,
}

/// ProductSummary
///
/// A catalog entry on a portfolio page, carrying the position used to open it.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ProductSummary {
    pub position: i64,
    pub id: i64,
    pub name: String,
    #[ts(type = "string")]
    #[schema(value_type = String)]
    pub price: Decimal,
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PortfolioDetail {
    pub profile: AccountProfile,
    pub products: Vec<ProductSummary>,
}

/// ResolvedProduct
///
/// A product addressed by position: its fields, normalized image paths, the owner's
/// shop, and where it sits in the owner's catalog at the instant of the read.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ResolvedProduct {
    pub id: i64,
    pub name: String,
    pub description: String,
    #[ts(type = "string")]
    #[schema(value_type = String)]
    pub price: Decimal,
    pub external_link: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    pub image: String,
    pub images: Vec<ImageView>,
    pub owner: OwnerShop,
    pub position: i64,
    pub total_products: i64,
}

/// ProductResponse
///
/// A product as returned right after creation.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ProductResponse {
    pub id: i64,
    pub owner_id: Uuid,
    pub name: String,
    pub description: String,
    #[ts(type = "string")]
    #[schema(value_type = String)]
    pub price: Decimal,
    pub image: String,
    pub external_link: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ImageResponse {
    pub id: i64,
    pub product_id: i64,
    pub path: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

// --- Conversions ---

impl From<&Account> for AccountProfile {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            username: account.username.clone(),
            role: account.role,
            credential_expiry: account.credential_expiry,
            profile_slug: account.profile_slug.clone(),
            shop_name: account.shop_name.clone(),
            description: account.description.clone(),
            theme_color: account.theme_color.clone(),
            cover_image: crate::resolver::normalize_optional_path(account.cover_image_path.as_deref()),
            created_at: account.created_at,
        }
    }
}

impl From<PortfolioRow> for PortfolioSummary {
    fn from(row: PortfolioRow) -> Self {
        let cover = row.cover_image_path.or(row.latest_product_image);
        Self {
            id: row.id,
            profile_slug: row.profile_slug,
            shop_name: row.shop_name,
            description: row.description,
            cover_image: crate::resolver::normalize_optional_path(cover.as_deref()),
            theme_color: row.theme_color,
        }
    }
}

impl From<&Product> for ProductResponse {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id,
            owner_id: product.owner_id,
            name: product.name.clone(),
            description: product.description.clone(),
            price: product.price,
            image: crate::resolver::primary_image_path(product.primary_image_path.as_deref()),
            external_link: product.external_link.clone(),
            created_at: product.created_at,
        }
    }
}

impl From<&ProductImage> for ImageResponse {
    fn from(image: &ProductImage) -> Self {
        Self {
            id: image.id,
            product_id: image.product_id,
            path: crate::resolver::normalize_image_path(&image.path),
            created_at: image.created_at,
        }
    }
}
