//! Authorization gate applied to every request at the router boundary.
//!
//! `decide` is a pure function of method, path, decoded session and the clock. The
//! middleware around it only decodes the token, renders a redirect, or forwards the
//! request with the claims attached.

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::{
    auth::{SessionClaims, credential_expired, decode_token, token_from_headers},
    config::AppConfig,
    models::Role,
};

pub const LOGIN_PATH: &str = "/auth/login";

/// Prefixes reachable without a session, whatever the method.
const ALWAYS_PUBLIC_PREFIXES: [&str; 6] = [
    "/auth/login",
    "/auth/logout",
    "/uploads/",
    "/images/",
    "/swagger-ui",
    "/api-docs",
];

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectReason {
    LoginRequired,
    Expired,
    Unauthorized,
}

impl RedirectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoginRequired => "login_required",
            Self::Expired => "expired",
            Self::Unauthorized => "unauthorized",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Redirect {
        target: String,
        reason: RedirectReason,
    },
}

impl GateDecision {
    fn redirect(target: String, reason: RedirectReason) -> Self {
        Self::Redirect { target, reason }
    }
}

fn path_matches(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| prefix.ends_with('/') || rest.starts_with('/') || rest.starts_with('?'))
}

/// is_public
///
/// Login, logout, health, static files and API docs are public for every method. The
/// visitor surface (`/`, `/portfolios`, `/portfolio/…`) is public for reads only, so
/// writes under `/portfolio/{slug}/products` still need a session.
pub fn is_public(method: &Method, path: &str) -> bool {
    if path == "/health" || ALWAYS_PUBLIC_PREFIXES.iter().any(|p| path_matches(path, p)) {
        return true;
    }

    let safe = method == Method::GET || method == Method::HEAD;
    safe && (path == "/" || path_matches(path, "/portfolios") || path_matches(path, "/portfolio/"))
}

/// decide
///
/// Order matters: public paths first, then a missing session, then the MASTER
/// exemption, then ADMIN credential expiry, then the `/master` role check. The
/// credential expiry is compared against `now` on every call.
pub fn decide(
    method: &Method,
    path: &str,
    session: Option<&SessionClaims>,
    now: DateTime<Utc>,
) -> GateDecision {
    if is_public(method, path) {
        return GateDecision::Allow;
    }

    let Some(session) = session else {
        let target = format!("{LOGIN_PATH}?callbackUrl={}", urlencoding::encode(path));
        return GateDecision::redirect(target, RedirectReason::LoginRequired);
    };

    if session.role == Role::Master {
        return GateDecision::Allow;
    }

    if session.role == Role::Admin && credential_expired(session.role, session.credential_expiry, now) {
        return GateDecision::redirect(format!("{LOGIN_PATH}?error=expired"), RedirectReason::Expired);
    }

    if path_matches(path, "/master") {
        return GateDecision::redirect(
            format!("{LOGIN_PATH}?error=unauthorized"),
            RedirectReason::Unauthorized,
        );
    }

    GateDecision::Allow
}

fn accepts_html(request: &Request) -> bool {
    request
        .headers()
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"))
}

/// Browsers get a `303 See Other`; API clients get a 401 JSON body. Both carry the
/// target in `Location`.
fn render_redirect(target: &str, reason: RedirectReason, html: bool) -> Response {
    let mut response = if html {
        StatusCode::SEE_OTHER.into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": reason.as_str() })),
        )
            .into_response()
    };

    if let Ok(location) = HeaderValue::from_str(target) {
        response.headers_mut().insert(header::LOCATION, location);
    }
    response
}

/// authorization_gate
///
/// Middleware wrapping the whole router. An invalid or expired token counts as no
/// token. On allow, the decoded claims are stored in the request extensions for
/// `AuthUser`.
pub async fn authorization_gate(
    State(config): State<AppConfig>,
    mut request: Request,
    next: Next,
) -> Response {
    let session = token_from_headers(request.headers())
        .and_then(|token| decode_token(&token, &config.jwt_secret));

    let decision = decide(
        request.method(),
        request.uri().path(),
        session.as_ref(),
        Utc::now(),
    );

    match decision {
        GateDecision::Allow => {
            if let Some(claims) = session {
                request.extensions_mut().insert(claims);
            }
            next.run(request).await
        }
        GateDecision::Redirect { target, reason } => {
            tracing::info!(
                path = %request.uri().path(),
                reason = reason.as_str(),
                "request redirected by authorization gate"
            );
            render_redirect(&target, reason, accepts_html(&request))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn session(role: Role, expiry: Option<DateTime<Utc>>) -> SessionClaims {
        let now = Utc::now();
        SessionClaims {
            sub: Uuid::new_v4(),
            role,
            credential_expiry: expiry,
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        }
    }

    #[test]
    fn prefix_matching_respects_segment_boundaries() {
        assert!(path_matches("/master", "/master"));
        assert!(path_matches("/master/admins", "/master"));
        assert!(!path_matches("/masterful", "/master"));
        assert!(path_matches("/uploads/a.png", "/uploads/"));
        assert!(path_matches("/swagger-ui/index.html", "/swagger-ui"));
    }

    #[test]
    fn reads_of_visitor_pages_are_public_but_writes_are_not() {
        assert!(is_public(&Method::GET, "/portfolio/jane-abc123/products/1"));
        assert!(is_public(&Method::HEAD, "/portfolios"));
        assert!(!is_public(&Method::POST, "/portfolio/jane-abc123/products"));
        assert!(is_public(&Method::POST, "/auth/login"));
        assert!(!is_public(&Method::GET, "/me"));
    }

    #[test]
    fn missing_session_redirects_with_callback() {
        let decision = decide(&Method::GET, "/me/shop", None, Utc::now());
        assert_eq!(
            decision,
            GateDecision::Redirect {
                target: "/auth/login?callbackUrl=%2Fme%2Fshop".to_string(),
                reason: RedirectReason::LoginRequired,
            }
        );
    }

    #[test]
    fn admin_expiry_is_checked_against_the_clock() {
        let now = Utc::now();
        let admin = session(Role::Admin, Some(now + Duration::minutes(5)));
        assert_eq!(decide(&Method::GET, "/me", Some(&admin), now), GateDecision::Allow);

        // Same token, later in the session.
        let later = now + Duration::minutes(10);
        assert!(matches!(
            decide(&Method::GET, "/me", Some(&admin), later),
            GateDecision::Redirect { reason: RedirectReason::Expired, .. }
        ));
    }

    #[test]
    fn master_is_exempt_from_expiry() {
        let now = Utc::now();
        let master = session(Role::Master, Some(now - Duration::days(30)));
        assert_eq!(decide(&Method::GET, "/master/admins", Some(&master), now), GateDecision::Allow);
    }

    #[test]
    fn non_master_roles_cannot_reach_master_routes() {
        let now = Utc::now();
        for role in [Role::Admin, Role::User] {
            let claims = session(role, None);
            assert_eq!(
                decide(&Method::GET, "/master/admins", Some(&claims), now),
                GateDecision::Redirect {
                    target: "/auth/login?error=unauthorized".to_string(),
                    reason: RedirectReason::Unauthorized,
                }
            );
        }
    }

    #[test]
    fn expired_admin_on_master_route_reports_expiry_first() {
        let now = Utc::now();
        let admin = session(Role::Admin, Some(now - Duration::seconds(1)));
        assert!(matches!(
            decide(&Method::GET, "/master/admins", Some(&admin), now),
            GateDecision::Redirect { reason: RedirectReason::Expired, .. }
        ));
    }
}
