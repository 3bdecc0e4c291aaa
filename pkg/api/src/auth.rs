use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use pkg_session::{CurrentUser, SessionError};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::AppState;
use crate::error::ApiError;

/// Name the admin token resolves to.
pub const ADMIN_USER: &str = "admin";

fn bearer_token(req: &Request) -> Option<&str> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("token "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn is_admin_token(configured: Option<&str>, token: &str) -> bool {
    configured.is_some_and(|admin| admin.as_bytes().ct_eq(token.as_bytes()).unwrap_u8() == 1)
}

/// Middleware: resolves the bearer token to a `CurrentUser` and stores it in
/// the request extensions. The configured admin token maps to an admin
/// identity; every other token is checked with the session layer.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&req).ok_or(ApiError::Unauthorized)?.to_string();

    let user = if is_admin_token(state.config.admin_token.as_deref(), &token) {
        CurrentUser {
            name: ADMIN_USER.to_string(),
            admin: true,
        }
    } else {
        match state.session.resolve_token(&token).await {
            Ok(user) => user,
            Err(SessionError::Transport(e)) => {
                return Err(ApiError::Unavailable(format!(
                    "session layer unreachable: {}",
                    e
                )));
            }
            Err(e) => {
                warn!("Rejected token: {}", e);
                return Err(ApiError::Unauthorized);
            }
        }
    };

    debug!("Authenticated {} (admin={})", user.name, user.admin);
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Users may act on their own servers; admins on any.
pub fn authorize_owner(user: &CurrentUser, owner: &str) -> Result<(), ApiError> {
    if user.admin || user.name == owner {
        Ok(())
    } else {
        warn!("{} denied access to servers of {}", user.name, owner);
        Err(ApiError::Forbidden(format!(
            "{} may not manage servers of {}",
            user.name, owner
        )))
    }
}

pub fn authorize_admin(user: &CurrentUser) -> Result<(), ApiError> {
    if user.admin {
        Ok(())
    } else {
        warn!("{} denied access to an admin route", user.name);
        Err(ApiError::Forbidden("admin privileges required".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str, admin: bool) -> CurrentUser {
        CurrentUser {
            name: name.into(),
            admin,
        }
    }

    #[test]
    fn test_owner_checks() {
        assert!(authorize_owner(&user("alice", false), "alice").is_ok());
        assert!(authorize_owner(&user("alice", false), "bob").is_err());
        assert!(authorize_owner(&user("root", true), "bob").is_ok());
        assert!(authorize_admin(&user("alice", false)).is_err());
        assert!(authorize_admin(&user("root", true)).is_ok());
    }

    #[test]
    fn test_admin_token_match() {
        assert!(is_admin_token(Some("s3cret"), "s3cret"));
        assert!(!is_admin_token(Some("s3cret"), "s3cre"));
        assert!(!is_admin_token(Some("s3cret"), "s3cret2"));
        assert!(!is_admin_token(None, "s3cret"));
    }

    #[test]
    fn test_bearer_token_forms() {
        let req = Request::builder()
            .header(header::AUTHORIZATION, "Bearer abc")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req), Some("abc"));

        let req = Request::builder()
            .header(header::AUTHORIZATION, "token xyz")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req), Some("xyz"));

        let req = Request::builder()
            .header(header::AUTHORIZATION, "Basic Zm9v")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req), None);
    }
}
