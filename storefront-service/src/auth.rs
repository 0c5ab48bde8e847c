use axum::extract::{Request, State};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use common_http_errors::ApiError;
use sqlx::PgPool;
use tracing::error;

use crate::tokens::{OwnerClass, TokenError};
use crate::AppState;

pub const ADMIN_ROLE: &str = "ADMIN";

/// The identity the gate resolved for this request, if any. The gate never
/// rejects on a missing or stale credential; each handler reads the session
/// and decides whether the route demands one.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthSession {
    pub identity: Option<i64>,
}

impl AuthSession {
    pub fn require(&self) -> Result<i64, ApiError> {
        self.identity.ok_or_else(ApiError::not_authenticated)
    }
}

/// Gate for the `/api/customers` route group.
pub async fn authenticate_customer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let session = attach_session(&state, OwnerClass::Customer, req.headers()).await?;
    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}

/// Gate for the `/api/managers` route group.
pub async fn authenticate_manager(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let session = attach_session(&state, OwnerClass::Manager, req.headers()).await?;
    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}

async fn attach_session(
    state: &AppState,
    class: OwnerClass,
    headers: &HeaderMap,
) -> Result<AuthSession, ApiError> {
    let Some(token) = bearer_token(headers) else {
        return Ok(AuthSession::default());
    };

    match state.tokens.identity_for_token(class, token).await {
        Ok(identity) => Ok(AuthSession { identity }),
        Err(TokenError::Storage(err)) => {
            error!(error = %err, "token lookup failed");
            Err(ApiError::Internal { message: None })
        }
        Err(_) => Ok(AuthSession::default()),
    }
}

/// Pulls the bearer credential out of the `Authorization` header. A bare
/// token without the `Bearer ` scheme prefix is accepted as well.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }
    Some(raw.strip_prefix("Bearer ").unwrap_or(raw))
}

/// Role membership is decided here over the fetched role set, not inside a
/// storage predicate.
pub fn has_role(roles: &[String], required: &str) -> bool {
    roles.iter().any(|role| role == required)
}

pub async fn ensure_admin(pool: &PgPool, manager_id: i64) -> Result<(), ApiError> {
    let roles: Option<Vec<String>> =
        sqlx::query_scalar("SELECT roles FROM managers WHERE id = $1")
            .bind(manager_id)
            .fetch_optional(pool)
            .await
            .map_err(|err| {
                error!(error = %err, manager_id, "role lookup failed");
                ApiError::Internal { message: None }
            })?;

    if has_role(&roles.unwrap_or_default(), ADMIN_ROLE) {
        Ok(())
    } else {
        Err(ApiError::ForbiddenMissingRole { role: ADMIN_ROLE })
    }
}

/// Maps authentication failures onto the HTTP taxonomy. Expected outcomes
/// stay distinguishable; only storage failures become opaque internal errors.
pub fn token_error_response(err: TokenError) -> ApiError {
    match err {
        TokenError::UserNotFound => ApiError::NotFound {
            code: "user_not_found",
        },
        TokenError::InvalidPassword => ApiError::Unauthorized {
            code: "invalid_password",
        },
        TokenError::TokenExpired => ApiError::Unauthorized {
            code: "token_expired",
        },
        TokenError::NotAuthenticated => ApiError::not_authenticated(),
        TokenError::Storage(err) => {
            error!(error = %err, "token storage failure");
            ApiError::Internal { message: None }
        }
    }
}
