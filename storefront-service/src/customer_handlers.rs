use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use common_http_errors::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::FromRow;
use tracing::error;

use crate::auth::{token_error_response, AuthSession};
use crate::tokens::{hash_password, OwnerClass, TokenError};
use crate::AppState;

#[derive(Deserialize)]
pub struct CustomerRegistration {
    pub name: String,
    pub phone: String,
    pub password: String,
}

#[derive(Debug, Serialize, FromRow)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub phone: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct TokenValidationRequest {
    pub token: String,
}

/// Active catalog entries as customers see them.
#[derive(Debug, Serialize, FromRow)]
pub struct CatalogProduct {
    pub id: i64,
    pub name: String,
    pub price: i64,
    pub qty: i32,
}

#[derive(Debug, Serialize)]
pub struct Purchase {
    pub date: DateTime<Utc>,
    pub products: Vec<PurchasedProduct>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PurchasedProduct {
    pub id: i64,
    pub name: String,
    pub price: i64,
    pub qty: i32,
}

#[derive(FromRow)]
pub(crate) struct PurchaseRow {
    sale_date: DateTime<Utc>,
    product_id: i64,
    name: String,
    unit_price: i64,
    qty: i32,
}

pub async fn register_customer(
    State(state): State<AppState>,
    Json(reg): Json<CustomerRegistration>,
) -> ApiResult<Json<Customer>> {
    if reg.name.trim().is_empty() || reg.phone.trim().is_empty() {
        return Err(ApiError::bad_request("missing_fields"));
    }
    if reg.password.trim().is_empty() {
        return Err(ApiError::bad_request("empty_password"));
    }

    let password_hash = hash_password(&reg.password).map_err(|err| {
        error!(error = %err, "password hashing failed");
        ApiError::Internal { message: None }
    })?;

    let customer = sqlx::query_as::<_, Customer>(
        "INSERT INTO customers (name, phone, password_hash)
         VALUES ($1, $2, $3)
         ON CONFLICT (phone) DO NOTHING
         RETURNING id, name, phone, active, created_at",
    )
    .bind(reg.name.trim())
    .bind(reg.phone.trim())
    .bind(password_hash)
    .fetch_optional(&state.db)
    .await
    .map_err(db_internal)?;

    customer.map(Json).ok_or(ApiError::Conflict {
        code: "phone_already_registered",
        message: None,
    })
}

pub async fn customer_token(
    State(state): State<AppState>,
    Json(login): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let issued = state
        .tokens
        .issue(OwnerClass::Customer, &login.login, &login.password)
        .await
        .map_err(token_error_response)?;

    Ok(Json(TokenResponse {
        token: issued.token,
        expires_at: issued.expires_at,
    }))
}

/// Reports the token's state with the three outcomes kept distinct: valid,
/// expired, and never-issued each produce their own status and reason.
pub async fn validate_customer_token(
    State(state): State<AppState>,
    Json(req): Json<TokenValidationRequest>,
) -> Result<Response, ApiError> {
    match state.tokens.resolve(OwnerClass::Customer, &req.token).await {
        Ok(id) => Ok((
            StatusCode::OK,
            Json(json!({"status": "ok", "customerId": id})),
        )
            .into_response()),
        Err(TokenError::TokenExpired) => Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "fail", "reason": "expired"})),
        )
            .into_response()),
        Err(TokenError::NotAuthenticated) => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({"status": "fail", "reason": "not found"})),
        )
            .into_response()),
        Err(err) => {
            error!(error = %err, "token validation failed");
            Err(ApiError::Internal { message: None })
        }
    }
}

pub async fn list_products(State(state): State<AppState>) -> ApiResult<Json<Vec<CatalogProduct>>> {
    let products = sqlx::query_as::<_, CatalogProduct>(
        "SELECT id, name, price, qty FROM products WHERE active ORDER BY id LIMIT 500",
    )
    .fetch_all(&state.db)
    .await
    .map_err(db_internal)?;

    Ok(Json(products))
}

pub async fn list_purchases(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
) -> ApiResult<Json<Vec<Purchase>>> {
    let customer_id = session.require()?;

    let rows = sqlx::query_as::<_, PurchaseRow>(
        "SELECT s.created_at AS sale_date, sl.product_id, p.name, sl.unit_price, sl.qty
         FROM sales s
         JOIN sale_lines sl ON sl.sale_id = s.id
         JOIN products p ON p.id = sl.product_id
         WHERE s.customer_id = $1
         ORDER BY s.created_at, sl.id",
    )
    .bind(customer_id)
    .fetch_all(&state.db)
    .await
    .map_err(db_internal)?;

    Ok(Json(group_purchases(rows)))
}

/// Lines that share a sale timestamp collapse into one purchase entry with
/// several products rather than repeating the entry per line.
pub(crate) fn group_purchases(rows: Vec<PurchaseRow>) -> Vec<Purchase> {
    let mut purchases: Vec<Purchase> = Vec::new();
    for row in rows {
        let product = PurchasedProduct {
            id: row.product_id,
            name: row.name,
            price: row.unit_price,
            qty: row.qty,
        };
        match purchases.last_mut() {
            Some(last) if last.date == row.sale_date => last.products.push(product),
            _ => purchases.push(Purchase {
                date: row.sale_date,
                products: vec![product],
            }),
        }
    }
    purchases
}

fn db_internal(err: sqlx::Error) -> ApiError {
    error!(error = %err, "database error");
    ApiError::Internal { message: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(ts: i64, product_id: i64, name: &str) -> PurchaseRow {
        PurchaseRow {
            sale_date: Utc.timestamp_opt(ts, 0).unwrap(),
            product_id,
            name: name.to_string(),
            unit_price: 250,
            qty: 1,
        }
    }

    #[test]
    fn lines_of_one_sale_group_into_a_single_purchase() {
        let grouped = group_purchases(vec![
            row(1_000, 1, "tea"),
            row(1_000, 2, "coffee"),
            row(2_000, 1, "tea"),
        ]);

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].products.len(), 2);
        assert_eq!(grouped[0].products[0].name, "tea");
        assert_eq!(grouped[0].products[1].name, "coffee");
        assert_eq!(grouped[1].products.len(), 1);
    }

    #[test]
    fn empty_history_stays_empty() {
        assert!(group_purchases(Vec::new()).is_empty());
    }
}
