use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use common_http_errors::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::FromRow;
use tracing::error;

use crate::auth::{ensure_admin, token_error_response, AuthSession};
use crate::customer_handlers::{Customer, LoginRequest, TokenResponse};
use crate::sales::{self, NewSaleLine, Sale, SaleError};
use crate::tokens::{hash_password, OwnerClass};
use crate::AppState;

#[derive(Deserialize)]
pub struct ManagerRegistration {
    pub name: String,
    pub phone: String,
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: i64,
    pub qty: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct SaveProductRequest {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub price: i64,
    pub qty: i32,
}

#[derive(Deserialize)]
pub struct NewSaleRequest {
    pub customer_id: i64,
    pub lines: Vec<NewSaleLine>,
}

#[derive(Deserialize)]
pub struct UpdateCustomerRequest {
    pub id: i64,
    pub name: String,
    pub phone: String,
}

/// Creating manager accounts is reserved for admins. The canonical contract
/// returns a freshly issued token for the new manager.
pub async fn register_manager(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Json(reg): Json<ManagerRegistration>,
) -> ApiResult<Json<TokenResponse>> {
    let acting_manager = session.require()?;
    ensure_admin(&state.db, acting_manager).await?;

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

    let manager_id: Option<i64> = sqlx::query_scalar(
        "INSERT INTO managers (name, phone, password_hash, roles)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (phone) DO NOTHING
         RETURNING id",
    )
    .bind(reg.name.trim())
    .bind(reg.phone.trim())
    .bind(password_hash)
    .bind(&reg.roles)
    .fetch_optional(&state.db)
    .await
    .map_err(db_internal)?;

    let Some(manager_id) = manager_id else {
        return Err(ApiError::Conflict {
            code: "phone_already_registered",
            message: None,
        });
    };

    let issued = state
        .tokens
        .issue_for(OwnerClass::Manager, manager_id)
        .await
        .map_err(token_error_response)?;

    Ok(Json(TokenResponse {
        token: issued.token,
        expires_at: issued.expires_at,
    }))
}

pub async fn manager_token(
    State(state): State<AppState>,
    Json(login): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let issued = state
        .tokens
        .issue(OwnerClass::Manager, &login.login, &login.password)
        .await
        .map_err(token_error_response)?;

    Ok(Json(TokenResponse {
        token: issued.token,
        expires_at: issued.expires_at,
    }))
}

/// The acting manager comes from the authenticated session, never from the
/// request body.
pub async fn create_sale(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Json(req): Json<NewSaleRequest>,
) -> ApiResult<Json<Sale>> {
    let manager_id = session.require()?;

    if req.lines.is_empty() {
        return Err(ApiError::bad_request("empty_sale"));
    }
    for line in &req.lines {
        if line.qty <= 0 {
            return Err(ApiError::BadRequest {
                code: "invalid_quantity",
                message: Some(format!(
                    "Quantity for product {} must be positive",
                    line.product_id
                )),
            });
        }
    }

    let sale = sales::record_sale(&state.db, manager_id, req.customer_id, &req.lines)
        .await
        .map_err(sale_error_response)?;

    Ok(Json(sale))
}

pub async fn get_sales_total(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
) -> ApiResult<Json<Value>> {
    let manager_id = session.require()?;

    let total = sales::sales_total(&state.db, manager_id)
        .await
        .map_err(db_internal)?;

    Ok(Json(json!({ "total": total })))
}

/// Upsert: a zero/absent id inserts a new product, a positive id updates the
/// existing row.
pub async fn save_product(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Json(req): Json<SaveProductRequest>,
) -> ApiResult<Json<Product>> {
    session.require()?;

    if req.name.trim().is_empty() {
        return Err(ApiError::bad_request("missing_fields"));
    }
    if req.price < 0 || req.qty < 0 {
        return Err(ApiError::bad_request("invalid_product"));
    }

    let product = if req.id == 0 {
        sqlx::query_as::<_, Product>(
            "INSERT INTO products (name, price, qty)
             VALUES ($1, $2, $3)
             RETURNING id, name, price, qty, active, created_at",
        )
        .bind(req.name.trim())
        .bind(req.price)
        .bind(req.qty)
        .fetch_optional(&state.db)
        .await
        .map_err(db_internal)?
    } else {
        sqlx::query_as::<_, Product>(
            "UPDATE products SET name = $1, price = $2, qty = $3
             WHERE id = $4
             RETURNING id, name, price, qty, active, created_at",
        )
        .bind(req.name.trim())
        .bind(req.price)
        .bind(req.qty)
        .bind(req.id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_internal)?
    };

    product.map(Json).ok_or(ApiError::NotFound {
        code: "product_not_found",
    })
}

pub async fn list_all_products(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
) -> ApiResult<Json<Vec<Product>>> {
    session.require()?;

    let products = sqlx::query_as::<_, Product>(
        "SELECT id, name, price, qty, active, created_at FROM products ORDER BY id",
    )
    .fetch_all(&state.db)
    .await
    .map_err(db_internal)?;

    Ok(Json(products))
}

pub async fn remove_product(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Path(product_id): Path<i64>,
) -> ApiResult<Json<Product>> {
    session.require()?;

    let product = sqlx::query_as::<_, Product>(
        "DELETE FROM products WHERE id = $1
         RETURNING id, name, price, qty, active, created_at",
    )
    .bind(product_id)
    .fetch_optional(&state.db)
    .await
    .map_err(db_internal)?;

    product.map(Json).ok_or(ApiError::NotFound {
        code: "product_not_found",
    })
}

pub async fn update_customer(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Json(req): Json<UpdateCustomerRequest>,
) -> ApiResult<Json<Customer>> {
    session.require()?;

    if req.name.trim().is_empty() || req.phone.trim().is_empty() {
        return Err(ApiError::bad_request("missing_fields"));
    }

    let customer = sqlx::query_as::<_, Customer>(
        "UPDATE customers SET name = $1, phone = $2
         WHERE id = $3
         RETURNING id, name, phone, active, created_at",
    )
    .bind(req.name.trim())
    .bind(req.phone.trim())
    .bind(req.id)
    .fetch_optional(&state.db)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            ApiError::Conflict {
                code: "phone_already_registered",
                message: None,
            }
        } else {
            db_internal(err)
        }
    })?;

    customer.map(Json).ok_or(ApiError::NotFound {
        code: "customer_not_found",
    })
}

pub async fn list_customers(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
) -> ApiResult<Json<Vec<Customer>>> {
    session.require()?;

    let customers = sqlx::query_as::<_, Customer>(
        "SELECT id, name, phone, active, created_at FROM customers ORDER BY id",
    )
    .fetch_all(&state.db)
    .await
    .map_err(db_internal)?;

    Ok(Json(customers))
}

pub async fn remove_customer(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Path(customer_id): Path<i64>,
) -> ApiResult<Json<Customer>> {
    session.require()?;

    let customer = sqlx::query_as::<_, Customer>(
        "DELETE FROM customers WHERE id = $1
         RETURNING id, name, phone, active, created_at",
    )
    .bind(customer_id)
    .fetch_optional(&state.db)
    .await
    .map_err(db_internal)?;

    customer.map(Json).ok_or(ApiError::NotFound {
        code: "customer_not_found",
    })
}

/// Sale failures stay distinguishable to the caller; only storage failures
/// collapse into an opaque internal error.
fn sale_error_response(err: SaleError) -> ApiError {
    match err {
        SaleError::UnknownProduct(product_id) => ApiError::BadRequest {
            code: "unknown_product",
            message: Some(format!("Product {product_id} does not exist")),
        },
        SaleError::InactiveProduct(product_id) => ApiError::Conflict {
            code: "inactive_product",
            message: Some(format!("Product {product_id} is inactive")),
        },
        err @ SaleError::OutOfStock { .. } => ApiError::Conflict {
            code: "out_of_stock",
            message: Some(err.to_string()),
        },
        SaleError::Storage(err) => {
            error!(error = %err, "sale recording failed");
            ApiError::Internal { message: None }
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn db_internal(err: sqlx::Error) -> ApiError {
    error!(error = %err, "database error");
    ApiError::Internal { message: None }
}
