use std::sync::Arc;

use axum::{
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, StatusCode,
    },
    middleware,
    routing::{delete, get, post},
    Router,
};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, TextEncoder};
use sqlx::PgPool;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::auth::{authenticate_customer, authenticate_manager};
use crate::config::AppConfig;
use crate::customer_handlers::{
    customer_token, list_products, list_purchases, register_customer, validate_customer_token,
};
use crate::manager_handlers::{
    create_sale, get_sales_total, list_all_products, list_customers, manager_token,
    register_manager, remove_customer, remove_product, save_product, update_customer,
};
use crate::tokens::TokenStore;

static HTTP_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "http_errors_total",
            "Count of HTTP error responses emitted (status >= 400)",
        ),
        &["service", "code", "status"],
    )
    .expect("http_errors_total");
    let _ = prometheus::default_registry().register(Box::new(c.clone()));
    c
});

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub tokens: Arc<TokenStore>,
    pub config: Arc<AppConfig>,
}

pub async fn health() -> &'static str {
    "ok"
}

async fn track_http_errors(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let resp = next.run(req).await;
    let status = resp.status();
    if status.as_u16() >= 400 {
        let code = resp
            .headers()
            .get("X-Error-Code")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown");
        HTTP_ERRORS_TOTAL
            .with_label_values(&["storefront-service", code, status.as_str()])
            .inc();
    }
    resp
}

async fn render_metrics() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            state
                .config
                .allowed_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        ))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            HeaderName::from_static("authorization"),
        ]);

    // The gate attaches the resolved identity per route group; handlers make
    // the reject/allow decision themselves, which keeps the public routes in
    // each group working without a credential.
    let customer_routes = Router::new()
        .route("/api/customers", post(register_customer))
        .route("/api/customers/token", post(customer_token))
        .route(
            "/api/customers/token/validate",
            post(validate_customer_token),
        )
        .route("/api/customers/products", get(list_products))
        .route("/api/customers/purchases", get(list_purchases))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            authenticate_customer,
        ));

    let manager_routes = Router::new()
        .route("/api/managers", post(register_manager))
        .route("/api/managers/token", post(manager_token))
        .route("/api/managers/sales", post(create_sale).get(get_sales_total))
        .route(
            "/api/managers/products",
            post(save_product).get(list_all_products),
        )
        .route("/api/managers/products/:id", delete(remove_product))
        .route(
            "/api/managers/customers",
            post(update_customer).get(list_customers),
        )
        .route("/api/managers/customers/:id", delete(remove_customer))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            authenticate_manager,
        ));

    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(render_metrics))
        .merge(customer_routes)
        .merge(manager_routes)
        .with_state(state)
        .layer(middleware::from_fn(track_http_errors))
        .layer(cors)
}
