use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use sqlx::PgPool;
use tokio::net::TcpListener;

use storefront_service::app::build_router;
use storefront_service::config::AppConfig;
use storefront_service::tokens::TokenStore;
use storefront_service::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = AppConfig::from_env()?;
    let db_pool = PgPool::connect(&config.database_url).await?;
    let tokens = TokenStore::new(db_pool.clone(), config.token_ttl);

    let host = config.host.clone();
    let port = config.port;

    let state = AppState {
        db: db_pool,
        tokens: Arc::new(tokens),
        config: Arc::new(config),
    };

    let app = build_router(state);

    let ip: IpAddr = host.parse()?;
    let addr = SocketAddr::from((ip, port));

    println!("starting storefront-service on {addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
