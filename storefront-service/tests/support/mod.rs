use std::{env, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use argon2::{password_hash::SaltString, Argon2, PasswordHasher};
use chrono::Duration as ChronoDuration;
use dirs::cache_dir;
use pg_embed::pg_enums::PgAuthMethod;
use pg_embed::pg_fetch::{PgFetchSettings, PG_V13};
use pg_embed::postgres::{PgEmbed, PgSettings};
use portpicker::pick_unused_port;
use rand_core::OsRng;
use sqlx::{postgres::PgPoolOptions, PgPool};
use storefront_service::config::AppConfig;
use storefront_service::tokens::TokenStore;
use storefront_service::AppState;
use tempfile::{tempdir, TempDir};

pub struct TestDatabase {
    pool: PgPool,
    embedded: Option<EmbeddedPg>,
}

impl TestDatabase {
    pub async fn setup() -> Result<Option<Self>> {
        if env::var("STORE_TEST_DATABASE_URL").is_err() && !env_flag_enabled("STORE_TEST_USE_EMBED")
        {
            eprintln!(
                "Skipping storefront-service integration tests: set STORE_TEST_DATABASE_URL or STORE_TEST_USE_EMBED=1 to run them.",
            );
            return Ok(None);
        }

        let mut embedded = None;
        let database_url = if let Ok(url) = env::var("STORE_TEST_DATABASE_URL") {
            url
        } else {
            if env_flag_enabled("STORE_TEST_EMBED_CLEAR_CACHE") {
                if let Some(cache_dir) = cache_dir() {
                    let _ = std::fs::remove_dir_all(cache_dir.join("pg-embed"));
                }
            }

            let temp = tempdir()?;
            let port = pick_unused_port()
                .context("failed to find available port for embedded Postgres")?;

            let mut fetch_settings = PgFetchSettings::default();
            fetch_settings.version = PG_V13;

            let mut pg = PgEmbed::new(
                PgSettings {
                    database_dir: temp.path().to_path_buf(),
                    port,
                    user: "postgres".to_string(),
                    password: "postgres".to_string(),
                    auth_method: PgAuthMethod::Plain,
                    persistent: false,
                    timeout: Some(Duration::from_secs(30)),
                    migration_dir: None,
                },
                fetch_settings,
            )
            .await?;

            pg.setup().await?;
            pg.start_db().await?;

            let uri = format!("{}/postgres", pg.db_uri);
            embedded = Some(EmbeddedPg {
                pg,
                _temp_dir: temp,
            });
            uri
        };

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await?;

        run_migrations(&pool).await?;

        Ok(Some(Self { pool, embedded }))
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }

    pub async fn teardown(self) -> Result<()> {
        if let Some(embedded) = self.embedded {
            embedded.shutdown().await;
        }
        Ok(())
    }
}

struct EmbeddedPg {
    pg: PgEmbed,
    _temp_dir: TempDir,
}

impl EmbeddedPg {
    async fn shutdown(mut self) {
        let _ = self.pg.stop_db().await;
    }
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let migrations_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations");
    let mut entries = std::fs::read_dir(&migrations_dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();

    for path in entries {
        let sql = std::fs::read_to_string(&path)?;
        for statement in sql.split(';') {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                continue;
            }
            sqlx::query(trimmed).execute(pool).await?;
        }
    }

    Ok(())
}

#[allow(dead_code)]
pub fn test_state(pool: PgPool) -> AppState {
    test_state_with_ttl(pool, ChronoDuration::seconds(3600))
}

#[allow(dead_code)]
pub fn test_state_with_ttl(pool: PgPool, ttl: ChronoDuration) -> AppState {
    let config = AppConfig {
        database_url: "postgres://unused".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        token_ttl: ttl,
        allowed_origins: Vec::new(),
    };
    AppState {
        db: pool.clone(),
        tokens: Arc::new(TokenStore::new(pool, ttl)),
        config: Arc::new(config),
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct SeededIdentity {
    pub id: i64,
    pub phone: String,
    pub password: String,
}

#[allow(dead_code)]
pub async fn seed_customer(pool: &PgPool, phone: &str) -> Result<SeededIdentity> {
    let password = "CorrectHorseBatteryStaple!".to_string();
    let password_hash = hash_password(&password)?;

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO customers (name, phone, password_hash) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind("Test Customer")
    .bind(phone)
    .bind(&password_hash)
    .fetch_one(pool)
    .await?;

    Ok(SeededIdentity {
        id,
        phone: phone.to_string(),
        password,
    })
}

#[allow(dead_code)]
pub async fn seed_manager(pool: &PgPool, phone: &str, roles: &[&str]) -> Result<SeededIdentity> {
    let password = "CorrectHorseBatteryStaple!".to_string();
    let password_hash = hash_password(&password)?;
    let roles = roles.iter().map(|r| r.to_string()).collect::<Vec<_>>();

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO managers (name, phone, password_hash, roles) VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind("Test Manager")
    .bind(phone)
    .bind(&password_hash)
    .bind(&roles)
    .fetch_one(pool)
    .await?;

    Ok(SeededIdentity {
        id,
        phone: phone.to_string(),
        password,
    })
}

#[allow(dead_code)]
pub async fn seed_product(
    pool: &PgPool,
    name: &str,
    price: i64,
    qty: i32,
    active: bool,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO products (name, price, qty, active) VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(name)
    .bind(price)
    .bind(qty)
    .bind(active)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

#[allow(dead_code)]
pub async fn product_qty(pool: &PgPool, product_id: i64) -> Result<i32> {
    let qty: i32 = sqlx::query_scalar("SELECT qty FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_one(pool)
        .await?;
    Ok(qty)
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow::anyhow!("{err}"))?
        .to_string())
}

fn env_flag_enabled(key: &str) -> bool {
    matches!(env::var(key), Ok(value) if is_truthy(value.as_str()))
}

fn is_truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}
