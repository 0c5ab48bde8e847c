use anyhow::{Context, Result};
use chrono::Duration;
use std::env;

const DEFAULT_PORT: u16 = 8086;
const DEFAULT_TOKEN_TTL_SECONDS: i64 = 86_400;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub token_ttl: Duration,
    pub allowed_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let ttl_seconds = env::var("TOKEN_TTL_SECONDS")
            .ok()
            .map(|value| parse_ttl_seconds(&value))
            .transpose()
            .context("Failed to parse TOKEN_TTL_SECONDS")?
            .unwrap_or(DEFAULT_TOKEN_TTL_SECONDS);

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|value| parse_origins(&value))
            .unwrap_or_else(default_origins);

        Ok(Self {
            database_url,
            host,
            port,
            token_ttl: Duration::seconds(ttl_seconds),
            allowed_origins,
        })
    }
}

fn parse_ttl_seconds(value: &str) -> Result<i64> {
    let seconds: i64 = value
        .trim()
        .parse()
        .with_context(|| format!("Invalid TTL '{value}'"))?;
    anyhow::ensure!(seconds > 0, "TTL must be positive, got {seconds}");
    Ok(seconds)
}

fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter_map(|item| {
            let origin = item.trim();
            if origin.is_empty() {
                None
            } else {
                Some(origin.to_string())
            }
        })
        .collect()
}

fn default_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:3001".to_string(),
        "http://localhost:5173".to_string(),
    ]
}
