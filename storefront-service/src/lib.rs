pub mod app;
pub mod auth;
pub mod config;
pub mod customer_handlers;
pub mod manager_handlers;
pub mod sales;
pub mod tokens;

pub use app::AppState;
