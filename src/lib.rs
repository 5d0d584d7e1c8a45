pub mod app_state;
pub mod catalog;
pub mod config;
pub mod db;
pub mod download;
pub mod errors;
pub mod handlers;
pub mod middleware_auth;
pub mod models;
pub mod routes;
pub mod tokens;
pub mod utils;

pub use app_state::AppState;
pub use config::Config;
pub use errors::*;
pub use models::*;
pub use tokens::TokenService;
pub use utils::*;
