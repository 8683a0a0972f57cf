pub mod helpers;
pub mod app_config;

pub use helpers::*;
pub use app_config::AppConfig;
