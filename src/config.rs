use std::env;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub mongodb_uri: String,
    pub mongodb_db: String,
    pub store_backend: StoreBackend,

    pub host: String,
    pub port: u16,

    pub jwt_secret: String,
    pub jwt_cookie_name: String,

    pub polygon_api_key: String,
    pub polygon_base_url: String,
    pub crypto_symbol_prefix: String,
    pub provider_timeout: Duration,

    pub alert_interval: Duration,
    pub alert_workers: usize,

    pub email_api_url: String,
    pub email_api_key: String,
    pub email_from: String,
    pub email_from_name: String,
    pub email_timeout: Duration,

    pub frontend_url: String,

    // -1 means unlimited
    pub default_max_alert_rules: i64,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

pub fn load() -> Settings {
    // Loads .env if present (no crash if missing)
    dotenvy::dotenv().ok();

    let store_backend = match var_or("STORE_BACKEND", "mongo").to_lowercase().as_str() {
        "memory" => StoreBackend::Memory,
        _ => StoreBackend::Mongo,
    };

    Settings {
        mongodb_uri: var_or("MONGODB_URI", "mongodb://localhost:27017"),
        mongodb_db: var_or("MONGODB_DB", "marketalerts"),
        store_backend,

        host: var_or("HOST", "127.0.0.1"),
        port: parsed_or("PORT", 3000),

        jwt_secret: var_or("JWT_SECRET", "change-me-dev-secret"),
        jwt_cookie_name: var_or("JWT_COOKIE_NAME", "auth"),

        polygon_api_key: var_or("POLYGON_API_KEY", ""),
        polygon_base_url: var_or("POLYGON_BASE_URL", "https://api.polygon.io"),
        crypto_symbol_prefix: var_or("CRYPTO_SYMBOL_PREFIX", "X:"),
        provider_timeout: Duration::from_secs(parsed_or("PROVIDER_TIMEOUT_SECS", 30)),

        alert_interval: Duration::from_secs(parsed_or("ALERT_INTERVAL_SECS", 60).max(1)),
        alert_workers: parsed_or("ALERT_WORKERS", 8usize).max(1),

        email_api_url: var_or("EMAIL_API_URL", ""),
        email_api_key: var_or("EMAIL_API_KEY", ""),
        email_from: var_or("EMAIL_FROM", "alerts@localhost"),
        email_from_name: var_or("EMAIL_FROM_NAME", "Market Alerts"),
        email_timeout: Duration::from_secs(parsed_or("EMAIL_TIMEOUT_SECS", 10)),

        frontend_url: var_or("FRONTEND_URL", "http://localhost:3000"),

        default_max_alert_rules: parsed_or("DEFAULT_MAX_ALERT_RULES", 10),
    }
}
