use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub server_host: String,
    pub server_port: u16,
    pub environment: String,
    pub log_level: String,

    // Database configuration
    pub database_url: String,
    pub database_namespace: String,
    pub database_name: String,
    pub database_username: String,
    pub database_password: String,
    pub store_driver: String,

    // Queue configuration
    pub queue_url: String,
    pub queue_subject: String,
    pub queue_connect_attempts: u32,
    pub queue_backoff_base_ms: u64,
    pub queue_backoff_max_ms: u64,

    // Streaming configuration
    pub stream_keep_alive_secs: u64,

    // Client reconciler configuration
    pub client_reconnect_base_ms: u64,
    pub client_reconnect_max_ms: u64,
    pub client_cache_capacity: usize,
    pub client_cache_dir: Option<String>,

    // CORS configuration
    pub cors_allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "127.0.0.1:8000".to_string()),
            database_namespace: env::var("DATABASE_NAMESPACE")
                .unwrap_or_else(|_| "stockhub".to_string()),
            database_name: env::var("DATABASE_NAME")
                .unwrap_or_else(|_| "notify".to_string()),
            database_username: env::var("DATABASE_USERNAME")
                .unwrap_or_else(|_| "root".to_string()),
            database_password: env::var("DATABASE_PASSWORD")
                .unwrap_or_else(|_| "root".to_string()),
            store_driver: env::var("STORE_DRIVER")
                .unwrap_or_else(|_| "surrealdb".to_string()),

            queue_url: env::var("QUEUE_URL")
                .unwrap_or_else(|_| "nats://127.0.0.1:4222".to_string()),
            queue_subject: env::var("QUEUE_SUBJECT")
                .unwrap_or_else(|_| "stockhub.notifications".to_string()),
            queue_connect_attempts: env::var("QUEUE_CONNECT_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
            queue_backoff_base_ms: env::var("QUEUE_BACKOFF_BASE_MS")
                .unwrap_or_else(|_| "200".to_string())
                .parse()?,
            queue_backoff_max_ms: env::var("QUEUE_BACKOFF_MAX_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()?,

            stream_keep_alive_secs: env::var("STREAM_KEEP_ALIVE_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()?,

            client_reconnect_base_ms: env::var("CLIENT_RECONNECT_BASE_MS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()?,
            client_reconnect_max_ms: env::var("CLIENT_RECONNECT_MAX_MS")
                .unwrap_or_else(|_| "30000".to_string())
                .parse()?,
            client_cache_capacity: env::var("CLIENT_CACHE_CAPACITY")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            client_cache_dir: env::var("CLIENT_CACHE_DIR").ok(),

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3001".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}
