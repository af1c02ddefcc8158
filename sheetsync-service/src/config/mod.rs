//! Configuration module for sheetsync-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct SheetSyncConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub sheets: SheetsConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub api_base_url: String,
    pub oauth_token_url: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub request_timeout_secs: u64,
    pub max_transient_retries: u32,
    pub max_append_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub default_sheet_name: String,
    pub deadline_secs: u64,
}

impl SheetSyncConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "sheetsync-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            },
            sheets: SheetsConfig {
                api_base_url: env::var("SHEETS_API_BASE_URL")
                    .unwrap_or_else(|_| "https://sheets.googleapis.com/v4".to_string()),
                oauth_token_url: env::var("SHEETS_OAUTH_TOKEN_URL")
                    .unwrap_or_else(|_| "https://oauth2.googleapis.com/token".to_string()),
                access_token: env::var("SHEETS_ACCESS_TOKEN").ok(),
                refresh_token: env::var("SHEETS_REFRESH_TOKEN").ok(),
                client_id: env::var("SHEETS_CLIENT_ID").ok(),
                client_secret: env::var("SHEETS_CLIENT_SECRET").ok(),
                request_timeout_secs: env::var("SHEETS_REQUEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
                max_transient_retries: env::var("SHEETS_MAX_TRANSIENT_RETRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3),
                max_append_attempts: env::var("SHEETS_MAX_APPEND_ATTEMPTS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3),
            },
            sync: SyncConfig {
                default_sheet_name: env::var("SYNC_DEFAULT_SHEET_NAME")
                    .unwrap_or_else(|_| "Transactions".to_string()),
                deadline_secs: env::var("SYNC_DEADLINE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            },
        })
    }
}
