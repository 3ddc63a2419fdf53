use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
    pub admin_token: Option<String>,
    pub vendor_timeout: Duration,
    pub otp_max_attempts: u32,
    pub auto_create_courier_order: bool,
    pub default_courier_id: Option<i64>,
    pub store: StoreConfig,
    pub pathao: Option<PathaoConfig>,
    pub steadfast: Option<SteadfastConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub name: String,
    pub phone: String,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct PathaoConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub store_id: i64,
    pub webhook_secret: String,
    pub webhook_ack_secret: String,
}

#[derive(Debug, Clone)]
pub struct SteadfastConfig {
    pub base_url: String,
    pub api_key: String,
    pub secret_key: String,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            admin_token: optional("ADMIN_TOKEN"),
            vendor_timeout: Duration::from_millis(parse_or_default("VENDOR_TIMEOUT_MS", 5_000)?),
            otp_max_attempts: parse_or_default("OTP_MAX_ATTEMPTS", 5)?,
            auto_create_courier_order: parse_or_default("AUTO_CREATE_COURIER_ORDER", false)?,
            default_courier_id: parse_optional("DEFAULT_COURIER_ID")?,
            store: StoreConfig {
                name: env::var("STORE_NAME").unwrap_or_else(|_| "Storefront".to_string()),
                phone: env::var("STORE_PHONE").unwrap_or_default(),
                address: env::var("STORE_ADDRESS").unwrap_or_default(),
            },
            pathao: pathao_from_env()?,
            steadfast: steadfast_from_env(),
        })
    }

    /// Defaults with no vendor credentials; used by tests and local runs.
    pub fn for_tests() -> Self {
        Self {
            http_port: 0,
            log_level: "debug".to_string(),
            log_format: LogFormat::Compact,
            event_buffer_size: 64,
            admin_token: Some("test-admin-token".to_string()),
            vendor_timeout: Duration::from_secs(2),
            otp_max_attempts: 5,
            auto_create_courier_order: false,
            default_courier_id: None,
            store: StoreConfig {
                name: "Test Store".to_string(),
                phone: "01700000000".to_string(),
                address: "1 Market Street".to_string(),
            },
            pathao: None,
            steadfast: None,
        }
    }
}

fn pathao_from_env() -> Result<Option<PathaoConfig>, AppError> {
    let Some(client_id) = optional("PATHAO_CLIENT_ID") else {
        return Ok(None);
    };

    Ok(Some(PathaoConfig {
        base_url: env::var("PATHAO_BASE_URL")
            .unwrap_or_else(|_| "https://api-hermes.pathao.com".to_string()),
        client_id,
        client_secret: required("PATHAO_CLIENT_SECRET")?,
        username: required("PATHAO_USERNAME")?,
        password: required("PATHAO_PASSWORD")?,
        store_id: parse_or_default("PATHAO_STORE_ID", 0)?,
        webhook_secret: required("PATHAO_WEBHOOK_SECRET")?,
        webhook_ack_secret: env::var("PATHAO_WEBHOOK_ACK_SECRET").unwrap_or_default(),
    }))
}

fn steadfast_from_env() -> Option<SteadfastConfig> {
    let api_key = optional("STEADFAST_API_KEY")?;
    let secret_key = optional("STEADFAST_SECRET_KEY")?;

    Some(SteadfastConfig {
        base_url: env::var("STEADFAST_BASE_URL")
            .unwrap_or_else(|_| "https://portal.packzy.com/api/v1".to_string()),
        api_key,
        secret_key,
    })
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn required(key: &str) -> Result<String, AppError> {
    optional(key).ok_or_else(|| AppError::Internal(format!("missing {key}")))
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

fn parse_optional<T>(key: &str) -> Result<Option<T>, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        None => Ok(None),
    }
}
