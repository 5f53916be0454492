use std::env;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
    pub worker_freshness_secs: i64,
    pub worker_refresh_secs: u64,
    pub geolocation_timeout_ms: u64,
    pub geocoder_url: Option<String>,
    pub storage_public_url: String,
    pub strict_transitions: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("compact") | Err(_) => LogFormat::Compact,
            Ok(other) => {
                return Err(AppError::Internal(format!(
                    "invalid LOG_FORMAT: {other}, expected compact/json"
                )));
            }
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            worker_freshness_secs: parse_or_default("WORKER_FRESHNESS_SECS", 300)?,
            worker_refresh_secs: parse_or_default("WORKER_REFRESH_SECS", 30)?,
            geolocation_timeout_ms: parse_or_default("GEOLOCATION_TIMEOUT_MS", 10_000)?,
            geocoder_url: env::var("GEOCODER_URL").ok().filter(|url| !url.trim().is_empty()),
            storage_public_url: env::var("STORAGE_PUBLIC_URL").unwrap_or_else(|_| {
                "http://localhost:3000/storage/v1/object/public".to_string()
            }),
            strict_transitions: parse_or_default("STRICT_TRANSITIONS", true)?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            event_buffer_size: 1024,
            worker_freshness_secs: 300,
            worker_refresh_secs: 30,
            geolocation_timeout_ms: 10_000,
            geocoder_url: None,
            storage_public_url: "http://localhost:3000/storage/v1/object/public".to_string(),
            strict_transitions: true,
        }
    }
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
