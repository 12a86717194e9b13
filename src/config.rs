use crate::errors::AppError;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DAY_SECS: u64 = 24 * 60 * 60;
const MAX_SCAN_INTERVAL_SECS: u64 = DAY_SECS;
const MAX_LOOKAHEAD_SECS: u64 = 365 * DAY_SECS;
const MAX_WEBHOOK_TIMEOUT_SECS: u64 = 60 * 60;
const MAX_WEBHOOK_CONCURRENCY: u64 = 1024;
const MAX_CYCLE_TIMEOUT_SECS: u64 = DAY_SECS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_url: String,
    pub server_port: u16,
    pub rust_log: String,
    pub log_format: LogFormat,
    /// Period between two scan cycles. Ticks are aligned to multiples of it.
    pub scan_interval: Duration,
    /// How far ahead of `now` a due date makes a task a notification candidate.
    pub lookahead: Duration,
    pub webhook_timeout: Duration,
    pub webhook_concurrency: usize,
    pub cycle_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let db_url = env::var("DATABASE_URL").unwrap_or("sqlite:./tasks.db".to_string());

        let server_port = match env::var("SERVER_PORT") {
            Ok(port_str) => port_str.parse::<u16>().map_err(|_| {
                AppError::Config(format!(
                    "SERVER_PORT '{}' is not a valid port number",
                    port_str
                ))
            })?,
            Err(_) => 8080, // Default
        };

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("text") | Err(_) => LogFormat::Text,
            Ok(other) => {
                return Err(AppError::Config(format!(
                    "LOG_FORMAT '{}' must be 'text' or 'json'",
                    other
                )));
            }
        };

        let scan_interval = Duration::from_secs(bounded_var(
            "SCAN_INTERVAL_SECS",
            60,
            MAX_SCAN_INTERVAL_SECS,
        )?);
        let lookahead = Duration::from_secs(bounded_var(
            "NOTIFY_LOOKAHEAD_SECS",
            3600,
            MAX_LOOKAHEAD_SECS,
        )?);
        let webhook_timeout = Duration::from_secs(bounded_var(
            "WEBHOOK_TIMEOUT_SECS",
            10,
            MAX_WEBHOOK_TIMEOUT_SECS,
        )?);
        let webhook_concurrency =
            bounded_var("WEBHOOK_CONCURRENCY", 4, MAX_WEBHOOK_CONCURRENCY)? as usize;
        let cycle_timeout = Duration::from_secs(bounded_var(
            "SCAN_CYCLE_TIMEOUT_SECS",
            scan_interval.as_secs().min(MAX_CYCLE_TIMEOUT_SECS),
            MAX_CYCLE_TIMEOUT_SECS,
        )?);

        Ok(Config {
            db_url,
            server_port,
            rust_log,
            log_format,
            scan_interval,
            lookahead,
            webhook_timeout,
            webhook_concurrency,
            cycle_timeout,
        })
    }
}

/// Reads an integer variable in `1..=max`, falling back to `default` when unset.
fn bounded_var(key: &str, default: u64, max: u64) -> Result<u64, AppError> {
    parse_bounded(key, env::var(key).ok().as_deref(), default, max)
}

fn parse_bounded(key: &str, raw: Option<&str>, default: u64, max: u64) -> Result<u64, AppError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match u64::from_str(raw.trim()) {
        Ok(value) if (1..=max).contains(&value) => Ok(value),
        _ => Err(AppError::Config(format!(
            "{} '{}' must be an integer between 1 and {}",
            key, raw, max
        ))),
    }
}
