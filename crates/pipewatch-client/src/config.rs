use std::time::Duration;

use url::Url;

use crate::error::{ClientError, ClientResult};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api";
pub const DEFAULT_RECONNECT_MS: u64 = 3000;
pub const DEFAULT_BATCH_REFRESH_MS: u64 = 5000;
pub const DEFAULT_SETTLE_MS: u64 = 1000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const BATCH_PAGE_SIZE: u32 = 100;

#[derive(Clone, Debug)]
pub struct WatchConfig {
    pub api_base_url: Url,
    pub ws_base_url: Url,
    pub auth_token: Option<String>,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: Option<u32>,
    pub batch_refresh_interval: Duration,
    pub settle_delay: Duration,
    pub heartbeat_interval: Option<Duration>,
    pub request_timeout: Duration,
}

/// Values given on the command line. Empty strings mean "not given".
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub api_url: String,
    pub ws_url: String,
    pub token: String,
}

impl WatchConfig {
    pub fn new(api_base_url: Url) -> ClientResult<Self> {
        let ws_base_url = derive_ws_base(&api_base_url)?;
        Ok(Self {
            api_base_url,
            ws_base_url,
            auth_token: None,
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_MS),
            max_reconnect_attempts: None,
            batch_refresh_interval: Duration::from_millis(DEFAULT_BATCH_REFRESH_MS),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_MS),
            heartbeat_interval: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        })
    }
}

pub fn load_config(overrides: ConfigOverrides) -> ClientResult<WatchConfig> {
    let api_url = first_non_empty(&[Some(overrides.api_url), env_var("PIPEWATCH_API_URL")])
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let mut config = WatchConfig::new(Url::parse(&api_url)?)?;

    if let Some(ws_url) = first_non_empty(&[Some(overrides.ws_url), env_var("PIPEWATCH_WS_URL")]) {
        config.ws_base_url = Url::parse(&ws_url)?;
    }
    config.auth_token = first_non_empty(&[Some(overrides.token), env_var("PIPEWATCH_TOKEN")]);
    config.reconnect_interval = resolve_millis(
        "PIPEWATCH_RECONNECT_MS",
        env_var("PIPEWATCH_RECONNECT_MS"),
        DEFAULT_RECONNECT_MS,
    )?;
    config.batch_refresh_interval = resolve_millis(
        "PIPEWATCH_BATCH_REFRESH_MS",
        env_var("PIPEWATCH_BATCH_REFRESH_MS"),
        DEFAULT_BATCH_REFRESH_MS,
    )?;
    config.settle_delay = resolve_millis(
        "PIPEWATCH_SETTLE_MS",
        env_var("PIPEWATCH_SETTLE_MS"),
        DEFAULT_SETTLE_MS,
    )?;
    config.max_reconnect_attempts = parse_optional_u64(
        "PIPEWATCH_MAX_RECONNECTS",
        env_var("PIPEWATCH_MAX_RECONNECTS"),
    )?
    .map(|value| u32::try_from(value).unwrap_or(u32::MAX));
    config.heartbeat_interval = parse_optional_u64(
        "PIPEWATCH_HEARTBEAT_MS",
        env_var("PIPEWATCH_HEARTBEAT_MS"),
    )?
    .filter(|ms| *ms > 0)
    .map(Duration::from_millis);
    Ok(config)
}

/// Push endpoints are mounted at the server root, not under the REST prefix.
pub fn derive_ws_base(api: &Url) -> ClientResult<Url> {
    let scheme = match api.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => api.scheme(),
        other => {
            return Err(ClientError::Config(format!(
                "unsupported API URL scheme '{other}'"
            )))
        }
    };
    let host = api
        .host_str()
        .ok_or_else(|| ClientError::Config(format!("API URL has no host: {api}")))?;
    let authority = match api.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Ok(Url::parse(&format!("{scheme}://{authority}/"))?)
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn resolve_log_stdout() -> bool {
    env_var("PIPEWATCH_LOG_STDOUT")
        .and_then(|value| parse_bool_flag(&value))
        .unwrap_or(false)
}

fn resolve_millis(name: &str, raw: Option<String>, default_ms: u64) -> ClientResult<Duration> {
    Ok(Duration::from_millis(
        parse_optional_u64(name, raw)?.unwrap_or(default_ms),
    ))
}

fn parse_optional_u64(name: &str, raw: Option<String>) -> ClientResult<Option<u64>> {
    match raw {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|err| ClientError::Config(format!("{name}='{value}': {err}"))),
        _ => Ok(None),
    }
}

fn first_non_empty(candidates: &[Option<String>]) -> Option<String> {
    candidates
        .iter()
        .flatten()
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}
