//! Configuration loader and stream settings.

use crate::cex::binance::{BINANCE_WS_ENDPOINT, ticker_stream_name};
use crate::errors::{AppError, Result};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_TRACKED_INSTRUMENTS: [&str; 5] = ["btc", "eth", "bnb", "sol", "xrp"];
pub const DEFAULT_QUOTE_ASSET: &str = "usdt";
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// How liveness probes are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeartbeatProbe {
    /// `{"method":"ping"}` text frame, acknowledged by `{"pong":true}`.
    #[default]
    Json,
    /// WebSocket Ping control frame, acknowledged by a Pong frame.
    Frame,
}

impl FromStr for HeartbeatProbe {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(HeartbeatProbe::Json),
            "frame" => Ok(HeartbeatProbe::Frame),
            other => Err(AppError::Config(format!(
                "HEARTBEAT_PROBE must be `json` or `frame`, got {other:?}"
            ))),
        }
    }
}

/// Settings of one stream client.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// WebSocket endpoint of the ticker feed.
    pub ws_url: String,
    /// Canonical lowercase instrument ids, e.g. `btc`.
    pub tracked_instruments: Vec<String>,
    /// Quote asset shared by all tracked symbols, e.g. `usdt`.
    pub quote_asset: String,
    pub heartbeat_interval: Duration,
    /// Maximum wait for the ack of an outstanding probe.
    pub heartbeat_timeout: Duration,
    /// Maximum wait for the WebSocket handshake of one connect attempt.
    pub connect_timeout: Duration,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// Consecutive reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    pub heartbeat_probe: HeartbeatProbe,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_url: BINANCE_WS_ENDPOINT.to_string(),
            tracked_instruments: DEFAULT_TRACKED_INSTRUMENTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            quote_asset: DEFAULT_QUOTE_ASSET.to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_probe: HeartbeatProbe::default(),
        }
    }
}

impl StreamConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let ws_url = lookup("FEED_WS_URL").unwrap_or(defaults.ws_url);
        let tracked_instruments = match lookup("TRACKED_INSTRUMENTS") {
            Some(list) => list
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.tracked_instruments,
        };
        let quote_asset = lookup("QUOTE_ASSET")
            .map(|s| s.trim().to_lowercase())
            .unwrap_or(defaults.quote_asset);
        let heartbeat_interval =
            secs_or(&lookup, "HEARTBEAT_INTERVAL_SECS", defaults.heartbeat_interval)?;
        let heartbeat_timeout =
            secs_or(&lookup, "HEARTBEAT_TIMEOUT_SECS", defaults.heartbeat_timeout)?;
        let connect_timeout = secs_or(&lookup, "CONNECT_TIMEOUT_SECS", defaults.connect_timeout)?;
        let reconnect_delay = secs_or(&lookup, "RECONNECT_DELAY_SECS", defaults.reconnect_delay)?;
        let max_reconnect_attempts = match lookup("MAX_RECONNECT_ATTEMPTS") {
            Some(raw) => raw.trim().parse().map_err(|_| {
                AppError::Config(format!("MAX_RECONNECT_ATTEMPTS must be an integer, got {raw:?}"))
            })?,
            None => defaults.max_reconnect_attempts,
        };
        let heartbeat_probe = match lookup("HEARTBEAT_PROBE") {
            Some(raw) => raw.parse()?,
            None => defaults.heartbeat_probe,
        };

        let config = Self {
            ws_url,
            tracked_instruments,
            quote_asset,
            heartbeat_interval,
            heartbeat_timeout,
            connect_timeout,
            reconnect_delay,
            max_reconnect_attempts,
            heartbeat_probe,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.ws_url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(AppError::Config(format!(
                "feed url must use ws:// or wss://, got {}",
                self.ws_url
            )));
        }
        if self.tracked_instruments.is_empty() {
            return Err(AppError::Config("no tracked instruments".into()));
        }
        if self.quote_asset.is_empty() {
            return Err(AppError::Config("quote asset is empty".into()));
        }
        if self.heartbeat_interval.is_zero() || self.heartbeat_timeout.is_zero() {
            return Err(AppError::Config("heartbeat durations must be non-zero".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(AppError::Config("connect timeout must be non-zero".into()));
        }
        Ok(())
    }

    /// Subscription stream names, one per tracked instrument.
    pub fn stream_names(&self) -> Vec<String> {
        self.tracked_instruments
            .iter()
            .map(|id| ticker_stream_name(id, &self.quote_asset))
            .collect()
    }
}

fn secs_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| AppError::Config(format!("{key} must be whole seconds, got {raw:?}"))),
        None => Ok(default),
    }
}
