use crate::config::HeartbeatProbe;
use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::info;

pub const BINANCE_WS_ENDPOINT: &str = "wss://stream.binance.com:9443/ws";

const TICKER_EVENT: &str = "24hrTicker";
const SUBSCRIBE_REQUEST_ID: u64 = 1;

pub type BinanceWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 24h rolling-window ticker as pushed on `<symbol>@ticker`.
///
/// Numeric fields arrive as strings; long-form names are accepted as aliases.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerEvent {
    #[serde(rename = "e", alias = "eventType")]
    pub event_type: String,
    #[serde(rename = "E", alias = "eventTime", default)]
    pub event_time: Option<i64>,
    #[serde(rename = "s", alias = "symbol")]
    pub symbol: String,
    #[serde(rename = "c", alias = "lastPrice")]
    pub last_price: String,
    #[serde(rename = "p", alias = "priceChange24h")]
    pub price_change: String,
    #[serde(rename = "P", alias = "priceChangePercent24h")]
    pub price_change_percent: String,
    #[serde(rename = "v", alias = "volume24h")]
    pub volume: String,
}

/// What an inbound text frame turned out to be.
#[derive(Debug, Clone)]
pub enum Inbound {
    HeartbeatAck,
    Ticker(TickerEvent),
    Ignored,
}

/// Classify one inbound text frame.
pub fn classify(text: &str) -> Result<Inbound> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| AppError::MalformedPayload(format!("invalid JSON: {e}")))?;
    let Value::Object(fields) = &value else {
        return Ok(Inbound::Ignored);
    };

    if fields.get("pong").is_some_and(is_truthy) {
        return Ok(Inbound::HeartbeatAck);
    }

    let event_type = fields
        .get("e")
        .or_else(|| fields.get("eventType"))
        .and_then(Value::as_str);
    if event_type != Some(TICKER_EVENT) {
        return Ok(Inbound::Ignored);
    }

    serde_json::from_value::<TickerEvent>(value)
        .map(Inbound::Ticker)
        .map_err(|e| AppError::MalformedPayload(format!("ticker: {e}")))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[derive(Debug, Serialize)]
struct SubscribeRequest<'a> {
    method: &'static str,
    params: &'a [String],
    id: u64,
}

#[derive(Debug, Serialize)]
struct PingRequest {
    method: &'static str,
}

/// Frames the client sends upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Stream names, e.g. `btcusdt@ticker`.
    Subscribe(Vec<String>),
    Ping,
}

impl Outbound {
    /// Encode into a WebSocket message; `probe` selects the heartbeat flavour.
    pub fn encode(&self, probe: HeartbeatProbe) -> Result<Message> {
        let text = match self {
            Outbound::Subscribe(params) => serde_json::to_string(&SubscribeRequest {
                method: "SUBSCRIBE",
                params,
                id: SUBSCRIBE_REQUEST_ID,
            })?,
            Outbound::Ping => match probe {
                HeartbeatProbe::Json => serde_json::to_string(&PingRequest { method: "ping" })?,
                HeartbeatProbe::Frame => return Ok(Message::Ping(Vec::new())),
            },
        };
        Ok(Message::Text(text))
    }
}

/// Ticker stream name for an instrument, e.g. (`btc`, `usdt`) -> `btcusdt@ticker`.
pub fn ticker_stream_name(instrument_id: &str, quote_asset: &str) -> String {
    format!(
        "{}{}@ticker",
        instrument_id.to_lowercase(),
        quote_asset.to_lowercase()
    )
}

/// Open a raw connection to the feed endpoint.
pub async fn connect_feed(url: &str) -> Result<BinanceWsStream> {
    let (ws_stream, _resp) = connect_async(url).await?;
    info!(url, "[FEED] websocket connected");
    Ok(ws_stream)
}
