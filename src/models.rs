//! Shared data structures used throughout the application.

use serde::Serialize;

/// Direction of a price move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Neutral,
}

impl Direction {
    /// Sign of `delta`: positive is `Up`, negative is `Down`, zero (or NaN) is `Neutral`.
    pub fn from_delta(delta: f64) -> Self {
        if delta > 0.0 {
            Direction::Up
        } else if delta < 0.0 {
            Direction::Down
        } else {
            Direction::Neutral
        }
    }
}

/// Change between two observed prices.
///
/// `percentage` is rounded to 2 decimals and `absolute_value` to 8 decimals,
/// each from the raw difference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceChange {
    pub percentage: f64,
    pub absolute_value: f64,
    pub direction: Direction,
}

/// Canonical price update handed to the sink, one per accepted ticker message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    /// Lowercase instrument id, e.g. `btc`.
    pub instrument_id: String,
    pub price: f64,
    /// Change against the previously observed price of the same instrument.
    pub change_1h: PriceChange,
    pub change_24h: PriceChange,
    /// 24h volume in quote-currency notional.
    pub volume_24h: f64,
    pub observed_at_epoch_millis: i64,
}
