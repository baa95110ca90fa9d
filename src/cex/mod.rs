//! CEX ticker feed.
//!
//! Responsibilities:
//! • Speak the exchange's public stream protocol (subscribe, ping, tickers).
//! • Turn raw ticker payloads into canonical `PriceUpdate`s.

pub mod binance;
pub mod normalize;

pub use binance::{BINANCE_WS_ENDPOINT, Inbound, Outbound, TickerEvent, classify};
pub use normalize::{canonical_instrument_id, normalize};
