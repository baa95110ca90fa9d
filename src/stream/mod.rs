//! Supervised ticker stream.
//!
//! Responsibilities:
//! • `supervisor`: pure lifecycle state machine (connect, heartbeat, reconnect).
//! • `driver`: background task running the supervisor against a live transport.
//! • `transport`: connector seam, tungstenite in production.
//! • `client`: start/stop facade handed to callers.

mod client;
mod driver;
mod supervisor;
pub mod transport;

pub use client::StreamClient;
pub use transport::{Connector, WsConnector};
