//! Core library for the ticker-stream project.
//!
//! Subscribes to an exchange ticker feed, normalizes each ticker into a
//! [`models::PriceUpdate`] and hands it to a caller-supplied sink, keeping
//! the connection alive with heartbeats and bounded reconnects.

pub mod calc;
pub mod cex;
pub mod config;
pub mod errors;
pub mod models;
pub mod stream;
pub mod utils;

pub use config::StreamConfig;
pub use errors::{AppError, Result};
pub use models::{Direction, PriceChange, PriceUpdate};
pub use stream::StreamClient;
