//! Connection supervisor.
//!
//! The whole stream lifecycle lives in one transition function,
//! [`Supervisor::handle`], which consumes an [`Event`] and returns the
//! [`Command`]s the driver must carry out. The supervisor never touches a
//! socket or a timer itself, so every transition is testable without I/O.
//!
//! ```text
//! Idle --Start--> Connecting --Opened--> Open --Failed/timeout--> Reconnecting
//!   ^                 ^                                               |
//!   |                 +-------------------ReconnectDue----------------+
//!   +--Closed-- Closing <--Stop-- (any active phase)
//! ```

use crate::cex::{self, Inbound, Outbound, TickerEvent};
use crate::config::StreamConfig;
use crate::models::PriceUpdate;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Heartbeat bookkeeping, only meaningful while the connection is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    pub sent_at: Instant,
    pub ack_at: Instant,
}

impl Liveness {
    fn probe_outstanding(&self) -> bool {
        self.ack_at < self.sent_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Connecting,
    Open(Liveness),
    /// Transport torn down, waiting for the backoff delay.
    Reconnecting,
    /// Stop requested, waiting for the transport to finish closing.
    Closing,
}

#[derive(Debug, Default)]
struct ConnectionState {
    phase: Phase,
    reconnect_attempts: u32,
    last_prices: HashMap<String, f64>,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start,
    Stop,
    Opened,
    Frame { text: String, received_at_ms: i64 },
    /// Transport-level pong.
    HeartbeatAck,
    /// Connect error, read error, or the server closing the connection.
    Failed(String),
    /// The driver finished tearing the transport down.
    Closed,
    HeartbeatTick,
    ReconnectDue,
}

/// Side effects requested from the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect,
    Send(Outbound),
    ArmHeartbeat,
    /// Drop both timers, detach the transport from event delivery, then close it.
    Teardown,
    ScheduleReconnect(Duration),
    Emit(PriceUpdate),
    Exhausted { attempts: u32 },
}

pub struct Supervisor {
    tracked: HashSet<String>,
    stream_names: Vec<String>,
    quote_asset: String,
    heartbeat_timeout: Duration,
    reconnect_delay: Duration,
    max_reconnect_attempts: u32,
    state: ConnectionState,
}

impl Supervisor {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            tracked: config
                .tracked_instruments
                .iter()
                .map(|id| id.to_lowercase())
                .collect(),
            stream_names: config.stream_names(),
            quote_asset: config.quote_asset.to_lowercase(),
            heartbeat_timeout: config.heartbeat_timeout,
            reconnect_delay: config.reconnect_delay,
            max_reconnect_attempts: config.max_reconnect_attempts,
            state: ConnectionState::default(),
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn is_idle(&self) -> bool {
        self.state.phase == Phase::Idle
    }

    #[cfg(test)]
    pub fn reconnect_attempts(&self) -> u32 {
        self.state.reconnect_attempts
    }

    #[cfg(test)]
    pub fn last_price(&self, instrument_id: &str) -> Option<f64> {
        self.state.last_prices.get(instrument_id).copied()
    }

    /// Apply one event and return the commands it triggers, in execution order.
    pub fn handle(&mut self, event: Event, now: Instant) -> Vec<Command> {
        match (self.state.phase, event) {
            (Phase::Idle, Event::Start) => {
                info!(streams = ?self.stream_names, "[FEED] starting stream");
                self.state = ConnectionState {
                    phase: Phase::Connecting,
                    ..ConnectionState::default()
                };
                vec![Command::Connect]
            }
            (_, Event::Start) => {
                debug!("[FEED] start ignored, stream already active");
                Vec::new()
            }

            (Phase::Idle | Phase::Closing, Event::Stop) => Vec::new(),
            (_, Event::Stop) => {
                info!("[FEED] stop requested");
                self.state = ConnectionState {
                    phase: Phase::Closing,
                    ..ConnectionState::default()
                };
                vec![Command::Teardown]
            }
            (Phase::Closing, Event::Closed | Event::Failed(_)) => {
                self.state.phase = Phase::Idle;
                info!("[FEED] stream stopped");
                Vec::new()
            }

            (Phase::Connecting, Event::Opened) => {
                info!(
                    previous_attempts = self.state.reconnect_attempts,
                    "[FEED] connection open, subscribing"
                );
                self.state.reconnect_attempts = 0;
                self.state.phase = Phase::Open(Liveness {
                    sent_at: now,
                    ack_at: now,
                });
                vec![
                    Command::Send(Outbound::Subscribe(self.stream_names.clone())),
                    Command::ArmHeartbeat,
                ]
            }
            (Phase::Open(_), Event::Frame {
                text,
                received_at_ms,
            }) => self.on_frame(&text, now, received_at_ms),
            (Phase::Open(_), Event::HeartbeatAck) => {
                self.record_ack(now);
                Vec::new()
            }
            (Phase::Open(liveness), Event::HeartbeatTick) => self.on_heartbeat_tick(liveness, now),
            (Phase::Open(_) | Phase::Connecting, Event::Failed(reason)) => self.fail(&reason),
            (Phase::Reconnecting, Event::ReconnectDue) => {
                info!(
                    attempt = self.state.reconnect_attempts,
                    max = self.max_reconnect_attempts,
                    "[FEED] reconnecting"
                );
                self.state.phase = Phase::Connecting;
                vec![Command::Connect]
            }

            (phase, event) => {
                debug!(?phase, ?event, "[FEED] stale event ignored");
                Vec::new()
            }
        }
    }

    fn on_frame(&mut self, text: &str, now: Instant, received_at_ms: i64) -> Vec<Command> {
        match cex::classify(text) {
            Ok(Inbound::HeartbeatAck) => {
                self.record_ack(now);
                Vec::new()
            }
            Ok(Inbound::Ticker(ticker)) => self.on_ticker(&ticker, received_at_ms),
            Ok(Inbound::Ignored) => {
                debug!(len = text.len(), "[FEED] frame ignored");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "[FEED] dropping inbound frame");
                Vec::new()
            }
        }
    }

    fn on_ticker(&mut self, ticker: &TickerEvent, received_at_ms: i64) -> Vec<Command> {
        let tracked = cex::canonical_instrument_id(&ticker.symbol, &self.quote_asset)
            .filter(|id| self.tracked.contains(id));
        let Some(instrument_id) = tracked else {
            debug!(symbol = %ticker.symbol, "[FEED] untracked symbol ignored");
            return Vec::new();
        };

        let previous = self.state.last_prices.get(&instrument_id).copied();
        match cex::normalize(ticker, &self.quote_asset, previous, received_at_ms) {
            Ok(update) => {
                self.state.last_prices.insert(instrument_id, update.price);
                vec![Command::Emit(update)]
            }
            Err(e) => {
                warn!(symbol = %ticker.symbol, error = %e, "[FEED] dropping ticker");
                Vec::new()
            }
        }
    }

    fn record_ack(&mut self, now: Instant) {
        if let Phase::Open(mut liveness) = self.state.phase {
            liveness.ack_at = now;
            self.state.phase = Phase::Open(liveness);
            debug!("[HEARTBEAT] ack received");
        }
    }

    fn on_heartbeat_tick(&mut self, mut liveness: Liveness, now: Instant) -> Vec<Command> {
        if liveness.probe_outstanding() {
            let waited = now.saturating_duration_since(liveness.sent_at);
            if waited > self.heartbeat_timeout {
                warn!(waited_ms = waited.as_millis() as u64, "[HEARTBEAT] ack timed out");
                return self.fail("heartbeat timeout");
            }
        }
        liveness.sent_at = now;
        self.state.phase = Phase::Open(liveness);
        debug!("[HEARTBEAT] probe sent");
        vec![Command::Send(Outbound::Ping)]
    }

    /// Single recovery path for close, error and heartbeat timeout.
    fn fail(&mut self, reason: &str) -> Vec<Command> {
        let mut commands = vec![Command::Teardown];
        if self.state.reconnect_attempts < self.max_reconnect_attempts {
            self.state.reconnect_attempts += 1;
            self.state.phase = Phase::Reconnecting;
            warn!(
                reason,
                attempt = self.state.reconnect_attempts,
                max = self.max_reconnect_attempts,
                delay_ms = self.reconnect_delay.as_millis() as u64,
                "[FEED] connection lost, scheduling reconnect"
            );
            commands.push(Command::ScheduleReconnect(self.reconnect_delay));
        } else {
            let attempts = self.state.reconnect_attempts;
            error!(reason, attempts, "[FEED] reconnect attempts exhausted, giving up");
            self.state = ConnectionState::default();
            commands.push(Command::Exhausted { attempts });
        }
        commands
    }
}
