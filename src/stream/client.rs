//! Caller-facing handle over the background stream task.

use super::driver::{Driver, ExhaustedHandler, SinkGate};
use super::transport::{Connector, WsConnector};
use crate::config::StreamConfig;
use crate::errors::{AppError, Result};
use crate::models::PriceUpdate;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct ActiveStream {
    cancel: CancellationToken,
    gate: Arc<SinkGate>,
    task: JoinHandle<()>,
}

/// Streams normalized ticker updates to a caller-supplied sink.
///
/// `start` spawns the connection task on the current tokio runtime; `stop`
/// cancels it and detaches the sink before returning. Dropping the client
/// stops it.
pub struct StreamClient<C: Connector = WsConnector> {
    config: StreamConfig,
    connector: Arc<C>,
    on_exhausted: Option<ExhaustedHandler>,
    active: Option<ActiveStream>,
}

impl StreamClient<WsConnector> {
    pub fn new(config: StreamConfig) -> Result<Self> {
        Self::with_connector(config, WsConnector)
    }
}

impl<C: Connector> StreamClient<C> {
    pub fn with_connector(config: StreamConfig, connector: C) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            connector: Arc::new(connector),
            on_exhausted: None,
            active: None,
        })
    }

    /// Called once with the attempt count when reconnecting gives up.
    pub fn on_exhausted<F>(mut self, handler: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.on_exhausted = Some(Arc::new(handler));
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// True while a stream cycle is active. Turns false as soon as the
    /// cycle gives up, before the exhaustion handler runs.
    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.gate.is_live() && !active.task.is_finished())
    }

    /// Begin streaming into `sink`. A second call while running is ignored.
    pub fn start<F>(&mut self, sink: F) -> Result<()>
    where
        F: Fn(PriceUpdate) + Send + 'static,
    {
        if self.is_running() {
            debug!("[FEED] start ignored, stream already running");
            return Ok(());
        }
        let runtime = Handle::try_current()
            .map_err(|e| AppError::Runtime(format!("start needs a tokio runtime: {e}")))?;

        if let Some(previous) = self.active.take() {
            previous.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let gate = Arc::new(SinkGate::new(Box::new(sink), self.on_exhausted.clone()));
        let driver = Driver::new(
            Arc::clone(&self.connector),
            &self.config,
            Arc::clone(&gate),
            cancel.clone(),
        );
        let task = runtime.spawn(driver.run());
        info!(
            url = %self.config.ws_url,
            instruments = ?self.config.tracked_instruments,
            "[FEED] stream started"
        );
        self.active = Some(ActiveStream { cancel, gate, task });
        Ok(())
    }

    /// Stop streaming. No sink call happens once this returns.
    pub fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.gate.detach();
        active.cancel.cancel();
        debug!("[FEED] sink detached, driver cancelled");
    }
}

impl<C: Connector> Drop for StreamClient<C> {
    fn drop(&mut self) {
        self.stop();
    }
}
