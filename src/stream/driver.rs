//! Single-task actor executing supervisor commands.
//!
//! The driver owns the transport and both timers. Every source of activity
//! (cancellation, heartbeat tick, reconnect delay, inbound frame) goes through
//! one biased `select!`, so the supervisor sees one event at a time in
//! delivery order.

use super::supervisor::{Command, Event, Supervisor};
use super::transport::Connector;
use crate::cex::Outbound;
use crate::config::{HeartbeatProbe, StreamConfig};
use crate::models::PriceUpdate;
use crate::utils::now_ms;
use futures::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at, sleep, timeout};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Upper bound on the close handshake during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

pub type PriceSink = Box<dyn Fn(PriceUpdate) + Send>;
pub type ExhaustedHandler = Arc<dyn Fn(u32) + Send + Sync>;

struct Handlers {
    sink: PriceSink,
    on_exhausted: Option<ExhaustedHandler>,
}

/// Caller callbacks behind a lock shared by the driver and the facade.
///
/// Callbacks run with the lock held, so once [`SinkGate::detach`] returns no
/// callback is running or will run again. `live` drops to false before the
/// exhaustion handler runs, so a restart issued from that handler is honoured.
pub(crate) struct SinkGate {
    handlers: Mutex<Option<Handlers>>,
    live: AtomicBool,
}

impl SinkGate {
    pub(crate) fn new(sink: PriceSink, on_exhausted: Option<ExhaustedHandler>) -> Self {
        Self {
            handlers: Mutex::new(Some(Handlers { sink, on_exhausted })),
            live: AtomicBool::new(true),
        }
    }

    /// False once the cycle has been stopped or has given up.
    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    fn emit(&self, update: PriceUpdate) {
        if let Some(handlers) = self.handlers.lock().as_ref() {
            (handlers.sink)(update);
        }
    }

    /// Report exhaustion once, then detach.
    fn exhausted(&self, attempts: u32) {
        let mut guard = self.handlers.lock();
        self.live.store(false, Ordering::Release);
        if let Some(Handlers {
            on_exhausted: Some(handler),
            ..
        }) = guard.as_ref()
        {
            handler(attempts);
        }
        guard.take();
    }

    pub(crate) fn detach(&self) {
        self.live.store(false, Ordering::Release);
        self.handlers.lock().take();
    }
}

pub(crate) struct Driver<C: Connector> {
    connector: Arc<C>,
    url: String,
    connect_timeout: Duration,
    probe: HeartbeatProbe,
    heartbeat_interval: Duration,
    supervisor: Supervisor,
    gate: Arc<SinkGate>,
    cancel: CancellationToken,
    transport: Option<C::Transport>,
    heartbeat: Option<Interval>,
    reconnect: Option<Pin<Box<Sleep>>>,
}

impl<C: Connector> Driver<C> {
    pub(crate) fn new(
        connector: Arc<C>,
        config: &StreamConfig,
        gate: Arc<SinkGate>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connector,
            url: config.ws_url.clone(),
            connect_timeout: config.connect_timeout,
            probe: config.heartbeat_probe,
            heartbeat_interval: config.heartbeat_interval,
            supervisor: Supervisor::new(config),
            gate,
            cancel,
            transport: None,
            heartbeat: None,
            reconnect: None,
        }
    }

    /// Run one start-to-idle cycle.
    pub(crate) async fn run(mut self) {
        let mut pending_events = VecDeque::from([Event::Start]);
        loop {
            while let Some(event) = pending_events.pop_front() {
                for command in self.supervisor.handle(event, Instant::now()) {
                    if let Some(follow_up) = self.execute(command).await {
                        pending_events.push_back(follow_up);
                    }
                }
            }
            if self.supervisor.is_idle() {
                break;
            }
            let event = self.next_event().await;
            pending_events.push_back(event);
        }
        debug!("[FEED] driver finished");
    }

    async fn next_event(&mut self) -> Event {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Some(Event::Stop),
                // Buffered acks land before a due tick.
                frame = next_frame(&mut self.transport) => frame_event(frame),
                _ = next_tick(&mut self.heartbeat) => Some(Event::HeartbeatTick),
                _ = elapsed(&mut self.reconnect) => {
                    self.reconnect = None;
                    Some(Event::ReconnectDue)
                }
            };
            if let Some(event) = event {
                return event;
            }
        }
    }

    async fn execute(&mut self, command: Command) -> Option<Event> {
        match command {
            Command::Connect => self.connect().await,
            Command::Send(outbound) => self.send(outbound).await,
            Command::ArmHeartbeat => {
                let period = self.heartbeat_interval;
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.heartbeat = Some(ticker);
                None
            }
            Command::Teardown => {
                self.teardown().await;
                Some(Event::Closed)
            }
            Command::ScheduleReconnect(delay) => {
                self.reconnect = Some(Box::pin(sleep(delay)));
                None
            }
            Command::Emit(update) => {
                self.gate.emit(update);
                None
            }
            Command::Exhausted { attempts } => {
                self.gate.exhausted(attempts);
                None
            }
        }
    }

    async fn connect(&mut self) -> Option<Event> {
        debug!(url = %self.url, "[FEED] connecting");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Some(Event::Stop),
            result = timeout(self.connect_timeout, self.connector.connect(&self.url)) => match result {
                Ok(Ok(transport)) => {
                    self.transport = Some(transport);
                    Some(Event::Opened)
                }
                Ok(Err(e)) => {
                    warn!(error = %e, url = %self.url, "[FEED] connect failed");
                    Some(Event::Failed(e.to_string()))
                }
                Err(_) => {
                    warn!(
                        timeout_ms = self.connect_timeout.as_millis() as u64,
                        url = %self.url,
                        "[FEED] connect timed out"
                    );
                    Some(Event::Failed("connect timed out".to_string()))
                }
            },
        }
    }

    async fn send(&mut self, outbound: Outbound) -> Option<Event> {
        let message = match outbound.encode(self.probe) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, ?outbound, "[FEED] failed to encode outbound frame");
                return None;
            }
        };
        let Some(transport) = self.transport.as_mut() else {
            debug!(?outbound, "[FEED] no transport, frame not sent");
            return None;
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Some(Event::Stop),
            result = transport.send(message) => match result {
                Ok(()) => None,
                Err(e) => {
                    warn!(error = %e, "[FEED] send failed");
                    Some(Event::Failed(e.to_string()))
                }
            },
        }
    }

    /// Timers first, then the transport leaves the select set, then it is closed.
    async fn teardown(&mut self) {
        self.heartbeat = None;
        self.reconnect = None;
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        match timeout(CLOSE_TIMEOUT, transport.close()).await {
            Ok(Ok(())) => debug!("[FEED] transport closed"),
            Ok(Err(e)) => debug!(error = %e, "[FEED] close handshake failed"),
            Err(_) => debug!("[FEED] close handshake timed out"),
        }
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

async fn elapsed(delay: &mut Option<Pin<Box<Sleep>>>) {
    match delay {
        Some(delay) => delay.as_mut().await,
        None => pending().await,
    }
}

async fn next_frame<T>(transport: &mut Option<T>) -> Option<Result<Message, WsError>>
where
    T: Stream<Item = Result<Message, WsError>> + Unpin,
{
    match transport {
        Some(transport) => transport.next().await,
        None => pending().await,
    }
}

fn frame_event(frame: Option<Result<Message, WsError>>) -> Option<Event> {
    match frame {
        Some(Ok(Message::Text(text))) => Some(Event::Frame {
            text,
            received_at_ms: now_ms(),
        }),
        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
            Ok(text) => Some(Event::Frame {
                text,
                received_at_ms: now_ms(),
            }),
            Err(_) => {
                warn!("[FEED] dropping non UTF-8 binary frame");
                None
            }
        },
        Some(Ok(Message::Pong(_))) => Some(Event::HeartbeatAck),
        // tungstenite answers pings itself.
        Some(Ok(Message::Ping(_) | Message::Frame(_))) => None,
        Some(Ok(Message::Close(frame))) => Some(Event::Failed(format!(
            "server closed connection: {frame:?}"
        ))),
        Some(Err(e)) => Some(Event::Failed(e.to_string())),
        None => Some(Event::Failed("stream ended".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_map_to_events() {
        assert!(matches!(
            frame_event(Some(Ok(Message::Text("{}".into())))),
            Some(Event::Frame { text, .. }) if text == "{}"
        ));
        assert!(matches!(
            frame_event(Some(Ok(Message::Binary(b"{\"pong\":true}".to_vec())))),
            Some(Event::Frame { .. })
        ));
        assert_eq!(
            frame_event(Some(Ok(Message::Pong(Vec::new())))),
            Some(Event::HeartbeatAck)
        );
        assert_eq!(frame_event(Some(Ok(Message::Ping(vec![1])))), None);
        assert!(matches!(
            frame_event(Some(Ok(Message::Close(None)))),
            Some(Event::Failed(_))
        ));
        assert!(matches!(
            frame_event(Some(Err(WsError::ConnectionClosed))),
            Some(Event::Failed(_))
        ));
        assert_eq!(
            frame_event(None),
            Some(Event::Failed("stream ended".to_string()))
        );
        assert_eq!(frame_event(Some(Ok(Message::Binary(vec![0xff, 0xfe])))), None);
    }

    #[test]
    fn gate_stops_delivery_after_detach() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let exhausted = Arc::new(Mutex::new(Vec::new()));
        let gate = {
            let seen = Arc::clone(&seen);
            let exhausted = Arc::clone(&exhausted);
            SinkGate::new(
                Box::new(move |u: PriceUpdate| seen.lock().push(u.instrument_id)),
                Some(Arc::new(move |n: u32| exhausted.lock().push(n))),
            )
        };
        let update = crate::cex::normalize(
            &crate::cex::TickerEvent {
                event_type: "24hrTicker".into(),
                event_time: None,
                symbol: "XRPUSDT".into(),
                last_price: "0.5".into(),
                price_change: "0".into(),
                price_change_percent: "0".into(),
                volume: "1".into(),
            },
            "usdt",
            None,
            0,
        )
        .unwrap();

        assert!(gate.is_live());
        gate.emit(update.clone());
        gate.exhausted(5);
        assert!(!gate.is_live());
        assert!(gate.is_live());
        gate.emit(update.clone());
        gate.exhausted(5);
        assert!(!gate.is_live());
        gate.detach();

        assert_eq!(*seen.lock(), vec!["xrp".to_string()]);
        assert_eq!(*exhausted.lock(), vec![5]);
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_ack_is_read_before_due_tick() {
        use crate::stream::transport::mock::{MockConnector, Outcome};

        let connector = MockConnector::new(Outcome::Accept);
        let config = StreamConfig::default();
        let transport = connector.connect(&config.ws_url).await.unwrap();
        let server = connector.server(0);
        let mut driver = Driver::new(
            Arc::new(connector),
            &config,
            Arc::new(SinkGate::new(Box::new(|_: PriceUpdate| {}), None)),
            CancellationToken::new(),
        );
        driver.transport = Some(transport);
        driver.heartbeat = Some(interval_at(Instant::now(), config.heartbeat_interval));

        server.push(Message::Pong(Vec::new()));
        assert_eq!(driver.next_event().await, Event::HeartbeatAck);
        assert_eq!(driver.next_event().await, Event::HeartbeatTick);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_wins_over_pending_frames() {
        use crate::stream::transport::mock::{MockConnector, Outcome};

        let connector = MockConnector::new(Outcome::Accept);
        let config = StreamConfig::default();
        let transport = connector.connect(&config.ws_url).await.unwrap();
        let server = connector.server(0);
        let cancel = CancellationToken::new();
        let mut driver = Driver::new(
            Arc::new(connector),
            &config,
            Arc::new(SinkGate::new(Box::new(|_: PriceUpdate| {}), None)),
            cancel.clone(),
        );
        driver.transport = Some(transport);

        server.push_text(r#"{"pong":true}"#);
        cancel.cancel();
        assert_eq!(driver.next_event().await, Event::Stop);
    }
}
