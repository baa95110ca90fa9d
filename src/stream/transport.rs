//! Transport seam between the driver and the network.

use crate::cex::binance::{BinanceWsStream, connect_feed};
use crate::errors::Result;
use futures::{Sink, Stream};
use std::future::Future;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Opens duplex WebSocket-like connections.
pub trait Connector: Send + Sync + 'static {
    type Transport: Stream<Item = std::result::Result<Message, WsError>>
        + Sink<Message, Error = WsError>
        + Unpin
        + Send
        + 'static;

    fn connect(&self, url: &str) -> impl Future<Output = Result<Self::Transport>> + Send;
}

/// Production connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Transport = BinanceWsStream;

    fn connect(&self, url: &str) -> impl Future<Output = Result<Self::Transport>> + Send {
        connect_feed(url)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory connector: each accepted connection hands the test a
    //! [`MockServer`] to push frames into and read sent frames from.

    use super::*;
    use crate::errors::AppError;
    use futures::channel::mpsc;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::task::{Context, Poll};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum Outcome {
        Accept,
        Refuse,
        /// Never resolves.
        Hang,
    }

    pub(crate) struct MockServer {
        pub inbound: mpsc::UnboundedSender<std::result::Result<Message, WsError>>,
        pub outbound: mpsc::UnboundedReceiver<Message>,
    }

    impl MockServer {
        pub(crate) fn push_text(&self, text: &str) {
            let _ = self.inbound.unbounded_send(Ok(Message::Text(text.to_string())));
        }

        pub(crate) fn push(&self, message: Message) {
            let _ = self.inbound.unbounded_send(Ok(message));
        }

        /// Frames the client has sent so far.
        pub(crate) fn drain_sent(&mut self) -> Vec<Message> {
            let mut sent = Vec::new();
            while let Ok(Some(message)) = self.outbound.try_next() {
                sent.push(message);
            }
            sent
        }
    }

    struct Inner {
        fallback: Outcome,
        script: VecDeque<Outcome>,
        attempts: usize,
        servers: Vec<MockServer>,
    }

    #[derive(Clone)]
    pub(crate) struct MockConnector {
        inner: Arc<Mutex<Inner>>,
    }

    impl MockConnector {
        pub(crate) fn new(fallback: Outcome) -> Self {
            Self {
                inner: Arc::new(Mutex::new(Inner {
                    fallback,
                    script: VecDeque::new(),
                    attempts: 0,
                    servers: Vec::new(),
                })),
            }
        }

        /// Queue the outcome of the next connect, ahead of the fallback.
        pub(crate) fn then(self, outcome: Outcome) -> Self {
            self.inner.lock().script.push_back(outcome);
            self
        }

        pub(crate) fn attempts(&self) -> usize {
            self.inner.lock().attempts
        }

        /// Server side of the `index`-th accepted connection.
        pub(crate) fn server(&self, index: usize) -> MockServer {
            let mut inner = self.inner.lock();
            assert!(index < inner.servers.len(), "connection {index} was not accepted");
            let (inbound, _) = mpsc::unbounded();
            let (_, outbound) = mpsc::unbounded();
            std::mem::replace(&mut inner.servers[index], MockServer { inbound, outbound })
        }

        pub(crate) fn accepted(&self) -> usize {
            self.inner.lock().servers.len()
        }
    }

    impl Connector for MockConnector {
        type Transport = MockTransport;

        fn connect(&self, _url: &str) -> impl Future<Output = Result<MockTransport>> + Send {
            let outcome = {
                let mut inner = self.inner.lock();
                inner.attempts += 1;
                let fallback = inner.fallback;
                inner.script.pop_front().unwrap_or(fallback)
            };
            let inner = Arc::clone(&self.inner);
            async move {
                match outcome {
                    Outcome::Accept => {
                        let (inbound_tx, inbound_rx) = mpsc::unbounded();
                        let (outbound_tx, outbound_rx) = mpsc::unbounded();
                        inner.lock().servers.push(MockServer {
                            inbound: inbound_tx,
                            outbound: outbound_rx,
                        });
                        Ok(MockTransport {
                            inbound: inbound_rx,
                            outbound: outbound_tx,
                        })
                    }
                    Outcome::Refuse => Err(AppError::Other("connection refused".into())),
                    Outcome::Hang => std::future::pending().await,
                }
            }
        }
    }

    pub(crate) struct MockTransport {
        inbound: mpsc::UnboundedReceiver<std::result::Result<Message, WsError>>,
        outbound: mpsc::UnboundedSender<Message>,
    }

    impl Stream for MockTransport {
        type Item = std::result::Result<Message, WsError>;

        fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Pin::new(&mut self.get_mut().inbound).poll_next(cx)
        }
    }

    impl Sink<Message> for MockTransport {
        type Error = WsError;

        fn poll_ready(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<std::result::Result<(), WsError>> {
            Pin::new(&mut self.get_mut().outbound)
                .poll_ready(cx)
                .map_err(|_| WsError::ConnectionClosed)
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> std::result::Result<(), WsError> {
            Pin::new(&mut self.get_mut().outbound)
                .start_send(item)
                .map_err(|_| WsError::ConnectionClosed)
        }

        fn poll_flush(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<std::result::Result<(), WsError>> {
            Pin::new(&mut self.get_mut().outbound)
                .poll_flush(cx)
                .map_err(|_| WsError::ConnectionClosed)
        }

        fn poll_close(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<std::result::Result<(), WsError>> {
            Pin::new(&mut self.get_mut().outbound)
                .poll_close(cx)
                .map_err(|_| WsError::ConnectionClosed)
        }
    }
}
