//! Transport seam between the connection core and the wire.
//!
//! The core only depends on the [`Transport`] contract: a duplex,
//! event-driven channel carrying raw text frames. [`WebSocketTransport`]
//! is the production implementation; [`MemoryTransport`] is an in-process
//! pair for tests and embedding.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::{ClientError, Result};

/// Lifecycle and message events emitted by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The channel is open and can carry frames.
    Connected,
    /// One inbound frame.
    Message(String),
    /// A fault on the channel. Does not by itself end the channel.
    Error(String),
    /// The channel is gone, by handshake or hangup.
    Disconnected(Option<String>),
}

/// Duplex, event-driven channel carrying raw frames.
///
/// Implementations emit `Connected` at most once and before any
/// `Message`, and end with `Disconnected` followed by `None`.
#[async_trait]
pub trait Transport: Send {
    /// Next event, or `None` once the transport is fully closed.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Send one raw outbound frame.
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Begin closing. The close is complete when `Disconnected` (or end
    /// of stream) is observed, not when this returns.
    async fn close(&mut self);
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport over tokio-tungstenite.
///
/// The dial is deferred to the first `next_event` call so the connect
/// outcome arrives as an event like every other lifecycle change.
pub struct WebSocketTransport {
    uri: Option<String>,
    stream: Option<WsStream>,
}

impl WebSocketTransport {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            stream: None,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        if let Some(uri) = self.uri.take() {
            return Some(match connect_async(uri.as_str()).await {
                Ok((stream, _)) => {
                    self.stream = Some(stream);
                    TransportEvent::Connected
                }
                Err(e) => TransportEvent::Error(e.to_string()),
            });
        }

        loop {
            let item = match self.stream.as_mut() {
                Some(stream) => stream.next().await,
                None => return None,
            };
            match item {
                Some(Ok(Message::Text(text))) => {
                    return Some(TransportEvent::Message(text.to_string()))
                }
                Some(Ok(Message::Close(frame))) => {
                    self.stream = None;
                    return Some(TransportEvent::Disconnected(
                        frame.map(|f| f.reason.to_string()),
                    ));
                }
                // Ping, pong and binary frames carry no envelopes.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(TransportEvent::Error(e.to_string())),
                None => {
                    self.stream = None;
                    return Some(TransportEvent::Disconnected(None));
                }
            }
        }
    }

    async fn send(&mut self, frame: String) -> Result<()> {
        match self.stream.as_mut() {
            Some(stream) => stream
                .send(Message::Text(frame.into()))
                .await
                .map_err(|e| ClientError::Transport(e.to_string())),
            None => Err(ClientError::Closed),
        }
    }

    async fn close(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            if let Err(e) = stream.close(None).await {
                debug!(error = %e, "websocket close handshake failed");
                self.stream = None;
            }
        }
    }
}

/// In-process transport backed by channels.
///
/// [`MemoryTransport::pair`] returns the transport and a [`MemoryHandle`]
/// playing the remote peer: the handle injects events and observes the
/// frames the client sent.
pub struct MemoryTransport {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    loopback: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedSender<String>,
    done: bool,
}

/// Remote end of a [`MemoryTransport`].
pub struct MemoryHandle {
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl MemoryTransport {
    pub fn pair() -> (MemoryTransport, MemoryHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        (
            MemoryTransport {
                events: events_rx,
                loopback: events_tx.clone(),
                outbound: outbound_tx,
                done: false,
            },
            MemoryHandle {
                events: events_tx,
                outbound: outbound_rx,
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        if self.done {
            return None;
        }
        match self.events.recv().await {
            Some(event) => {
                if matches!(event, TransportEvent::Disconnected(_)) {
                    self.done = true;
                }
                Some(event)
            }
            None => {
                self.done = true;
                Some(TransportEvent::Disconnected(None))
            }
        }
    }

    async fn send(&mut self, frame: String) -> Result<()> {
        self.outbound
            .send(frame)
            .map_err(|_| ClientError::Transport("memory transport peer gone".into()))
    }

    async fn close(&mut self) {
        // The close confirmation travels through the event queue like a
        // real close handshake would.
        let _ = self.loopback.send(TransportEvent::Disconnected(None));
    }
}

impl MemoryHandle {
    /// Report the transport as connected.
    pub fn open(&self) {
        let _ = self.events.send(TransportEvent::Connected);
    }

    /// Deliver an inbound frame to the client.
    pub fn push_frame(&self, frame: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Message(frame.into()));
    }

    /// Report a transport fault.
    pub fn push_error(&self, message: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Error(message.into()));
    }

    /// Hang up from the remote side.
    pub fn hang_up(&self) {
        let _ = self.events.send(TransportEvent::Disconnected(None));
    }

    /// Next frame the client sent, or `None` once the client is gone.
    pub async fn sent_frame(&mut self) -> Option<String> {
        self.outbound.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pair_delivers_both_ways() {
        let (mut transport, mut remote) = MemoryTransport::pair();

        remote.open();
        remote.push_frame("{\"id\":1}");
        assert_eq!(transport.next_event().await, Some(TransportEvent::Connected));
        assert_eq!(
            transport.next_event().await,
            Some(TransportEvent::Message("{\"id\":1}".into()))
        );

        transport.send("{\"id\":2}".into()).await.unwrap();
        assert_eq!(remote.sent_frame().await.as_deref(), Some("{\"id\":2}"));
    }

    #[tokio::test]
    async fn test_memory_close_confirms_through_event_queue() {
        let (mut transport, _remote) = MemoryTransport::pair();
        transport.close().await;
        assert_eq!(
            transport.next_event().await,
            Some(TransportEvent::Disconnected(None))
        );
        assert_eq!(transport.next_event().await, None);
    }

    #[tokio::test]
    async fn test_memory_peer_drop_reads_as_disconnect() {
        let (mut transport, remote) = MemoryTransport::pair();
        drop(remote);
        assert_eq!(
            transport.next_event().await,
            Some(TransportEvent::Disconnected(None))
        );
        assert_eq!(transport.next_event().await, None);
    }
}
