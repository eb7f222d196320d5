//! Connection core: request dispatch, response routing and lifecycle.
//!
//! One task owns the transport, the correlation table and the connected
//! flag. Caller handles talk to it over a command channel, so every
//! table mutation happens on this single task and a handler reacting to
//! a reply can immediately issue new calls without reentering the
//! router.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gateway_protocol::{CorrelationKey, Request, Response};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::correlation::{CorrelationTable, PendingHandler, ReplySender, UpdateSender};
use crate::error::ClientError;
use crate::transport::{Transport, TransportEvent};

/// Lifecycle notices delivered on the caller's event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Post-connect transport fault; the connection stays up.
    TransportError { message: String },
    /// The connection ended, by either side.
    Disconnected { reason: Option<String> },
}

/// Commands from a client handle to the connection task.
pub(crate) enum Command {
    Call {
        request: Request,
        reply: ReplySender,
    },
    Subscribe {
        request: Request,
        reply: ReplySender,
        /// Standing registration installed once the reply arrives.
        updates: (CorrelationKey, UpdateSender),
    },
    Unsubscribe {
        request: Request,
        reply: ReplySender,
        key: CorrelationKey,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

pub(crate) struct Connection<T> {
    transport: T,
    commands: mpsc::UnboundedReceiver<Command>,
    table: CorrelationTable,
    connected: Arc<AtomicBool>,
    events: Option<mpsc::UnboundedSender<ConnectionEvent>>,
    closing: Option<oneshot::Sender<()>>,
}

impl<T: Transport> Connection<T> {
    pub fn new(
        transport: T,
        commands: mpsc::UnboundedReceiver<Command>,
        connected: Arc<AtomicBool>,
        events: Option<mpsc::UnboundedSender<ConnectionEvent>>,
    ) -> Self {
        Self {
            transport,
            commands,
            table: CorrelationTable::new(),
            connected,
            events,
            closing: None,
        }
    }

    /// Drive the transport until it reports open. Commands queue up
    /// meanwhile and are served once [`run`](Self::run) starts.
    pub async fn establish(&mut self) -> Result<(), ClientError> {
        loop {
            match self.transport.next_event().await {
                Some(TransportEvent::Connected) => {
                    self.connected.store(true, Ordering::SeqCst);
                    return Ok(());
                }
                Some(TransportEvent::Error(message)) => {
                    return Err(ClientError::Connect(message));
                }
                Some(TransportEvent::Disconnected(reason)) => {
                    return Err(ClientError::Connect(
                        reason.unwrap_or_else(|| "connection closed".into()),
                    ));
                }
                Some(TransportEvent::Message(_)) => {
                    debug!("dropping frame received before connect");
                }
                None => return Err(ClientError::Connect("transport ended".into())),
            }
        }
    }

    pub async fn run(mut self) {
        let mut closing = false;
        while !closing {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => closing = self.handle_command(command).await,
                    // Every handle is gone; shut the transport down.
                    None => {
                        self.initiate_close(None).await;
                        closing = true;
                    }
                },
                event = self.transport.next_event() => {
                    if self.on_transport_event(event) {
                        return;
                    }
                }
            }
        }

        // Closing: commands are no longer served. Drain the transport
        // until it confirms the close.
        loop {
            let event = self.transport.next_event().await;
            if self.on_transport_event(event) {
                return;
            }
        }
    }

    /// Returns true once a close has been initiated.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Call { request, reply } => {
                self.dispatch(request, reply, None).await;
                false
            }
            Command::Subscribe {
                request,
                reply,
                updates,
            } => {
                // Fail fast if the update channel can no longer deliver;
                // nothing goes on the wire in that case.
                if updates.1.is_closed() {
                    let _ = reply.send(Err(ClientError::UpdateChannelClosed));
                    return false;
                }
                self.dispatch(request, reply, Some(updates)).await;
                false
            }
            Command::Unsubscribe {
                request,
                reply,
                key,
            } => {
                // Eager removal: no update slips through while the
                // unsubscribe request is in flight. Absent keys are a
                // no-op.
                self.table.remove(&key);
                self.dispatch(request, reply, None).await;
                false
            }
            Command::Close { done } => {
                self.initiate_close(Some(done)).await;
                true
            }
        }
    }

    /// Register the reply handler, then send. A send failure rolls the
    /// registration back and hands the fault to the caller.
    async fn dispatch(
        &mut self,
        request: Request,
        reply: ReplySender,
        then: Option<(CorrelationKey, UpdateSender)>,
    ) {
        let frame = match request.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                let _ = reply.send(Err(ClientError::Serialization(e)));
                return;
            }
        };
        let key = CorrelationKey::Request(request.id);
        self.table
            .register(key.clone(), PendingHandler::Request { reply, then });
        if let Err(e) = self.transport.send(frame).await {
            if let Some(PendingHandler::Request { reply, .. }) = self.table.remove(&key) {
                let _ = reply.send(Err(e));
            }
        }
    }

    async fn initiate_close(&mut self, done: Option<oneshot::Sender<()>>) {
        self.connected.store(false, Ordering::SeqCst);
        // Clear eagerly: frames still in flight must find no handler.
        self.table.clear();
        self.closing = done;
        self.transport.close().await;
    }

    /// Returns true when the transport is finished.
    fn on_transport_event(&mut self, event: Option<TransportEvent>) -> bool {
        match event {
            Some(TransportEvent::Message(frame)) => {
                self.route_frame(&frame);
                false
            }
            Some(TransportEvent::Error(message)) => {
                self.on_transport_error(message);
                false
            }
            Some(TransportEvent::Disconnected(reason)) => {
                self.on_disconnected(reason);
                true
            }
            Some(TransportEvent::Connected) => false,
            None => {
                self.on_disconnected(None);
                true
            }
        }
    }

    /// Decode an inbound frame, derive its key and deliver it.
    ///
    /// Unroutable and malformed frames are logged and dropped; the peer
    /// may legitimately push after an unsubscribe race or re-deliver a
    /// reply.
    fn route_frame(&mut self, frame: &str) {
        let envelope = match Response::from_json(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return;
            }
        };
        let Some(key) = envelope.correlation_key() else {
            debug!("dropping frame with no correlation key");
            return;
        };

        if key.is_single_shot() {
            // Remove before delivering: a duplicate reply finds nothing.
            match self.table.remove(&key) {
                Some(PendingHandler::Request { reply, then }) => {
                    let _ = reply.send(Ok(envelope));
                    if let Some((sub_key, updates)) = then {
                        self.table
                            .register(sub_key, PendingHandler::Subscription(updates));
                    }
                }
                Some(other) => {
                    debug!(key = %key, "mismatched handler kind, dropping frame");
                    self.table.register(key, other);
                }
                None => debug!(key = %key, "handler not found, dropping frame"),
            }
        } else {
            match self.table.resolve(&key) {
                Some(PendingHandler::Subscription(updates)) => {
                    if updates.send(envelope).is_err() {
                        debug!(key = %key, "update receiver gone, removing subscription");
                        self.table.remove(&key);
                    }
                }
                Some(PendingHandler::Request { .. }) => {
                    debug!(key = %key, "mismatched handler kind, dropping frame");
                }
                None => debug!(key = %key, "handler not found, dropping frame"),
            }
        }
    }

    fn on_transport_error(&mut self, message: String) {
        if !self.connected.load(Ordering::SeqCst) {
            debug!(error = %message, "transport error while closing");
            return;
        }
        if let Some(events) = &self.events {
            if events
                .send(ConnectionEvent::TransportError {
                    message: message.clone(),
                })
                .is_ok()
            {
                return;
            }
        }
        // No listener: fail loudly rather than swallow the fault.
        panic!("gateway transport error with no error listener: {message}");
    }

    fn on_disconnected(&mut self, reason: Option<String>) {
        self.connected.store(false, Ordering::SeqCst);
        self.table.clear();
        if let Some(events) = &self.events {
            let _ = events.send(ConnectionEvent::Disconnected { reason });
        }
        // Caller-initiated closes resolve here, from the transport's
        // close event, so the waiter observes the fully-closed state.
        if let Some(done) = self.closing.take() {
            let _ = done.send(());
        }
    }
}
