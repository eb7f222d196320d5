//! Correlation table mapping routing keys to pending handlers.

use std::collections::HashMap;

use gateway_protocol::{CorrelationKey, Response};
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;

/// Resolves one awaited reply.
pub(crate) type ReplySender = oneshot::Sender<Result<Response>>;

/// Carries repeated push updates to a subscriber.
pub(crate) type UpdateSender = mpsc::UnboundedSender<Response>;

/// Handler stored against a correlation key.
///
/// `Request` handlers resolve exactly once; the optional `then`
/// registration is how subscribe-style calls install their standing
/// update handler once the acknowledging reply arrives. `Subscription`
/// handlers fire zero or more times until removed or the table is
/// cleared.
pub(crate) enum PendingHandler {
    Request {
        reply: ReplySender,
        then: Option<(CorrelationKey, UpdateSender)>,
    },
    Subscription(UpdateSender),
}

/// Central mutable state of the client: at most one handler per key.
///
/// Owned by the connection task alone, so plain map access suffices.
/// One table per connection; the whole table is dropped on disconnect.
#[derive(Default)]
pub(crate) struct CorrelationTable {
    handlers: HashMap<CorrelationKey, PendingHandler>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handler` under `key`, overwriting any existing entry
    /// (last subscribe wins).
    pub fn register(&mut self, key: CorrelationKey, handler: PendingHandler) {
        self.handlers.insert(key, handler);
    }

    /// Look up without removing; removal policy differs by key kind.
    pub fn resolve(&self, key: &CorrelationKey) -> Option<&PendingHandler> {
        self.handlers.get(key)
    }

    /// Delete the entry if present. Deleting an absent key is a no-op.
    pub fn remove(&mut self, key: &CorrelationKey) -> Option<PendingHandler> {
        self.handlers.remove(key)
    }

    /// Drop every entry. Pending reply senders are dropped with them,
    /// which wakes their awaiting callers with a closed-channel error.
    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }
}
