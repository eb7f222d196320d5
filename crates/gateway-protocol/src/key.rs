use crate::envelope::RequestId;

/// Routing key matching an inbound envelope to a registered handler.
///
/// The three namespaces are structurally distinct: a chan thread and an
/// address with the same string value can never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    /// Reply to one outstanding request. Resolved at most once.
    Request(RequestId),
    /// Standing subscription to updates for one address.
    AddressSubscription(String),
    /// Standing subscription to updates on one chan thread.
    ChannelSubscription(String),
}

impl CorrelationKey {
    /// True for the request namespace, whose handlers are removed on
    /// their single resolution.
    pub fn is_single_shot(&self) -> bool {
        matches!(self, Self::Request(_))
    }
}

impl std::fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request(id) => write!(f, "request:{id}"),
            Self::AddressSubscription(address) => write!(f, "address:{address}"),
            Self::ChannelSubscription(thread) => write!(f, "chan:{thread}"),
        }
    }
}
