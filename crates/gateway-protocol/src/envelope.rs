use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::key::CorrelationKey;

/// Identifier correlating an outbound request with its reply.
///
/// Ids only need to be unique among currently pending requests, not
/// globally; the client draws them from the full 32-bit space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u32);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Envelope kind marking an address push update.
pub const UPDATE_KIND: &str = "update";
/// Envelope kind marking a chan thread push update.
pub const CHAN_UPDATE_KIND: &str = "chan_update";

/// Outbound request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub command: String,
    pub params: Vec<Value>,
}

impl Request {
    pub fn new(id: RequestId, command: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id,
            command: command.into(),
            params,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Inbound envelope: an ordinary reply or an unsolicited push update.
///
/// Only the routing fields are modeled. Everything else lands in `rest`
/// untouched, so push payloads reach subscribers exactly as sent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<Value>>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

impl Response {
    pub fn from_json(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    /// Routing key for this envelope.
    ///
    /// `"update"` routes by address, `"chan_update"` by thread, anything
    /// else by request id. Returns `None` when the frame carries no
    /// routable identifier.
    pub fn correlation_key(&self) -> Option<CorrelationKey> {
        match self.kind.as_deref() {
            Some(UPDATE_KIND) => self
                .address
                .clone()
                .map(CorrelationKey::AddressSubscription),
            Some(CHAN_UPDATE_KIND) => self
                .thread
                .clone()
                .map(CorrelationKey::ChannelSubscription),
            _ => self.id.map(CorrelationKey::Request),
        }
    }

    /// First result slot, the common single-value reply convention.
    pub fn first_result(&self) -> Option<&Value> {
        self.result.as_ref().and_then(|result| result.first())
    }
}
