mod endpoint;
mod envelope;
mod key;

pub use endpoint::default_gateway_uri;
pub use envelope::{Request, RequestId, Response, CHAN_UPDATE_KIND, UPDATE_KIND};
pub use key::CorrelationKey;
