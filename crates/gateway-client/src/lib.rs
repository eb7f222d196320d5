//! Client library for a darkwallet-style gateway.
//!
//! One persistent WebSocket carries request/response RPC plus
//! server-push updates for subscribed addresses and chan threads. The
//! connection core matches each inbound envelope to the caller that is
//! waiting for it; subscriptions arrive as streams.
//!
//! ```ignore
//! let (client, mut events) = GatewayClient::connect_with_events(&uri).await?;
//! let height = client.fetch_last_height().await?;
//! let (ack, mut updates) = client.subscribe_address_with_updates("1ABC").await?;
//! while let Some(update) = updates.recv().await {
//!     // ...
//! }
//! client.close().await;
//! ```

mod client;
mod connection;
mod correlation;
mod error;
pub mod transport;

pub use client::{GatewayClient, Updates};
pub use connection::ConnectionEvent;
pub use error::{ClientError, Result};

// Re-exports for convenience
pub use gateway_protocol::{CorrelationKey, Request, RequestId, Response};
