//! Gateway client handle and the per-command surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gateway_protocol::{CorrelationKey, Request, RequestId, Response};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use crate::connection::{Command, Connection, ConnectionEvent};
use crate::error::{ClientError, Result};
use crate::transport::{Transport, WebSocketTransport};

/// Push updates for one standing subscription.
pub type Updates = mpsc::UnboundedReceiver<Response>;

/// Client for a gateway carrying request/response and push traffic over
/// one persistent connection.
///
/// Cheap to clone; all clones share the connection. The connection
/// shuts down when [`close`](Self::close) is called or every handle is
/// dropped.
#[derive(Clone, Debug)]
pub struct GatewayClient {
    commands: mpsc::UnboundedSender<Command>,
    connected: Arc<AtomicBool>,
}

impl GatewayClient {
    /// Connect to the gateway at `uri`.
    ///
    /// A post-connect transport error with no event channel attached
    /// panics the connection task rather than being swallowed; use
    /// [`connect_with_events`](Self::connect_with_events) to handle
    /// errors instead.
    pub async fn connect(uri: &str) -> Result<Self> {
        Self::with_transport(WebSocketTransport::new(uri), None).await
    }

    /// Connect to the gateway with a lifecycle event stream.
    ///
    /// The receiver yields disconnect notices and post-connect transport
    /// errors. Connect-time failures surface as the returned `Err`, not
    /// as events.
    pub async fn connect_with_events(
        uri: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ConnectionEvent>)> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client = Self::with_transport(WebSocketTransport::new(uri), Some(events_tx)).await?;
        Ok((client, events_rx))
    }

    /// Connect over a caller-supplied transport.
    pub async fn with_transport<T>(
        transport: T,
        events: Option<mpsc::UnboundedSender<ConnectionEvent>>,
    ) -> Result<Self>
    where
        T: Transport + 'static,
    {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let mut connection =
            Connection::new(transport, commands_rx, Arc::clone(&connected), events);
        connection.establish().await?;
        tokio::spawn(connection.run());
        Ok(Self {
            commands: commands_tx,
            connected,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Close the connection.
    ///
    /// Pending requests are dropped immediately; the future resolves
    /// once the transport confirms the close. Closing an already-closed
    /// client is a no-op.
    pub async fn close(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.commands.send(Command::Close { done: done_tx }).is_err() {
            return;
        }
        let _ = done_rx.await;
    }

    /// Issue a raw command and await its reply envelope.
    ///
    /// The reply is returned as-is, server-reported error included. The
    /// typed methods below are thin wrappers over this.
    pub async fn call(&self, command: &str, params: Vec<Value>) -> Result<Response> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = Request::new(RequestId(rand::random::<u32>()), command, params);
        self.commands
            .send(Command::Call {
                request,
                reply: reply_tx,
            })
            .map_err(|_| ClientError::Closed)?;
        reply_rx.await.map_err(|_| ClientError::Closed)?
    }

    async fn subscribe(
        &self,
        command: &str,
        params: Vec<Value>,
        key: CorrelationKey,
        updates: mpsc::UnboundedSender<Response>,
    ) -> Result<Response> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = Request::new(RequestId(rand::random::<u32>()), command, params);
        self.commands
            .send(Command::Subscribe {
                request,
                reply: reply_tx,
                updates: (key, updates),
            })
            .map_err(|_| ClientError::Closed)?;
        reply_rx.await.map_err(|_| ClientError::Closed)?
    }

    async fn unsubscribe(
        &self,
        command: &str,
        params: Vec<Value>,
        key: CorrelationKey,
    ) -> Result<Response> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = Request::new(RequestId(rand::random::<u32>()), command, params);
        self.commands
            .send(Command::Unsubscribe {
                request,
                reply: reply_tx,
                key,
            })
            .map_err(|_| ClientError::Closed)?;
        reply_rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Reply checked for a server-reported error, which is passed
    /// through untouched.
    fn checked(response: Response) -> Result<Response> {
        match response.error {
            Some(error) => Err(ClientError::Server(error)),
            None => Ok(response),
        }
    }

    /// Single-value convention: error check plus first result slot.
    fn single(command: &str, response: Response) -> Result<Value> {
        let response = Self::checked(response)?;
        response
            .first_result()
            .cloned()
            .ok_or_else(|| ClientError::MalformedReply(format!("{command}: empty result")))
    }

    /// Whole-result convention used by the chan commands.
    fn whole(response: Response) -> Result<Vec<Value>> {
        Ok(Self::checked(response)?.result.unwrap_or_default())
    }

    async fn call_single(&self, command: &str, params: Vec<Value>) -> Result<Value> {
        Self::single(command, self.call(command, params).await?)
    }

    // =====================================================================
    // Fetch commands
    // =====================================================================

    /// Height of the most recent block.
    pub async fn fetch_last_height(&self) -> Result<Value> {
        self.call_single("fetch_last_height", vec![]).await
    }

    /// Transaction by hash.
    pub async fn fetch_transaction(&self, tx_hash: &str) -> Result<Value> {
        self.call_single("fetch_transaction", vec![json!(tx_hash)])
            .await
    }

    /// History for an address from `height` upward; `None` starts at
    /// the beginning.
    pub async fn fetch_history(&self, address: &str, height: Option<u64>) -> Result<Value> {
        let height = height.unwrap_or(0);
        self.call_single("fetch_history", vec![json!(address), json!(height)])
            .await
    }

    /// Stealth rows matching a bit prefix.
    pub async fn fetch_stealth(&self, prefix: Value, from_height: Option<u64>) -> Result<Value> {
        self.call_single("fetch_stealth", vec![prefix, json!(from_height)])
            .await
    }

    /// Block header by height index.
    pub async fn fetch_block_header(&self, index: u64) -> Result<Value> {
        self.call_single("fetch_block_header", vec![json!(index)])
            .await
    }

    /// Transaction hashes of the block at `index`.
    pub async fn fetch_block_transaction_hashes(&self, index: u64) -> Result<Value> {
        self.call_single("fetch_block_transaction_hashes", vec![json!(index)])
            .await
    }

    /// Spend of an outpoint.
    pub async fn fetch_spend(&self, outpoint: Value) -> Result<Value> {
        self.call_single("fetch_spend", vec![outpoint]).await
    }

    /// Block height and offset of a confirmed transaction.
    pub async fn fetch_transaction_index(&self, tx_hash: &str) -> Result<(Value, Value)> {
        let response = Self::checked(
            self.call("fetch_transaction_index", vec![json!(tx_hash)])
                .await?,
        )?;
        let mut slots = response.result.unwrap_or_default().into_iter();
        match (slots.next(), slots.next()) {
            (Some(height), Some(offset)) => Ok((height, offset)),
            _ => Err(ClientError::MalformedReply(
                "fetch_transaction_index: expected two result slots".into(),
            )),
        }
    }

    /// Height of the block with the given hash.
    pub async fn fetch_block_height(&self, blk_hash: &str) -> Result<Value> {
        self.call_single("fetch_block_height", vec![json!(blk_hash)])
            .await
    }

    /// Hand a raw transaction to the gateway for broadcast.
    pub async fn broadcast_transaction(&self, raw_tx: &str) -> Result<Value> {
        self.call_single("broadcast_transaction", vec![json!(raw_tx)])
            .await
    }

    /// Exchange rate ticker for a currency code like "USD".
    pub async fn fetch_ticker(&self, currency: &str) -> Result<Value> {
        self.call_single("fetch_ticker", vec![json!(currency)]).await
    }

    // =====================================================================
    // Address subscriptions
    // =====================================================================

    /// Subscribe to `address` without consuming updates.
    pub async fn subscribe_address(&self, address: &str) -> Result<Value> {
        self.call_single("subscribe_address", vec![json!(address)])
            .await
    }

    /// Subscribe to `address` and receive its push updates.
    ///
    /// The standing handler is installed when the acknowledging reply
    /// arrives. Re-subscribing the same address replaces the previous
    /// stream.
    pub async fn subscribe_address_with_updates(
        &self,
        address: &str,
    ) -> Result<(Value, Updates)> {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let response = self
            .subscribe(
                "subscribe_address",
                vec![json!(address)],
                CorrelationKey::AddressSubscription(address.to_string()),
                updates_tx,
            )
            .await?;
        Ok((Self::single("subscribe_address", response)?, updates_rx))
    }

    /// Renew the subscription for `address`.
    pub async fn renew_address(&self, address: &str) -> Result<Value> {
        self.call_single("renew_address", vec![json!(address)]).await
    }

    /// Renew the subscription for `address` and (re)attach an update
    /// stream.
    pub async fn renew_address_with_updates(&self, address: &str) -> Result<(Value, Updates)> {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let response = self
            .subscribe(
                "renew_address",
                vec![json!(address)],
                CorrelationKey::AddressSubscription(address.to_string()),
                updates_tx,
            )
            .await?;
        Ok((Self::single("renew_address", response)?, updates_rx))
    }

    /// Stop updates for `address`.
    ///
    /// The standing handler is removed before the request goes out;
    /// unsubscribing with no active subscription is not an error.
    pub async fn unsubscribe_address(&self, address: &str) -> Result<Value> {
        let response = self
            .unsubscribe(
                "unsubscribe_address",
                vec![json!(address)],
                CorrelationKey::AddressSubscription(address.to_string()),
            )
            .await?;
        Self::single("unsubscribe_address", response)
    }

    // =====================================================================
    // Chan commands
    // =====================================================================

    /// Post `data` to a thread in a chan section.
    pub async fn chan_post(&self, section: &str, thread: &str, data: &str) -> Result<Vec<Value>> {
        let response = self
            .call("chan_post", vec![json!(section), json!(thread), json!(data)])
            .await?;
        Self::whole(response)
    }

    /// List threads in a chan section.
    pub async fn chan_list(&self, section: &str) -> Result<Vec<Value>> {
        Self::whole(self.call("chan_list", vec![json!(section)]).await?)
    }

    /// Fetch a thread from a chan section.
    pub async fn chan_get(&self, section: &str, thread: &str) -> Result<Vec<Value>> {
        let response = self
            .call("chan_get", vec![json!(section), json!(thread)])
            .await?;
        Self::whole(response)
    }

    /// Subscribe to a chan thread without consuming updates.
    pub async fn chan_subscribe(&self, section: &str, thread: &str) -> Result<Vec<Value>> {
        let response = self
            .call("chan_subscribe", vec![json!(section), json!(thread)])
            .await?;
        Self::whole(response)
    }

    /// Subscribe to a chan thread and receive its push updates.
    pub async fn chan_subscribe_with_updates(
        &self,
        section: &str,
        thread: &str,
    ) -> Result<(Vec<Value>, Updates)> {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let response = self
            .subscribe(
                "chan_subscribe",
                vec![json!(section), json!(thread)],
                CorrelationKey::ChannelSubscription(thread.to_string()),
                updates_tx,
            )
            .await?;
        Ok((Self::whole(response)?, updates_rx))
    }

    /// Stop updates for a chan thread.
    pub async fn chan_unsubscribe(&self, section: &str, thread: &str) -> Result<Vec<Value>> {
        let response = self
            .unsubscribe(
                "chan_unsubscribe",
                vec![json!(section), json!(thread)],
                CorrelationKey::ChannelSubscription(thread.to_string()),
            )
            .await?;
        Self::whole(response)
    }
}
