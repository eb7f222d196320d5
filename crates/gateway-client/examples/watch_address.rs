//! Subscribe to an address and print its updates as they arrive.
//!
//! ```sh
//! GATEWAY_URI=ws://localhost:8888 cargo run --example watch_address -- 1ABC
//! ```

use anyhow::Result;
use gateway_client::{ConnectionEvent, GatewayClient};
use gateway_protocol::default_gateway_uri;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let address = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: watch_address <address>"))?;

    let uri = default_gateway_uri();
    let (client, mut events) = GatewayClient::connect_with_events(&uri).await?;
    println!("connected to {uri}");

    let height = client.fetch_last_height().await?;
    println!("last height: {height}");

    let (ack, mut updates) = client.subscribe_address_with_updates(&address).await?;
    println!("subscribed to {address}: {ack}");

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(update) => println!("update: {}", serde_json::to_string(&update)?),
                None => break,
            },
            event = events.recv() => match event {
                Some(ConnectionEvent::TransportError { message }) => {
                    eprintln!("transport error: {message}");
                }
                Some(ConnectionEvent::Disconnected { reason }) => {
                    eprintln!("disconnected: {reason:?}");
                    break;
                }
                None => break,
            },
        }
    }

    client.close().await;
    Ok(())
}
