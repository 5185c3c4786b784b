//! Loopback - both ends in one process.
//!
//! A client sends one 3-byte message of type 1, the server echoes what
//! it saw and closes, and the client observes the close.
//!
//! ```text
//! RUST_LOG=msgwire=debug cargo run --example loopback
//! ```

use std::time::Duration;

use msgwire::{IpcError, Message};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let listener = msgwire::listen(0).await?;
    let port = listener.port().ok_or("listener has no port")?;

    let server = tokio::spawn(async move {
        let connection = listener.accept().await?;
        if let Some(message) = connection.receive(Some(Duration::from_secs(5))).await? {
            tracing::info!(
                "Server got type {} body {:?}",
                message.type_id(),
                message.body()
            );
        }
        connection.close().await;
        Ok::<_, IpcError>(())
    });

    let client = msgwire::connect_to("127.0.0.1", port).await?;
    client.send(Message::from_slice(1, b"ABC")).await?;

    match client.receive(None).await {
        Err(IpcError::ConnectionClosed) => tracing::info!("Client saw the server close"),
        other => tracing::warn!("Unexpected result: {:?}", other),
    }

    server.await??;
    tracing::info!("Final client state: {}", client.state());
    Ok(())
}
