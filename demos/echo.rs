//! A simple echo client demonstrating basic usage.
//!
//! Connects to a WebSocket echo server, sends a message, prints the
//! echoed response and closes the connection.

use anyhow::Result;
use monoio_ws::{
    AnyStream, CloseOptions, Message, WsConfig, WsConnection, WsError, WsHandler,
};

struct EchoHandler;

impl WsHandler<AnyStream> for EchoHandler {
    async fn on_open(&mut self, conn: &mut WsConnection<AnyStream>) {
        println!("Connected (protocol: {:?})", conn.protocol());
    }

    async fn on_message(&mut self, conn: &mut WsConnection<AnyStream>, message: Message) {
        match std::str::from_utf8(&message.payload) {
            Ok(text) => println!("Echo received: {text}"),
            Err(_) => println!("Received binary frame ({} bytes)", message.payload.len()),
        }
        // One round trip is all this demo needs.
        conn.close(self, CloseOptions::new().reason("done")).await;
    }

    async fn on_error(&mut self, _conn: &mut WsConnection<AnyStream>, error: &WsError) {
        eprintln!("Error: {error}");
    }

    async fn on_close(&mut self, _conn: &mut WsConnection<AnyStream>, code: u16, reason: &str) {
        println!("Closed: {code} {reason:?}");
    }
}

#[monoio::main]
async fn main() -> Result<()> {
    println!("Connecting to WebSocket echo server...");

    let config = WsConfig::new("wss://echo.websocket.org/")?;
    let mut client = WsConnection::new(config)?;
    let mut handler = EchoHandler;

    client.connect(&mut handler).await?;
    client.send_text("Hello from monoio-ws!").await?;

    // Drive the read loop; it returns once the connection closes.
    client.listen(&mut handler).await;

    println!("Example completed successfully!");
    Ok(())
}
