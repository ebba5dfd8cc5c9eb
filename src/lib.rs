//! # monoio-ws
//!
//! A from-scratch WebSocket *client* protocol engine (RFC 6455) for the
//! [`monoio`] async runtime using `io_uring` on Linux. The opening
//! handshake, frame codec, masking, fragmentation reassembly and the
//! closing handshake are all implemented in-tree; both `ws://` and
//! `wss://` (TLS) transports are supported.
//!
//! ## Features
//!
//! - **🚀 Built for monoio**: runs on the `monoio` runtime through
//!   `monoio-compat`'s poll-based IO adapters
//! - **🔩 Full protocol engine**: frame codec, validation, fragmentation
//!   and close negotiation implemented from the wire up
//! - **🔒 TLS Support**: `wss://` via `monoio-rustls` with
//!   `webpki-roots` certificate validation
//! - **🧩 Transport-agnostic**: the engine is generic over any
//!   `AsyncRead + AsyncWrite` byte stream
//! - **📣 Event-driven**: open/message/error/close delivered through a
//!   handler trait, in protocol order
//!
//! ## Quick Start
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! monoio-ws = "0.1"
//! monoio = "0.2"
//! ```
//!
//! ## Basic Example
//!
//! ```no_run
//! use monoio_ws::{Message, WsConfig, WsConnection, WsError, WsHandler};
//!
//! struct Echo;
//!
//! impl<S> WsHandler<S> for Echo {
//!     async fn on_open(&mut self, _conn: &mut WsConnection<S>) {
//!         println!("connected");
//!     }
//!
//!     async fn on_message(&mut self, _conn: &mut WsConnection<S>, message: Message) {
//!         match std::str::from_utf8(&message.payload) {
//!             Ok(text) => println!("received: {text}"),
//!             Err(_) => println!("received {} bytes", message.payload.len()),
//!         }
//!     }
//!
//!     async fn on_close(&mut self, _conn: &mut WsConnection<S>, code: u16, reason: &str) {
//!         println!("closed: {code} {reason}");
//!     }
//! }
//!
//! #[monoio::main]
//! async fn main() -> Result<(), WsError> {
//!     let config = WsConfig::new("wss://echo.websocket.org/")?;
//!     let mut client = WsConnection::new(config)?;
//!     let mut handler = Echo;
//!
//!     // Handshake failures surface through `on_error`; success fires
//!     // `on_open`.
//!     client.connect(&mut handler).await?;
//!     client.send_text("Hello, WebSocket!").await?;
//!
//!     // Drive the read loop until the connection closes.
//!     client.listen(&mut handler).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Support
//!
//! - **Linux**: full support with `io_uring` (kernel 5.1+ recommended;
//!   older kernels fall back to epoll)
//!
//! [`monoio`]: https://docs.rs/monoio

pub mod client;
pub mod close;
pub mod error;
pub mod events;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod message;
pub mod transport;

pub use client::{WsConfig, WsConnection, WsState};
pub use close::{CloseCode, CloseOptions, handle_close_code};
pub use error::WsError;
pub use events::WsHandler;
pub use frame::{Frame, OpCode};
pub use message::Message;
pub use transport::{AnyStream, Scheme, WsTarget};
