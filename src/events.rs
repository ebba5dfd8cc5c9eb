//! Observer interface for connection events.

use crate::client::WsConnection;
use crate::error::WsError;
use crate::message::Message;

/// Receives connection events in the order the state machine produces
/// them. Every slot defaults to a no-op, so handlers implement only
/// what they care about.
///
/// Each callback is handed the connection, so a handler can send or
/// close from inside a callback:
///
/// ```no_run
/// use monoio_ws::{Message, WsConnection, WsHandler};
///
/// struct Greeter;
///
/// impl<S> WsHandler<S> for Greeter {
///     async fn on_message(&mut self, _conn: &mut WsConnection<S>, message: Message) {
///         println!("received {} bytes", message.payload.len());
///     }
/// }
/// ```
#[allow(async_fn_in_trait)]
pub trait WsHandler<S> {
    /// The opening handshake completed; the connection is OPEN.
    async fn on_open(&mut self, _conn: &mut WsConnection<S>) {}

    /// A complete text or binary message arrived.
    async fn on_message(&mut self, _conn: &mut WsConnection<S>, _message: Message) {}

    /// A protocol or transport error occurred. Errors are always paired
    /// with a close action by the connection itself; the handler only
    /// observes them.
    async fn on_error(&mut self, _conn: &mut WsConnection<S>, _error: &WsError) {}

    /// The connection finished closing, with the final code and reason.
    async fn on_close(&mut self, _conn: &mut WsConnection<S>, _code: u16, _reason: &str) {}
}
