//! The connection state machine: handshake, read loop, dispatch,
//! sending and the closing handshake.

use std::collections::HashSet;
use std::time::Instant;

use log::debug;
use monoio_compat::{AsyncRead, AsyncWrite, AsyncWriteExt};
use url::Url;

use crate::close::{CloseCode, CloseOptions, handle_close_code};
use crate::error::WsError;
use crate::events::WsHandler;
use crate::frame::{self, FrameError, OpCode};
use crate::handshake;
use crate::mask::make_masking_key;
use crate::message::{Message, read_message};
use crate::transport::{self, AnyStream, WsTarget};

/// The state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    /// The client is connecting.
    Connecting,
    /// The connection is open.
    Open,
    /// The closing handshake is in progress.
    Closing,
    /// The connection is closed. Initial and terminal state; a
    /// connection is not reusable once it returns here after a close.
    Closed,
}

/// Configuration for a [`WsConnection`].
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// The URI used to establish the WebSocket connection.
    pub uri: Url,
    /// Extra request headers, written in insertion order.
    pub headers: Vec<(String, String)>,
    /// Requested sub-protocol tokens.
    pub protocols: Vec<String>,
}

impl WsConfig {
    pub fn new(uri: impl AsRef<str>) -> Result<Self, WsError> {
        Ok(Self::from_url(Url::parse(uri.as_ref())?))
    }

    pub fn from_url(uri: Url) -> Self {
        Self {
            uri,
            headers: Vec::new(),
            protocols: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }
}

/// A WebSocket client connection over the byte stream `S`.
///
/// Constructed in the CLOSED state. [`connect`](WsConnection::connect)
/// (or [`connect_over`](WsConnection::connect_over)) completes the
/// opening handshake and fires the open event;
/// [`listen`](WsConnection::listen) then drives the read loop until
/// the connection closes. Callers wanting a background read loop spawn
/// `listen` as a task.
pub struct WsConnection<S> {
    transport: Option<S>,
    uri: Url,
    headers: Vec<(String, String)>,
    protocols: Vec<String>,
    protocol: String,
    state: WsState,
    pub(crate) fragments: Vec<Message>,
    last_pong: Option<Instant>,
}

// https://datatracker.ietf.org/doc/html/rfc2616#section-2.2 token
fn is_token_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

impl<S> WsConnection<S> {
    /// Builds a connection in the CLOSED state.
    ///
    /// Fails fast when a requested sub-protocol violates the token
    /// grammar or repeats after ASCII case-folding.
    pub fn new(config: WsConfig) -> Result<Self, WsError> {
        let mut seen = HashSet::with_capacity(config.protocols.len());
        for protocol in &config.protocols {
            if protocol.is_empty() || !protocol.bytes().all(is_token_byte) {
                return Err(WsError::InvalidProtocol(protocol.clone()));
            }
            if !seen.insert(protocol.to_ascii_lowercase()) {
                return Err(WsError::DuplicateProtocol(protocol.clone()));
            }
        }

        Ok(Self {
            transport: None,
            uri: config.uri,
            headers: config.headers,
            protocols: config.protocols,
            protocol: String::new(),
            state: WsState::Closed,
            fragments: Vec::new(),
            last_pong: None,
        })
    }

    /// The URI used to establish the connection.
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// The current connection state.
    pub fn state(&self) -> WsState {
        self.state
    }

    /// The sub-protocol selected by the server; empty until the
    /// handshake completes.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// When the most recent Pong arrived; `None` if none has.
    pub fn last_pong(&self) -> Option<Instant> {
        self.last_pong
    }

    pub(crate) fn transport_mut(&mut self) -> Option<&mut S> {
        self.transport.as_mut()
    }
}

impl WsConnection<AnyStream> {
    /// Connects to the configured URI: establishes the transport
    /// (plaintext or TLS by scheme), then completes the opening
    /// handshake.
    ///
    /// Transport and handshake failures are reported through
    /// [`WsHandler::on_error`] and leave the connection CLOSED; they
    /// are not re-raised here. Observe success via the open event.
    /// The only direct error is a connection-refused condition when
    /// the client is not CLOSED.
    pub async fn connect<H: WsHandler<AnyStream>>(
        &mut self,
        handler: &mut H,
    ) -> Result<(), WsError> {
        if self.state != WsState::Closed {
            return Err(WsError::ConnectionRefused(self.state));
        }
        self.state = WsState::Connecting;

        let connected = match WsTarget::from_url(&self.uri) {
            Ok(target) => transport::connect(&target).await.map_err(WsError::from),
            Err(err) => Err(WsError::from(err)),
        };
        let stream = match connected {
            Ok(stream) => stream,
            Err(err) => {
                handler.on_error(self, &err).await;
                self.state = WsState::Closed;
                return Ok(());
            }
        };

        self.establish(stream, handler).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> WsConnection<S> {
    /// Completes the opening handshake over an already-established
    /// byte stream. Same contract as [`connect`](WsConnection::connect).
    pub async fn connect_over<H: WsHandler<S>>(
        &mut self,
        stream: S,
        handler: &mut H,
    ) -> Result<(), WsError> {
        if self.state != WsState::Closed {
            return Err(WsError::ConnectionRefused(self.state));
        }
        self.state = WsState::Connecting;
        self.establish(stream, handler).await
    }

    async fn establish<H: WsHandler<S>>(
        &mut self,
        stream: S,
        handler: &mut H,
    ) -> Result<(), WsError> {
        self.transport = Some(stream);

        match self.handshake().await {
            Ok(protocol) => {
                debug!("handshake complete (protocol: {protocol:?})");
                self.protocol = protocol;
            }
            Err(err) => {
                handler.on_error(self, &err).await;
                if let Some(mut stream) = self.transport.take() {
                    let _ = stream.shutdown().await;
                }
                self.state = WsState::Closed;
                return Ok(());
            }
        }

        self.state = WsState::Open;
        handler.on_open(self).await;
        Ok(())
    }

    async fn handshake(&mut self) -> Result<String, WsError> {
        let target = WsTarget::from_url(&self.uri)?;
        let key = handshake::generate_sec_key();

        let stream = self.transport.as_mut().ok_or(WsError::NotConnected)?;
        handshake::write_request(stream, &target, &key.key, &self.headers, &self.protocols)
            .await?;
        let raw = handshake::read_response(stream).await?;
        let protocol = handshake::verify_response(&raw, &key.expected_accept)?;

        Ok(protocol)
    }

    /// Reads and dispatches incoming messages until the connection
    /// leaves the OPEN state.
    ///
    /// Shutdown is cooperative: [`close`](WsConnection::close) flips
    /// the state and the loop observes it on its next iteration. On
    /// exit the loop invokes `close` once more defensively, so the
    /// connection is torn down even when the loop ended on a read
    /// failure.
    pub async fn listen<H: WsHandler<S>>(&mut self, handler: &mut H) {
        while self.state == WsState::Open {
            match read_message(self, handler).await {
                Some(message) => self.dispatch(message, handler).await,
                None => {
                    let err = WsError::ReadFailed;
                    handler.on_error(self, &err).await;
                    break;
                }
            }
        }

        if self.state != WsState::Connecting {
            self.close(handler, CloseOptions::new().reason("closed by client"))
                .await;
        }
    }

    async fn dispatch<H: WsHandler<S>>(&mut self, message: Message, handler: &mut H) {
        match message.opcode {
            OpCode::Text => {
                if std::str::from_utf8(&message.payload).is_err() {
                    let err = WsError::InvalidUtf8;
                    handler.on_error(self, &err).await;
                    self.close(handler, CloseOptions::loose()).await;
                    return;
                }
                handler.on_message(self, message).await;
            }
            OpCode::Binary => handler.on_message(self, message).await,
            OpCode::Pong => {
                self.last_pong = Some(Instant::now());
            }
            OpCode::Ping => {
                if let Err(err) = self.send(Message::pong(message.payload)).await {
                    handler.on_error(self, &err).await;
                }
            }
            OpCode::Close => self.handle_close(message, handler).await,
            OpCode::Continuation => {
                // Unreachable past the validator; rejected all the same.
                let err = WsError::Frame(FrameError::StrayContinuation);
                handler.on_error(self, &err).await;
                self.close(handler, CloseOptions::loose()).await;
            }
        }
    }

    async fn handle_close<H: WsHandler<S>>(&mut self, message: Message, handler: &mut H) {
        let payload = message.payload;

        if payload.is_empty() {
            self.close(handler, CloseOptions::loose()).await;
            return;
        }

        if payload.len() == 1 {
            let err = WsError::InvalidClose;
            handler.on_error(self, &err).await;
            self.close(
                handler,
                CloseOptions::new().code(CloseCode::ProtocolError as u16),
            )
            .await;
            return;
        }

        let code = u16::from_be_bytes([payload[0], payload[1]]);
        match std::str::from_utf8(&payload[2..]) {
            Ok(reason) => {
                debug!("peer closed: code={code} reason={reason:?}");
                let reason = reason.to_owned();
                self.close(handler, CloseOptions::new().code(code).reason(reason))
                    .await;
            }
            Err(_) => {
                let err = WsError::InvalidUtf8;
                handler.on_error(self, &err).await;
                self.close(handler, CloseOptions::loose()).await;
            }
        }
    }

    /// Sends a message as a single masked frame.
    ///
    /// Rejected with [`WsError::NotConnected`] unless the connection
    /// is OPEN or CLOSING (the close frame itself goes out while
    /// CLOSING).
    pub async fn send(&mut self, message: Message) -> Result<(), WsError> {
        if self.state != WsState::Open && self.state != WsState::Closing {
            return Err(WsError::NotConnected);
        }

        let Message {
            fin,
            opcode,
            payload,
            mask,
        } = message;
        let key = mask.unwrap_or_else(make_masking_key);
        let buf = frame::encode(fin, opcode, &payload, key);

        let stream = self.transport.as_mut().ok_or(WsError::NotConnected)?;
        stream.write_all(&buf).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Sends a text message.
    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), WsError> {
        self.send(Message::text(text)).await
    }

    /// Sends a binary message.
    pub async fn send_binary(&mut self, payload: impl Into<Vec<u8>>) -> Result<(), WsError> {
        self.send(Message::binary(payload)).await
    }

    /// Sends a ping.
    pub async fn ping(&mut self, payload: impl Into<Vec<u8>>) -> Result<(), WsError> {
        self.send(Message::ping(payload)).await
    }

    /// Sends a pong.
    pub async fn pong(&mut self, payload: impl Into<Vec<u8>>) -> Result<(), WsError> {
        self.send(Message::pong(payload)).await
    }

    /// Drives the closing handshake: sends a Close frame, then tears
    /// the connection down unconditionally.
    ///
    /// A no-op when already CLOSING or CLOSED. The requested code is
    /// normalized through [`handle_close_code`](crate::close::handle_close_code)
    /// unless `options.loose` is set; code 0 omits the close-code
    /// field. Whether or not the Close frame goes out, the fragment
    /// buffer is discarded, the transport is shut down exactly once,
    /// the close event fires with the final code and reason, and the
    /// state becomes CLOSED.
    pub async fn close<H: WsHandler<S>>(&mut self, handler: &mut H, options: CloseOptions) {
        if self.state == WsState::Closing || self.state == WsState::Closed {
            return;
        }

        let code = match options.code {
            Some(code) if options.loose => code,
            Some(code) => handle_close_code(code),
            None => CloseCode::NormalClosure as u16,
        };
        let reason = options.reason.unwrap_or_default();

        self.state = WsState::Closing;
        debug!("closing: code={code} reason={reason:?}");

        let mut payload = Vec::new();
        if code != 0 {
            payload.reserve(2 + reason.len());
            payload.extend_from_slice(&code.to_be_bytes());
            payload.extend_from_slice(reason.as_bytes());
        }

        let sent = self
            .send(Message {
                fin: true,
                opcode: OpCode::Close,
                payload,
                mask: None,
            })
            .await;
        if let Err(err) = sent {
            handler.on_error(self, &err).await;
        }

        // Teardown runs whether or not the close frame went out.
        self.fragments.clear();
        if let Some(mut stream) = self.transport.take() {
            let _ = stream.shutdown().await;
        }
        handler.on_close(self, code, &reason).await;
        self.state = WsState::Closed;
    }
}
