//! Messages and fragmentation reassembly.

use log::trace;
use monoio_compat::{AsyncRead, AsyncWrite};

use crate::client::WsConnection;
use crate::close::{CloseCode, CloseOptions};
use crate::error::WsError;
use crate::events::WsHandler;
use crate::frame::{Frame, FrameError, OpCode};

/// The application-level unit delivered to handlers, reassembled from
/// one or more frames. `fin` is always true and `opcode` is never
/// `Continuation` by the time a message reaches a handler.
#[derive(Debug, Clone)]
pub struct Message {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
    /// Masking key to use when sending; a fresh key is generated when
    /// absent.
    pub mask: Option<[u8; 4]>,
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Text,
            payload: text.into().into_bytes(),
            mask: None,
        }
    }

    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Binary,
            payload: payload.into(),
            mask: None,
        }
    }

    pub fn ping(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Ping,
            payload: payload.into(),
            mask: None,
        }
    }

    pub fn pong(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Pong,
            payload: payload.into(),
            mask: None,
        }
    }
}

/// Reads frames until one complete message is available.
///
/// Control frames pass through immediately, without disturbing an open
/// fragmentation. Returns `None` after any failure; every failure path
/// has already been reported through the handler and paired with a
/// close action where the protocol demands one.
pub(crate) async fn read_message<S, H>(
    conn: &mut WsConnection<S>,
    handler: &mut H,
) -> Option<Message>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: WsHandler<S>,
{
    loop {
        let frame = {
            let stream = conn.transport_mut()?;
            match Frame::read(stream).await {
                Ok(frame) => frame,
                Err(FrameError::TooLarge(len)) => {
                    trace!("aborting read: announced payload of {len} bytes");
                    conn.close(
                        handler,
                        CloseOptions::new()
                            .code(CloseCode::MessageTooBig as u16)
                            .reason("frame too large"),
                    )
                    .await;
                    return None;
                }
                Err(err) => {
                    let err = WsError::Frame(err);
                    handler.on_error(conn, &err).await;
                    return None;
                }
            }
        };

        let opcode = match frame.validate(!conn.fragments.is_empty()) {
            Ok(opcode) => opcode,
            Err(err) => {
                let err = WsError::Frame(err);
                handler.on_error(conn, &err).await;
                conn.close(handler, CloseOptions::loose()).await;
                return None;
            }
        };
        trace!("frame: opcode={opcode:?} fin={} len={}", frame.fin, frame.len);

        let Frame {
            fin, payload, mask, ..
        } = frame;

        if opcode.is_control() {
            return Some(Message {
                fin,
                opcode,
                payload,
                mask,
            });
        }

        // While a fragmented message is open, only continuation frames
        // (and control frames, handled above) are legal.
        if opcode.is_data() && !conn.fragments.is_empty() {
            let err = WsError::Frame(FrameError::ExpectedContinuation);
            handler.on_error(conn, &err).await;
            conn.close(handler, CloseOptions::loose()).await;
            return None;
        }

        if !fin {
            conn.fragments.push(Message {
                fin: false,
                opcode,
                payload,
                mask,
            });
            continue;
        }

        if conn.fragments.is_empty() {
            return Some(Message {
                fin: true,
                opcode,
                payload,
                mask,
            });
        }

        return Some(final_message(&mut conn.fragments, payload, mask));
    }
}

/// Concatenates all buffered fragments plus the final frame's payload
/// into one message, clearing the buffer.
fn final_message(fragments: &mut Vec<Message>, tail: Vec<u8>, mask: Option<[u8; 4]>) -> Message {
    let opcode = fragments[0].opcode;
    let len = fragments
        .iter()
        .map(|fragment| fragment.payload.len())
        .sum::<usize>()
        + tail.len();

    let mut payload = Vec::with_capacity(len);
    for fragment in fragments.drain(..) {
        payload.extend_from_slice(&fragment.payload);
    }
    payload.extend_from_slice(&tail);

    Message {
        fin: true,
        opcode,
        payload,
        mask,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_message_takes_first_fragment_opcode_and_clears() {
        let mut fragments = vec![
            Message {
                fin: false,
                opcode: OpCode::Text,
                payload: b"AB".to_vec(),
                mask: None,
            },
            Message {
                fin: false,
                opcode: OpCode::Continuation,
                payload: b"CD".to_vec(),
                mask: None,
            },
        ];

        let message = final_message(&mut fragments, b"EF".to_vec(), None);

        assert!(message.fin);
        assert_eq!(message.opcode, OpCode::Text);
        assert_eq!(message.payload, b"ABCDEF");
        assert!(fragments.is_empty());
    }

    #[test]
    fn constructors_build_final_frames() {
        assert_eq!(Message::text("hi").opcode, OpCode::Text);
        assert_eq!(Message::binary(vec![1u8]).opcode, OpCode::Binary);
        assert_eq!(Message::ping(b"p".to_vec()).opcode, OpCode::Ping);
        assert_eq!(Message::pong(b"p".to_vec()).opcode, OpCode::Pong);
        assert!(Message::text("hi").fin);
    }
}
