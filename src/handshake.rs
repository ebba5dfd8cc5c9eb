//! Opening handshake: upgrade request, response read and verification.

use base64::{Engine as _, engine::general_purpose::STANDARD as b64};
use httparse::Status;
use memchr::memmem::Finder;
use monoio_compat::{AsyncReadExt, AsyncWriteExt};
use rand::RngCore;
use sha1::{Digest, Sha1};
use smallvec::SmallVec;

use crate::transport::WsTarget;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The response headers are read one byte at a time and must fit this
/// cap; whatever follows the header terminator belongs to the frame
/// layer and must stay on the wire.
const MAX_RESPONSE: usize = 1024;

#[derive(thiserror::Error, Debug)]
pub enum HandshakeError {
    #[error("eof during handshake")]
    Eof,
    #[error("oversized handshake response")]
    Oversized,
    #[error("non-101 status line")]
    Status,
    #[error("missing or invalid upgrade headers")]
    Headers,
    #[error("bad Sec-WebSocket-Accept")]
    Accept,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),
}

/// A freshly generated `Sec-WebSocket-Key` and the accept value the
/// server must answer with.
pub struct SecKey {
    pub key: String,
    pub expected_accept: String,
}

/// Builds a random 16-byte key, base64-encoded, plus its expected
/// accept digest.
pub fn generate_sec_key() -> SecKey {
    let mut key_bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut key_bytes);
    let key = b64.encode(key_bytes);
    let expected_accept = accept_key_for(&key);

    SecKey {
        key,
        expected_accept,
    }
}

/// Computes the `Sec-WebSocket-Accept` value for a given key: the
/// base64-encoded SHA-1 digest of the key concatenated with the
/// protocol GUID.
pub fn accept_key_for(sec_key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(sec_key.as_bytes());
    sha1.update(WS_GUID.as_bytes());
    b64.encode(sha1.finalize())
}

/// Writes the upgrade request: the `GET <path> HTTP/1.1` line, the
/// caller's extra headers in insertion order, then the handshake
/// headers (`Host` only when the extras don't carry one).
pub async fn write_request<S>(
    stream: &mut S,
    target: &WsTarget,
    sec_key: &str,
    headers: &[(String, String)],
    protocols: &[String],
) -> Result<(), HandshakeError>
where
    S: AsyncWriteExt + Unpin,
{
    let mut buffer = SmallVec::<[u8; 512]>::new();

    buffer.extend_from_slice(b"GET ");
    buffer.extend_from_slice(target.path_and_query.as_bytes());
    buffer.extend_from_slice(b" HTTP/1.1\r\n");

    for (name, value) in headers {
        buffer.extend_from_slice(name.as_bytes());
        buffer.extend_from_slice(b": ");
        buffer.extend_from_slice(value.as_bytes());
        buffer.extend_from_slice(b"\r\n");
    }

    let has_host = headers.iter().any(|(name, _)| name.eq_ignore_ascii_case("host"));
    if !has_host {
        buffer.extend_from_slice(b"Host: ");
        buffer.extend_from_slice(target.host_header.as_bytes());
        buffer.extend_from_slice(b"\r\n");
    }

    buffer.extend_from_slice(
        b"Upgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Version: 13\r\nSec-WebSocket-Key: ",
    );
    buffer.extend_from_slice(sec_key.as_bytes());
    buffer.extend_from_slice(b"\r\n");

    if !protocols.is_empty() {
        buffer.extend_from_slice(b"Sec-WebSocket-Protocol: ");
        buffer.extend_from_slice(protocols.join(", ").as_bytes());
        buffer.extend_from_slice(b"\r\n");
    }

    buffer.extend_from_slice(b"\r\n");

    stream.write_all(&buffer).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads the raw response byte by byte until the `\r\n\r\n` terminator.
///
/// Hitting [`MAX_RESPONSE`] without a terminator or the transport
/// running dry fails the handshake.
pub async fn read_response<S>(stream: &mut S) -> Result<Vec<u8>, HandshakeError>
where
    S: AsyncReadExt + Unpin,
{
    let finder = Finder::new(b"\r\n\r\n");
    let mut raw = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    let mut scan_pos = 0;

    loop {
        if finder.find(&raw[scan_pos..]).is_some() {
            break;
        }
        scan_pos = raw.len().saturating_sub(3);

        if raw.len() >= MAX_RESPONSE {
            return Err(HandshakeError::Oversized);
        }

        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(HandshakeError::Eof);
        }
        raw.push(byte[0]);
    }

    Ok(raw)
}

/// Verifies the upgrade response and returns the negotiated
/// sub-protocol (empty when the server picked none).
pub fn verify_response(raw: &[u8], expected_accept: &str) -> Result<String, HandshakeError> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut headers);

    match response.parse(raw) {
        Ok(Status::Complete(_)) => {}
        _ => return Err(HandshakeError::Headers),
    }
    if response.code != Some(101) {
        return Err(HandshakeError::Status);
    }

    let upgrade = find_header(response.headers, "Upgrade").ok_or(HandshakeError::Headers)?;
    if !value_eq_ascii(upgrade, "websocket")? {
        return Err(HandshakeError::Headers);
    }

    let connection = find_header(response.headers, "Connection").ok_or(HandshakeError::Headers)?;
    if !value_eq_ascii(connection, "upgrade")? {
        return Err(HandshakeError::Headers);
    }

    let accept =
        find_header(response.headers, "Sec-WebSocket-Accept").ok_or(HandshakeError::Headers)?;
    if std::str::from_utf8(accept)?.trim() != expected_accept {
        return Err(HandshakeError::Accept);
    }

    let protocol = match find_header(response.headers, "Sec-WebSocket-Protocol") {
        Some(value) => std::str::from_utf8(value)?.trim().to_owned(),
        None => String::new(),
    };

    Ok(protocol)
}

fn find_header<'a>(headers: &'a [httparse::Header<'a>], name: &str) -> Option<&'a [u8]> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value)
}

fn value_eq_ascii(value: &[u8], token: &str) -> Result<bool, std::str::Utf8Error> {
    Ok(std::str::from_utf8(value)?.trim().eq_ignore_ascii_case(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run<F: Future>(fut: F) -> F::Output {
        monoio::RuntimeBuilder::<monoio::FusionDriver>::new()
            .enable_all()
            .build()
            .expect("runtime")
            .block_on(fut)
    }

    #[test]
    fn computes_rfc_accept_vector() {
        assert_eq!(
            accept_key_for("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn generated_keys_are_sixteen_bytes_base64() {
        let sec = generate_sec_key();
        let decoded = b64.decode(&sec.key).unwrap();
        assert_eq!(decoded.len(), 16);
        assert_eq!(sec.expected_accept, accept_key_for(&sec.key));
    }

    #[test]
    fn reads_up_to_the_terminator_only() {
        let wire = b"HTTP/1.1 101 Switching Protocols\r\n\r\n\x81\x00";
        let raw = run(async {
            let mut input: &[u8] = wire;
            let raw = read_response(&mut input).await.unwrap();
            // The first frame byte must still be on the wire.
            assert_eq!(input, &b"\x81\x00"[..]);
            raw
        });
        assert!(raw.ends_with(b"\r\n\r\n"));
    }

    #[test]
    fn dry_transport_fails_the_read() {
        let result = run(async {
            let mut input: &[u8] = b"HTTP/1.1 101 Switching";
            read_response(&mut input).await
        });
        assert!(matches!(result, Err(HandshakeError::Eof)));
    }

    #[test]
    fn oversized_response_fails_the_read() {
        let filler = vec![b'x'; 4096];
        let result = run(async {
            let mut input: &[u8] = &filler;
            read_response(&mut input).await
        });
        assert!(matches!(result, Err(HandshakeError::Oversized)));
    }

    fn response_with_accept(accept: &str) -> Vec<u8> {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
        )
        .into_bytes()
    }

    #[test]
    fn accepts_a_valid_response() {
        let accept = accept_key_for("dGhlIHNhbXBsZSBub25jZQ==");
        let raw = response_with_accept(&accept);
        let protocol = verify_response(&raw, &accept).unwrap();
        assert_eq!(protocol, "");
    }

    #[test]
    fn header_names_match_case_insensitively() {
        let accept = accept_key_for("dGhlIHNhbXBsZSBub25jZQ==");
        let raw = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUPGRADE: WebSocket\r\nconnection: UPGRADE\r\nsec-websocket-accept: {accept}\r\nSec-WebSocket-Protocol: chat\r\n\r\n"
        )
        .into_bytes();
        assert_eq!(verify_response(&raw, &accept).unwrap(), "chat");
    }

    #[test]
    fn rejects_non_101_status() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
        assert!(matches!(
            verify_response(raw, "whatever"),
            Err(HandshakeError::Status)
        ));
    }

    #[test]
    fn rejects_wrong_accept_key() {
        let raw = response_with_accept("bm90IHRoZSByaWdodCBrZXk=");
        assert!(matches!(
            verify_response(&raw, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="),
            Err(HandshakeError::Accept)
        ));
    }

    #[test]
    fn rejects_missing_upgrade_header() {
        let accept = accept_key_for("dGhlIHNhbXBsZSBub25jZQ==");
        let raw = format!(
            "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
        )
        .into_bytes();
        assert!(matches!(
            verify_response(&raw, &accept),
            Err(HandshakeError::Headers)
        ));
    }
}
