//! Transport collaborator: URI-to-endpoint mapping and the underlying
//! TCP or TLS byte stream.
//!
//! The protocol engine itself is generic over any `AsyncRead +
//! AsyncWrite` stream; this module supplies the batteries-included
//! path, picking plaintext or TLS by URI scheme.

use std::sync::{Arc, OnceLock};

use monoio::net::TcpStream;
use monoio_compat::StreamWrapper;
use monoio_rustls::{ClientTlsStream, TlsConnector};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("unsupported URI scheme `{0}`")]
    Scheme(String),
    #[error("URI has no host")]
    Host,
    #[error("invalid dns name")]
    Dns,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Tls(#[from] monoio_rustls::TlsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Ws,
    Wss,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Ws => 80,
            Scheme::Wss => 443,
        }
    }
}

/// The connect-relevant pieces of a WebSocket URI.
#[derive(Debug, Clone)]
pub struct WsTarget {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Path plus `?query` for the request line.
    pub path_and_query: String,
    /// Value for the `Host` header; carries the port when the URI
    /// names one explicitly.
    pub host_header: String,
}

impl WsTarget {
    /// Maps a URI onto a connectable target. `ws`/`http` select
    /// plaintext, `wss`/`https` select TLS; any other scheme is
    /// refused.
    pub fn from_url(uri: &Url) -> Result<Self, TransportError> {
        let scheme = match uri.scheme() {
            "ws" | "http" => Scheme::Ws,
            "wss" | "https" => Scheme::Wss,
            other => return Err(TransportError::Scheme(other.to_owned())),
        };

        let host = uri.host_str().ok_or(TransportError::Host)?.to_owned();
        let port = uri.port().unwrap_or_else(|| scheme.default_port());

        let mut path_and_query = uri.path().to_owned();
        if let Some(query) = uri.query() {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }

        let host_header = match uri.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.clone(),
        };

        Ok(Self {
            scheme,
            host,
            port,
            path_and_query,
            host_header,
        })
    }
}

/// A unified IO stream that can be plain TCP or TLS over TCP, both
/// wrapped in `monoio_compat::StreamWrapper` to provide
/// AsyncRead/AsyncWrite.
#[allow(clippy::large_enum_variant)]
pub enum AnyStream {
    Plain(StreamWrapper<TcpStream>),
    Tls(StreamWrapper<ClientTlsStream<TcpStream>>),
}

impl monoio_compat::AsyncRead for AnyStream {
    fn poll_read(
        self: core::pin::Pin<&mut Self>,
        cx: &mut core::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> core::task::Poll<std::io::Result<()>> {
        unsafe {
            match self.get_unchecked_mut() {
                AnyStream::Plain(s) => core::pin::Pin::new_unchecked(s).poll_read(cx, buf),
                AnyStream::Tls(s) => core::pin::Pin::new_unchecked(s).poll_read(cx, buf),
            }
        }
    }
}

impl monoio_compat::AsyncWrite for AnyStream {
    fn poll_write(
        self: core::pin::Pin<&mut Self>,
        cx: &mut core::task::Context<'_>,
        buf: &[u8],
    ) -> core::task::Poll<Result<usize, std::io::Error>> {
        unsafe {
            match self.get_unchecked_mut() {
                AnyStream::Plain(s) => core::pin::Pin::new_unchecked(s).poll_write(cx, buf),
                AnyStream::Tls(s) => core::pin::Pin::new_unchecked(s).poll_write(cx, buf),
            }
        }
    }

    fn poll_flush(
        self: core::pin::Pin<&mut Self>,
        cx: &mut core::task::Context<'_>,
    ) -> core::task::Poll<Result<(), std::io::Error>> {
        unsafe {
            match self.get_unchecked_mut() {
                AnyStream::Plain(s) => core::pin::Pin::new_unchecked(s).poll_flush(cx),
                AnyStream::Tls(s) => core::pin::Pin::new_unchecked(s).poll_flush(cx),
            }
        }
    }

    fn poll_shutdown(
        self: core::pin::Pin<&mut Self>,
        cx: &mut core::task::Context<'_>,
    ) -> core::task::Poll<Result<(), std::io::Error>> {
        unsafe {
            match self.get_unchecked_mut() {
                AnyStream::Plain(s) => core::pin::Pin::new_unchecked(s).poll_shutdown(cx),
                AnyStream::Tls(s) => core::pin::Pin::new_unchecked(s).poll_shutdown(cx),
            }
        }
    }
}

static GLOBAL_CONNECTOR: OnceLock<TlsConnector> = OnceLock::new();

fn tls_connector() -> &'static TlsConnector {
    GLOBAL_CONNECTOR.get_or_init(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        TlsConnector::from(Arc::new(config))
    })
}

/// Establishes the underlying byte stream for `target`: TCP, then a
/// TLS session on top when the scheme asks for one.
pub async fn connect(target: &WsTarget) -> Result<AnyStream, TransportError> {
    let tcp = TcpStream::connect((target.host.as_str(), target.port)).await?;

    match target.scheme {
        Scheme::Ws => Ok(AnyStream::Plain(StreamWrapper::new(tcp))),
        Scheme::Wss => {
            let dns =
                ServerName::try_from(target.host.clone()).map_err(|_| TransportError::Dns)?;
            let tls = tls_connector().connect(dns, tcp).await?;
            Ok(AnyStream::Tls(StreamWrapper::new(tls)))
        }
    }
}
