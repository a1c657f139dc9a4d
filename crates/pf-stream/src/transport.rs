//! Encrypted socket setup.
//!
//! [`connect`] opens TCP to the configured host, runs the TLS handshake
//! (server identity validated by `native-tls`) and splits the stream into a
//! framed reader and writer. [`FeedStream::from_io`] does the same framing
//! over any async byte stream, which is how tests drive the client through
//! in-memory pipes.

use pf_core::config::StreamConfig;
use pf_core::error::ConnectError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info};

use crate::codec::FeedCodec;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Inbound half: yields one line per item.
pub type FeedReader = FramedRead<BoxedReader, FeedCodec>;

/// Outbound half: accepts one line per item.
pub type FeedWriter = FramedWrite<BoxedWriter, FeedCodec>;

/// A framed, connected feed socket.
pub struct FeedStream {
    pub reader: FeedReader,
    pub writer: FeedWriter,
    /// `host:port` (or a test label) for log lines.
    pub peer: String,
}

impl FeedStream {
    /// Frame an already-connected byte stream.
    pub fn from_io<S>(io: S, peer: impl Into<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        Self {
            reader: FramedRead::new(Box::new(read_half) as BoxedReader, FeedCodec::new()),
            writer: FramedWrite::new(Box::new(write_half) as BoxedWriter, FeedCodec::new()),
            peer: peer.into(),
        }
    }
}

/// Open the TLS feed socket described by `config`.
///
/// The whole TCP connect + handshake is bounded by the configured connect
/// timeout. Failures are returned, never retried here.
pub async fn connect(config: &StreamConfig) -> Result<FeedStream, ConnectError> {
    let host = config.host().to_string();
    let addr = format!("{host}:{}", config.port);
    info!("[{}] connecting to {addr}", config.label);

    match tokio::time::timeout(config.connect_timeout(), open_tls(&host, &addr)).await {
        Ok(result) => result,
        Err(_) => Err(ConnectError::Timeout { addr }),
    }
}

async fn open_tls(host: &str, addr: &str) -> Result<FeedStream, ConnectError> {
    let tcp = TcpStream::connect(addr)
        .await
        .map_err(|source| ConnectError::Tcp {
            addr: addr.to_string(),
            source,
        })?;
    if let Err(e) = tcp.set_nodelay(true) {
        debug!("set_nodelay failed on {addr}: {e}");
    }

    let tls_err = |e: native_tls::Error| ConnectError::Tls {
        host: host.to_string(),
        reason: e.to_string(),
    };
    let connector = native_tls::TlsConnector::new().map_err(tls_err)?;
    let connector = tokio_native_tls::TlsConnector::from(connector);
    let tls = connector.connect(host, tcp).await.map_err(tls_err)?;

    Ok(FeedStream::from_io(tls, addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};

    #[tokio::test]
    async fn framed_pipe_round_trip() {
        let (a, b) = tokio::io::duplex(1024);
        let mut left = FeedStream::from_io(a, "left");
        let mut right = FeedStream::from_io(b, "right");

        left.writer.send("{\"op\":\"heartbeat\",\"id\":1}".to_string()).await.unwrap();
        let line = right.reader.next().await.unwrap().unwrap();
        assert_eq!(line, "{\"op\":\"heartbeat\",\"id\":1}");

        drop(left);
        assert!(right.reader.next().await.is_none());
    }

    #[tokio::test]
    async fn refused_connection_is_tcp_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = StreamConfig {
            host: Some("127.0.0.1".into()),
            port,
            connect_timeout_ms: 2_000,
            ..Default::default()
        };
        match connect(&config).await {
            Err(ConnectError::Tcp { addr, .. }) => assert_eq!(addr, format!("127.0.0.1:{port}")),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("connect should fail"),
        }
    }
}
