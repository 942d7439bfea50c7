//! The sending side: dial a receiver, handshake lazily, stream event frames.

use crate::framing::{Event, S2sError, S2sSocket};
use crate::handshake::{self, Preamble, S2sVersion};
use crate::tls;
use bytes::Bytes;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace};

/// Wall-clock limit on the TCP dial.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A sender-side connection to one S2S receiver.
///
/// The handshake is performed lazily by the first [`send`](Self::send). Once
/// any call returns an error the connection is dead: there is no reconnect
/// and no way to resynchronize the frame stream, so the value must be dropped.
#[derive(Debug)]
pub struct Connection<IO> {
    socket: S2sSocket<IO>,
    endpoint: String,
    version: S2sVersion,
    did_handshake: bool,
}

impl Connection<TcpStream> {
    /// Dial `host:port` over plain TCP.
    pub async fn connect(endpoint: &str) -> Result<Self, S2sError> {
        handshake::split_endpoint(endpoint)?;
        let stream = dial(endpoint).await?;
        Ok(Self::new(stream, endpoint))
    }
}

impl Connection<TlsStream<TcpStream>> {
    /// Dial `host:port` over TLS.
    ///
    /// A non-empty `ca_pem` replaces the system trust anchors. An empty
    /// `server_name` verifies against Splunk's default certificate name.
    /// `insecure` skips certificate verification entirely.
    pub async fn connect_tls(
        endpoint: &str,
        ca_pem: &str,
        server_name: &str,
        insecure: bool,
    ) -> Result<Self, S2sError> {
        handshake::split_endpoint(endpoint)?;
        let config = tls::client_config(ca_pem, insecure)?;
        let server_name = if server_name.is_empty() {
            tls::DEFAULT_SERVER_NAME
        } else {
            server_name
        };
        let sni = rustls::pki_types::ServerName::try_from(server_name.to_owned())
            .map_err(|e| S2sError::InvalidTls(format!("bad server name {server_name:?}: {e}")))?;

        let stream = dial(endpoint).await?;
        let connector = TlsConnector::from(Arc::new(config));
        let stream = connector.connect(sni, stream).await?;
        Ok(Self::new(stream, endpoint))
    }
}

impl<IO> Connection<IO>
where
    IO: AsyncRead + AsyncWrite,
{
    /// Wrap an already-established transport talking to `endpoint`.
    pub fn new(io: IO, endpoint: &str) -> Self {
        Self {
            socket: S2sSocket::new(io),
            endpoint: endpoint.to_owned(),
            version: S2sVersion::default(),
            did_handshake: false,
        }
    }

    /// Select the protocol version to speak; v3 unless told otherwise.
    /// Only meaningful before the first send.
    pub fn with_version(mut self, version: S2sVersion) -> Self {
        self.version = version;
        self
    }

    pub fn version(&self) -> S2sVersion {
        self.version
    }

    /// Encode and write one event, performing the handshake first if this is
    /// the first send on the connection.
    pub async fn send(&mut self, event: &Event) -> Result<(), S2sError> {
        if !self.did_handshake {
            self.handshake().await?;
            self.did_handshake = true;
        }
        self.socket.send_raw(Bytes::from(event.to_buf()?)).await
    }

    /// Flush and close the transport.
    pub async fn close(mut self) -> Result<(), S2sError> {
        self.socket.close().await
    }

    async fn handshake(&mut self) -> Result<(), S2sError> {
        let preamble = Preamble::for_endpoint(&self.endpoint, self.version)?;
        self.socket.send_raw(Bytes::from(preamble.to_buf())).await?;
        if self.version != S2sVersion::V3 {
            return Ok(());
        }

        // v3: announce our capabilities, then wait for the server's reply
        let request = handshake::capability_request();
        self.socket.send_raw(Bytes::from(request.to_buf()?)).await?;
        match self.socket.next().await {
            Some(Ok(reply)) => {
                trace!(?reply, "capability response");
                debug!(endpoint = %self.endpoint, version = %self.version, "handshake complete");
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => Err(S2sError::ClosedByPeer(
                "server closed connection during handshake".to_owned(),
            )),
        }
    }
}

async fn dial(endpoint: &str) -> Result<TcpStream, S2sError> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(endpoint))
        .await
        .map_err(|_| S2sError::Io {
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
        })??;
    // lower latency for small frames; keep going with default buffering if refused
    if let Err(e) = stream.set_nodelay(true) {
        debug!("failed to set TCP_NODELAY: {e}");
    }
    Ok(stream)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::framing::S2sFrame;
    use crate::handshake::PREAMBLE_LEN;
    use anyhow::Result;
    use futures_util::SinkExt;
    use tokio::io::AsyncReadExt;

    #[test_log::test(tokio::test)]
    async fn bad_endpoint_fails_before_dialing() {
        for endpoint in ["foo", "a:b:c"] {
            let err = Connection::connect(endpoint).await.unwrap_err();
            assert!(matches!(err, S2sError::InvalidEndpoint(_)), "{err}");
            let err = Connection::connect_tls(endpoint, "", "", true)
                .await
                .unwrap_err();
            assert!(matches!(err, S2sError::InvalidEndpoint(_)), "{err}");
        }
    }

    #[test_log::test(tokio::test)]
    async fn v2_send_writes_preamble_then_frame() -> Result<()> {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let mut conn = Connection::new(client, "test-server:8089").with_version(S2sVersion::V2);

        let mut event = Event::new("hello");
        event.index = "main".to_owned();
        conn.send(&event).await?;

        let mut preamble = [0u8; PREAMBLE_LEN];
        server.read_exact(&mut preamble).await?;
        let preamble = Preamble::from_buf(&preamble)?;
        assert_eq!(preamble.version, S2sVersion::V2);
        assert_eq!(preamble.server_name, "test-server");
        assert_eq!(preamble.mgmt_port, "8089");

        let mut socket = S2sSocket::new(server);
        match socket.next().await.unwrap()? {
            S2sFrame::Data(decoded) => assert_eq!(decoded, event),
            S2sFrame::Control(_) => panic!("expected data frame"),
        }
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn v3_handshake_exchanges_capabilities() -> Result<()> {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let mut conn = Connection::new(client, "test-server:9997");

        let peer = tokio::spawn(async move {
            let mut preamble = [0u8; PREAMBLE_LEN];
            server.read_exact(&mut preamble).await?;
            let preamble = Preamble::from_buf(&preamble)?;
            assert_eq!(preamble.version, S2sVersion::V3);

            let mut socket = S2sSocket::new(server);
            match socket.next().await.unwrap()? {
                S2sFrame::Control(caps) => assert_eq!(caps, "ack=0;compression=0"),
                S2sFrame::Data(_) => panic!("expected capability frame"),
            }
            socket.send(handshake::capability_response()).await?;

            match socket.next().await.unwrap()? {
                S2sFrame::Data(event) => assert_eq!(event.raw, "after handshake"),
                S2sFrame::Control(_) => panic!("expected data frame"),
            }
            Ok::<(), anyhow::Error>(())
        });

        conn.send(&Event::new("after handshake")).await?;
        conn.close().await?;
        peer.await??;
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn handshake_runs_once() -> Result<()> {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let mut conn = Connection::new(client, "h:9997").with_version(S2sVersion::V2);

        conn.send(&Event::new("one")).await?;
        conn.send(&Event::new("two")).await?;
        conn.close().await?;

        let mut preamble = [0u8; PREAMBLE_LEN];
        server.read_exact(&mut preamble).await?;

        let mut socket = S2sSocket::new(server);
        let mut raws = Vec::new();
        while let Some(frame) = socket.next().await {
            match frame? {
                S2sFrame::Data(event) => raws.push(event.raw),
                S2sFrame::Control(_) => panic!("unexpected control frame"),
            }
        }
        assert_eq!(raws, ["one", "two"]);
        Ok(())
    }
}
