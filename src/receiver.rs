//! The receiving side: a listener, an accept loop, and one decode task per
//! connection.

use crate::framing::{Event, S2sError, S2sFrame, S2sSocket};
use crate::handshake::{self, Preamble, S2sVersion, PREAMBLE_LEN};
use crate::tls;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Receives decoded events from a [`Server`].
///
/// Called from per-connection tasks, one event at a time in wire order for
/// any single connection.
pub trait EventSink: Send + Sync {
    fn handle(&self, peer: SocketAddr, event: Event);
}

/// The reference sink: one line per event on standard output.
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn handle(&self, _peer: SocketAddr, event: Event) {
        println!("Received event: {event}");
    }
}

struct TlsIdentity {
    cert_path: String,
    key_path: String,
    insecure: bool,
}

/// An S2S receiver: binds a listener, accepts connections in the background
/// and hands decoded events to an [`EventSink`].
pub struct Server {
    endpoint: String,
    tls: Option<TlsIdentity>,
    versions: Vec<S2sVersion>,
    sink: Arc<dyn EventSink>,
    local_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
}

impl Server {
    /// A plain-TCP receiver on `endpoint`, printing events to stdout.
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_owned(),
            tls: None,
            versions: vec![S2sVersion::V2, S2sVersion::V3],
            sink: Arc::new(StdoutSink),
            local_addr: None,
            shutdown: CancellationToken::new(),
            accept_task: None,
        }
    }

    /// A TLS receiver using the certificate/key pair at the given paths.
    ///
    /// `insecure` is accepted for interface parity with the sender; with no
    /// client certificate verification configured it changes nothing.
    pub fn new_tls(endpoint: &str, cert_path: &str, key_path: &str, insecure: bool) -> Self {
        Self {
            tls: Some(TlsIdentity {
                cert_path: cert_path.to_owned(),
                key_path: key_path.to_owned(),
                insecure,
            }),
            ..Self::new(endpoint)
        }
    }

    /// Replace the default stdout sink.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Restrict the protocol versions this receiver advertises. Connections
    /// announcing any other version are dropped at the preamble.
    pub fn with_versions(mut self, versions: &[S2sVersion]) -> Self {
        self.versions = versions.to_vec();
        self
    }

    /// The bound address, available once [`start`](Self::start) returns.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the listener and spawn the accept loop. Returns once the
    /// listener is ready.
    pub async fn start(&mut self) -> Result<(), S2sError> {
        let acceptor = match &self.tls {
            Some(identity) => {
                if identity.insecure {
                    debug!("TLS receiver running without client certificate verification");
                }
                let config = tls::server_config(&identity.cert_path, &identity.key_path)?;
                Some(TlsAcceptor::from(Arc::new(config)))
            }
            None => None,
        };

        let listener = TcpListener::bind(&self.endpoint).await?;
        self.local_addr = Some(listener.local_addr()?);
        info!(endpoint = %self.endpoint, tls = acceptor.is_some(), "S2S receiver listening");

        let token = self.shutdown.clone();
        let versions = self.versions.clone();
        let sink = Arc::clone(&self.sink);
        self.accept_task = Some(tokio::spawn(accept_loop(
            listener, acceptor, versions, sink, token,
        )));
        Ok(())
    }

    /// Stop accepting and close the listener. Connections already being
    /// handled run until their peer closes or their stream fails.
    pub async fn stop(&mut self) -> Result<(), S2sError> {
        self.shutdown.cancel();
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    versions: Vec<S2sVersion>,
    sink: Arc<dyn EventSink>,
    token: CancellationToken,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!("Error accepting connection: {e}");
                    continue;
                }
            },
        };
        debug!(%peer, "accepted S2S connection");

        let versions = versions.clone();
        let sink = Arc::clone(&sink);
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            let result = match acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => handle_connection(stream, peer, &versions, sink).await,
                    Err(e) => Err(e.into()),
                },
                None => handle_connection(stream, peer, &versions, sink).await,
            };
            if let Err(e) = result {
                warn!(%peer, "connection ended: {e}");
            }
        });
    }
}

/// Drive one client connection from preamble to end-of-stream.
///
/// Unknown signatures and un-advertised versions drop the connection without
/// reading further. Capability frames are answered inline; data frames go to
/// the sink. The first decode error ends the connection, since one byte of
/// drift corrupts every subsequent frame.
pub async fn handle_connection<IO>(
    mut io: IO,
    peer: SocketAddr,
    versions: &[S2sVersion],
    sink: Arc<dyn EventSink>,
) -> Result<(), S2sError>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; PREAMBLE_LEN];
    io.read_exact(&mut buf).await?;
    let preamble = Preamble::from_buf(&buf)?;
    if !versions.contains(&preamble.version) {
        return Err(S2sError::UnsupportedVersion(preamble.version));
    }
    debug!(
        %peer,
        version = %preamble.version,
        server_name = %preamble.server_name,
        mgmt_port = %preamble.mgmt_port,
        "preamble accepted",
    );

    let mut socket = S2sSocket::new(io);
    loop {
        match socket.next().await {
            None => return Ok(()),
            Some(Err(e)) => return Err(e),
            Some(Ok(S2sFrame::Control(caps))) => {
                debug!(%peer, %caps, "capability frame, sending response");
                socket.send(handshake::capability_response()).await?;
            }
            Some(Ok(S2sFrame::Data(event))) => sink.handle(peer, event),
        }
    }
}
