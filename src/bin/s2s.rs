//! Command-line driver: send a file of events to an S2S receiver, or run a
//! receiver that prints whatever it is sent.

use anyhow::Context;
use clap::Parser;
use s2s::{Connection, Event, S2sVersion, Server};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "s2s", version, about = "Send or receive Splunk-to-Splunk cooked-mode events")]
struct Cli {
    /// Run as a receiver, printing decoded events to stdout
    #[arg(long)]
    server: bool,

    /// Endpoint as host:port; a bare host gets the default port 9997
    #[arg(long, default_value = "localhost:9997")]
    endpoint: String,

    /// File of events to send, one per line (stdin when omitted)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Use TLS
    #[arg(long)]
    tls: bool,

    /// Certificate file: the receiver's identity, or the CA to trust when sending
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Private key file (receiver only)
    #[arg(long)]
    key: Option<PathBuf>,

    /// Expected TLS server name (sender only; Splunk's default cert name when empty)
    #[arg(long, default_value = "")]
    server_name: String,

    /// Skip TLS certificate verification
    #[arg(long)]
    insecure: bool,

    /// Target index for sent events
    #[arg(long, default_value = "")]
    index: String,

    /// Host metadata for sent events
    #[arg(long, default_value = "")]
    host: String,

    /// Source metadata for sent events
    #[arg(long, default_value = "")]
    source: String,

    /// Sourcetype metadata for sent events
    #[arg(long, default_value = "")]
    sourcetype: String,

    /// Protocol version to speak when sending (2 or 3)
    #[arg(long, default_value_t = 3)]
    protocol: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("s2s=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let endpoint = if cli.endpoint.contains(':') {
        cli.endpoint.clone()
    } else {
        format!("{}:9997", cli.endpoint)
    };

    if cli.server {
        run_server(&cli, &endpoint).await
    } else {
        run_sender(&cli, &endpoint).await
    }
}

async fn run_server(cli: &Cli, endpoint: &str) -> anyhow::Result<()> {
    let mut server = if cli.tls {
        let cert = cli.cert.as_ref().context("--tls requires --cert")?;
        let key = cli.key.as_ref().context("--tls requires --key")?;
        Server::new_tls(
            endpoint,
            &cert.to_string_lossy(),
            &key.to_string_lossy(),
            cli.insecure,
        )
    } else {
        Server::new(endpoint)
    };

    server.start().await?;
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.stop().await?;
    Ok(())
}

async fn run_sender(cli: &Cli, endpoint: &str) -> anyhow::Result<()> {
    let version =
        S2sVersion::from_repr(cli.protocol).context("protocol version must be 2 or 3")?;

    let reader: Box<dyn BufRead> = match &cli.file {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    if cli.tls {
        let ca_pem = match &cli.cert {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?,
            None => String::new(),
        };
        let conn = Connection::connect_tls(endpoint, &ca_pem, &cli.server_name, cli.insecure)
            .await?
            .with_version(version);
        stream_events(conn, reader, cli).await
    } else {
        let conn = Connection::connect(endpoint).await?.with_version(version);
        stream_events(conn, reader, cli).await
    }
}

async fn stream_events<IO>(
    mut conn: Connection<IO>,
    reader: Box<dyn BufRead>,
    cli: &Cli,
) -> anyhow::Result<()>
where
    IO: AsyncRead + AsyncWrite,
{
    let mut sent = 0u64;
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let mut event = Event::new(line);
        event.index = cli.index.clone();
        event.host = cli.host.clone();
        event.source = cli.source.clone();
        event.sourcetype = cli.sourcetype.clone();
        event.time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs() as i64);
        conn.send(&event).await?;
        sent += 1;
    }
    conn.close().await?;
    info!(events = sent, "done");
    Ok(())
}
