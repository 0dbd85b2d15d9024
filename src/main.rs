//! `collection-relay` binary.
//!
//! Runs the relay until ctrl-c.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use collection_relay::{Error, RelayConfig, RelayServer, Result};

#[derive(Parser, Debug)]
#[command(name = "collection-relay")]
#[command(version, about = "Relay between a browser extension and a remote controller")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "RELAY_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    bind: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "RELAY_PORT", default_value_t = collection_relay::config::DEFAULT_PORT)]
    port: u16,

    /// Seconds between heartbeat pings
    #[arg(long, env = "RELAY_HEARTBEAT_SECS", default_value_t = 30)]
    heartbeat_secs: u64,

    /// Control-panel page served at `/`
    #[arg(long, env = "RELAY_PANEL", value_name = "FILE", default_value = collection_relay::config::DEFAULT_PANEL_PATH)]
    panel: PathBuf,

    /// Do not serve the control panel
    #[arg(long)]
    no_panel: bool,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, env = "RELAY_LOG", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn to_config(&self) -> RelayConfig {
        let config = RelayConfig::new()
            .with_bind_ip(self.bind)
            .with_port(self.port)
            .with_heartbeat_interval(Duration::from_secs(self.heartbeat_secs));

        if self.no_panel {
            config.without_panel()
        } else {
            config.with_panel(&self.panel)
        }
    }
}

fn init_tracing(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| Error::config(format!("invalid log level {level:?}: {e}")))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| Error::config(format!("failed to install logger: {e}")))
}

/// First non-loopback IPv4 address, found by asking the OS which interface
/// would route to a public address. No packet is sent.
fn local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_loopback() && !ip.is_unspecified()).then_some(ip)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.json_logs)?;

    let config = args.to_config();
    let server = RelayServer::bind(config.clone()).await?;
    let port = server.port();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %server.local_addr(),
        heartbeat_secs = config.heartbeat_interval.as_secs(),
        panel = ?config.panel_path,
        "Relay running"
    );
    info!(url = %format!("http://localhost:{port}"), "Control panel (local)");
    info!(url = %format!("ws://localhost:{port}"), "WebSocket (local)");

    if server.local_addr().ip().is_unspecified()
        && let Some(ip) = local_ip()
    {
        info!(url = %format!("http://{ip}:{port}"), "Control panel (network)");
        info!(url = %format!("ws://{ip}:{port}"), "WebSocket (network)");
    }

    info!("Waiting for connections");

    server.run().await
}
