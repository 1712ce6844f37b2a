//! Entry point for `kcp-transport`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client**
//! mode. The server echoes every message back on the channel it arrived on;
//! the client sends a numbered message every `--every` milliseconds and logs
//! the echoes. `main.rs` owns only process setup (logging, signal handling,
//! argument parsing) and the tick loop.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use kcp_transport::{
    Channel, Client, ClientCallbacks, ErrorCode, PeerId, Server, ServerCallbacks, Setting,
};

/// Reliable and unreliable messaging over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    #[command(flatten)]
    tuning: Tuning,
}

#[derive(Subcommand)]
enum Mode {
    /// Run an echo server.
    Server {
        /// Port to listen on.
        #[arg(short, long, default_value_t = 7777)]
        port: u16,
    },
    /// Connect to a server and send messages periodically.
    Client {
        /// Server host name or address.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Server port.
        #[arg(short, long, default_value_t = 7777)]
        port: u16,
        /// Milliseconds between messages.
        #[arg(long, default_value_t = 1000)]
        every: u64,
        /// Send on the unreliable channel instead.
        #[arg(long)]
        unreliable: bool,
    },
}

/// Transport settings shared by both modes.
#[derive(Args)]
struct Tuning {
    /// Maximum datagram size in bytes.
    #[arg(long, default_value_t = 1200)]
    mtu: usize,
    /// Idle timeout in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    timeout: u64,
    /// Tick period in milliseconds.
    #[arg(long, default_value_t = 10)]
    tick: u64,
    /// Listen on IPv4 only instead of dual-stack.
    #[arg(long)]
    ipv4_only: bool,
    /// Enable congestion control.
    #[arg(long)]
    congestion: bool,
}

impl Tuning {
    fn setting(&self) -> Setting {
        Setting {
            mtu: self.mtu,
            timeout: Duration::from_millis(self.timeout),
            interval: Duration::from_millis(self.tick),
            dual_mode: !self.ipv4_only,
            congestion_window: self.congestion,
            ..Setting::default()
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let setting = cli.tuning.setting();
    let tick = Duration::from_millis(cli.tuning.tick.max(1));

    match cli.mode {
        Mode::Server { port } => run_server(setting, port, tick).await,
        Mode::Client {
            host,
            port,
            every,
            unreliable,
        } => {
            let channel = if unreliable {
                Channel::Unreliable
            } else {
                Channel::Reliable
            };
            run_client(setting, &host, port, Duration::from_millis(every), channel, tick).await
        }
    }
}

async fn run_server(setting: Setting, port: u16, tick: Duration) -> anyhow::Result<()> {
    // Callbacks can't call back into the server; echoes are sent after the tick.
    let echoes: Rc<RefCell<Vec<(PeerId, Vec<u8>, Channel)>>> = Rc::default();
    let inbox = echoes.clone();

    let callbacks = ServerCallbacks {
        on_connected: Box::new(|id: PeerId| log::info!("peer {id} connected")),
        on_data: Box::new(move |id: PeerId, data: &[u8], channel: Channel| {
            inbox.borrow_mut().push((id, data.to_vec(), channel));
        }),
        on_disconnected: Box::new(|id: PeerId| log::info!("peer {id} disconnected")),
        on_error: Box::new(|id: PeerId, code: ErrorCode, reason: &str| {
            log::warn!("peer {id} error {code}: {reason}")
        }),
    };

    let mut server = Server::new(setting, callbacks).context("invalid settings")?;
    server.start(port).with_context(|| format!("failed to listen on port {port}"))?;

    let mut interval = tokio::time::interval(tick);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                server.early_update();
                let pending: Vec<_> = echoes.borrow_mut().drain(..).collect();
                for (id, data, channel) in pending {
                    if let Err(e) = server.send(id, &data, channel) {
                        log::warn!("echo to {id} failed: {e}");
                    }
                }
                server.after_update();
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutting down");
                server.stop();
                return Ok(());
            }
        }
    }
}

async fn run_client(
    setting: Setting,
    host: &str,
    port: u16,
    every: Duration,
    channel: Channel,
    tick: Duration,
) -> anyhow::Result<()> {
    let callbacks = ClientCallbacks {
        on_connected: Box::new(|| log::info!("connected")),
        on_data: Box::new(|data: &[u8], channel: Channel| {
            log::info!("echo on {channel}: {}", String::from_utf8_lossy(data));
        }),
        on_disconnected: Box::new(|| log::info!("disconnected")),
        on_error: Box::new(|code: ErrorCode, reason: &str| log::warn!("error {code}: {reason}")),
    };

    let mut client = Client::new(setting, callbacks).context("invalid settings")?;
    client
        .connect(host, port)
        .with_context(|| format!("failed to connect to {host}:{port}"))?;

    let mut interval = tokio::time::interval(tick);
    let mut send_timer = tokio::time::interval(every);
    let mut counter = 0u64;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                client.tick();
                if !client.is_active() {
                    anyhow::bail!("connection to {host}:{port} closed");
                }
            }
            _ = send_timer.tick() => {
                if client.connected() {
                    counter += 1;
                    let message = format!("message #{counter}");
                    if let Err(e) = client.send(message.as_bytes(), channel) {
                        log::warn!("send failed: {e}");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutting down");
                client.disconnect();
                return Ok(());
            }
        }
    }
}
