//! `kcp-transport`: reliable and unreliable message channels over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐                        ┌──────────┐
//!  │  Client  │                        │  Server  │  PeerId ─▶ Peer table
//!  └────┬─────┘                        └────┬─────┘
//!       │ one Peer                          │ one Peer per remote
//!  ┌────▼──────────────────────────────────▼────┐
//!  │                   Peer                      │
//!  │  handshake · state machine · liveness       │
//!  │  channel envelope (tag + cookie)            │
//!  └────┬───────────────────────────────┬───────┘
//!       │ reliable                      │ unreliable
//!  ┌────▼──────┐                        │
//!  │    Kcp    │  ARQ: windows, RTO,    │
//!  │           │  fragments, acks       │
//!  └────┬──────┘                        │
//!       │ datagrams                     │
//!  ┌────▼───────────────────────────────▼───────┐
//!  │        Socket (non-blocking std UDP)        │
//!  └─────────────────────────────────────────────┘
//! ```
//!
//! Everything runs inside the caller's tick: `early_update` drains the socket
//! and dispatches, `after_update` lets the ARQ engine emit. Nothing blocks
//! and no thread is spawned.
//!
//! Each module has a single responsibility:
//! - [`wire`]: integer codec, channel and frame tags, size formulas
//! - [`pool`]: free-list object pool
//! - [`segment`]: ARQ segment and its header format
//! - [`timer`]: RTT estimation and retransmission timeout
//! - [`kcp`]: the ARQ engine
//! - [`config`]: transport settings
//! - [`state`]: peer finite-state machine
//! - [`error`]: error types and error-signal codes
//! - [`peer`]: connection protocol on top of the engine
//! - [`socket`]: non-blocking UDP socket
//! - [`client`]: single-connection driver
//! - [`server`]: multi-connection driver
//! - [`simulator`]: lossy in-memory link for tests

pub mod client;
pub mod config;
pub mod error;
pub mod kcp;
pub mod peer;
pub mod pool;
pub mod segment;
pub mod server;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;
pub mod wire;

pub use client::{Client, ClientCallbacks};
pub use config::Setting;
pub use error::{Error, ErrorCode};
pub use peer::{Output, Peer, PeerHandler, PeerStats};
pub use server::{PeerId, Server, ServerCallbacks};
pub use state::PeerState;
pub use wire::Channel;
