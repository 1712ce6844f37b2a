//! Server: one socket, many peers.
//!
//! ```text
//!               recv_from loop
//!  ┌────────┐  ──────────────▶  known addr?  ──yes──▶  peer.raw_input
//!  │ Socket │                       │
//!  └────────┘                       no
//!                                   ▼
//!                     fresh Peer ── raw_input + tick_incoming
//!                                   │
//!                         authenticated? ──yes──▶ insert into table
//!                                   │
//!                                   no ──▶ discard
//! ```
//!
//! Peers are keyed by a [`PeerId`] hashed from the remote address. The table
//! is never mutated while it is iterated: peers that disconnect during a tick
//! are collected and removed after the iteration.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Instant;

use crate::config::Setting;
use crate::error::{Error, ErrorCode};
use crate::peer::{opens_handshake, Peer, PeerHandler, PeerStats};
use crate::socket::{SendTo, Socket};
use crate::state::PeerState;
use crate::wire::{generate_cookie, Channel};

/// Opaque connection id derived from the remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl PeerId {
    pub fn from_addr(addr: &SocketAddr) -> Self {
        let mut hasher = DefaultHasher::new();
        addr.hash(&mut hasher);
        PeerId(hasher.finish())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Event hooks, injected at construction. Unset hooks do nothing.
///
/// Hooks run inside the server's tick and cannot call back into the server;
/// queue replies and send them after the tick returns.
pub struct ServerCallbacks {
    pub on_connected: Box<dyn FnMut(PeerId)>,
    pub on_data: Box<dyn FnMut(PeerId, &[u8], Channel)>,
    pub on_disconnected: Box<dyn FnMut(PeerId)>,
    pub on_error: Box<dyn FnMut(PeerId, ErrorCode, &str)>,
}

impl Default for ServerCallbacks {
    fn default() -> Self {
        Self {
            on_connected: Box::new(|_: PeerId| {}),
            on_data: Box::new(|_: PeerId, _: &[u8], _: Channel| {}),
            on_disconnected: Box::new(|_: PeerId| {}),
            on_error: Box::new(|_: PeerId, _: ErrorCode, _: &str| {}),
        }
    }
}

/// Routes one peer's events to the server callbacks with its id attached.
struct PeerEvents<'a> {
    id: PeerId,
    callbacks: &'a mut ServerCallbacks,
    /// A peer that never authenticated was never announced, so neither its
    /// errors nor its disconnect are.
    announced: bool,
}

impl<'a> PeerEvents<'a> {
    fn connected(id: PeerId, callbacks: &'a mut ServerCallbacks) -> Self {
        Self {
            id,
            callbacks,
            announced: true,
        }
    }

    fn pending(id: PeerId, callbacks: &'a mut ServerCallbacks) -> Self {
        Self {
            id,
            callbacks,
            announced: false,
        }
    }
}

impl PeerHandler for PeerEvents<'_> {
    fn on_authenticated(&mut self) {
        self.announced = true;
        (self.callbacks.on_connected)(self.id);
    }

    fn on_data(&mut self, message: &[u8], channel: Channel) {
        (self.callbacks.on_data)(self.id, message, channel);
    }

    fn on_disconnected(&mut self) {
        if self.announced {
            (self.callbacks.on_disconnected)(self.id);
        }
    }

    fn on_error(&mut self, code: ErrorCode, reason: &str) {
        if self.announced {
            (self.callbacks.on_error)(self.id, code, reason);
        } else {
            log::debug!("[server] {} rejected before connecting: {code}: {reason}", self.id);
        }
    }
}

struct Connection {
    peer: Peer,
    addr: SocketAddr,
}

pub struct Server {
    setting: Setting,
    callbacks: ServerCallbacks,
    socket: Option<Socket>,
    connections: HashMap<PeerId, Connection>,
    removals: Vec<PeerId>,
    epoch: Instant,
    buffer: Vec<u8>,
}

impl Server {
    pub fn new(setting: Setting, callbacks: ServerCallbacks) -> Result<Self, Error> {
        setting.validate()?;
        let buffer = vec![0u8; setting.mtu];
        Ok(Self {
            setting,
            callbacks,
            socket: None,
            connections: HashMap::new(),
            removals: Vec::new(),
            epoch: Instant::now(),
            buffer,
        })
    }

    fn now(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }

    pub fn setting(&self) -> &Setting {
        &self.setting
    }

    /// Bind the listening socket. Port 0 picks an ephemeral port.
    pub fn start(&mut self, port: u16) -> Result<(), Error> {
        if self.socket.is_some() {
            log::warn!("[server] already started");
            return Err(Error::AlreadyActive);
        }
        let socket = if self.setting.dual_mode {
            Socket::bind_dual_mode(port, &self.setting)?
        } else {
            Socket::bind((Ipv4Addr::UNSPECIFIED, port).into(), &self.setting)?
        };
        log::info!("[server] listening on {}", socket.local_addr());
        self.socket = Some(socket);
        Ok(())
    }

    /// Disconnect every peer and close the socket.
    pub fn stop(&mut self) {
        let now = self.now();
        if let Some(socket) = self.socket.as_ref() {
            for (id, conn) in self.connections.iter_mut() {
                conn.peer.disconnect(
                    now,
                    &mut SendTo {
                        socket,
                        addr: conn.addr,
                    },
                    &mut PeerEvents::connected(*id, &mut self.callbacks),
                );
            }
            log::info!("[server] stopped");
        }
        self.connections.clear();
        self.removals.clear();
        self.socket = None;
    }

    pub fn is_active(&self) -> bool {
        self.socket.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().map(Socket::local_addr)
    }

    /// Number of authenticated peers.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn peer_address(&self, id: PeerId) -> Option<SocketAddr> {
        self.connections.get(&id).map(|conn| conn.addr)
    }

    pub fn peer_stats(&self, id: PeerId) -> Option<PeerStats> {
        self.connections.get(&id).map(|conn| conn.peer.stats())
    }

    /// Send to one peer. An unknown id is ignored.
    pub fn send(&mut self, id: PeerId, data: &[u8], channel: Channel) -> Result<(), Error> {
        let now = self.now();
        let (Some(socket), Some(conn)) = (self.socket.as_ref(), self.connections.get_mut(&id))
        else {
            log::debug!("[server] send to unknown peer {id} ignored");
            return Ok(());
        };
        conn.peer.send(
            data,
            channel,
            now,
            &mut SendTo {
                socket,
                addr: conn.addr,
            },
            &mut PeerEvents::connected(id, &mut self.callbacks),
        )
    }

    /// Close one peer's connection and forget it. An unknown id is ignored.
    pub fn disconnect(&mut self, id: PeerId) {
        let now = self.now();
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        if let Some(mut conn) = self.connections.remove(&id) {
            conn.peer.disconnect(
                now,
                &mut SendTo {
                    socket,
                    addr: conn.addr,
                },
                &mut PeerEvents::connected(id, &mut self.callbacks),
            );
            log::info!("[server] disconnected {id} ({})", conn.addr);
        }
    }

    /// Drain the socket, then run liveness checks and dispatch messages for
    /// every peer.
    pub fn early_update(&mut self) {
        let now = self.now();
        let Some(socket) = self.socket.as_ref() else {
            return;
        };

        loop {
            let (n, addr) = match socket.recv_from(&mut self.buffer) {
                Ok(Some(received)) => received,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("[server] receive failed: {e}");
                    break;
                }
            };
            let datagram = &self.buffer[..n];
            let id = PeerId::from_addr(&addr);

            if let Some(conn) = self.connections.get_mut(&id) {
                conn.peer
                    .raw_input(datagram, now, &mut PeerEvents::connected(id, &mut self.callbacks));
                continue;
            }

            // First contact: only keep the peer if this datagram authenticates it.
            if !opens_handshake(datagram) {
                log::debug!("[server] ignoring {n} byte datagram from unknown {addr}");
                continue;
            }
            let mut peer = match Peer::new(&self.setting, generate_cookie(), now) {
                Ok(peer) => peer,
                Err(e) => {
                    log::error!("[server] failed to create peer for {addr}: {e}");
                    continue;
                }
            };
            let mut events = PeerEvents::pending(id, &mut self.callbacks);
            peer.raw_input(datagram, now, &mut events);
            peer.tick_incoming(now, &mut SendTo { socket, addr }, &mut events);

            if peer.is_authenticated() {
                log::info!("[server] {id} connected from {addr}");
                self.connections.insert(id, Connection { peer, addr });
            } else {
                log::debug!("[server] discarding unauthenticated datagram from {addr}");
            }
        }

        for (id, conn) in self.connections.iter_mut() {
            conn.peer.tick_incoming(
                now,
                &mut SendTo {
                    socket,
                    addr: conn.addr,
                },
                &mut PeerEvents::connected(*id, &mut self.callbacks),
            );
            if conn.peer.state() == PeerState::Disconnected {
                self.removals.push(*id);
            }
        }
        self.remove_disconnected();
    }

    /// Let every peer's ARQ engine emit whatever is due.
    pub fn after_update(&mut self) {
        let now = self.now();
        let Some(socket) = self.socket.as_ref() else {
            return;
        };

        for (id, conn) in self.connections.iter_mut() {
            conn.peer.tick_outgoing(
                now,
                &mut SendTo {
                    socket,
                    addr: conn.addr,
                },
                &mut PeerEvents::connected(*id, &mut self.callbacks),
            );
            if conn.peer.state() == PeerState::Disconnected {
                self.removals.push(*id);
            }
        }
        self.remove_disconnected();
    }

    pub fn tick(&mut self) {
        self.early_update();
        self.after_update();
    }

    fn remove_disconnected(&mut self) {
        for id in self.removals.drain(..) {
            if let Some(conn) = self.connections.remove(&id) {
                log::info!("[server] removed {id} ({})", conn.addr);
            }
        }
    }
}
