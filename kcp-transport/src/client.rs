//! Client: one [`Peer`] talking to one server over a connected socket.
//!
//! The client does nothing on its own. The embedding application calls
//! [`Client::early_update`] at the start of its frame (drain the socket,
//! dispatch messages, check liveness) and [`Client::after_update`] at the end
//! (let the ARQ engine emit whatever is due), or [`Client::tick`] for both.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Instant;

use crate::config::Setting;
use crate::error::{Error, ErrorCode};
use crate::peer::{Peer, PeerHandler, PeerStats};
use crate::socket::{Connected, Socket};
use crate::state::PeerState;
use crate::wire::{generate_cookie, Channel};

/// Event hooks, injected at construction. Unset hooks do nothing.
///
/// Hooks run inside the client's tick and cannot call back into the client;
/// queue follow-up work and perform it after the tick returns.
pub struct ClientCallbacks {
    pub on_connected: Box<dyn FnMut()>,
    pub on_data: Box<dyn FnMut(&[u8], Channel)>,
    pub on_disconnected: Box<dyn FnMut()>,
    pub on_error: Box<dyn FnMut(ErrorCode, &str)>,
}

impl Default for ClientCallbacks {
    fn default() -> Self {
        Self {
            on_connected: Box::new(|| {}),
            on_data: Box::new(|_: &[u8], _: Channel| {}),
            on_disconnected: Box::new(|| {}),
            on_error: Box::new(|_: ErrorCode, _: &str| {}),
        }
    }
}

impl PeerHandler for ClientCallbacks {
    fn on_authenticated(&mut self) {
        log::info!("[client] connected");
        (self.on_connected)();
    }

    fn on_data(&mut self, message: &[u8], channel: Channel) {
        (self.on_data)(message, channel);
    }

    fn on_disconnected(&mut self) {
        log::info!("[client] disconnected");
        (self.on_disconnected)();
    }

    fn on_error(&mut self, code: ErrorCode, reason: &str) {
        (self.on_error)(code, reason);
    }
}

pub struct Client {
    setting: Setting,
    callbacks: ClientCallbacks,
    socket: Option<Socket>,
    peer: Option<Peer>,
    remote: Option<SocketAddr>,
    epoch: Instant,
    buffer: Vec<u8>,
}

impl Client {
    pub fn new(setting: Setting, callbacks: ClientCallbacks) -> Result<Self, Error> {
        setting.validate()?;
        let buffer = vec![0u8; setting.mtu];
        Ok(Self {
            setting,
            callbacks,
            socket: None,
            peer: None,
            remote: None,
            epoch: Instant::now(),
            buffer,
        })
    }

    fn now(&self) -> u32 {
        // Truncation is fine: every comparison is wrap-around.
        self.epoch.elapsed().as_millis() as u32
    }

    pub fn setting(&self) -> &Setting {
        &self.setting
    }

    /// `true` once the handshake completed, until disconnect.
    pub fn connected(&self) -> bool {
        self.peer.as_ref().is_some_and(Peer::is_authenticated)
    }

    /// `true` from [`connect`](Self::connect) until disconnect.
    pub fn is_active(&self) -> bool {
        self.peer
            .as_ref()
            .is_some_and(|peer| peer.state() != PeerState::Disconnected)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().map(Socket::local_addr)
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn stats(&self) -> Option<PeerStats> {
        self.peer.as_ref().map(Peer::stats)
    }

    /// Resolve `host`, open a socket and queue the handshake.
    ///
    /// Completion is reported through `on_connected`; failure through
    /// `on_error` and `on_disconnected`.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), Error> {
        if self.is_active() {
            log::warn!("[client] already connected");
            return Ok(());
        }

        let Some(remote) = resolve(host, port) else {
            let err = Error::DnsResolve {
                host: host.to_string(),
            };
            log::warn!("[client] {err}");
            self.callbacks.on_error(err.code(), &err.to_string());
            self.callbacks.on_disconnected();
            return Err(err);
        };

        let socket = match Socket::connect(remote, &self.setting) {
            Ok(socket) => socket,
            Err(e) => {
                log::warn!("[client] failed to open socket to {remote}: {e}");
                self.callbacks.on_error(ErrorCode::ConnectionClosed, &e.to_string());
                self.callbacks.on_disconnected();
                return Err(e.into());
            }
        };

        let mut peer = Peer::new(&self.setting, generate_cookie(), self.now())?;
        peer.send_handshake()?;

        log::info!("[client] connecting to {remote} from {}", socket.local_addr());
        self.socket = Some(socket);
        self.peer = Some(peer);
        self.remote = Some(remote);
        Ok(())
    }

    /// Send `data` on `channel`. Requires a completed handshake.
    pub fn send(&mut self, data: &[u8], channel: Channel) -> Result<(), Error> {
        let now = self.now();
        let (Some(peer), Some(socket)) = (self.peer.as_mut(), self.socket.as_ref()) else {
            log::warn!("[client] can't send while disconnected");
            return Err(Error::NotConnected);
        };
        peer.send(data, channel, now, &mut Connected(socket), &mut self.callbacks)
    }

    /// Close the connection. Idempotent.
    pub fn disconnect(&mut self) {
        let now = self.now();
        if let (Some(peer), Some(socket)) = (self.peer.as_mut(), self.socket.as_ref()) {
            peer.disconnect(now, &mut Connected(socket), &mut self.callbacks);
        }
        self.release();
    }

    /// Drain the socket, then run liveness checks and dispatch messages.
    pub fn early_update(&mut self) {
        let now = self.now();
        let (Some(peer), Some(socket)) = (self.peer.as_mut(), self.socket.as_ref()) else {
            return;
        };

        loop {
            match socket.recv(&mut self.buffer) {
                Ok(Some(n)) => peer.raw_input(&self.buffer[..n], now, &mut self.callbacks),
                Ok(None) => break,
                Err(e) => {
                    // ECONNREFUSED lands here when nothing listens on the remote port.
                    let reason = format!("receive failed: {e}");
                    log::warn!("[client] {reason}");
                    self.callbacks.on_error(ErrorCode::ConnectionClosed, &reason);
                    peer.disconnect(now, &mut Connected(socket), &mut self.callbacks);
                    break;
                }
            }
        }

        peer.tick_incoming(now, &mut Connected(socket), &mut self.callbacks);
        if peer.state() == PeerState::Disconnected {
            self.release();
        }
    }

    /// Let the ARQ engine emit whatever is due.
    pub fn after_update(&mut self) {
        let now = self.now();
        let (Some(peer), Some(socket)) = (self.peer.as_mut(), self.socket.as_ref()) else {
            return;
        };
        peer.tick_outgoing(now, &mut Connected(socket), &mut self.callbacks);
        if peer.state() == PeerState::Disconnected {
            self.release();
        }
    }

    pub fn tick(&mut self) {
        self.early_update();
        self.after_update();
    }

    fn release(&mut self) {
        self.peer = None;
        self.socket = None;
        self.remote = None;
    }
}

fn resolve(host: &str, port: u16) -> Option<SocketAddr> {
    match (host, port).to_socket_addrs() {
        Ok(mut addrs) => addrs.next(),
        Err(e) => {
            log::debug!("[client] resolving {host}: {e}");
            None
        }
    }
}
