//! One logical connection: an ARQ engine plus the connection protocol.
//!
//! A [`Peer`] owns a [`Kcp`] instance and everything needed to run the
//! connection on top of it:
//!
//! - the cookie handshake that moves the peer from `Connected` to `Authority`,
//! - frame dispatch on the reliable channel (handshake, ping, message,
//!   disconnect),
//! - the unreliable channel, which bypasses the engine entirely,
//! - liveness checks: receive timeout, dead link and queue overflow,
//! - graceful disconnect.
//!
//! The peer performs no I/O itself. Outbound datagrams go through an
//! [`Output`], events go to a [`PeerHandler`], and time is passed in as
//! milliseconds since an arbitrary epoch. The same type backs both a client
//! connection and each connection on a server.
//!
//! # Datagram envelope
//!
//! ```text
//! ┌─────────┬──────────────┬───────────────────────────────────────┐
//! │ channel │ local cookie │ payload                               │
//! │   u8    │   u32 (LE)   │ reliable: ARQ segments                │
//! │         │              │ unreliable: raw application message   │
//! └─────────┴──────────────┴───────────────────────────────────────┘
//! ```
//!
//! Every reliable message handed to the engine starts with a
//! [`ReliableHeader`] byte.
//!
//! # Handshake
//!
//! Each side sends a `Handshake` frame whose payload is its own 4-byte
//! cookie. On receipt the peer stores the remote cookie and enters
//! `Authority`; from then on any datagram whose envelope cookie differs is
//! dropped. A server-side peer answers with its own handshake the first time
//! it receives one.

use std::io;

use crate::config::Setting;
use crate::error::{Error, ErrorCode};
use crate::kcp::Kcp;
use crate::segment::{cmd, SegmentHeader, OVERHEAD};
use crate::state::PeerState;
use crate::wire::{
    decode_u32, encode_u32, encode_u8, unreliable_size, Channel, ReliableHeader,
    COOKIE_HEADER_SIZE, METADATA_SIZE, RELIABLE_HEADER_SIZE,
};

/// A ping is sent after this long without one (ms).
pub const PING_INTERVAL: u32 = 1_000;

/// Segments across all engine queues before the peer gives up.
pub const QUEUE_DISCONNECT_THRESHOLD: usize = 10_000;

/// Conversation id shared by both ends; sessions are told apart by cookie.
const CONV: u32 = 0;

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Where a peer's outbound datagrams go.
pub trait Output {
    /// Transmit one complete datagram.
    ///
    /// `WouldBlock` is treated as a dropped datagram; any other error
    /// disconnects the peer.
    fn send_datagram(&mut self, datagram: &[u8]) -> io::Result<()>;
}

/// Collects datagrams in memory.
impl Output for Vec<Vec<u8>> {
    fn send_datagram(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.push(datagram.to_vec());
        Ok(())
    }
}

/// Receives a peer's events.
pub trait PeerHandler {
    /// The handshake completed.
    fn on_authenticated(&mut self);
    /// An application message arrived. The slice is only valid for the call.
    fn on_data(&mut self, message: &[u8], channel: Channel);
    /// The peer disconnected. Called exactly once.
    fn on_disconnected(&mut self);
    fn on_error(&mut self, code: ErrorCode, reason: &str);
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Snapshot of a peer's engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerStats {
    pub send_queue: usize,
    pub send_buffer: usize,
    pub receive_queue: usize,
    pub receive_buffer: usize,
    /// Smoothed round-trip time (ms).
    pub srtt: i32,
    /// Retransmission timeout (ms).
    pub rto: u32,
    /// Timeout retransmissions so far.
    pub retransmissions: u32,
    /// Theoretical ceiling in bytes/s: send window × mtu × 1000 / interval.
    pub max_send_rate: u64,
    /// Theoretical ceiling in bytes/s: receive window × mtu × 1000 / interval.
    pub max_receive_rate: u64,
}

// ---------------------------------------------------------------------------
// Peer
// ---------------------------------------------------------------------------

pub struct Peer {
    kcp: Kcp,
    state: PeerState,
    cookie: u32,
    remote_cookie: u32,
    handshake_sent: bool,

    timeout: u32,
    last_receive_time: u32,
    last_ping_time: u32,

    reliable_max: usize,
    unreliable_max: usize,

    /// Reassembled reliable messages, header byte included.
    message_buffer: Vec<u8>,
    /// Header byte plus payload, handed to the engine.
    send_buffer: Vec<u8>,
    /// Envelope plus payload, handed to the output.
    raw_send_buffer: Vec<u8>,
}

impl Peer {
    /// Create a peer in the `Connected` state with local cookie `cookie`.
    ///
    /// `setting` must already be validated.
    pub fn new(setting: &Setting, cookie: u32, now: u32) -> Result<Self, Error> {
        let mut kcp = Kcp::new(CONV);
        kcp.set_nodelay(
            setting.no_delay,
            setting.interval_ms(),
            setting.fast_resend,
            !setting.congestion_window,
        );
        kcp.set_window_size(setting.send_window_size, setting.receive_window_size);
        // Leave room for the envelope so a full segment still fits the MTU.
        kcp.set_mtu(setting.mtu - METADATA_SIZE)?;
        kcp.set_dead_link(setting.max_retransmits);

        let reliable_max = setting.reliable_size();
        let unreliable_max = unreliable_size(setting.mtu);

        Ok(Self {
            kcp,
            state: PeerState::Connected,
            cookie,
            remote_cookie: 0,
            handshake_sent: false,
            timeout: setting.timeout_ms(),
            last_receive_time: now,
            last_ping_time: now,
            reliable_max,
            unreliable_max,
            message_buffer: vec![0u8; RELIABLE_HEADER_SIZE + reliable_max],
            send_buffer: vec![0u8; RELIABLE_HEADER_SIZE + reliable_max],
            raw_send_buffer: vec![0u8; setting.mtu],
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }

    pub fn cookie(&self) -> u32 {
        self.cookie
    }

    /// The remote's cookie; meaningful once authenticated.
    pub fn remote_cookie(&self) -> u32 {
        self.remote_cookie
    }

    pub fn last_receive_time(&self) -> u32 {
        self.last_receive_time
    }

    /// Largest message accepted by [`send`](Self::send) on the reliable channel.
    pub fn reliable_max(&self) -> usize {
        self.reliable_max
    }

    /// Largest message accepted by [`send`](Self::send) on the unreliable channel.
    pub fn unreliable_max(&self) -> usize {
        self.unreliable_max
    }

    pub fn stats(&self) -> PeerStats {
        let mtu = self.kcp.mtu() as u64;
        let interval = u64::from(self.kcp.interval().max(1));
        PeerStats {
            send_queue: self.kcp.send_queue_len(),
            send_buffer: self.kcp.send_buffer_len(),
            receive_queue: self.kcp.receive_queue_len(),
            receive_buffer: self.kcp.receive_buffer_len(),
            srtt: self.kcp.srtt(),
            rto: self.kcp.rto(),
            retransmissions: self.kcp.retransmissions(),
            max_send_rate: u64::from(self.kcp.send_window()) * mtu * 1000 / interval,
            max_receive_rate: u64::from(self.kcp.receive_window()) * mtu * 1000 / interval,
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Queue the local handshake on the reliable channel.
    pub fn send_handshake(&mut self) -> Result<(), Error> {
        log::debug!("[peer] → handshake cookie={:#010x}", self.cookie);
        let mut cookie = [0u8; COOKIE_HEADER_SIZE];
        encode_u32(&mut cookie, 0, self.cookie);
        self.send_reliable(ReliableHeader::Handshake, &cookie)?;
        self.handshake_sent = true;
        Ok(())
    }

    /// Accept one datagram from the socket.
    ///
    /// Reliable data is only queued in the engine here; it is dispatched by
    /// [`tick_incoming`](Self::tick_incoming). Unreliable data is delivered
    /// immediately.
    pub fn raw_input(&mut self, datagram: &[u8], now: u32, handler: &mut dyn PeerHandler) {
        if self.state == PeerState::Disconnected {
            return;
        }
        if datagram.len() <= METADATA_SIZE {
            log::debug!("[peer] dropping {} byte datagram", datagram.len());
            return;
        }

        let channel = datagram[0];
        let (cookie, _) = decode_u32(datagram, 1);
        if self.state == PeerState::Authority && cookie != self.remote_cookie {
            log::warn!(
                "[peer] dropping datagram with cookie {:#010x}, expected {:#010x}",
                cookie,
                self.remote_cookie
            );
            return;
        }

        let payload = &datagram[METADATA_SIZE..];
        match Channel::try_from(channel) {
            Ok(Channel::Reliable) => {
                if let Err(e) = self.kcp.input(payload) {
                    log::warn!("[peer] arq input of {} bytes failed: {e}", payload.len());
                    return;
                }
            }
            Ok(Channel::Unreliable) => {
                if self.state != PeerState::Authority {
                    log::warn!("[peer] dropping unreliable message before authentication");
                    return;
                }
                handler.on_data(payload, Channel::Unreliable);
            }
            Err(tag) => {
                log::warn!("[peer] dropping datagram with unknown channel {tag}");
                return;
            }
        }
        self.last_receive_time = now;
    }

    /// Run liveness checks and dispatch every complete reliable message.
    pub fn tick_incoming(&mut self, now: u32, output: &mut dyn Output, handler: &mut dyn PeerHandler) {
        match self.state {
            PeerState::Connected => self.tick_incoming_connected(now, output, handler),
            PeerState::Authority => self.tick_incoming_authenticated(now, output, handler),
            PeerState::Disconnected => {}
        }
    }

    fn tick_incoming_connected(
        &mut self,
        now: u32,
        output: &mut dyn Output,
        handler: &mut dyn PeerHandler,
    ) {
        if !self.check_liveness(now, output, handler) {
            return;
        }

        let Some((header, len)) = self.receive_next_reliable(now, output, handler) else {
            return;
        };
        match header {
            ReliableHeader::Handshake => self.on_handshake(len, now, output, handler),
            ReliableHeader::Ping => {}
            ReliableHeader::Message => self.fail(
                ErrorCode::InvalidReceive,
                "received message before authentication",
                now,
                output,
                handler,
            ),
            ReliableHeader::Disconnect => {
                log::info!("[peer] remote disconnected before authentication");
                self.disconnect(now, output, handler);
            }
        }
    }

    fn tick_incoming_authenticated(
        &mut self,
        now: u32,
        output: &mut dyn Output,
        handler: &mut dyn PeerHandler,
    ) {
        if !self.check_liveness(now, output, handler) {
            return;
        }

        while self.state == PeerState::Authority {
            let Some((header, len)) = self.receive_next_reliable(now, output, handler) else {
                break;
            };
            match header {
                ReliableHeader::Handshake => self.fail(
                    ErrorCode::InvalidReceive,
                    "received handshake while authenticated",
                    now,
                    output,
                    handler,
                ),
                ReliableHeader::Ping => {}
                ReliableHeader::Message => {
                    if len > RELIABLE_HEADER_SIZE {
                        handler.on_data(
                            &self.message_buffer[RELIABLE_HEADER_SIZE..len],
                            Channel::Reliable,
                        );
                    } else {
                        self.fail(
                            ErrorCode::InvalidReceive,
                            "received empty message",
                            now,
                            output,
                            handler,
                        );
                    }
                }
                ReliableHeader::Disconnect => {
                    log::info!("[peer] remote disconnected");
                    self.disconnect(now, output, handler);
                }
            }
        }
    }

    fn on_handshake(
        &mut self,
        len: usize,
        now: u32,
        output: &mut dyn Output,
        handler: &mut dyn PeerHandler,
    ) {
        if len != RELIABLE_HEADER_SIZE + COOKIE_HEADER_SIZE {
            self.fail(
                ErrorCode::InvalidReceive,
                &format!("handshake payload of {} bytes", len - RELIABLE_HEADER_SIZE),
                now,
                output,
                handler,
            );
            return;
        }

        let (remote_cookie, _) = decode_u32(&self.message_buffer, RELIABLE_HEADER_SIZE);
        if !self.handshake_sent {
            if let Err(e) = self.send_handshake() {
                self.fail(ErrorCode::InvalidSend, &e.to_string(), now, output, handler);
                return;
            }
        }
        self.remote_cookie = remote_cookie;
        self.transition(PeerState::Authority);
        log::debug!("[peer] ← handshake cookie={remote_cookie:#010x}, authenticated");
        handler.on_authenticated();
    }

    /// Pull the next complete message from the engine into `message_buffer`.
    fn receive_next_reliable(
        &mut self,
        now: u32,
        output: &mut dyn Output,
        handler: &mut dyn PeerHandler,
    ) -> Option<(ReliableHeader, usize)> {
        let size = self.kcp.peek_size()?;
        if size == 0 || size > self.message_buffer.len() {
            self.fail(
                ErrorCode::InvalidReceive,
                &format!(
                    "reliable message of {size} bytes outside 1..={}",
                    self.message_buffer.len()
                ),
                now,
                output,
                handler,
            );
            return None;
        }

        let len = match self.kcp.receive(&mut self.message_buffer) {
            Ok(Some(len)) => len,
            Ok(None) => return None,
            Err(e) => {
                self.fail(ErrorCode::InvalidReceive, &e.to_string(), now, output, handler);
                return None;
            }
        };

        match ReliableHeader::try_from(self.message_buffer[0]) {
            Ok(header) => {
                self.last_receive_time = now;
                Some((header, len))
            }
            Err(byte) => {
                self.fail(
                    ErrorCode::InvalidReceive,
                    &format!("invalid reliable header {byte}"),
                    now,
                    output,
                    handler,
                );
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Liveness
    // -----------------------------------------------------------------------

    /// Returns `false` if the peer was disconnected.
    fn check_liveness(&mut self, now: u32, output: &mut dyn Output, handler: &mut dyn PeerHandler) -> bool {
        let silent = now.wrapping_sub(self.last_receive_time);
        if silent >= self.timeout {
            self.fail(
                ErrorCode::Timeout,
                &format!("nothing received for {silent}ms (timeout {}ms)", self.timeout),
                now,
                output,
                handler,
            );
            return false;
        }

        if self.kcp.is_dead() {
            self.fail(
                ErrorCode::Timeout,
                "dead link: a message was retransmitted too often",
                now,
                output,
                handler,
            );
            return false;
        }

        if now.wrapping_sub(self.last_ping_time) >= PING_INTERVAL {
            if let Err(e) = self.send_reliable(ReliableHeader::Ping, &[]) {
                log::warn!("[peer] failed to queue ping: {e}");
            }
            self.last_ping_time = now;
        }

        let total = self.kcp.receive_queue_len()
            + self.kcp.send_queue_len()
            + self.kcp.receive_buffer_len()
            + self.kcp.send_buffer_len();
        if total >= QUEUE_DISCONNECT_THRESHOLD {
            // Nothing queued will ever be sent; don't flush it on the way out.
            self.kcp.clear_send_queue();
            self.fail(
                ErrorCode::Congestion,
                &format!(
                    "{total} segments queued (threshold {QUEUE_DISCONNECT_THRESHOLD})"
                ),
                now,
                output,
                handler,
            );
            return false;
        }
        true
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Send an application message.
    ///
    /// Rejected messages are reported through `on_error` as well as the
    /// returned error; they never disconnect the peer unless the socket
    /// itself fails.
    pub fn send(
        &mut self,
        data: &[u8],
        channel: Channel,
        now: u32,
        output: &mut dyn Output,
        handler: &mut dyn PeerHandler,
    ) -> Result<(), Error> {
        if self.state != PeerState::Authority {
            log::warn!("[peer] can't send while {}", self.state);
            return Err(Error::NotConnected);
        }

        let result = if data.is_empty() {
            Err(Error::EmptyMessage)
        } else {
            match channel {
                Channel::Reliable => self.send_reliable(ReliableHeader::Message, data),
                Channel::Unreliable => self.send_unreliable(data, output),
            }
        };

        if let Err(e) = &result {
            match e {
                Error::Io(_) => self.fail(
                    ErrorCode::ConnectionClosed,
                    &e.to_string(),
                    now,
                    output,
                    handler,
                ),
                _ => {
                    log::warn!("[peer] send on {channel} channel rejected: {e}");
                    handler.on_error(e.code(), &e.to_string());
                }
            }
        }
        result
    }

    fn send_reliable(&mut self, header: ReliableHeader, payload: &[u8]) -> Result<(), Error> {
        if payload.len() > self.reliable_max {
            return Err(Error::MessageTooLarge {
                size: payload.len(),
                max: self.reliable_max,
            });
        }
        let len = RELIABLE_HEADER_SIZE + payload.len();
        self.send_buffer[0] = header as u8;
        self.send_buffer[RELIABLE_HEADER_SIZE..len].copy_from_slice(payload);
        self.kcp.send(&self.send_buffer[..len])?;
        Ok(())
    }

    fn send_unreliable(&mut self, data: &[u8], output: &mut dyn Output) -> Result<(), Error> {
        if data.len() > self.unreliable_max {
            return Err(Error::MessageTooLarge {
                size: data.len(),
                max: self.unreliable_max,
            });
        }
        match send_envelope(
            &mut self.raw_send_buffer,
            Channel::Unreliable,
            self.cookie,
            data,
            output,
        ) {
            Err(e) if e.kind() != io::ErrorKind::WouldBlock => Err(Error::Io(e)),
            _ => Ok(()),
        }
    }

    /// Drive the engine's retransmission timer and emit whatever is due.
    pub fn tick_outgoing(&mut self, now: u32, output: &mut dyn Output, handler: &mut dyn PeerHandler) {
        if self.state == PeerState::Disconnected {
            return;
        }
        if let Err(e) = self.drive_kcp(now, output, false) {
            self.fail(ErrorCode::ConnectionClosed, &e.to_string(), now, output, handler);
        }
    }

    /// Emit everything the engine holds without waiting for the interval.
    pub fn flush(&mut self, now: u32, output: &mut dyn Output) -> io::Result<()> {
        self.drive_kcp(now, output, true)
    }

    fn drive_kcp(&mut self, now: u32, output: &mut dyn Output, force: bool) -> io::Result<()> {
        let cookie = self.cookie;
        let buffer = &mut self.raw_send_buffer;
        let mut result = Ok(());
        let mut emit = |segment: &[u8]| {
            if let Err(e) = send_envelope(buffer, Channel::Reliable, cookie, segment, output) {
                if e.kind() != io::ErrorKind::WouldBlock && result.is_ok() {
                    result = Err(e);
                }
            }
        };
        if force {
            self.kcp.flush(now, &mut emit);
        } else {
            self.kcp.update(now, &mut emit);
        }
        result
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    fn transition(&mut self, next: PeerState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {next}",
            self.state
        );
        self.state = next;
    }

    fn fail(
        &mut self,
        code: ErrorCode,
        reason: &str,
        now: u32,
        output: &mut dyn Output,
        handler: &mut dyn PeerHandler,
    ) {
        log::warn!("[peer] {code}: {reason}");
        handler.on_error(code, reason);
        self.disconnect(now, output, handler);
    }

    /// Close the connection. Idempotent.
    ///
    /// A `Disconnect` frame is flushed on a best-effort basis before the state
    /// changes, so the remote usually learns about it without timing out.
    pub fn disconnect(&mut self, now: u32, output: &mut dyn Output, handler: &mut dyn PeerHandler) {
        if self.state == PeerState::Disconnected {
            return;
        }

        if let Err(e) = self.send_reliable(ReliableHeader::Disconnect, &[]) {
            log::debug!("[peer] could not queue disconnect frame: {e}");
        }
        if let Err(e) = self.flush(now, output) {
            log::debug!("[peer] could not flush disconnect frame: {e}");
        }

        self.transition(PeerState::Disconnected);
        log::info!("[peer] disconnected");
        handler.on_disconnected();
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("state", &self.state)
            .field("cookie", &self.cookie)
            .field("remote_cookie", &self.remote_cookie)
            .field("kcp", &self.kcp)
            .finish()
    }
}

/// Whether `datagram` could open a connection: a reliable envelope holding a
/// PUSH segment whose message starts with a handshake frame.
///
/// Only inspects headers, so a server can reject strays before building a
/// [`Peer`] for them.
pub fn opens_handshake(datagram: &[u8]) -> bool {
    if datagram.len() <= METADATA_SIZE || datagram[0] != Channel::Reliable as u8 {
        return false;
    }
    let payload = &datagram[METADATA_SIZE..];
    let mut offset = 0;
    while let Some(h) = SegmentHeader::decode(payload, offset) {
        let start = offset + OVERHEAD;
        if h.cmd == cmd::PUSH
            && h.len > 0
            && payload.get(start) == Some(&(ReliableHeader::Handshake as u8))
        {
            return true;
        }
        offset = start.saturating_add(h.len as usize);
    }
    false
}

/// Prefix `payload` with the channel tag and `cookie` and hand it to `output`.
fn send_envelope(
    buffer: &mut [u8],
    channel: Channel,
    cookie: u32,
    payload: &[u8],
    output: &mut dyn Output,
) -> io::Result<()> {
    let mut off = encode_u8(buffer, 0, channel as u8);
    off += encode_u32(buffer, off, cookie);
    buffer[off..off + payload.len()].copy_from_slice(payload);
    off += payload.len();
    output.send_datagram(&buffer[..off])
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Segment;
    use crate::simulator::{Simulator, SimulatorConfig};

    #[derive(Default)]
    struct Recorder {
        authenticated: usize,
        data: Vec<(Vec<u8>, Channel)>,
        disconnected: usize,
        errors: Vec<ErrorCode>,
    }

    impl PeerHandler for Recorder {
        fn on_authenticated(&mut self) {
            self.authenticated += 1;
        }
        fn on_data(&mut self, message: &[u8], channel: Channel) {
            self.data.push((message.to_vec(), channel));
        }
        fn on_disconnected(&mut self) {
            self.disconnected += 1;
        }
        fn on_error(&mut self, code: ErrorCode, _reason: &str) {
            self.errors.push(code);
        }
    }

    /// A client-side and a server-side peer joined by two simulated links.
    struct Pair {
        setting: Setting,
        client: Peer,
        server: Peer,
        to_server: Simulator,
        to_client: Simulator,
        client_events: Recorder,
        server_events: Recorder,
        now: u32,
    }

    impl Pair {
        fn new(setting: Setting, link: SimulatorConfig) -> Self {
            let mut client = Peer::new(&setting, 0x1111_1111, 0).unwrap();
            client.send_handshake().unwrap();
            let server = Peer::new(&setting, 0x2222_2222, 0).unwrap();
            Self {
                setting,
                client,
                server,
                to_server: Simulator::new(link.clone()),
                to_client: Simulator::new(SimulatorConfig {
                    seed: link.seed.wrapping_add(1),
                    ..link
                }),
                client_events: Recorder::default(),
                server_events: Recorder::default(),
                now: 0,
            }
        }

        fn clean() -> Self {
            Self::new(Setting::default(), SimulatorConfig::default())
        }

        fn step(&mut self) {
            self.now += 10;
            self.to_server.set_time(self.now);
            self.to_client.set_time(self.now);
            for d in self.to_server.deliver() {
                self.server.raw_input(&d, self.now, &mut self.server_events);
            }
            for d in self.to_client.deliver() {
                self.client.raw_input(&d, self.now, &mut self.client_events);
            }
            self.client
                .tick_incoming(self.now, &mut self.to_server, &mut self.client_events);
            self.server
                .tick_incoming(self.now, &mut self.to_client, &mut self.server_events);
            self.client
                .tick_outgoing(self.now, &mut self.to_server, &mut self.client_events);
            self.server
                .tick_outgoing(self.now, &mut self.to_client, &mut self.server_events);
        }

        fn steps(&mut self, n: usize) {
            for _ in 0..n {
                self.step();
            }
        }

        fn connected() -> Self {
            let mut pair = Self::clean();
            pair.steps(5);
            assert!(pair.client.is_authenticated());
            assert!(pair.server.is_authenticated());
            pair
        }

        fn client_send(&mut self, data: &[u8], channel: Channel) -> Result<(), Error> {
            self.client.send(
                data,
                channel,
                self.now,
                &mut self.to_server,
                &mut self.client_events,
            )
        }
    }

    /// Reliable datagrams as a raw engine would produce them, for frames a
    /// well-behaved peer never sends.
    fn forge_reliable(setting: &Setting, cookie: u32, messages: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut kcp = Kcp::new(CONV);
        kcp.set_nodelay(true, setting.interval_ms(), 0, true);
        kcp.set_mtu(setting.mtu - METADATA_SIZE).unwrap();
        for m in messages {
            kcp.send(m).unwrap();
        }
        let mut datagrams: Vec<Vec<u8>> = Vec::new();
        let mut buffer = vec![0u8; setting.mtu];
        kcp.flush(0, &mut |segment: &[u8]| {
            send_envelope(&mut buffer, Channel::Reliable, cookie, segment, &mut datagrams).unwrap();
        });
        datagrams
    }

    fn handshake_frame(cookie: u32) -> Vec<u8> {
        let mut frame = vec![ReliableHeader::Handshake as u8];
        frame.extend_from_slice(&cookie.to_le_bytes());
        frame
    }

    fn unreliable_datagram(cookie: u32, payload: &[u8]) -> Vec<u8> {
        let mut d = vec![Channel::Unreliable as u8];
        d.extend_from_slice(&cookie.to_le_bytes());
        d.extend_from_slice(payload);
        d
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    #[test]
    fn handshake_authenticates_both_sides() {
        let pair = Pair::connected();
        assert_eq!(pair.client.remote_cookie(), pair.server.cookie());
        assert_eq!(pair.server.remote_cookie(), pair.client.cookie());
        assert_eq!(pair.client_events.authenticated, 1);
        assert_eq!(pair.server_events.authenticated, 1);
    }

    #[test]
    fn handshake_with_wrong_length_disconnects() {
        let setting = Setting::default();
        let mut server = Peer::new(&setting, 7, 0).unwrap();
        let mut events = Recorder::default();
        let mut out: Vec<Vec<u8>> = Vec::new();

        for d in forge_reliable(&setting, 9, &[&[ReliableHeader::Handshake as u8, 1, 2, 3]]) {
            server.raw_input(&d, 10, &mut events);
        }
        server.tick_incoming(10, &mut out, &mut events);

        assert_eq!(server.state(), PeerState::Disconnected);
        assert_eq!(events.errors, vec![ErrorCode::InvalidReceive]);
        assert_eq!(events.authenticated, 0);
    }

    #[test]
    fn message_before_handshake_disconnects() {
        let setting = Setting::default();
        let mut server = Peer::new(&setting, 7, 0).unwrap();
        let mut events = Recorder::default();
        let mut out: Vec<Vec<u8>> = Vec::new();

        for d in forge_reliable(&setting, 9, &[&[ReliableHeader::Message as u8, b'x']]) {
            server.raw_input(&d, 10, &mut events);
        }
        server.tick_incoming(10, &mut out, &mut events);

        assert_eq!(server.state(), PeerState::Disconnected);
        assert!(events.data.is_empty());
    }

    #[test]
    fn second_handshake_disconnects() {
        let setting = Setting::default();
        let mut server = Peer::new(&setting, 7, 0).unwrap();
        let mut events = Recorder::default();
        let mut out: Vec<Vec<u8>> = Vec::new();

        let hs = handshake_frame(9);
        for d in forge_reliable(&setting, 9, &[&hs, &hs]) {
            server.raw_input(&d, 10, &mut events);
        }
        server.tick_incoming(10, &mut out, &mut events);
        assert_eq!(events.authenticated, 1);
        server.tick_incoming(20, &mut out, &mut events);

        assert_eq!(server.state(), PeerState::Disconnected);
        assert_eq!(events.errors, vec![ErrorCode::InvalidReceive]);
    }

    #[test]
    fn unknown_reliable_header_disconnects() {
        let setting = Setting::default();
        let mut server = Peer::new(&setting, 7, 0).unwrap();
        let mut events = Recorder::default();
        let mut out: Vec<Vec<u8>> = Vec::new();

        for d in forge_reliable(&setting, 9, &[&handshake_frame(9), &[99, 1]]) {
            server.raw_input(&d, 10, &mut events);
        }
        server.tick_incoming(10, &mut out, &mut events);
        server.tick_incoming(20, &mut out, &mut events);
        assert_eq!(server.state(), PeerState::Disconnected);
    }

    #[test]
    fn first_datagram_of_a_client_opens_handshake() {
        let setting = Setting::default();
        let mut client = Peer::new(&setting, 0x1111_1111, 0).unwrap();
        client.send_handshake().unwrap();
        let mut out: Vec<Vec<u8>> = Vec::new();
        client.flush(0, &mut out).unwrap();

        assert_eq!(out.len(), 1);
        assert!(opens_handshake(&out[0]));
    }

    #[test]
    fn strays_do_not_open_handshake() {
        let setting = Setting::default();
        let ping = forge_reliable(&setting, 9, &[&[ReliableHeader::Ping as u8]]);
        assert!(!opens_handshake(&ping[0]));
        assert!(!opens_handshake(&unreliable_datagram(9, &handshake_frame(9))));
        assert!(!opens_handshake(&[Channel::Reliable as u8, 9, 0, 0, 0, 1, 1]));
        assert!(!opens_handshake(&[]));
    }

    #[test]
    fn forged_ack_before_authentication_is_harmless() {
        let setting = Setting::default();
        let mut peer = Peer::new(&setting, 7, 0).unwrap();
        let mut events = Recorder::default();
        let mut out: Vec<Vec<u8>> = Vec::new();

        // Timestamp half the u32 space away from the peer's clock.
        let ack = Segment {
            conv: CONV,
            cmd: cmd::ACK,
            ts: 0x8000_0001,
            ..Segment::default()
        };
        let mut datagram = vec![Channel::Reliable as u8, 9, 0, 0, 0];
        let mut header = [0u8; OVERHEAD];
        ack.encode_header(&mut header, 0);
        datagram.extend_from_slice(&header);

        peer.raw_input(&datagram, 10, &mut events);
        peer.tick_incoming(10, &mut out, &mut events);
        peer.tick_outgoing(10, &mut out, &mut events);

        assert_eq!(peer.state(), PeerState::Connected);
        assert_eq!(peer.stats().rto, crate::timer::RTO_DEF);
        assert_eq!(peer.stats().srtt, 0);
        assert!(events.errors.is_empty());
    }

    // -----------------------------------------------------------------------
    // Data
    // -----------------------------------------------------------------------

    #[test]
    fn large_reliable_message_delivered_once() {
        let mut pair = Pair::connected();
        let msg: Vec<u8> = (0..2000).map(|i| (i % 256) as u8).collect();
        pair.client_send(&msg, Channel::Reliable).unwrap();
        pair.steps(5);
        assert_eq!(pair.server_events.data, vec![(msg, Channel::Reliable)]);
    }

    #[test]
    fn largest_reliable_message_fits() {
        let mut pair = Pair::connected();
        let msg = vec![0xAB; pair.client.reliable_max()];
        pair.client_send(&msg, Channel::Reliable).unwrap();
        pair.steps(30);
        assert_eq!(pair.server_events.data.len(), 1);
        assert_eq!(pair.server_events.data[0].0.len(), msg.len());
    }

    #[test]
    fn unreliable_message_delivered() {
        let mut pair = Pair::connected();
        pair.client_send(b"fire and forget", Channel::Unreliable).unwrap();
        pair.step();
        assert_eq!(
            pair.server_events.data,
            vec![(b"fire and forget".to_vec(), Channel::Unreliable)]
        );
    }

    #[test]
    fn unreliable_before_authentication_dropped() {
        let setting = Setting::default();
        let mut server = Peer::new(&setting, 7, 0).unwrap();
        let mut events = Recorder::default();
        server.raw_input(&unreliable_datagram(9, b"early"), 10, &mut events);
        assert!(events.data.is_empty());
        assert_eq!(server.state(), PeerState::Connected);
    }

    #[test]
    fn send_before_authentication_rejected() {
        let setting = Setting::default();
        let mut peer = Peer::new(&setting, 7, 0).unwrap();
        let mut events = Recorder::default();
        let mut out: Vec<Vec<u8>> = Vec::new();
        assert!(matches!(
            peer.send(b"x", Channel::Reliable, 0, &mut out, &mut events),
            Err(Error::NotConnected)
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn oversized_sends_rejected_without_disconnect() {
        let mut pair = Pair::connected();
        let reliable = vec![0u8; pair.client.reliable_max() + 1];
        let unreliable = vec![0u8; pair.client.unreliable_max() + 1];
        let queued = pair.client.stats().send_queue;

        assert!(matches!(
            pair.client_send(&reliable, Channel::Reliable),
            Err(Error::MessageTooLarge { .. })
        ));
        assert!(matches!(
            pair.client_send(&unreliable, Channel::Unreliable),
            Err(Error::MessageTooLarge { .. })
        ));
        assert_eq!(pair.client.stats().send_queue, queued);
        assert_eq!(
            pair.client_events.errors,
            vec![ErrorCode::InvalidSend, ErrorCode::InvalidSend]
        );
        assert!(pair.client.is_authenticated());
    }

    #[test]
    fn empty_send_rejected() {
        let mut pair = Pair::connected();
        assert!(matches!(
            pair.client_send(&[], Channel::Reliable),
            Err(Error::EmptyMessage)
        ));
        assert!(pair.client.is_authenticated());
    }

    #[test]
    fn lossy_link_delivers_each_message_once_in_order() {
        let link = SimulatorConfig {
            loss_rate: 0.1,
            duplicate_rate: 0.05,
            reorder_rate: 0.1,
            reorder_delay: 30,
            seed: 42,
            ..SimulatorConfig::default()
        };
        let mut pair = Pair::new(Setting::default(), link);
        pair.steps(200);
        assert!(pair.client.is_authenticated() && pair.server.is_authenticated());

        let sent: Vec<Vec<u8>> = (0..30u32)
            .map(|i| {
                let len = 100 + (i as usize * 97) % 2500;
                (0..len).map(|b| (b as u32 ^ i) as u8).collect()
            })
            .collect();
        for m in &sent {
            pair.client_send(m, Channel::Reliable).unwrap();
        }
        pair.steps(1000);

        let received: Vec<Vec<u8>> = pair
            .server_events
            .data
            .iter()
            .map(|(m, _)| m.clone())
            .collect();
        assert_eq!(received, sent);
    }

    // -----------------------------------------------------------------------
    // Cookie defense
    // -----------------------------------------------------------------------

    #[test]
    fn wrong_cookie_dropped_after_authentication() {
        let mut pair = Pair::connected();
        let before = pair.server.last_receive_time();
        let wrong = pair.client.cookie() ^ 1;

        pair.server
            .raw_input(&unreliable_datagram(wrong, b"spoof"), before + 5, &mut pair.server_events);

        assert!(pair.server_events.data.is_empty());
        assert_eq!(pair.server.state(), PeerState::Authority);
        assert_eq!(pair.server.last_receive_time(), before);

        let right = pair.client.cookie();
        pair.server
            .raw_input(&unreliable_datagram(right, b"real"), before + 5, &mut pair.server_events);
        assert_eq!(pair.server_events.data.len(), 1);
    }

    #[test]
    fn unknown_channel_dropped() {
        let mut pair = Pair::connected();
        let mut d = unreliable_datagram(pair.client.cookie(), b"??");
        d[0] = 9;
        pair.server.raw_input(&d, pair.now, &mut pair.server_events);
        assert!(pair.server_events.data.is_empty());
        assert!(pair.server.is_authenticated());
    }

    // -----------------------------------------------------------------------
    // Liveness
    // -----------------------------------------------------------------------

    #[test]
    fn silent_remote_times_out_once() {
        let setting = Setting {
            timeout: std::time::Duration::from_millis(500),
            ..Setting::default()
        };
        let mut pair = Pair::new(setting, SimulatorConfig::default());
        pair.steps(5);
        assert!(pair.server.is_authenticated());

        pair.to_server.set_blocked(true);
        pair.steps(60);

        assert_eq!(pair.server.state(), PeerState::Disconnected);
        assert_eq!(pair.server_events.disconnected, 1);
        assert!(pair.server_events.errors.contains(&ErrorCode::Timeout));
    }

    #[test]
    fn pings_keep_idle_connection_alive() {
        let setting = Setting {
            timeout: std::time::Duration::from_millis(2_000),
            ..Setting::default()
        };
        let mut pair = Pair::new(setting, SimulatorConfig::default());
        pair.steps(1_000);
        assert!(pair.client.is_authenticated());
        assert!(pair.server.is_authenticated());
    }

    #[test]
    fn dead_link_disconnects_before_timeout() {
        let setting = Setting {
            timeout: std::time::Duration::from_secs(60),
            max_retransmits: 3,
            ..Setting::default()
        };
        let mut pair = Pair::new(setting, SimulatorConfig::default());
        pair.steps(5);
        pair.to_server.set_blocked(true);
        pair.client_send(b"lost", Channel::Reliable).unwrap();
        pair.steps(500);

        assert_eq!(pair.client.state(), PeerState::Disconnected);
        assert_eq!(pair.client_events.errors, vec![ErrorCode::Timeout]);
        assert!(pair.now < pair.setting.timeout_ms());
    }

    #[test]
    fn queue_overflow_disconnects() {
        let mut pair = Pair::connected();
        for _ in 0..QUEUE_DISCONNECT_THRESHOLD {
            pair.client_send(b"spam", Channel::Reliable).unwrap();
        }
        pair.client
            .tick_incoming(pair.now, &mut pair.to_server, &mut pair.client_events);
        assert_eq!(pair.client.state(), PeerState::Disconnected);
        assert_eq!(pair.client_events.errors, vec![ErrorCode::Congestion]);
    }

    // -----------------------------------------------------------------------
    // Disconnect
    // -----------------------------------------------------------------------

    #[test]
    fn disconnect_is_idempotent_and_reaches_remote() {
        let mut pair = Pair::connected();
        pair.client
            .disconnect(pair.now, &mut pair.to_server, &mut pair.client_events);
        pair.client
            .disconnect(pair.now, &mut pair.to_server, &mut pair.client_events);
        assert_eq!(pair.client_events.disconnected, 1);

        pair.steps(3);
        assert_eq!(pair.server.state(), PeerState::Disconnected);
        assert_eq!(pair.server_events.disconnected, 1);
        assert!(pair.server_events.errors.is_empty());
    }

    #[test]
    fn disconnected_peer_ignores_input() {
        let mut pair = Pair::connected();
        pair.server
            .disconnect(pair.now, &mut pair.to_client, &mut pair.server_events);
        let cookie = pair.client.cookie();
        pair.server
            .raw_input(&unreliable_datagram(cookie, b"late"), pair.now, &mut pair.server_events);
        assert!(pair.server_events.data.is_empty());
    }

    #[test]
    fn stats_report_rates() {
        let pair = Pair::connected();
        let stats = pair.client.stats();
        // 32 segments × 1195 bytes × 1000 / 10 ms
        assert_eq!(stats.max_send_rate, 32 * 1195 * 100);
        assert_eq!(stats.max_receive_rate, 128 * 1195 * 100);
        assert_eq!(stats.send_buffer, 0);
    }
}
