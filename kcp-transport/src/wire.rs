//! Wire-format primitives shared by every layer.
//!
//! This module is responsible for:
//! - Fixed-width little-endian integer encode/decode at a buffer offset.
//! - The datagram envelope: channel tag and sender cookie.
//! - The reliable frame header carried as the first byte of each reliable
//!   message.
//! - Cookie generation.
//! - The payload ceilings derived from the MTU and receive window.
//!
//! No I/O happens here.
//!
//! # Datagram envelope
//!
//! All multi-byte integers are **little-endian**.
//!
//! ```text
//!  0               1               2               3               4
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Channel    |                 Sender cookie                 | ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Reliable channel: the remainder is ARQ segment data; each reassembled
//! message starts with a [`ReliableHeader`] byte.
//! Unreliable channel: the remainder is the raw application message.

use rand::Rng;

use crate::segment::OVERHEAD;

/// Byte length of the channel tag.
pub const CHANNEL_HEADER_SIZE: usize = 1;

/// Byte length of the cookie that follows the channel tag.
pub const COOKIE_HEADER_SIZE: usize = 4;

/// Envelope size prepended to every datagram (channel + cookie).
pub const METADATA_SIZE: usize = CHANNEL_HEADER_SIZE + COOKIE_HEADER_SIZE;

/// Byte length of the frame header inside each reliable message.
pub const RELIABLE_HEADER_SIZE: usize = 1;

/// Maximum number of fragments one message may be split into (one byte).
pub const FRG_MAX: usize = 255;

// ---------------------------------------------------------------------------
// Channel / frame header
// ---------------------------------------------------------------------------

/// Delivery channel, carried as byte 0 of every datagram.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Ordered, retransmitted, fragmented.
    Reliable = 1,
    /// Best effort, unordered, at most [`unreliable_size`] bytes.
    Unreliable = 2,
}

impl TryFrom<u8> for Channel {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Channel::Reliable),
            2 => Ok(Channel::Unreliable),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Reliable => write!(f, "reliable"),
            Channel::Unreliable => write!(f, "unreliable"),
        }
    }
}

/// Frame type, the first byte of every message on the reliable channel.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReliableHeader {
    /// Payload: exactly 4 bytes, the sender's cookie.
    Handshake = 1,
    /// Keep-alive, no payload.
    Ping = 2,
    /// Application message.
    Message = 3,
    /// Graceful close, no payload.
    Disconnect = 4,
}

impl TryFrom<u8> for ReliableHeader {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ReliableHeader::Handshake),
            2 => Ok(ReliableHeader::Ping),
            3 => Ok(ReliableHeader::Message),
            4 => Ok(ReliableHeader::Disconnect),
            other => Err(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Integer codec
// ---------------------------------------------------------------------------
//
// Encoders write at `offset` and return the number of bytes written so that
// offsets can be chained. Decoders return `(value, bytes_read)`. Callers are
// responsible for bounds; an out-of-range offset panics like any slice index.

#[inline]
pub fn encode_u8(buf: &mut [u8], offset: usize, value: u8) -> usize {
    buf[offset] = value;
    1
}

#[inline]
pub fn decode_u8(buf: &[u8], offset: usize) -> (u8, usize) {
    (buf[offset], 1)
}

#[inline]
pub fn encode_u16(buf: &mut [u8], offset: usize, value: u16) -> usize {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    2
}

#[inline]
pub fn decode_u16(buf: &[u8], offset: usize) -> (u16, usize) {
    let mut bytes = [0u8; 2];
    bytes.copy_from_slice(&buf[offset..offset + 2]);
    (u16::from_le_bytes(bytes), 2)
}

#[inline]
pub fn encode_u32(buf: &mut [u8], offset: usize, value: u32) -> usize {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    4
}

#[inline]
pub fn decode_u32(buf: &[u8], offset: usize) -> (u32, usize) {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    (u32::from_le_bytes(bytes), 4)
}

// ---------------------------------------------------------------------------
// Cookie
// ---------------------------------------------------------------------------

/// Generate a session cookie from the thread-local CSPRNG.
///
/// Every value, zero included, is a valid cookie.
pub fn generate_cookie() -> u32 {
    rand::rng().random()
}

// ---------------------------------------------------------------------------
// Size formulas
// ---------------------------------------------------------------------------

/// Largest reliable message for `mtu` and `rcv_wnd`, ignoring the fragment
/// ceiling.
///
/// One fragment is held back because the engine rejects a fragment count
/// equal to the receive window, and one byte is taken by the frame header.
pub fn reliable_size_unconstrained(mtu: usize, rcv_wnd: usize) -> usize {
    let per_fragment = mtu.saturating_sub(OVERHEAD + METADATA_SIZE);
    (per_fragment * rcv_wnd.saturating_sub(1)).saturating_sub(RELIABLE_HEADER_SIZE)
}

/// Largest application message accepted on the reliable channel.
///
/// Sender and receiver must agree on `mtu` and `rcv_wnd`, otherwise the
/// receiver rejects messages the sender considered legal.
pub fn reliable_size(mtu: usize, rcv_wnd: usize) -> usize {
    reliable_size_unconstrained(mtu, rcv_wnd.min(FRG_MAX))
}

/// Largest application message accepted on the unreliable channel.
pub fn unreliable_size(mtu: usize) -> usize {
    mtu.saturating_sub(METADATA_SIZE)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_offsets_write_little_endian() {
        let mut buf = [0u8; 7];
        let mut off = 0;
        off += encode_u8(&mut buf, off, 0xAB);
        off += encode_u16(&mut buf, off, 0x0102);
        off += encode_u32(&mut buf, off, 0x0304_0506);
        assert_eq!(off, 7);
        assert_eq!(buf, [0xAB, 0x02, 0x01, 0x06, 0x05, 0x04, 0x03]);
    }

    #[test]
    fn chained_offsets_read_back() {
        let buf = [0xAB, 0x02, 0x01, 0x06, 0x05, 0x04, 0x03];
        let (a, n1) = decode_u8(&buf, 0);
        let (b, n2) = decode_u16(&buf, n1);
        let (c, n3) = decode_u32(&buf, n1 + n2);
        assert_eq!((a, b, c), (0xAB, 0x0102, 0x0304_0506));
        assert_eq!(n1 + n2 + n3, buf.len());
    }

    #[test]
    fn channel_tags_match_wire_values() {
        assert_eq!(Channel::Reliable as u8, 1);
        assert_eq!(Channel::Unreliable as u8, 2);
        assert_eq!(Channel::try_from(2), Ok(Channel::Unreliable));
        assert_eq!(Channel::try_from(0), Err(0));
        assert_eq!(Channel::try_from(3), Err(3));
    }

    #[test]
    fn reliable_header_values() {
        assert_eq!(ReliableHeader::try_from(1), Ok(ReliableHeader::Handshake));
        assert_eq!(ReliableHeader::try_from(4), Ok(ReliableHeader::Disconnect));
        assert_eq!(ReliableHeader::try_from(5), Err(5));
    }

    #[test]
    fn unreliable_size_subtracts_envelope() {
        assert_eq!(unreliable_size(1200), 1195);
        assert_eq!(unreliable_size(3), 0);
    }

    #[test]
    fn reliable_size_default_settings() {
        // mss = 1200 - 24 - 5 = 1171, 127 usable fragments, minus header byte.
        assert_eq!(reliable_size(1200, 128), 1171 * 127 - 1);
    }

    #[test]
    fn reliable_size_caps_window_at_fragment_ceiling() {
        assert_eq!(reliable_size(1200, 4096), reliable_size(1200, FRG_MAX));
        assert_eq!(reliable_size(1200, 4096), 1171 * 254 - 1);
    }

    #[test]
    fn cookies_vary() {
        // 8 draws colliding on a 32-bit CSPRNG would be a broken generator.
        let first = generate_cookie();
        assert!((0..8).map(|_| generate_cookie()).any(|c| c != first));
    }
}
