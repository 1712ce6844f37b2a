//! ARQ segment: one fragment of one message, plus its retransmit bookkeeping.
//!
//! # Wire format
//!
//! All multi-byte integers are **little-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Conversation id                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      Cmd      |   Fragment    |        Advertised window      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  Next expected sequence (una)                 |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Data length                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            Data ...                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`OVERHEAD`] = 24 bytes.

use crate::wire::{decode_u16, decode_u32, decode_u8, encode_u16, encode_u32, encode_u8};

/// Byte length of the fixed segment header.
pub const OVERHEAD: usize = 24;

/// Command byte values.
pub mod cmd {
    /// Carries data.
    pub const PUSH: u8 = 81;
    /// Acknowledges one sequence number.
    pub const ACK: u8 = 82;
    /// Asks the remote for its window size.
    pub const WASK: u8 = 83;
    /// Tells the remote our window size.
    pub const WINS: u8 = 84;
}

/// One segment. Pool-owned: see [`crate::pool::Pool`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segment {
    pub conv: u32,
    pub cmd: u8,
    /// Fragment countdown; 0 marks the last fragment of a message.
    pub frg: u8,
    pub wnd: u16,
    pub ts: u32,
    pub sn: u32,
    pub una: u32,
    /// Time at which the segment is due for retransmission.
    pub resendts: u32,
    /// Retransmission timeout currently applied to this segment.
    pub rto: u32,
    /// Times this segment was skipped by a later acknowledgement.
    pub fastack: u32,
    /// Times this segment was transmitted.
    pub xmit: u32,
    pub data: Vec<u8>,
}

/// Parsed fixed header of an inbound segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub conv: u32,
    pub cmd: u8,
    pub frg: u8,
    pub wnd: u16,
    pub ts: u32,
    pub sn: u32,
    pub una: u32,
    pub len: u32,
}

impl Segment {
    /// Allocate an empty segment whose data buffer can hold `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Clear every field while keeping the data allocation.
    pub fn reset(&mut self) {
        self.conv = 0;
        self.cmd = 0;
        self.frg = 0;
        self.wnd = 0;
        self.ts = 0;
        self.sn = 0;
        self.una = 0;
        self.resendts = 0;
        self.rto = 0;
        self.fastack = 0;
        self.xmit = 0;
        self.data.clear();
    }

    /// Write the header at `offset` and return the bytes written.
    ///
    /// The data itself is not copied; callers append it after the header.
    pub fn encode_header(&self, buf: &mut [u8], offset: usize) -> usize {
        let mut off = offset;
        off += encode_u32(buf, off, self.conv);
        off += encode_u8(buf, off, self.cmd);
        off += encode_u8(buf, off, self.frg);
        off += encode_u16(buf, off, self.wnd);
        off += encode_u32(buf, off, self.ts);
        off += encode_u32(buf, off, self.sn);
        off += encode_u32(buf, off, self.una);
        off += encode_u32(buf, off, self.data.len() as u32);
        off - offset
    }
}

impl SegmentHeader {
    /// Parse a header at `offset`.
    ///
    /// Returns `None` when fewer than [`OVERHEAD`] bytes remain.
    pub fn decode(buf: &[u8], offset: usize) -> Option<Self> {
        if buf.len() < offset + OVERHEAD {
            return None;
        }
        let mut off = offset;
        let (conv, n) = decode_u32(buf, off);
        off += n;
        let (cmd, n) = decode_u8(buf, off);
        off += n;
        let (frg, n) = decode_u8(buf, off);
        off += n;
        let (wnd, n) = decode_u16(buf, off);
        off += n;
        let (ts, n) = decode_u32(buf, off);
        off += n;
        let (sn, n) = decode_u32(buf, off);
        off += n;
        let (una, n) = decode_u32(buf, off);
        off += n;
        let (len, _) = decode_u32(buf, off);
        Some(Self {
            conv,
            cmd,
            frg,
            wnd,
            ts,
            sn,
            una,
            len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_overhead_bytes() {
        let seg = Segment {
            data: b"abc".to_vec(),
            ..Segment::default()
        };
        let mut buf = [0u8; OVERHEAD];
        assert_eq!(seg.encode_header(&mut buf, 0), OVERHEAD);
    }

    #[test]
    fn header_fields_at_fixed_offsets() {
        let seg = Segment {
            conv: 0x0A0B_0C0D,
            cmd: cmd::PUSH,
            frg: 3,
            wnd: 0x0102,
            ts: 7,
            sn: 9,
            una: 11,
            data: vec![0u8; 5],
            ..Segment::default()
        };
        let mut buf = [0u8; OVERHEAD];
        seg.encode_header(&mut buf, 0);
        assert_eq!(&buf[0..4], &[0x0D, 0x0C, 0x0B, 0x0A]);
        assert_eq!(buf[4], cmd::PUSH);
        assert_eq!(buf[5], 3);
        assert_eq!(&buf[6..8], &[0x02, 0x01]);
        assert_eq!(&buf[20..24], &[5, 0, 0, 0]);
    }

    #[test]
    fn decode_reads_header_at_offset() {
        let seg = Segment {
            conv: 1,
            cmd: cmd::ACK,
            sn: 42,
            ts: 1000,
            ..Segment::default()
        };
        let mut buf = [0u8; OVERHEAD + 3];
        seg.encode_header(&mut buf, 3);
        let h = SegmentHeader::decode(&buf, 3).unwrap();
        assert_eq!(h.cmd, cmd::ACK);
        assert_eq!(h.sn, 42);
        assert_eq!(h.ts, 1000);
        assert_eq!(h.len, 0);
    }

    #[test]
    fn decode_short_buffer_returns_none() {
        assert_eq!(SegmentHeader::decode(&[0u8; OVERHEAD - 1], 0), None);
        assert_eq!(SegmentHeader::decode(&[0u8; OVERHEAD], 1), None);
    }

    #[test]
    fn reset_keeps_allocation() {
        let mut seg = Segment::with_capacity(64);
        seg.data.extend_from_slice(&[1, 2, 3]);
        seg.xmit = 4;
        seg.reset();
        assert!(seg.data.is_empty());
        assert!(seg.data.capacity() >= 64);
        assert_eq!(seg.xmit, 0);
    }
}
