//! KCP-style ARQ engine.
//!
//! [`Kcp`] turns an unreliable datagram path into an ordered, reliable
//! message channel. It is a pure state machine: bytes come in through
//! [`Kcp::input`], go out through the `output` callback handed to
//! [`Kcp::update`] / [`Kcp::flush`], and time is supplied by the caller in
//! milliseconds. No socket is touched here.
//!
//! # Queues
//!
//! ```text
//!  send()                        flush()                      output()
//!  ─────▶ snd_queue ──(cwnd)──▶ snd_buf ──(due / fast-ack)──▶ datagrams
//!                                  ▲ una / ack remove
//!
//!  input() ──▶ rcv_buf ──(contiguous sn)──▶ rcv_queue ──▶ receive()
//! ```
//!
//! - `snd_queue`: fragments not yet assigned a sequence number.
//! - `snd_buf`: in flight, awaiting acknowledgement.
//! - `rcv_buf`: received out of order, waiting for the gap to fill.
//! - `rcv_queue`: in order, ready to be reassembled.
//!
//! # Protocol contract
//!
//! - Messages are split into at most [`FRG_MAX`] fragments, and into fewer
//!   than the receive window; the fragment index counts down to 0 so the
//!   receiver knows when a message is complete.
//! - Every segment header carries `una`, the cumulative acknowledgement;
//!   PUSH segments are additionally acknowledged one by one with ACK
//!   segments, which also feed the RTT estimator.
//! - A segment is retransmitted when its RTO elapses, or when later
//!   segments were acknowledged `fastresend` times before it.
//! - A segment transmitted `dead_link` times marks the link dead.
//!
//! Sequence numbers are u32 and compared in wrap-around space.

use std::collections::VecDeque;

use thiserror::Error;

use crate::pool::Pool;
use crate::segment::{cmd, Segment, SegmentHeader, OVERHEAD};
use crate::timer::{RttEstimator, RTO_MAX, RTO_MIN, RTO_NDL};
use crate::wire::FRG_MAX;

/// Default send window (segments).
pub const WND_SND: u32 = 32;
/// Default and minimum receive window (segments).
pub const WND_RCV: u32 = 128;
/// Default MTU of the engine itself.
pub const MTU_DEF: usize = 1200;
/// Smallest MTU accepted by [`Kcp::set_mtu`].
pub const MTU_MIN: usize = 50;
/// Default flush interval (ms).
pub const INTERVAL: u32 = 100;
/// Default transmission count after which the link is considered dead.
pub const DEADLINK: u32 = 20;
pub const THRESH_INIT: u32 = 2;
pub const THRESH_MIN: u32 = 2;
/// Initial window-probe wait (ms).
pub const PROBE_INIT: u32 = 7_000;
/// Maximum window-probe wait (ms).
pub const PROBE_LIMIT: u32 = 120_000;
/// Fast retransmission applies at most this many times per segment.
pub const FASTACK_LIMIT: u32 = 5;

const ASK_SEND: u32 = 1;
const ASK_TELL: u32 = 2;
const POOL_INITIAL: usize = 32;

/// Signed distance from `earlier` to `later` in wrap-around space.
#[inline]
fn time_diff(later: u32, earlier: u32) -> i32 {
    later.wrapping_sub(earlier) as i32
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Rejections reported by the engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KcpError {
    #[error("message needs {count} fragments, limit is {limit}")]
    TooManyFragments { count: usize, limit: usize },
    #[error("buffer of {have} bytes cannot hold a {need} byte message")]
    BufferTooSmall { need: usize, have: usize },
    #[error("input shorter than a segment header")]
    TooShort,
    #[error("conversation {got} does not match {expected}")]
    ConvMismatch { expected: u32, got: u32 },
    #[error("segment claims {len} bytes but {remaining} remain")]
    Truncated { len: usize, remaining: usize },
    #[error("unknown command {0}")]
    UnknownCommand(u8),
    #[error("mtu {0} is too small")]
    InvalidMtu(usize),
}

// ---------------------------------------------------------------------------
// Kcp
// ---------------------------------------------------------------------------

/// ARQ state for one conversation.
pub struct Kcp {
    conv: u32,
    mtu: usize,
    mss: usize,
    dead: bool,

    snd_una: u32,
    snd_nxt: u32,
    rcv_nxt: u32,

    ssthresh: u32,
    rtt: RttEstimator,

    snd_wnd: u32,
    rcv_wnd: u32,
    rmt_wnd: u32,
    cwnd: u32,
    incr: u32,
    probe: u32,

    current: u32,
    interval: u32,
    ts_flush: u32,
    updated: bool,
    ts_probe: u32,
    probe_wait: u32,

    /// Total retransmissions, for statistics.
    xmit: u32,
    dead_link: u32,
    nodelay: bool,
    fastresend: u32,
    fastlimit: u32,
    nocwnd: bool,

    snd_queue: VecDeque<Segment>,
    snd_buf: VecDeque<Segment>,
    rcv_queue: VecDeque<Segment>,
    rcv_buf: VecDeque<Segment>,
    /// Pending (sn, ts) pairs to acknowledge on the next flush.
    acklist: Vec<(u32, u32)>,
    buffer: Vec<u8>,
    pool: Pool<Segment>,
}

impl Kcp {
    /// Create an engine for conversation `conv`. Both ends must use the same id.
    pub fn new(conv: u32) -> Self {
        Self {
            conv,
            mtu: MTU_DEF,
            mss: MTU_DEF - OVERHEAD,
            dead: false,
            snd_una: 0,
            snd_nxt: 0,
            rcv_nxt: 0,
            ssthresh: THRESH_INIT,
            rtt: RttEstimator::new(),
            snd_wnd: WND_SND,
            rcv_wnd: WND_RCV,
            rmt_wnd: WND_RCV,
            cwnd: 0,
            incr: 0,
            probe: 0,
            current: 0,
            interval: INTERVAL,
            ts_flush: INTERVAL,
            updated: false,
            ts_probe: 0,
            probe_wait: 0,
            xmit: 0,
            dead_link: DEADLINK,
            nodelay: false,
            fastresend: 0,
            fastlimit: FASTACK_LIMIT,
            nocwnd: false,
            snd_queue: VecDeque::new(),
            snd_buf: VecDeque::new(),
            rcv_queue: VecDeque::new(),
            rcv_buf: VecDeque::new(),
            acklist: Vec::new(),
            buffer: vec![0u8; MTU_DEF],
            pool: Pool::new(|| Segment::with_capacity(MTU_DEF), Segment::reset, POOL_INITIAL),
        }
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    /// `nodelay` lowers the RTO floor and softens back-off, `interval` is the
    /// flush period in ms (clamped to 10..=5000), `resend` the fast-resend
    /// threshold (0 = off) and `nc` disables congestion control.
    pub fn set_nodelay(&mut self, nodelay: bool, interval: u32, resend: u32, nc: bool) {
        self.nodelay = nodelay;
        self.rtt.min_rto = if nodelay { RTO_NDL } else { RTO_MIN };
        self.interval = interval.clamp(10, 5000);
        self.fastresend = resend;
        self.nocwnd = nc;
    }

    /// Zero leaves a window unchanged. The receive window never drops below
    /// [`WND_RCV`].
    pub fn set_window_size(&mut self, snd_wnd: u32, rcv_wnd: u32) {
        if snd_wnd > 0 {
            self.snd_wnd = snd_wnd;
        }
        if rcv_wnd > 0 {
            self.rcv_wnd = rcv_wnd.max(WND_RCV);
        }
    }

    pub fn set_mtu(&mut self, mtu: usize) -> Result<(), KcpError> {
        if mtu < MTU_MIN || mtu < OVERHEAD {
            return Err(KcpError::InvalidMtu(mtu));
        }
        self.mtu = mtu;
        self.mss = mtu - OVERHEAD;
        self.buffer.resize(mtu, 0);
        Ok(())
    }

    pub fn set_dead_link(&mut self, dead_link: u32) {
        self.dead_link = dead_link;
    }

    // -----------------------------------------------------------------------
    // Application side
    // -----------------------------------------------------------------------

    /// Split `data` into fragments and append them to the send queue.
    ///
    /// Nothing is transmitted until the next [`update`](Self::update) or
    /// [`flush`](Self::flush).
    pub fn send(&mut self, data: &[u8]) -> Result<(), KcpError> {
        let count = data.len().div_ceil(self.mss).max(1);
        if count > FRG_MAX {
            return Err(KcpError::TooManyFragments {
                count,
                limit: FRG_MAX,
            });
        }
        if count >= self.rcv_wnd as usize {
            return Err(KcpError::TooManyFragments {
                count,
                limit: self.rcv_wnd as usize - 1,
            });
        }

        for i in 0..count {
            let start = i * self.mss;
            let end = (start + self.mss).min(data.len());
            let mut seg = self.pool.take();
            seg.data.extend_from_slice(&data[start..end]);
            seg.frg = (count - i - 1) as u8;
            self.snd_queue.push_back(seg);
        }
        Ok(())
    }

    /// Size of the next complete message, or `None` if it has not fully
    /// arrived yet.
    pub fn peek_size(&self) -> Option<usize> {
        let front = self.rcv_queue.front()?;
        if front.frg == 0 {
            return Some(front.data.len());
        }
        if self.rcv_queue.len() < front.frg as usize + 1 {
            return None;
        }
        let mut length = 0;
        for seg in &self.rcv_queue {
            length += seg.data.len();
            if seg.frg == 0 {
                break;
            }
        }
        Some(length)
    }

    /// Reassemble the next complete message into `buf`.
    ///
    /// Returns `Ok(None)` when no complete message is available.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<Option<usize>, KcpError> {
        let Some(size) = self.peek_size() else {
            return Ok(None);
        };
        if size > buf.len() {
            return Err(KcpError::BufferTooSmall {
                need: size,
                have: buf.len(),
            });
        }

        let recover = self.rcv_queue.len() >= self.rcv_wnd as usize;

        let mut len = 0;
        while let Some(seg) = self.rcv_queue.pop_front() {
            let n = seg.data.len();
            buf[len..len + n].copy_from_slice(&seg.data);
            len += n;
            let last = seg.frg == 0;
            self.pool.give(seg);
            if last {
                break;
            }
        }

        self.move_to_receive_queue();

        // The window reopened: tell the remote so it does not wait for a probe.
        if recover && self.rcv_queue.len() < self.rcv_wnd as usize {
            self.probe |= ASK_TELL;
        }
        Ok(Some(len))
    }

    // -----------------------------------------------------------------------
    // Network side
    // -----------------------------------------------------------------------

    /// Process one datagram worth of segments from the remote.
    pub fn input(&mut self, data: &[u8]) -> Result<(), KcpError> {
        if data.len() < OVERHEAD {
            return Err(KcpError::TooShort);
        }

        let prev_una = self.snd_una;
        let mut offset = 0;
        let mut max_ack: Option<u32> = None;

        while let Some(h) = SegmentHeader::decode(data, offset) {
            offset += OVERHEAD;

            if h.conv != self.conv {
                return Err(KcpError::ConvMismatch {
                    expected: self.conv,
                    got: h.conv,
                });
            }
            let len = h.len as usize;
            let remaining = data.len() - offset;
            if len > remaining {
                return Err(KcpError::Truncated { len, remaining });
            }
            if !matches!(h.cmd, cmd::PUSH | cmd::ACK | cmd::WASK | cmd::WINS) {
                return Err(KcpError::UnknownCommand(h.cmd));
            }

            self.rmt_wnd = u32::from(h.wnd);
            self.parse_una(h.una);
            self.shrink_buf();

            match h.cmd {
                cmd::ACK => {
                    // A timestamp we could not have sent yields no sample.
                    let rtt = time_diff(self.current, h.ts);
                    if (0..=RTO_MAX as i32).contains(&rtt) {
                        self.rtt.record_sample(rtt, self.interval);
                    }
                    self.parse_ack(h.sn);
                    self.shrink_buf();
                    max_ack = match max_ack {
                        Some(m) if time_diff(h.sn, m) <= 0 => Some(m),
                        _ => Some(h.sn),
                    };
                }
                cmd::PUSH => {
                    let window_end = self.rcv_nxt.wrapping_add(self.rcv_wnd);
                    if time_diff(h.sn, window_end) < 0 {
                        self.acklist.push((h.sn, h.ts));
                        if time_diff(h.sn, self.rcv_nxt) >= 0 {
                            let mut seg = self.pool.take();
                            seg.conv = h.conv;
                            seg.cmd = h.cmd;
                            seg.frg = h.frg;
                            seg.wnd = h.wnd;
                            seg.ts = h.ts;
                            seg.sn = h.sn;
                            seg.una = h.una;
                            seg.data.extend_from_slice(&data[offset..offset + len]);
                            self.parse_data(seg);
                        }
                    }
                }
                cmd::WASK => self.probe |= ASK_TELL,
                // WINS only carries the window, already read above.
                _ => {}
            }

            offset += len;
        }

        if let Some(sn) = max_ack {
            self.parse_fast_ack(sn);
        }

        if time_diff(self.snd_una, prev_una) > 0 && self.cwnd < self.rmt_wnd {
            self.grow_congestion_window();
        }
        Ok(())
    }

    /// Advance the clock to `current` and flush if an interval has elapsed.
    ///
    /// Call this every tick; `current` is in milliseconds from any fixed epoch.
    pub fn update<F: FnMut(&[u8])>(&mut self, current: u32, output: &mut F) {
        self.current = current;
        if !self.updated {
            self.updated = true;
            self.ts_flush = current;
        }

        let mut slap = time_diff(current, self.ts_flush);
        if !(-10_000..10_000).contains(&slap) {
            self.ts_flush = current;
            slap = 0;
        }

        if slap >= 0 {
            self.ts_flush = self.ts_flush.wrapping_add(self.interval);
            if time_diff(current, self.ts_flush) >= 0 {
                self.ts_flush = current.wrapping_add(self.interval);
            }
            self.flush_segments(output);
        }
    }

    /// Emit pending acknowledgements and every segment that may go out now,
    /// regardless of the flush interval.
    pub fn flush<F: FnMut(&[u8])>(&mut self, current: u32, output: &mut F) {
        self.current = current;
        self.flush_segments(output);
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// `true` once a segment reached the dead-link transmission count.
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn conv(&self) -> u32 {
        self.conv
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn mss(&self) -> usize {
        self.mss
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn send_window(&self) -> u32 {
        self.snd_wnd
    }

    pub fn receive_window(&self) -> u32 {
        self.rcv_wnd
    }

    pub fn remote_window(&self) -> u32 {
        self.rmt_wnd
    }

    /// Smoothed RTT (ms).
    pub fn srtt(&self) -> i32 {
        self.rtt.srtt
    }

    /// Current retransmission timeout (ms).
    pub fn rto(&self) -> u32 {
        self.rtt.rto
    }

    /// Total timeout retransmissions so far.
    pub fn retransmissions(&self) -> u32 {
        self.xmit
    }

    /// Segments queued or in flight.
    pub fn wait_snd(&self) -> usize {
        self.snd_buf.len() + self.snd_queue.len()
    }

    pub fn send_queue_len(&self) -> usize {
        self.snd_queue.len()
    }

    pub fn send_buffer_len(&self) -> usize {
        self.snd_buf.len()
    }

    pub fn receive_queue_len(&self) -> usize {
        self.rcv_queue.len()
    }

    pub fn receive_buffer_len(&self) -> usize {
        self.rcv_buf.len()
    }

    /// Idle segments held by the pool.
    pub fn pooled(&self) -> usize {
        self.pool.count()
    }

    /// Drop everything not yet assigned a sequence number.
    pub fn clear_send_queue(&mut self) {
        while let Some(seg) = self.snd_queue.pop_front() {
            self.pool.give(seg);
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn wnd_unused(&self) -> u16 {
        let used = self.rcv_queue.len() as u32;
        if used < self.rcv_wnd {
            (self.rcv_wnd - used).min(u32::from(u16::MAX)) as u16
        } else {
            0
        }
    }

    /// Move in-order segments from `rcv_buf` to `rcv_queue` while the queue
    /// has room.
    fn move_to_receive_queue(&mut self) {
        while self.rcv_queue.len() < self.rcv_wnd as usize
            && self.rcv_buf.front().is_some_and(|seg| seg.sn == self.rcv_nxt)
        {
            if let Some(seg) = self.rcv_buf.pop_front() {
                self.rcv_queue.push_back(seg);
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            }
        }
    }

    fn shrink_buf(&mut self) {
        self.snd_una = self.snd_buf.front().map_or(self.snd_nxt, |seg| seg.sn);
    }

    /// Release everything the remote acknowledged cumulatively.
    fn parse_una(&mut self, una: u32) {
        while let Some(seg) = self.snd_buf.front() {
            if time_diff(una, seg.sn) <= 0 {
                break;
            }
            if let Some(seg) = self.snd_buf.pop_front() {
                self.pool.give(seg);
            }
        }
    }

    fn parse_ack(&mut self, sn: u32) {
        if time_diff(sn, self.snd_una) < 0 || time_diff(sn, self.snd_nxt) >= 0 {
            return;
        }
        let mut found = None;
        for (i, seg) in self.snd_buf.iter().enumerate() {
            if seg.sn == sn {
                found = Some(i);
                break;
            }
            if time_diff(sn, seg.sn) < 0 {
                break;
            }
        }
        if let Some(seg) = found.and_then(|i| self.snd_buf.remove(i)) {
            self.pool.give(seg);
        }
    }

    /// Count one skip for every in-flight segment older than `sn`.
    fn parse_fast_ack(&mut self, sn: u32) {
        if time_diff(sn, self.snd_una) < 0 || time_diff(sn, self.snd_nxt) >= 0 {
            return;
        }
        for seg in self.snd_buf.iter_mut() {
            if time_diff(sn, seg.sn) < 0 {
                break;
            }
            if sn != seg.sn {
                seg.fastack += 1;
            }
        }
    }

    fn parse_data(&mut self, seg: Segment) {
        let sn = seg.sn;
        if time_diff(sn, self.rcv_nxt.wrapping_add(self.rcv_wnd)) >= 0
            || time_diff(sn, self.rcv_nxt) < 0
        {
            self.pool.give(seg);
            return;
        }

        let mut insert_at = self.rcv_buf.len();
        let mut duplicate = false;
        for (i, existing) in self.rcv_buf.iter().enumerate().rev() {
            if existing.sn == sn {
                duplicate = true;
                break;
            }
            if time_diff(sn, existing.sn) > 0 {
                insert_at = i + 1;
                break;
            }
            insert_at = i;
        }

        if duplicate {
            self.pool.give(seg);
        } else {
            self.rcv_buf.insert(insert_at, seg);
        }
        self.move_to_receive_queue();
    }

    /// Slow start below `ssthresh`, additive increase above it.
    fn grow_congestion_window(&mut self) {
        let mss = self.mss as u32;
        if self.cwnd < self.ssthresh {
            self.cwnd += 1;
            self.incr += mss;
        } else {
            self.incr = self.incr.max(mss);
            self.incr += (mss * mss) / self.incr + (mss / 16);
            if (self.cwnd + 1) * mss <= self.incr {
                self.cwnd = (self.incr + mss - 1) / mss.max(1);
            }
        }
        if self.cwnd > self.rmt_wnd {
            self.cwnd = self.rmt_wnd;
            self.incr = self.rmt_wnd * mss;
        }
    }

    fn flush_segments<F: FnMut(&[u8])>(&mut self, output: &mut F) {
        let current = self.current;
        let wnd = self.wnd_unused();
        let mut offset = 0;
        let mut change = false;
        let mut lost = false;

        // Control segments share one header template.
        let mut control = Segment {
            conv: self.conv,
            cmd: cmd::ACK,
            wnd,
            una: self.rcv_nxt,
            ..Segment::default()
        };

        for &(sn, ts) in &self.acklist {
            if offset + OVERHEAD > self.mtu {
                output(&self.buffer[..offset]);
                offset = 0;
            }
            control.sn = sn;
            control.ts = ts;
            offset += control.encode_header(&mut self.buffer, offset);
        }
        self.acklist.clear();

        // Remote window is zero: probe it on a growing timer.
        if self.rmt_wnd == 0 {
            if self.probe_wait == 0 {
                self.probe_wait = PROBE_INIT;
                self.ts_probe = current.wrapping_add(self.probe_wait);
            } else if time_diff(current, self.ts_probe) >= 0 {
                self.probe_wait = self.probe_wait.max(PROBE_INIT);
                self.probe_wait += self.probe_wait / 2;
                self.probe_wait = self.probe_wait.min(PROBE_LIMIT);
                self.ts_probe = current.wrapping_add(self.probe_wait);
                self.probe |= ASK_SEND;
            }
        } else {
            self.ts_probe = 0;
            self.probe_wait = 0;
        }

        for (flag, command) in [(ASK_SEND, cmd::WASK), (ASK_TELL, cmd::WINS)] {
            if self.probe & flag != 0 {
                if offset + OVERHEAD > self.mtu {
                    output(&self.buffer[..offset]);
                    offset = 0;
                }
                control.cmd = command;
                offset += control.encode_header(&mut self.buffer, offset);
            }
        }
        self.probe = 0;

        let mut cwnd = self.snd_wnd.min(self.rmt_wnd);
        if !self.nocwnd {
            cwnd = cwnd.min(self.cwnd);
        }

        while time_diff(self.snd_nxt, self.snd_una.wrapping_add(cwnd)) < 0 {
            let Some(mut seg) = self.snd_queue.pop_front() else {
                break;
            };
            seg.conv = self.conv;
            seg.cmd = cmd::PUSH;
            seg.wnd = wnd;
            seg.ts = current;
            seg.sn = self.snd_nxt;
            seg.una = self.rcv_nxt;
            seg.resendts = current;
            seg.rto = self.rtt.rto;
            seg.fastack = 0;
            seg.xmit = 0;
            self.snd_nxt = self.snd_nxt.wrapping_add(1);
            self.snd_buf.push_back(seg);
        }

        let resent = if self.fastresend > 0 {
            self.fastresend
        } else {
            u32::MAX
        };
        let rx_rto = self.rtt.rto;
        let rtomin = if self.nodelay { 0 } else { rx_rto >> 3 };

        for seg in self.snd_buf.iter_mut() {
            let mut needsend = false;
            if seg.xmit == 0 {
                needsend = true;
                seg.xmit += 1;
                seg.rto = rx_rto;
                seg.resendts = current.wrapping_add(seg.rto + rtomin);
            } else if time_diff(current, seg.resendts) >= 0 {
                needsend = true;
                seg.xmit += 1;
                self.xmit += 1;
                if self.nodelay {
                    seg.rto += seg.rto / 2;
                } else {
                    seg.rto += seg.rto.max(rx_rto);
                }
                seg.resendts = current.wrapping_add(seg.rto);
                lost = true;
            } else if seg.fastack >= resent
                && (seg.xmit <= self.fastlimit || self.fastlimit == 0)
            {
                needsend = true;
                seg.xmit += 1;
                seg.fastack = 0;
                seg.resendts = current.wrapping_add(seg.rto);
                change = true;
            }

            if needsend {
                seg.ts = current;
                seg.wnd = wnd;
                seg.una = self.rcv_nxt;

                let need = OVERHEAD + seg.data.len();
                if offset + need > self.mtu {
                    output(&self.buffer[..offset]);
                    offset = 0;
                }
                offset += seg.encode_header(&mut self.buffer, offset);
                self.buffer[offset..offset + seg.data.len()].copy_from_slice(&seg.data);
                offset += seg.data.len();

                if seg.xmit >= self.dead_link {
                    self.dead = true;
                }
            }
        }

        if offset > 0 {
            output(&self.buffer[..offset]);
        }

        let mss = self.mss as u32;
        if change {
            let inflight = self.snd_nxt.wrapping_sub(self.snd_una);
            self.ssthresh = (inflight / 2).max(THRESH_MIN);
            self.cwnd = self.ssthresh.saturating_add(resent);
            self.incr = self.cwnd.saturating_mul(mss);
        }
        if lost {
            self.ssthresh = (cwnd / 2).max(THRESH_MIN);
            self.cwnd = 1;
            self.incr = mss;
        }
        if self.cwnd < 1 {
            self.cwnd = 1;
            self.incr = mss;
        }
    }
}

impl std::fmt::Debug for Kcp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kcp")
            .field("conv", &self.conv)
            .field("snd_una", &self.snd_una)
            .field("snd_nxt", &self.snd_nxt)
            .field("rcv_nxt", &self.rcv_nxt)
            .field("rto", &self.rtt.rto)
            .field("dead", &self.dead)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
