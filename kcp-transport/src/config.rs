//! Transport configuration.
//!
//! A [`Setting`] is built once, validated, and moved into a
//! [`crate::client::Client`] or [`crate::server::Server`]. Both ends of a
//! connection must agree on `mtu` and `receive_window_size`, because the
//! maximum reliable message size is derived from them.

use std::time::Duration;

use crate::error::Error;
use crate::kcp::{MTU_MIN, WND_RCV};
use crate::segment::OVERHEAD;
use crate::wire::{self, METADATA_SIZE, RELIABLE_HEADER_SIZE};

/// Default socket buffer size (7 MiB).
pub const DEFAULT_BUFFER_SIZE: usize = 7 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
    /// Server listens on the IPv6 wildcard and accepts v4-mapped traffic.
    pub dual_mode: bool,
    /// Largest datagram sent, envelope included.
    pub mtu: usize,
    /// SO_RCVBUF requested from the OS.
    pub recv_buffer_size: usize,
    /// SO_SNDBUF requested from the OS.
    pub send_buffer_size: usize,
    /// ARQ send window in segments.
    pub send_window_size: u32,
    /// ARQ receive window in segments. Raised to 128 if smaller.
    pub receive_window_size: u32,
    /// Disconnect after this long without receiving anything.
    pub timeout: Duration,
    /// ARQ flush interval.
    pub interval: Duration,
    /// Fast-resend threshold, 0 disables fast resend.
    pub fast_resend: u32,
    pub no_delay: bool,
    pub congestion_window: bool,
    /// Transmissions of one segment before the link is declared dead.
    pub max_retransmits: u32,
}

impl Default for Setting {
    fn default() -> Self {
        Self {
            dual_mode: true,
            mtu: 1200,
            recv_buffer_size: DEFAULT_BUFFER_SIZE,
            send_buffer_size: DEFAULT_BUFFER_SIZE,
            send_window_size: 32,
            receive_window_size: 128,
            timeout: Duration::from_secs(10),
            interval: Duration::from_millis(10),
            fast_resend: 0,
            no_delay: true,
            congestion_window: false,
            max_retransmits: 20,
        }
    }
}

impl Setting {
    /// Reject values the transport cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        let engine_mtu = self.mtu.saturating_sub(METADATA_SIZE);
        if engine_mtu < MTU_MIN || engine_mtu <= OVERHEAD + RELIABLE_HEADER_SIZE {
            return Err(Error::InvalidSetting(format!(
                "mtu {} leaves no room for a segment",
                self.mtu
            )));
        }
        if self.send_window_size == 0 || self.receive_window_size == 0 {
            return Err(Error::InvalidSetting("window sizes must be positive".into()));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidSetting("timeout must be positive".into()));
        }
        if self.max_retransmits == 0 {
            return Err(Error::InvalidSetting("max_retransmits must be positive".into()));
        }
        Ok(())
    }

    /// Receive window the engine actually uses.
    pub fn effective_receive_window(&self) -> u32 {
        self.receive_window_size.max(WND_RCV)
    }

    /// Largest application message accepted on the reliable channel.
    pub fn reliable_size(&self) -> usize {
        wire::reliable_size(self.mtu, self.effective_receive_window() as usize)
    }

    /// Largest application message accepted on the unreliable channel.
    pub fn unreliable_size(&self) -> usize {
        wire::unreliable_size(self.mtu)
    }

    pub fn timeout_ms(&self) -> u32 {
        u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX)
    }

    pub fn interval_ms(&self) -> u32 {
        u32::try_from(self.interval.as_millis()).unwrap_or(u32::MAX)
    }
}
