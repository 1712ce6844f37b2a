//! In-memory network simulator for deterministic testing.
//!
//! Real networks drop, reorder, and duplicate packets. To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! [`Simulator`] stands in for a socket: it implements [`Output`] and holds
//! datagrams until the test asks for them with [`Simulator::deliver`],
//! applying a configurable fault model on the way:
//!
//! | Fault            | Description                                         |
//! |------------------|-----------------------------------------------------|
//! | Packet loss      | Drop a datagram with probability `loss_rate`.       |
//! | Reordering       | Hold a datagram back by `reorder_delay` ms, letting |
//! |                  | later datagrams overtake it.                        |
//! | Duplication      | Deliver a datagram twice.                           |
//! | Partition        | [`Simulator::set_blocked`] drops everything.         |
//!
//! Faults are drawn from a [`StdRng`] seeded by the config, so a failing
//! test replays identically.

use std::io;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::peer::Output;

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is reordered.
    pub reorder_rate: f64,
    /// Delay applied to reordered datagrams (ms).
    pub reorder_delay: u32,
    /// Probability that a datagram is duplicated.
    pub duplicate_rate: f64,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default; the simulator is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: 0,
            duplicate_rate: 0.0,
            seed: 0,
        }
    }
}

/// Counters for what the simulator did to the traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub sent: usize,
    pub dropped: usize,
    pub duplicated: usize,
    pub reordered: usize,
}

/// A one-directional lossy link.
pub struct Simulator {
    pub config: SimulatorConfig,
    rng: StdRng,
    now: u32,
    blocked: bool,
    /// `(deliver_at, datagram)` in send order.
    in_flight: Vec<(u32, Vec<u8>)>,
    stats: SimulatorStats,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            now: 0,
            blocked: false,
            in_flight: Vec::new(),
            stats: SimulatorStats::default(),
        }
    }

    /// Advance the simulated clock (ms).
    pub fn set_time(&mut self, now: u32) {
        self.now = now;
    }

    /// Drop every datagram sent while `blocked` is set.
    pub fn set_blocked(&mut self, blocked: bool) {
        self.blocked = blocked;
    }

    /// Remove and return every datagram due at the current time, in delivery
    /// order.
    pub fn deliver(&mut self) -> Vec<Vec<u8>> {
        // Stable sort: equal deadlines keep their send order.
        self.in_flight.sort_by_key(|(at, _)| *at);
        let now = self.now;
        let due = self
            .in_flight
            .iter()
            .take_while(|(at, _)| at.wrapping_sub(now) as i32 <= 0)
            .count();
        self.in_flight.drain(..due).map(|(_, d)| d).collect()
    }

    /// Datagrams still in flight.
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> SimulatorStats {
        self.stats
    }
}

impl Output for Simulator {
    fn send_datagram(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.stats.sent += 1;
        if self.blocked || self.rng.random_bool(self.config.loss_rate) {
            self.stats.dropped += 1;
            return Ok(());
        }

        let deliver_at = if self.rng.random_bool(self.config.reorder_rate) {
            self.stats.reordered += 1;
            self.now.wrapping_add(self.config.reorder_delay)
        } else {
            self.now
        };
        self.in_flight.push((deliver_at, datagram.to_vec()));

        if self.rng.random_bool(self.config.duplicate_rate) {
            self.stats.duplicated += 1;
            self.in_flight.push((deliver_at, datagram.to_vec()));
        }
        Ok(())
    }
}
