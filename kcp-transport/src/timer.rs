//! Round-trip time estimation and the retransmission timeout derived from it.
//!
//! Every acknowledgement carries back the timestamp of the segment it
//! acknowledges, so each ACK yields one RTT sample. [`RttEstimator`] keeps an
//! exponentially weighted mean (SRTT) and mean deviation (RTTVAR) of those
//! samples in milliseconds, in the manner of Jacobson's algorithm:
//!
//! ```text
//! first sample:  SRTT = R,  RTTVAR = R/2
//! afterwards:    RTTVAR = (3·RTTVAR + |SRTT − R|) / 4
//!                SRTT   = (7·SRTT   + R) / 8
//! RTO = clamp(SRTT + max(interval, 4·RTTVAR), min_rto, RTO_MAX)
//! ```
//!
//! The `interval` term keeps the RTO above one flush period, since an ACK
//! can only be emitted on a flush.

/// RTO floor in no-delay mode.
pub const RTO_NDL: u32 = 30;
/// RTO floor in normal mode.
pub const RTO_MIN: u32 = 100;
/// RTO before any sample is available.
pub const RTO_DEF: u32 = 200;
/// RTO ceiling.
pub const RTO_MAX: u32 = 60_000;

/// Smoothed RTT / RTO state for one ARQ session.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed RTT (ms); 0 until the first sample.
    pub srtt: i32,
    /// RTT mean deviation (ms).
    pub rttval: i32,
    /// Current retransmission timeout (ms).
    pub rto: u32,
    /// Lower bound applied to `rto`.
    pub min_rto: u32,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    pub fn new() -> Self {
        Self {
            srtt: 0,
            rttval: 0,
            rto: RTO_DEF,
            min_rto: RTO_MIN,
        }
    }

    /// Fold one RTT sample (ms) into the estimate and recompute the RTO.
    ///
    /// Negative samples count as 0. The arithmetic is done in i64 so an
    /// absurd sample only saturates the RTO at [`RTO_MAX`].
    pub fn record_sample(&mut self, rtt: i32, interval: u32) {
        let rtt = i64::from(rtt.max(0));
        let mut srtt = i64::from(self.srtt);
        let mut rttval = i64::from(self.rttval);
        if srtt == 0 {
            srtt = rtt;
            rttval = rtt / 2;
        } else {
            let delta = (rtt - srtt).abs();
            rttval = (3 * rttval + delta) / 4;
            srtt = ((7 * srtt + rtt) / 8).max(1);
        }
        let rto = srtt + i64::from(interval).max(4 * rttval);
        self.rto = rto.clamp(i64::from(self.min_rto), i64::from(RTO_MAX)) as u32;
        self.srtt = i32::try_from(srtt).unwrap_or(i32::MAX);
        self.rttval = i32::try_from(rttval).unwrap_or(i32::MAX);
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_rto_is_default() {
        let est = RttEstimator::new();
        assert_eq!(est.rto, RTO_DEF);
        assert_eq!(est.srtt, 0);
    }

    #[test]
    fn first_sample_seeds_mean_and_deviation() {
        let mut est = RttEstimator::new();
        est.record_sample(200, 10);
        assert_eq!(est.srtt, 200);
        assert_eq!(est.rttval, 100);
        // 200 + max(10, 400)
        assert_eq!(est.rto, 600);
    }

    #[test]
    fn later_samples_are_smoothed() {
        let mut est = RttEstimator::new();
        est.record_sample(100, 10);
        est.record_sample(180, 10);
        // rttval = (3*50 + 80) / 4 = 57, srtt = (700 + 180) / 8 = 110
        assert_eq!(est.rttval, 57);
        assert_eq!(est.srtt, 110);
        assert_eq!(est.rto, 110 + 228);
    }

    #[test]
    fn rto_respects_floor() {
        let mut est = RttEstimator::new();
        est.min_rto = RTO_NDL;
        est.record_sample(1, 10);
        // 1 + max(10, 0)
        assert_eq!(est.rto, RTO_NDL);
    }

    #[test]
    fn rto_capped_at_max() {
        let mut est = RttEstimator::new();
        est.record_sample(50_000, 10);
        assert_eq!(est.rto, RTO_MAX);
    }

    #[test]
    fn interval_bounds_rto_from_below() {
        let mut est = RttEstimator::new();
        est.min_rto = 0;
        est.record_sample(2, 100);
        // rttval = 1 → 4·rttval = 4 < interval
        assert_eq!(est.rto, 102);
    }

    #[test]
    fn extreme_samples_saturate_instead_of_overflowing() {
        let mut est = RttEstimator::new();
        est.record_sample(i32::MAX, 10);
        assert_eq!(est.rto, RTO_MAX);
        est.record_sample(i32::MAX, 10);
        est.record_sample(0, 10);
        assert_eq!(est.rto, RTO_MAX);
        assert!(est.srtt > 0);
    }
}
