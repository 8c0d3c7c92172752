//! Default meter coloring oracle
//!
//! A token-bucket policer over the band configuration: packets-per-second
//! or kilobits-per-second rates with the burst as bucket depth. The table
//! layer only asks which band fired; all rate state lives here, keyed by
//! meter id.

use std::collections::HashMap;

use ofsw_common::openflow::{OFPMF_KBPS, OFPMF_PKTPS};
use ofsw_common::Timestamp;
use ofsw_flowdb::{Meter, MeterPolicer};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct BucketState {
    tokens: f64,
    last_ns: u64,
}

/// Token-bucket policer with per-(meter, band) state.
#[derive(Default)]
pub struct TokenBucketPolicer {
    state: Mutex<HashMap<(u32, usize), BucketState>>,
}

impl TokenBucketPolicer {
    /// Fresh policer with no state.
    pub fn new() -> Self {
        TokenBucketPolicer::default()
    }
}

fn ts_nanos(ts: Timestamp) -> u64 {
    ts.sec * 1_000_000_000 + ts.nsec as u64
}

impl MeterPolicer for TokenBucketPolicer {
    fn classify(&self, meter: &Meter, pkt_len: usize, now: Timestamp) -> Option<usize> {
        let now_ns = ts_nanos(now);
        let mut state = self.state.lock();
        let mut fired: Option<usize> = None;

        // Bands are rate-ascending; the last one that exceeds its rate is
        // the highest-precedence band.
        for (idx, band) in meter.bands.iter().enumerate() {
            let cost = if meter.flags & OFPMF_PKTPS != 0 || meter.flags & OFPMF_KBPS == 0 {
                1.0
            } else {
                (pkt_len as f64) * 8.0 / 1000.0
            };
            let rate = band.rate() as f64;
            if rate <= 0.0 {
                continue;
            }
            let depth = band.burst_size().max(1) as f64;

            let entry = state.entry((meter.id, idx)).or_insert(BucketState {
                tokens: depth,
                last_ns: now_ns,
            });
            let elapsed = now_ns.saturating_sub(entry.last_ns) as f64 / 1_000_000_000.0;
            entry.tokens = (entry.tokens + elapsed * rate).min(depth);
            entry.last_ns = now_ns;

            if entry.tokens >= cost {
                entry.tokens -= cost;
            } else {
                fired = Some(idx);
            }
        }
        fired
    }
}
