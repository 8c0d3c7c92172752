//! OpenFlow meter table
//!
//! Rate measurement itself is delegated to a [`MeterPolicer`] oracle
//! supplied by the realtime layer; this module owns band configuration,
//! counters and the DSCP remark arithmetic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use ofsw_common::error::{meter_mod_failed, OfpErrorType};
use ofsw_common::openflow::{
    MeterBandKind, OFPMF_BURST, OFPMF_KBPS, OFPMF_PKTPS, OFPMF_STATS, OFPM_ALL, OFPM_MAX,
};
use ofsw_common::{SwitchError, SwitchResult, Timestamp};
use serde::{Deserialize, Serialize};

use crate::msgs::MeterMod;

/// One meter band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeterBand {
    /// Drop packets beyond the rate.
    Drop {
        /// Rate in kbps or pkt/s per the meter flags.
        rate: u32,
        /// Burst allowance.
        burst_size: u32,
    },
    /// Raise the DSCP drop precedence beyond the rate.
    DscpRemark {
        /// Rate in kbps or pkt/s per the meter flags.
        rate: u32,
        /// Burst allowance.
        burst_size: u32,
        /// Precedence levels to add.
        prec_level: u8,
    },
    /// Experimenter band.
    Experimenter {
        /// Rate in kbps or pkt/s per the meter flags.
        rate: u32,
        /// Burst allowance.
        burst_size: u32,
        /// Experimenter id.
        experimenter: u32,
    },
}

impl MeterBand {
    /// Band kind.
    pub fn kind(&self) -> MeterBandKind {
        match self {
            MeterBand::Drop { .. } => MeterBandKind::Drop,
            MeterBand::DscpRemark { .. } => MeterBandKind::DscpRemark,
            MeterBand::Experimenter { .. } => MeterBandKind::Experimenter,
        }
    }

    /// Configured rate.
    pub fn rate(&self) -> u32 {
        match self {
            MeterBand::Drop { rate, .. }
            | MeterBand::DscpRemark { rate, .. }
            | MeterBand::Experimenter { rate, .. } => *rate,
        }
    }

    /// Configured burst.
    pub fn burst_size(&self) -> u32 {
        match self {
            MeterBand::Drop { burst_size, .. }
            | MeterBand::DscpRemark { burst_size, .. }
            | MeterBand::Experimenter { burst_size, .. } => *burst_size,
        }
    }
}

/// Per-band counters.
#[derive(Debug, Default)]
pub struct BandCounters {
    /// Packets that hit the band.
    pub packet_band_count: AtomicU64,
    /// Bytes that hit the band.
    pub byte_band_count: AtomicU64,
}

/// One meter.
#[derive(Debug)]
pub struct Meter {
    /// Meter id.
    pub id: u32,
    /// OFPMF_* flags.
    pub flags: u16,
    /// Bands, ordered by ascending rate.
    pub bands: Vec<MeterBand>,
    /// Counters parallel to `bands`.
    pub band_counters: Vec<BandCounters>,
    /// Flows whose METER instruction references this meter.
    pub flow_count: u32,
    /// Install time.
    pub create_time: Timestamp,
    input_packet_count: AtomicU64,
    input_byte_count: AtomicU64,
}

/// Effect of metering one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterEffect {
    /// Drop the packet.
    Drop,
    /// Raise the DSCP drop precedence by this many levels.
    DscpRemark(u8),
}

/// Coloring oracle: picks the highest-precedence band that fired for the
/// current rate and burst. Provided by the realtime layer.
pub trait MeterPolicer: Send + Sync {
    /// Index into `meter.bands` of the band that fired, or `None`.
    fn classify(&self, meter: &Meter, pkt_len: usize, now: Timestamp) -> Option<usize>;
}

/// A policer that never fires a band.
#[derive(Debug, Default)]
pub struct NullPolicer;

impl MeterPolicer for NullPolicer {
    fn classify(&self, _meter: &Meter, _pkt_len: usize, _now: Timestamp) -> Option<usize> {
        None
    }
}

impl Meter {
    fn new(id: u32, flags: u16, mut bands: Vec<MeterBand>, now: Timestamp) -> Self {
        bands.sort_by_key(|b| b.rate());
        let band_counters = bands.iter().map(|_| BandCounters::default()).collect();
        Meter {
            id,
            flags,
            bands,
            band_counters,
            flow_count: 0,
            create_time: now,
            input_packet_count: AtomicU64::new(0),
            input_byte_count: AtomicU64::new(0),
        }
    }

    fn replace_bands(&mut self, flags: u16, mut bands: Vec<MeterBand>) {
        bands.sort_by_key(|b| b.rate());
        self.band_counters = bands.iter().map(|_| BandCounters::default()).collect();
        self.bands = bands;
        self.flags = flags;
    }

    /// Packets seen by this meter.
    pub fn input_packet_count(&self) -> u64 {
        self.input_packet_count.load(Ordering::Relaxed)
    }

    /// Bytes seen by this meter.
    pub fn input_byte_count(&self) -> u64 {
        self.input_byte_count.load(Ordering::Relaxed)
    }

    /// Meter one packet: bump input counters, ask the policer, bump the
    /// fired band's counters and return the effect.
    pub fn apply(
        &self,
        pkt_len: usize,
        policer: &dyn MeterPolicer,
        now: Timestamp,
    ) -> Option<MeterEffect> {
        self.input_packet_count.fetch_add(1, Ordering::Relaxed);
        self.input_byte_count
            .fetch_add(pkt_len as u64, Ordering::Relaxed);

        let idx = policer.classify(self, pkt_len, now)?;
        let band = self.bands.get(idx)?;
        if let Some(counters) = self.band_counters.get(idx) {
            counters.packet_band_count.fetch_add(1, Ordering::Relaxed);
            counters
                .byte_band_count
                .fetch_add(pkt_len as u64, Ordering::Relaxed);
        }
        match band {
            MeterBand::Drop { .. } => Some(MeterEffect::Drop),
            MeterBand::DscpRemark { prec_level, .. } => Some(MeterEffect::DscpRemark(*prec_level)),
            MeterBand::Experimenter { .. } => None,
        }
    }
}

/// DSCP remark arithmetic: Class Selector codepoints step down by
/// `prec_level` classes; AFxy codepoints add `prec_level` drop-precedence
/// steps while staying inside the class; anything else is untouched.
pub fn remark_dscp(dscp: u8, prec_level: u8) -> u8 {
    match dscp & 0x07 {
        0 => {
            if dscp >= prec_level << 3 {
                dscp - (prec_level << 3)
            } else {
                dscp
            }
        }
        2 | 4 => {
            if (dscp & 0x07) + (prec_level << 1) <= 7 {
                dscp + (prec_level << 1)
            } else {
                dscp
            }
        }
        _ => dscp,
    }
}

/// Meter stats multipart entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterStats {
    /// Meter id.
    pub meter_id: u32,
    /// Referencing flows.
    pub flow_count: u32,
    /// Packets seen.
    pub packet_in_count: u64,
    /// Bytes seen.
    pub byte_in_count: u64,
    /// Seconds alive.
    pub duration_sec: u32,
    /// Nanosecond remainder.
    pub duration_nsec: u32,
    /// Per-band (packets, bytes).
    pub band_stats: Vec<(u64, u64)>,
}

/// Meter config multipart entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterConfig {
    /// OFPMF_* flags.
    pub flags: u16,
    /// Meter id.
    pub meter_id: u32,
    /// Configured bands.
    pub bands: Vec<MeterBand>,
}

/// Meter features multipart reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterFeatures {
    /// Highest usable meter id.
    pub max_meter: u32,
    /// Bitmap of supported band kinds.
    pub band_types: u32,
    /// Bitmap of supported flags.
    pub capabilities: u32,
    /// Bands per meter.
    pub max_bands: u8,
    /// Colors supported.
    pub max_color: u8,
}

/// The per-bridge meter table.
#[derive(Debug, Default)]
pub struct MeterTable {
    meters: HashMap<u32, Meter>,
}

fn meter_err(code: u16) -> SwitchError {
    SwitchError::ofp(OfpErrorType::MeterModFailed, code)
}

impl MeterTable {
    /// Empty table.
    pub fn new() -> Self {
        MeterTable::default()
    }

    /// OFPMC_ADD.
    pub fn add(&mut self, mod_: &MeterMod, bands: Vec<MeterBand>, now: Timestamp) -> SwitchResult<()> {
        if self.meters.contains_key(&mod_.meter_id) {
            tracing::info!(meter_id = mod_.meter_id, "meter add: meter exists");
            return Err(meter_err(meter_mod_failed::METER_EXISTS));
        }
        self.meters
            .insert(mod_.meter_id, Meter::new(mod_.meter_id, mod_.flags, bands, now));
        Ok(())
    }

    /// OFPMC_MODIFY: replaces flags and bands in place, keeping counters
    /// and flow references.
    pub fn modify(&mut self, mod_: &MeterMod, bands: Vec<MeterBand>) -> SwitchResult<()> {
        match self.meters.get_mut(&mod_.meter_id) {
            Some(meter) => {
                meter.replace_bands(mod_.flags, bands);
                Ok(())
            }
            None => {
                tracing::info!(meter_id = mod_.meter_id, "meter modify: no such meter");
                Err(meter_err(meter_mod_failed::UNKNOWN_METER))
            }
        }
    }

    /// OFPMC_DELETE; OFPM_ALL clears the table.
    pub fn delete(&mut self, meter_id: u32) -> SwitchResult<()> {
        if meter_id == OFPM_ALL {
            self.meters.clear();
            return Ok(());
        }
        match self.meters.remove(&meter_id) {
            Some(_) => Ok(()),
            None => Err(meter_err(meter_mod_failed::UNKNOWN_METER)),
        }
    }

    /// Lookup by id.
    pub fn get(&self, meter_id: u32) -> Option<&Meter> {
        self.meters.get(&meter_id)
    }

    /// Mutable lookup by id.
    pub fn get_mut(&mut self, meter_id: u32) -> Option<&mut Meter> {
        self.meters.get_mut(&meter_id)
    }

    /// Number of meters installed.
    pub fn len(&self) -> usize {
        self.meters.len()
    }

    /// `true` when no meters are installed.
    pub fn is_empty(&self) -> bool {
        self.meters.is_empty()
    }

    /// Meter stats for one meter or OFPM_ALL.
    pub fn stats(&self, meter_id: u32, now: Timestamp) -> Vec<MeterStats> {
        let snapshot = |meter: &Meter| {
            let (duration_sec, duration_nsec) = now.duration_since(meter.create_time);
            MeterStats {
                meter_id: meter.id,
                flow_count: meter.flow_count,
                packet_in_count: meter.input_packet_count(),
                byte_in_count: meter.input_byte_count(),
                duration_sec,
                duration_nsec,
                band_stats: meter
                    .band_counters
                    .iter()
                    .map(|c| {
                        (
                            c.packet_band_count.load(Ordering::Relaxed),
                            c.byte_band_count.load(Ordering::Relaxed),
                        )
                    })
                    .collect(),
            }
        };
        if meter_id == OFPM_ALL {
            let mut out: Vec<MeterStats> = self.meters.values().map(snapshot).collect();
            out.sort_by_key(|s| s.meter_id);
            out
        } else {
            self.meters.get(&meter_id).map(snapshot).into_iter().collect()
        }
    }

    /// Meter config for one meter or OFPM_ALL.
    pub fn configs(&self, meter_id: u32) -> Vec<MeterConfig> {
        let snapshot = |meter: &Meter| MeterConfig {
            flags: meter.flags,
            meter_id: meter.id,
            bands: meter.bands.clone(),
        };
        if meter_id == OFPM_ALL {
            let mut out: Vec<MeterConfig> = self.meters.values().map(snapshot).collect();
            out.sort_by_key(|c| c.meter_id);
            out
        } else {
            self.meters.get(&meter_id).map(snapshot).into_iter().collect()
        }
    }

    /// Advertised meter features.
    pub fn features(&self) -> MeterFeatures {
        MeterFeatures {
            max_meter: OFPM_MAX,
            band_types: (1 << MeterBandKind::Drop as u32)
                | (1 << MeterBandKind::DscpRemark as u32),
            capabilities: (OFPMF_KBPS | OFPMF_PKTPS | OFPMF_BURST | OFPMF_STATS) as u32,
            max_bands: 16,
            max_color: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ofsw_common::openflow::MeterModCommand;

    fn meter_mod(id: u32) -> MeterMod {
        MeterMod {
            command: MeterModCommand::Add,
            flags: OFPMF_PKTPS,
            meter_id: id,
        }
    }

    fn drop_band(rate: u32) -> MeterBand {
        MeterBand::Drop {
            rate,
            burst_size: 1,
        }
    }

    #[test]
    fn test_add_exists() {
        let mut t = MeterTable::new();
        t.add(&meter_mod(1), vec![drop_band(100)], Timestamp::ZERO)
            .unwrap();
        let err = t
            .add(&meter_mod(1), vec![drop_band(100)], Timestamp::ZERO)
            .unwrap_err();
        assert_eq!(err.as_ofp().unwrap().code, meter_mod_failed::METER_EXISTS);
    }

    #[test]
    fn test_modify_unknown() {
        let mut t = MeterTable::new();
        let err = t.modify(&meter_mod(9), vec![]).unwrap_err();
        assert_eq!(err.as_ofp().unwrap().code, meter_mod_failed::UNKNOWN_METER);
    }

    #[test]
    fn test_delete_all() {
        let mut t = MeterTable::new();
        t.add(&meter_mod(1), vec![drop_band(1)], Timestamp::ZERO)
            .unwrap();
        t.add(&meter_mod(2), vec![drop_band(2)], Timestamp::ZERO)
            .unwrap();
        t.delete(OFPM_ALL).unwrap();
        assert!(t.is_empty());
    }

    #[test]
    fn test_bands_sorted_by_rate() {
        let mut t = MeterTable::new();
        t.add(
            &meter_mod(1),
            vec![drop_band(500), drop_band(10), drop_band(100)],
            Timestamp::ZERO,
        )
        .unwrap();
        let rates: Vec<u32> = t.get(1).unwrap().bands.iter().map(|b| b.rate()).collect();
        assert_eq!(rates, vec![10, 100, 500]);
    }

    struct AlwaysFirstBand;
    impl MeterPolicer for AlwaysFirstBand {
        fn classify(&self, _m: &Meter, _len: usize, _now: Timestamp) -> Option<usize> {
            Some(0)
        }
    }

    #[test]
    fn test_apply_counts_and_drop() {
        let mut t = MeterTable::new();
        t.add(&meter_mod(5), vec![drop_band(1)], Timestamp::ZERO)
            .unwrap();
        let meter = t.get(5).unwrap();
        let effect = meter.apply(64, &AlwaysFirstBand, Timestamp::ZERO);
        assert_eq!(effect, Some(MeterEffect::Drop));
        assert_eq!(meter.input_packet_count(), 1);
        assert_eq!(meter.input_byte_count(), 64);
        let stats = t.stats(5, Timestamp { sec: 1, nsec: 0 });
        assert_eq!(stats[0].band_stats[0], (1, 64));
    }

    #[test]
    fn test_apply_null_policer() {
        let mut t = MeterTable::new();
        t.add(&meter_mod(5), vec![drop_band(1)], Timestamp::ZERO)
            .unwrap();
        let meter = t.get(5).unwrap();
        assert_eq!(meter.apply(64, &NullPolicer, Timestamp::ZERO), None);
        assert_eq!(meter.input_packet_count(), 1);
    }

    #[test]
    fn test_remark_dscp_class_selector() {
        // CS6 (48) down two classes -> CS4 (32).
        assert_eq!(remark_dscp(48, 2), 32);
        // CS1 (8) cannot go below zero by three classes.
        assert_eq!(remark_dscp(8, 3), 8);
    }

    #[test]
    fn test_remark_dscp_afxy() {
        // AF11 (10) + one precedence step -> AF12 (12).
        assert_eq!(remark_dscp(10, 1), 12);
        // AF13 (14): low bits 6, already at maximum, unchanged.
        assert_eq!(remark_dscp(14, 1), 14);
    }

    #[test]
    fn test_remark_dscp_idempotent_at_max() {
        let once = remark_dscp(14, 2);
        assert_eq!(remark_dscp(once, 2), once);
    }

    #[test]
    fn test_remark_dscp_other_codepoints() {
        // EF (46): low bits 6, untouched.
        assert_eq!(remark_dscp(46, 1), 46);
    }
}
