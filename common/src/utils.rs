//! Common Utilities
//!
//! Grid dimensioning and slot timing helpers

use crate::types::{Bandwidth, SubcarrierSpacing};
use tracing::trace;

/// Number of subcarriers in one resource block
pub const SUBCARRIERS_PER_RB: u32 = 12;

/// Calculate resource blocks from bandwidth and subcarrier spacing
pub fn calculate_nrb(bandwidth_hz: u32, scs_khz: u16) -> u16 {
    let scs_hz = scs_khz as u32 * 1000;
    let total_subcarriers = bandwidth_hz / scs_hz;
    let nrb = total_subcarriers / SUBCARRIERS_PER_RB;

    trace!("Calculated {} RBs for {}Hz bandwidth with {}kHz SCS",
           nrb, bandwidth_hz, scs_khz);

    nrb as u16
}

/// Number of complete resource block groups in the carrier
pub fn calculate_nrbg(bandwidth: Bandwidth, scs: SubcarrierSpacing, rb_per_rbg: u32) -> u32 {
    if rb_per_rbg == 0 {
        return 0;
    }
    let nrb = calculate_nrb(bandwidth.as_hz(), scs.khz()) as u32;
    let nrbg = nrb / rb_per_rbg;

    trace!("{} RBs grouped into {} RBGs of {} RBs", nrb, nrbg, rb_per_rbg);

    nrbg
}

/// Time utilities for slot/frame calculations
pub mod time {
    use crate::types::SubcarrierSpacing;

    /// Slot duration in microseconds for different SCS
    pub fn slot_duration_us(scs: SubcarrierSpacing) -> u32 {
        match scs {
            SubcarrierSpacing::Scs15 => 1000,   // 1 ms
            SubcarrierSpacing::Scs30 => 500,    // 0.5 ms
            SubcarrierSpacing::Scs60 => 250,    // 0.25 ms
            SubcarrierSpacing::Scs120 => 125,   // 0.125 ms
            SubcarrierSpacing::Scs240 => 62,    // 0.0625 ms (approximated)
        }
    }

    /// Number of slots per frame (10ms)
    pub fn slots_per_frame(scs: SubcarrierSpacing) -> u16 {
        10 << scs.numerology()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_nrb() {
        // 20 MHz bandwidth with 30 kHz SCS
        assert_eq!(calculate_nrb(20_000_000, 30), 55);

        // 100 MHz bandwidth with 30 kHz SCS
        assert_eq!(calculate_nrb(100_000_000, 30), 277);
    }

    #[test]
    fn test_calculate_nrbg() {
        // 55 RBs in groups of 4 leave 3 RBs unused
        assert_eq!(calculate_nrbg(Bandwidth::Bw20, SubcarrierSpacing::Scs30, 4), 13);
        assert_eq!(calculate_nrbg(Bandwidth::Bw20, SubcarrierSpacing::Scs30, 0), 0);
    }

    #[test]
    fn test_slot_duration() {
        assert_eq!(time::slot_duration_us(SubcarrierSpacing::Scs15), 1000);
        assert_eq!(time::slot_duration_us(SubcarrierSpacing::Scs30), 500);
        assert_eq!(time::slot_duration_us(SubcarrierSpacing::Scs120), 125);
        assert_eq!(time::slots_per_frame(SubcarrierSpacing::Scs120), 80);
    }
}
