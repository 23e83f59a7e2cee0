//! UE representation used by the schedulers
//!
//! Stores everything a scheduler needs to know about one UE: the buffer
//! status of its logical channels, the resources it got in the current slot,
//! its MCS and transport block size, and its HARQ processes. Slot-dependent
//! fields are reset by [`UeInfo::reset_for_new_slot`] before every
//! allocation.

use crate::harq::HarqTable;
use crate::lcg::{self, LcgMap};
use common::types::{BeamId, Direction, HarqId, Rnti};
use interfaces::message_types::{Dci, LcPdu};
use interfaces::LinkAdaptation;
use std::collections::BTreeMap;

/// Transport block waiting for HARQ feedback
#[derive(Debug, Clone)]
pub struct InFlightTb {
    /// DCI of the last transmission
    pub dci: Dci,
    /// Transmissions done so far
    pub tx_count: u8,
    /// A NACK arrived and the block must be sent again
    pub needs_retx: bool,
}

/// Throughput bookkeeping used by the proportional-fair policy
///
/// Throughputs are in bytes per symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PfMetrics {
    /// Moving average, updated while the slot is being scheduled
    pub avg_tput: f64,
    /// Moving average at the end of the previous slot
    pub last_avg_tput: f64,
    /// Throughput of the resources assigned in this slot
    pub curr_tput: f64,
    /// Throughput the UE would get with all the assignable resources
    pub potential_tput: f64,
}

/// State of one direction (DL or UL) of a UE
#[derive(Debug, Clone)]
pub struct DirectionState {
    /// RBG units assigned in this slot (one unit = one RBG for one symbol)
    pub rbg: u32,
    /// New-data symbols assigned in this slot
    pub sym: u32,
    /// MCS in use
    pub mcs: u8,
    /// Last reported wideband CQI
    pub cqi: Option<u8>,
    /// RBG units used by retransmissions in this slot
    pub retx_rbg: u32,
    /// Logical channel groups
    pub lcgs: LcgMap,
    /// HARQ processes
    pub harq: HarqTable<Rnti, LcPdu>,
    /// Transport blocks waiting for feedback, by HARQ id
    pub in_flight: BTreeMap<HarqId, InFlightTb>,
    /// Proportional-fair metrics
    pub pf: PfMetrics,
    tb_size: u32,
}

impl DirectionState {
    fn new(harq_processes: u8, mcs: u8) -> Self {
        Self {
            rbg: 0,
            sym: 0,
            mcs,
            cqi: None,
            retx_rbg: 0,
            lcgs: LcgMap::new(),
            harq: HarqTable::with_capacity(harq_processes),
            in_flight: BTreeMap::new(),
            pf: PfMetrics::default(),
            tb_size: 0,
        }
    }

    /// Transport block size derived for this slot, in bytes
    pub fn tb_size(&self) -> u32 {
        self.tb_size
    }

    /// Bytes waiting in all the logical channels
    pub fn buffer_size(&self) -> u32 {
        lcg::buffer_size(&self.lcgs)
    }
}

/// The representation of a UE for the schedulers
#[derive(Debug, Clone)]
pub struct UeInfo {
    rnti: Rnti,
    /// Beam serving the UE (kept updated by the MAC)
    pub beam_id: BeamId,
    dl: DirectionState,
    ul: DirectionState,
}

impl UeInfo {
    /// Create a new UE representation
    pub fn new(rnti: Rnti, beam_id: BeamId, harq_processes: u8, initial_mcs: u8) -> Self {
        Self {
            rnti,
            beam_id,
            dl: DirectionState::new(harq_processes, initial_mcs),
            ul: DirectionState::new(harq_processes, initial_mcs),
        }
    }

    /// RNTI of the UE
    pub fn rnti(&self) -> Rnti {
        self.rnti
    }

    /// State of one direction
    pub fn dir(&self, direction: Direction) -> &DirectionState {
        match direction {
            Direction::Dl => &self.dl,
            Direction::Ul => &self.ul,
        }
    }

    /// Mutable state of one direction
    pub fn dir_mut(&mut self, direction: Direction) -> &mut DirectionState {
        match direction {
            Direction::Dl => &mut self.dl,
            Direction::Ul => &mut self.ul,
        }
    }

    /// Reset the slot-dependent information of `direction`
    pub fn reset_for_new_slot(&mut self, direction: Direction) {
        let state = self.dir_mut(direction);
        state.rbg = 0;
        state.sym = 0;
        state.retx_rbg = 0;
        state.tb_size = 0;
        state.pf.last_avg_tput = state.pf.avg_tput;
        state.pf.curr_tput = 0.0;
        state.pf.potential_tput = 0.0;
    }

    /// Bytes the currently assigned RBG units would carry
    ///
    /// Side-effect free: used while the allocation is still iterating.
    pub fn achievable_bytes(&self, direction: Direction, amc: &dyn LinkAdaptation, rb_per_rbg: u32) -> u32 {
        let state = self.dir(direction);
        if state.rbg == 0 {
            return 0;
        }
        amc.tb_size(state.mcs, state.rbg * rb_per_rbg)
    }

    /// Derive the transport block size from the final RBG count of the slot
    pub fn derive_tb_size(&mut self, direction: Direction, amc: &dyn LinkAdaptation, rb_per_rbg: u32) -> u32 {
        let tb_size = self.achievable_bytes(direction, amc, rb_per_rbg);
        self.dir_mut(direction).tb_size = tb_size;
        tb_size
    }

    /// Resources were assigned but cannot carry a byte: no DCI this slot
    pub fn clear_tb_size(&mut self, direction: Direction) {
        self.dir_mut(direction).tb_size = 0;
    }

    /// Bytes waiting in `direction`
    pub fn buffer_size(&self, direction: Direction) -> u32 {
        self.dir(direction).buffer_size()
    }

    /// Whether a NACKed transport block waits for a retransmission
    pub fn has_pending_retx(&self, direction: Direction) -> bool {
        self.dir(direction).in_flight.values().any(|tb| tb.needs_retx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestAmc;

    #[test]
    fn test_tb_size_follows_rbg() {
        let amc = TestAmc;
        let mut ue = UeInfo::new(Rnti(1), BeamId(0), 16, 4);

        assert_eq!(ue.derive_tb_size(Direction::Dl, &amc, 2), 0);

        ue.dir_mut(Direction::Dl).rbg = 10;
        assert_eq!(ue.achievable_bytes(Direction::Dl, &amc, 2), 80);
        assert_eq!(ue.dir(Direction::Dl).tb_size(), 0);
        assert_eq!(ue.derive_tb_size(Direction::Dl, &amc, 2), 80);
        assert_eq!(ue.dir(Direction::Dl).tb_size(), 80);
        // the other direction is untouched
        assert_eq!(ue.dir(Direction::Ul).tb_size(), 0);

        ue.clear_tb_size(Direction::Dl);
        assert_eq!(ue.dir(Direction::Dl).tb_size(), 0);
    }

    #[test]
    fn test_zero_mcs_derives_zero_tb_size() {
        let amc = TestAmc;
        let mut ue = UeInfo::new(Rnti(1), BeamId(0), 16, 0);
        ue.dir_mut(Direction::Ul).rbg = 10;
        assert_eq!(ue.derive_tb_size(Direction::Ul, &amc, 1), 0);
    }

    #[test]
    fn test_reset_for_new_slot() {
        let amc = TestAmc;
        let mut ue = UeInfo::new(Rnti(1), BeamId(0), 16, 4);
        {
            let dl = ue.dir_mut(Direction::Dl);
            dl.rbg = 8;
            dl.sym = 2;
            dl.retx_rbg = 4;
            dl.pf.avg_tput = 12.5;
            dl.pf.curr_tput = 3.0;
        }
        ue.derive_tb_size(Direction::Dl, &amc, 1);
        ue.dir_mut(Direction::Ul).rbg = 3;

        ue.reset_for_new_slot(Direction::Dl);
        let dl = ue.dir(Direction::Dl);
        assert_eq!((dl.rbg, dl.sym, dl.retx_rbg, dl.tb_size()), (0, 0, 0, 0));
        assert_eq!(dl.pf.last_avg_tput, 12.5);
        assert_eq!(dl.pf.curr_tput, 0.0);
        assert_eq!(dl.mcs, 4);
        assert_eq!(ue.dir(Direction::Ul).rbg, 3);
    }
}
