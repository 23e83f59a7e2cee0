//! DCI construction
//!
//! Once the allocation converged, the resources of every UE are laid out on
//! the slot grid by walking a cursor over it. The cursor starts at the first
//! data symbol and RBG 0.

use crate::harq::redundancy_version;
use crate::ue_info::UeInfo;
use common::types::{BeamId, Direction, HarqId};
use interfaces::message_types::{Dci, DciFormat};
use tracing::debug;

/// Point in the time-frequency grid of a slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointInFtPlane {
    /// Starting RBG
    pub rbg: u32,
    /// Starting symbol
    pub sym: u32,
}

impl PointInFtPlane {
    /// Create a new cursor
    pub fn new(rbg: u32, sym: u32) -> Self {
        Self { rbg, sym }
    }
}

/// DCI for a UE holding the whole band over its symbols
///
/// The cursor moves forward in time by the symbols of the UE.
pub fn create_tdma_dci(
    spoint: &mut PointInFtPlane,
    ue: &UeInfo,
    direction: Direction,
    bandwidth_rbg: u32,
    harq_id: HarqId,
) -> Dci {
    let state = ue.dir(direction);
    let dci = Dci {
        rnti: ue.rnti(),
        beam_id: ue.beam_id,
        format: DciFormat::from(direction),
        harq_id,
        start_rbg: 0,
        num_rbg: bandwidth_rbg,
        start_sym: spoint.sym,
        num_sym: state.sym,
        mcs: state.mcs,
        tb_size: state.tb_size(),
        ndi: true,
        rv: 0,
    };
    debug!("UE {} {} DCI: RBG 0..{} symbols {}..{} MCS {} TBS {}",
           ue.rnti(), direction, bandwidth_rbg, dci.start_sym, dci.start_sym + dci.num_sym,
           dci.mcs, dci.tb_size);
    spoint.sym += state.sym;
    dci
}

/// DCI for a UE holding a range of RBGs over all the symbols of its beam
///
/// The cursor moves forward in frequency by the RBGs of the UE.
pub fn create_ofdma_dci(spoint: &mut PointInFtPlane, ue: &UeInfo, direction: Direction, harq_id: HarqId) -> Dci {
    let state = ue.dir(direction);
    let num_rbg = state.rbg / state.sym.max(1);
    let dci = Dci {
        rnti: ue.rnti(),
        beam_id: ue.beam_id,
        format: DciFormat::from(direction),
        harq_id,
        start_rbg: spoint.rbg,
        num_rbg,
        start_sym: spoint.sym,
        num_sym: state.sym,
        mcs: state.mcs,
        tb_size: state.tb_size(),
        ndi: true,
        rv: 0,
    };
    debug!("UE {} {} DCI: RBG {}..{} symbols {}..{} MCS {} TBS {}",
           ue.rnti(), direction, dci.start_rbg, dci.start_rbg + num_rbg,
           dci.start_sym, dci.start_sym + dci.num_sym, dci.mcs, dci.tb_size);
    spoint.rbg += num_rbg;
    dci
}

/// Move the cursor past the symbols of the beam just laid out
pub fn change_beam(spoint: &mut PointInFtPlane, sym_of_beam: u32) {
    spoint.rbg = 0;
    spoint.sym += sym_of_beam;
}

/// DCI retransmitting the block of `prev`: same RBGs, MCS and size, placed
/// at the cursor's symbol. `tx_count` is the number of transmissions done
/// so far.
pub fn create_retx_dci(spoint: &mut PointInFtPlane, prev: &Dci, beam_id: BeamId, tx_count: u8) -> Dci {
    let dci = Dci {
        beam_id,
        start_sym: spoint.sym,
        ndi: false,
        rv: redundancy_version(tx_count),
        ..prev.clone()
    };
    debug!("UE {} retransmission of HARQ id {} RV {} at symbol {}",
           dci.rnti, dci.harq_id, dci.rv, dci.start_sym);
    spoint.sym += dci.num_sym;
    dci
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::Rnti;

    fn ue_with(rnti: u16, rbg: u32, sym: u32) -> UeInfo {
        let mut ue = UeInfo::new(Rnti(rnti), BeamId(1), 4, 5);
        let dl = ue.dir_mut(Direction::Dl);
        dl.rbg = rbg;
        dl.sym = sym;
        ue
    }

    #[test]
    fn test_tdma_dcis_follow_each_other_in_time() {
        let mut spoint = PointInFtPlane::new(0, 1);
        let a = ue_with(1, 20, 2);
        let b = ue_with(2, 30, 3);

        let first = create_tdma_dci(&mut spoint, &a, Direction::Dl, 10, 0);
        let second = create_tdma_dci(&mut spoint, &b, Direction::Dl, 10, 3);

        assert_eq!((first.start_sym, first.num_sym, first.num_rbg), (1, 2, 10));
        assert_eq!((second.start_sym, second.num_sym), (3, 3));
        assert_eq!(second.harq_id, 3);
        assert_eq!(spoint, PointInFtPlane::new(0, 6));
        assert!(first.ndi);
        assert_eq!(first.format, DciFormat::Dl);
    }

    #[test]
    fn test_ofdma_dcis_follow_each_other_in_frequency() {
        let mut spoint = PointInFtPlane::new(0, 1);
        let a = ue_with(1, 12, 4);
        let b = ue_with(2, 8, 4);

        let first = create_ofdma_dci(&mut spoint, &a, Direction::Dl, 0);
        let second = create_ofdma_dci(&mut spoint, &b, Direction::Dl, 1);
        assert_eq!((first.start_rbg, first.num_rbg, first.start_sym, first.num_sym), (0, 3, 1, 4));
        assert_eq!((second.start_rbg, second.num_rbg, second.start_sym), (3, 2, 1));

        change_beam(&mut spoint, 4);
        assert_eq!(spoint, PointInFtPlane::new(0, 5));
    }

    #[test]
    fn test_retx_dci_keeps_layout() {
        let mut spoint = PointInFtPlane::new(0, 1);
        let ue = ue_with(1, 20, 2);
        let first = create_tdma_dci(&mut spoint, &ue, Direction::Dl, 10, 7);

        let mut spoint = PointInFtPlane::new(0, 4);
        let retx = create_retx_dci(&mut spoint, &first, BeamId(3), 1);
        assert_eq!((retx.start_rbg, retx.num_rbg, retx.num_sym), (0, 10, 2));
        assert_eq!((retx.start_sym, retx.harq_id, retx.beam_id), (4, 7, BeamId(3)));
        assert!(!retx.ndi);
        assert_eq!(retx.rv, 2);
        assert_eq!(spoint.sym, 6);
    }
}
