//! OFDMA allocation (downlink)
//!
//! ```text
//! (f)
//! ^
//! |=|======|=======|=|
//! |C| U  1 | U  4  |C|
//! |T|------|-------|T|
//! |R| U  2 | U  5  |R|
//! |L|------|-------|L|
//! | | U  3 | U  6  | |
//! |----------------------------> (t)
//!    beam 1  beam 2
//! ```
//!
//! Symbols are first split among beams in proportion to the bytes each beam
//! has queued. Inside a beam, UEs compete for RBGs that span all the symbols
//! of the beam, so UEs of one beam share the symbols on disjoint RBG ranges
//! and beams never share a symbol.

use super::policy::{ActiveUe, FtResources, PriorityPolicy, SchedContext};
use super::tdma::{assign_round, ActiveUeMap, BeamSymbolMap};
use common::types::{BeamId, Direction};
use tracing::{debug, trace};

/// Split `total` symbols proportionally to `weights` with the
/// largest-remainder method
///
/// Floors are handed out first; the symbols left over go one by one to the
/// largest fractional remainders, ties to the lower beam. Every beam of
/// `weights` appears in the result, with 0 when its weight is 0. The result
/// sums to `total` whenever any weight is positive.
pub fn largest_remainder(total: u32, weights: &[(BeamId, u64)]) -> BeamSymbolMap {
    let sum: u64 = weights.iter().map(|(_, w)| w).sum();
    let mut split: BeamSymbolMap = weights.iter().map(|(beam, _)| (*beam, 0)).collect();
    if sum == 0 || total == 0 {
        return split;
    }

    // (remainder numerator, beam) of every beam
    let mut remainders = Vec::with_capacity(weights.len());
    let mut handed = 0u32;
    for (beam, weight) in weights {
        let exact = u64::from(total) * weight;
        let floor = (exact / sum) as u32;
        handed += floor;
        *split.entry(*beam).or_insert(0) += floor;
        if *weight > 0 {
            remainders.push((exact % sum, *beam));
        }
    }

    remainders.sort_by(|(lhs_rem, lhs_beam), (rhs_rem, rhs_beam)| {
        rhs_rem.cmp(lhs_rem).then(lhs_beam.cmp(rhs_beam))
    });
    for (_, beam) in remainders.iter().take((total - handed) as usize) {
        *split.entry(*beam).or_insert(0) += 1;
    }
    split
}

/// Symbols each beam gets, from the bytes queued by its UEs
pub fn sym_per_beam(sym_avail: u32, active: &ActiveUeMap<'_>) -> BeamSymbolMap {
    let weights: Vec<(BeamId, u64)> = active
        .iter()
        .map(|(beam, ues)| (*beam, ues.iter().map(|ue| u64::from(ue.buffer)).sum()))
        .collect();
    let split = largest_remainder(sym_avail, &weights);
    for (beam, sym) in &split {
        debug!("{} gets {} symbols", beam, sym);
    }
    split
}

/// Assign the DL grid of `sym_avail` symbols and `bandwidth_rbg` RBGs
///
/// Within each beam the unit of assignment is one RBG spanning all the
/// symbols of the beam; `sym` of a winning UE is the beam's symbol count.
pub fn assign_dl_rbg_ofdma(
    sym_avail: u32,
    bandwidth_rbg: u32,
    active: &mut ActiveUeMap<'_>,
    policy: &dyn PriorityPolicy,
    ctx: &SchedContext<'_>,
) -> BeamSymbolMap {
    let direction = Direction::Dl;
    let split = sym_per_beam(sym_avail, active);

    for (beam, ues) in active.iter_mut() {
        let beam_sym = split.get(beam).copied().unwrap_or(0);
        if beam_sym == 0 || bandwidth_rbg == 0 {
            continue;
        }

        let mut ues: Vec<&mut ActiveUe<'_>> = ues.iter_mut().collect();
        let assignable = FtResources::new(beam_sym * bandwidth_rbg, beam_sym);
        for ue in ues.iter_mut() {
            policy.before_sched(direction, ue, assignable, ctx);
        }

        let unit = FtResources::new(beam_sym, beam_sym);
        let mut total = FtResources::default();
        let mut rbg_left = bandwidth_rbg;
        while rbg_left > 0 {
            let winner = assign_round(direction, &mut ues, unit, &mut total, policy, ctx, |state, total| {
                state.rbg += beam_sym;
                state.sym = beam_sym;
                total.rbg += beam_sym;
                total.sym = beam_sym;
            });
            if winner.is_none() {
                trace!("{}: all UEs satisfied with {} RBGs left", beam, rbg_left);
                break;
            }
            rbg_left -= 1;
        }
    }

    split
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::policy::RoundRobin;
    use crate::test_utils::TestAmc;
    use crate::ue_info::UeInfo;
    use common::types::Rnti;

    #[test]
    fn test_split_proportional() {
        let split = largest_remainder(12, &[(BeamId(0), 100), (BeamId(1), 300)]);
        assert_eq!(split[&BeamId(0)], 3);
        assert_eq!(split[&BeamId(1)], 9);
    }

    #[test]
    fn test_split_leftover_by_remainder() {
        // exact shares 2.7 and 9.3: floors 2 + 9, leftover to the 0.7
        let split = largest_remainder(12, &[(BeamId(0), 90), (BeamId(1), 310)]);
        assert_eq!(split[&BeamId(0)], 3);
        assert_eq!(split[&BeamId(1)], 9);
    }

    #[test]
    fn test_split_ties_go_to_lower_beam() {
        let split = largest_remainder(13, &[(BeamId(4), 50), (BeamId(2), 50)]);
        assert_eq!(split[&BeamId(2)], 7);
        assert_eq!(split[&BeamId(4)], 6);
    }

    #[test]
    fn test_split_zero_weight_beam_gets_nothing() {
        let split = largest_remainder(13, &[(BeamId(0), 0), (BeamId(1), 7), (BeamId(2), 3)]);
        assert_eq!(split[&BeamId(0)], 0);
        assert_eq!(split.values().sum::<u32>(), 13);

        let empty = largest_remainder(13, &[(BeamId(0), 0)]);
        assert_eq!(empty[&BeamId(0)], 0);
    }

    #[test]
    fn test_beams_never_exceed_their_grid() {
        let amc = TestAmc;
        let ctx = SchedContext { amc: &amc, rb_per_rbg: 1 };
        let mut ues = vec![
            UeInfo::new(Rnti(1), BeamId(0), 4, 1),
            UeInfo::new(Rnti(2), BeamId(0), 4, 1),
            UeInfo::new(Rnti(3), BeamId(1), 4, 1),
        ];
        let buffers = [1_000, 1_000, 6_000];
        let mut active = ActiveUeMap::new();
        for (ue, &buffer) in ues.iter_mut().zip(&buffers) {
            active.entry(ue.beam_id).or_insert_with(Vec::new).push(ActiveUe { ue, buffer });
        }

        let split = assign_dl_rbg_ofdma(12, 10, &mut active, &RoundRobin, &ctx);
        drop(active);

        assert_eq!(split[&BeamId(0)], 3);
        assert_eq!(split[&BeamId(1)], 9);

        // beam 0: two UEs alternate over 10 RBGs of 3 symbols
        for ue in &ues[..2] {
            let dl = ue.dir(Direction::Dl);
            assert_eq!((dl.rbg, dl.sym), (15, 3));
        }
        let beam0: u32 = ues[..2].iter().map(|ue| ue.dir(Direction::Dl).rbg).sum();
        assert!(beam0 <= 10 * split[&BeamId(0)]);

        let dl = ues[2].dir(Direction::Dl);
        assert_eq!((dl.rbg, dl.sym), (90, 9));
    }

    #[test]
    fn test_small_buffer_uses_few_rbgs() {
        let amc = TestAmc;
        let ctx = SchedContext { amc: &amc, rb_per_rbg: 1 };
        let mut ue = UeInfo::new(Rnti(1), BeamId(0), 4, 2);
        let mut active = ActiveUeMap::new();
        active.insert(BeamId(0), vec![ActiveUe { ue: &mut ue, buffer: 20 }]);

        assign_dl_rbg_ofdma(12, 10, &mut active, &RoundRobin, &ctx);
        drop(active);

        // one RBG over 12 symbols carries 24 bytes at MCS 2
        let dl = ue.dir(Direction::Dl);
        assert_eq!((dl.rbg, dl.sym), (12, 12));
    }
}
