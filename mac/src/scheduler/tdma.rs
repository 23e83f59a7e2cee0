//! TDMA allocation
//!
//! ```text
//! (f)
//! ^
//! |=|===|===|===|===|=|
//! |C| U | U | U | U |C|
//! |T| E | E | E | E |T|
//! |R|   |   |   |   |R|
//! |L| 1 | 2 | 3 | 4 |L|
//! |----------------------------> (t)
//! ```
//!
//! Each round hands the whole band, for one symbol, to the UE with the highest
//! priority that still has unserved bytes.

use super::policy::{ActiveUe, FtResources, PriorityPolicy, SchedContext};
use crate::ue_info::DirectionState;
use common::types::{BeamId, Direction};
use std::collections::BTreeMap;
use tracing::trace;

/// Symbols given to each beam
pub type BeamSymbolMap = BTreeMap<BeamId, u32>;

/// Active UEs grouped by the beam serving them
pub type ActiveUeMap<'a> = BTreeMap<BeamId, Vec<ActiveUe<'a>>>;

/// Smallest transport block, in bytes, worth scheduling
pub const MIN_TB_SIZE: u32 = 7;

/// Whether the resources assigned so far already carry the UE's bytes
pub(crate) fn is_satisfied(direction: Direction, ue: &ActiveUe<'_>, ctx: &SchedContext<'_>) -> bool {
    ue.ue.achievable_bytes(direction, ctx.amc, ctx.rb_per_rbg) >= ue.buffer.max(MIN_TB_SIZE)
}

/// Run one round: order the UEs, give `unit` to the first eligible one and
/// notify the policy. Returns the beam of the winner, or `None` when every
/// UE is satisfied.
pub(crate) fn assign_round(
    direction: Direction,
    ues: &mut [&mut ActiveUe<'_>],
    unit: FtResources,
    total: &mut FtResources,
    policy: &dyn PriorityPolicy,
    ctx: &SchedContext<'_>,
    grant: impl FnOnce(&mut DirectionState, &mut FtResources),
) -> Option<BeamId> {
    ues.sort_by(|lhs, rhs| policy.compare(direction, lhs, rhs));

    let eligible: Vec<bool> = ues.iter().map(|ue| !is_satisfied(direction, ue, ctx)).collect();
    let winner = eligible.iter().position(|&e| e)?;

    grant(ues[winner].ue.dir_mut(direction), total);
    let beam_id = ues[winner].ue.beam_id;
    trace!("{} {}: UE {} assigned {:?}, total {:?}",
           policy.name(), direction, ues[winner].ue.rnti(), unit, total);

    policy.record_assignment(direction, &mut *ues[winner], unit, *total, ctx);
    for (i, ue) in ues.iter_mut().enumerate() {
        if i != winner && eligible[i] {
            policy.record_skip(direction, ue, unit, *total, ctx);
        }
    }
    Some(beam_id)
}

/// Assign `sym_avail` symbols, one at a time, each spanning all
/// `rbg_per_sym` RBGs of the band
///
/// The UEs of all beams compete together; the result says how many symbols
/// each beam ended up with.
pub fn assign_rbg_tdma(
    direction: Direction,
    sym_avail: u32,
    rbg_per_sym: u32,
    active: &mut ActiveUeMap<'_>,
    policy: &dyn PriorityPolicy,
    ctx: &SchedContext<'_>,
) -> BeamSymbolMap {
    let mut sym_per_beam = BeamSymbolMap::new();
    let mut ues: Vec<&mut ActiveUe<'_>> = active.values_mut().flatten().collect();
    if ues.is_empty() || sym_avail == 0 || rbg_per_sym == 0 {
        return sym_per_beam;
    }

    let assignable = FtResources::new(rbg_per_sym * sym_avail, sym_avail);
    for ue in ues.iter_mut() {
        policy.before_sched(direction, ue, assignable, ctx);
    }

    let unit = FtResources::new(rbg_per_sym, 1);
    let mut total = FtResources::default();
    let mut sym_left = sym_avail;
    while sym_left > 0 {
        let winner = assign_round(direction, &mut ues, unit, &mut total, policy, ctx, |state, total| {
            state.rbg += rbg_per_sym;
            state.sym += 1;
            total.rbg += rbg_per_sym;
            total.sym += 1;
        });
        let Some(beam_id) = winner else {
            trace!("{}: all UEs satisfied with {} symbols left", direction, sym_left);
            break;
        };
        sym_left -= 1;
        *sym_per_beam.entry(beam_id).or_insert(0) += 1;
    }

    sym_per_beam
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::policy::{MaxRate, RoundRobin};
    use crate::test_utils::TestAmc;
    use crate::ue_info::UeInfo;
    use common::types::Rnti;

    fn active_map<'a>(ues: &'a mut [UeInfo], buffers: &[u32]) -> ActiveUeMap<'a> {
        let mut map = ActiveUeMap::new();
        for (ue, &buffer) in ues.iter_mut().zip(buffers) {
            map.entry(ue.beam_id).or_insert_with(Vec::new).push(ActiveUe { ue, buffer });
        }
        map
    }

    #[test]
    fn test_round_robin_alternates_symbols() {
        let amc = TestAmc;
        let ctx = SchedContext { amc: &amc, rb_per_rbg: 1 };
        let mut ues = vec![
            UeInfo::new(Rnti(1), BeamId(0), 4, 1),
            UeInfo::new(Rnti(2), BeamId(1), 4, 1),
        ];
        let mut active = active_map(&mut ues, &[10_000, 10_000]);

        let sym_per_beam = assign_rbg_tdma(Direction::Dl, 12, 10, &mut active, &RoundRobin, &ctx);
        drop(active);

        assert_eq!(sym_per_beam.get(&BeamId(0)), Some(&6));
        assert_eq!(sym_per_beam.get(&BeamId(1)), Some(&6));
        for ue in &ues {
            assert_eq!(ue.dir(Direction::Dl).sym, 6);
            assert_eq!(ue.dir(Direction::Dl).rbg, 60);
            assert_eq!(ue.dir(Direction::Ul).rbg, 0);
        }
    }

    #[test]
    fn test_satisfied_ue_stops_receiving() {
        let amc = TestAmc;
        let ctx = SchedContext { amc: &amc, rb_per_rbg: 1 };
        // 10 RBGs at MCS 1 carry 10 bytes per symbol
        let mut ues = vec![
            UeInfo::new(Rnti(1), BeamId(0), 4, 1),
            UeInfo::new(Rnti(2), BeamId(0), 4, 1),
        ];
        let mut active = active_map(&mut ues, &[25, 5]);

        let sym_per_beam = assign_rbg_tdma(Direction::Ul, 12, 10, &mut active, &RoundRobin, &ctx);
        drop(active);

        // UE 2 wants 5 bytes (rounded up to the minimum TB), one symbol does it;
        // UE 1 needs three symbols for 25 bytes
        assert_eq!(ues[0].dir(Direction::Ul).sym, 3);
        assert_eq!(ues[1].dir(Direction::Ul).sym, 1);
        assert_eq!(sym_per_beam.get(&BeamId(0)), Some(&4));
    }

    #[test]
    fn test_max_rate_serves_best_channel_first() {
        let amc = TestAmc;
        let ctx = SchedContext { amc: &amc, rb_per_rbg: 1 };
        let mut ues = vec![
            UeInfo::new(Rnti(1), BeamId(0), 4, 2),
            UeInfo::new(Rnti(2), BeamId(0), 4, 8),
        ];
        let mut active = active_map(&mut ues, &[10_000, 160]);

        assign_rbg_tdma(Direction::Dl, 5, 10, &mut active, &MaxRate, &ctx);
        drop(active);

        // UE 2 carries 80 bytes per symbol and needs two, UE 1 gets the rest
        assert_eq!(ues[1].dir(Direction::Dl).sym, 2);
        assert_eq!(ues[0].dir(Direction::Dl).sym, 3);
    }

    #[test]
    fn test_no_symbols_no_assignment() {
        let amc = TestAmc;
        let ctx = SchedContext { amc: &amc, rb_per_rbg: 1 };
        let mut ues = vec![UeInfo::new(Rnti(1), BeamId(0), 4, 1)];
        let mut active = active_map(&mut ues, &[100]);

        let sym_per_beam = assign_rbg_tdma(Direction::Dl, 0, 10, &mut active, &RoundRobin, &ctx);
        assert!(sym_per_beam.is_empty());
    }
}
