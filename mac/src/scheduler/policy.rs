//! UE priority policies
//!
//! The allocation algorithms in [`super::tdma`] and [`super::ofdma`] are
//! fixed; what changes between round-robin, proportional-fair and max-rate
//! scheduling is only how UEs are ordered and how each UE's sort key evolves
//! as resources are handed out. A [`PriorityPolicy`] supplies exactly that.

use crate::ue_info::UeInfo;
use common::types::Direction;
use interfaces::LinkAdaptation;
use std::cmp::Ordering;
use std::fmt::Debug;

/// An amount of time-frequency resources
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FtResources {
    /// RBG units (one RBG for one symbol)
    pub rbg: u32,
    /// Symbols
    pub sym: u32,
}

impl FtResources {
    /// Create a new resource amount
    pub fn new(rbg: u32, sym: u32) -> Self {
        Self { rbg, sym }
    }
}

/// A UE taking part in the allocation of the current slot
#[derive(Debug)]
pub struct ActiveUe<'a> {
    /// The UE
    pub ue: &'a mut UeInfo,
    /// Bytes the UE wants to send in this direction
    pub buffer: u32,
}

/// Read-only context handed to policy hooks
#[derive(Clone, Copy)]
pub struct SchedContext<'a> {
    /// Link adaptation model
    pub amc: &'a dyn LinkAdaptation,
    /// RBs in one RBG
    pub rb_per_rbg: u32,
}

/// Ordering and bookkeeping of a scheduling discipline
pub trait PriorityPolicy: Send + Sync + Debug {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Order two UEs: `Ordering::Less` means `lhs` has the higher priority
    fn compare(&self, direction: Direction, lhs: &ActiveUe<'_>, rhs: &ActiveUe<'_>) -> Ordering;

    /// Called once per UE before the first round, with the resources that
    /// could be assigned to it in this allocation
    fn before_sched(
        &self,
        _direction: Direction,
        _ue: &mut ActiveUe<'_>,
        _assignable: FtResources,
        _ctx: &SchedContext<'_>,
    ) {
    }

    /// The UE won a round and got `assigned`; `total` is everything handed
    /// out so far in this allocation
    fn record_assignment(
        &self,
        _direction: Direction,
        _ue: &mut ActiveUe<'_>,
        _assigned: FtResources,
        _total: FtResources,
        _ctx: &SchedContext<'_>,
    ) {
    }

    /// The UE was eligible but `not_assigned` went to another UE
    fn record_skip(
        &self,
        _direction: Direction,
        _ue: &mut ActiveUe<'_>,
        _not_assigned: FtResources,
        _total: FtResources,
        _ctx: &SchedContext<'_>,
    ) {
    }
}

/// Round robin: the UE with the fewest RBG units so far goes first
#[derive(Debug, Clone, Default)]
pub struct RoundRobin;

impl PriorityPolicy for RoundRobin {
    fn name(&self) -> &'static str {
        "rr"
    }

    fn compare(&self, direction: Direction, lhs: &ActiveUe<'_>, rhs: &ActiveUe<'_>) -> Ordering {
        lhs.ue.dir(direction).rbg.cmp(&rhs.ue.dir(direction).rbg)
    }
}

/// Max rate: the UE with the highest MCS goes first
#[derive(Debug, Clone, Default)]
pub struct MaxRate;

impl PriorityPolicy for MaxRate {
    fn name(&self) -> &'static str {
        "mr"
    }

    fn compare(&self, direction: Direction, lhs: &ActiveUe<'_>, rhs: &ActiveUe<'_>) -> Ordering {
        rhs.ue.dir(direction).mcs.cmp(&lhs.ue.dir(direction).mcs)
    }
}

/// Proportional fair: potential throughput over average throughput
#[derive(Debug, Clone)]
pub struct ProportionalFair {
    /// Averaging window of the throughput, in slots
    pub time_window: f64,
    /// Exponent applied to the potential throughput
    pub fairness_index: f64,
}

impl Default for ProportionalFair {
    fn default() -> Self {
        Self { time_window: 99.0, fairness_index: 1.0 }
    }
}

impl ProportionalFair {
    fn metric(&self, direction: Direction, ue: &ActiveUe<'_>) -> f64 {
        let pf = &ue.ue.dir(direction).pf;
        pf.potential_tput.powf(self.fairness_index) / pf.avg_tput.max(1e-9)
    }

    fn update_average(&self, direction: Direction, ue: &mut ActiveUe<'_>) {
        let pf = &mut ue.ue.dir_mut(direction).pf;
        let weight = 1.0 / self.time_window;
        pf.avg_tput = (1.0 - weight) * pf.last_avg_tput + weight * pf.curr_tput;
    }
}

impl PriorityPolicy for ProportionalFair {
    fn name(&self) -> &'static str {
        "pf"
    }

    fn compare(&self, direction: Direction, lhs: &ActiveUe<'_>, rhs: &ActiveUe<'_>) -> Ordering {
        self.metric(direction, rhs)
            .partial_cmp(&self.metric(direction, lhs))
            .unwrap_or(Ordering::Equal)
    }

    fn before_sched(
        &self,
        direction: Direction,
        ue: &mut ActiveUe<'_>,
        assignable: FtResources,
        ctx: &SchedContext<'_>,
    ) {
        let state = ue.ue.dir_mut(direction);
        let bytes = ctx.amc.tb_size(state.mcs, assignable.rbg * ctx.rb_per_rbg);
        state.pf.potential_tput = bytes as f64 / assignable.sym.max(1) as f64;
    }

    fn record_assignment(
        &self,
        direction: Direction,
        ue: &mut ActiveUe<'_>,
        _assigned: FtResources,
        _total: FtResources,
        ctx: &SchedContext<'_>,
    ) {
        let bytes = ue.ue.achievable_bytes(direction, ctx.amc, ctx.rb_per_rbg);
        let state = ue.ue.dir_mut(direction);
        state.pf.curr_tput = bytes as f64 / state.sym.max(1) as f64;
        self.update_average(direction, ue);
    }

    fn record_skip(
        &self,
        direction: Direction,
        ue: &mut ActiveUe<'_>,
        _not_assigned: FtResources,
        _total: FtResources,
        _ctx: &SchedContext<'_>,
    ) {
        self.update_average(direction, ue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestAmc;
    use common::types::{BeamId, Rnti};

    fn ue(rnti: u16, mcs: u8) -> UeInfo {
        UeInfo::new(Rnti(rnti), BeamId(0), 4, mcs)
    }

    #[test]
    fn test_round_robin_prefers_fewer_rbg() {
        let (mut a, mut b) = (ue(1, 5), ue(2, 5));
        a.dir_mut(Direction::Dl).rbg = 4;
        let a = ActiveUe { ue: &mut a, buffer: 100 };
        let b = ActiveUe { ue: &mut b, buffer: 100 };
        assert_eq!(RoundRobin.compare(Direction::Dl, &a, &b), Ordering::Greater);
        assert_eq!(RoundRobin.compare(Direction::Ul, &a, &b), Ordering::Equal);
    }

    #[test]
    fn test_max_rate_prefers_higher_mcs() {
        let (mut a, mut b) = (ue(1, 5), ue(2, 20));
        let a = ActiveUe { ue: &mut a, buffer: 100 };
        let b = ActiveUe { ue: &mut b, buffer: 100 };
        assert_eq!(MaxRate.compare(Direction::Dl, &a, &b), Ordering::Greater);
        assert_eq!(MaxRate.compare(Direction::Dl, &b, &a), Ordering::Less);
    }

    #[test]
    fn test_proportional_fair_penalizes_served_ue() {
        let amc = TestAmc;
        let ctx = SchedContext { amc: &amc, rb_per_rbg: 1 };
        let pf = ProportionalFair::default();
        let (mut a, mut b) = (ue(1, 10), ue(2, 10));
        let mut a = ActiveUe { ue: &mut a, buffer: 1000 };
        let mut b = ActiveUe { ue: &mut b, buffer: 1000 };
        let assignable = FtResources::new(40, 4);

        pf.before_sched(Direction::Dl, &mut a, assignable, &ctx);
        pf.before_sched(Direction::Dl, &mut b, assignable, &ctx);
        assert_eq!(a.ue.dir(Direction::Dl).pf.potential_tput, 100.0);
        assert_eq!(pf.compare(Direction::Dl, &a, &b), Ordering::Equal);

        {
            let state = a.ue.dir_mut(Direction::Dl);
            state.rbg += 10;
            state.sym += 1;
        }
        let unit = FtResources::new(10, 1);
        pf.record_assignment(Direction::Dl, &mut a, unit, unit, &ctx);
        pf.record_skip(Direction::Dl, &mut b, unit, unit, &ctx);

        assert_eq!(a.ue.dir(Direction::Dl).pf.curr_tput, 100.0);
        assert!(a.ue.dir(Direction::Dl).pf.avg_tput > 0.0);
        assert_eq!(pf.compare(Direction::Dl, &a, &b), Ordering::Greater);
    }
}
