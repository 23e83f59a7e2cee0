//! Cellular MAC Scheduler
//!
//! Owns the UEs of one cell and, once per slot, distributes the DL and UL
//! grids among them. The allocation algorithm (TDMA or OFDMA) and the UE
//! priority policy are picked at construction; HARQ retransmissions are
//! always served before new data.

pub mod dci;
pub mod ofdma;
pub mod policy;
pub mod tdma;

use crate::lcg::{self, LogicalChannel, LogicalChannelGroup};
use crate::ue_info::{InFlightTb, UeInfo};
use crate::MacError;
use common::types::{BeamId, Direction, HarqId, Rnti, SfnSf};
use interfaces::message_types::{
    BufferStatusReport, CqiReport, Dci, HarqFeedback, LcConfig, SlotAllocation, UlBsr,
};
use interfaces::{CschedSapUser, LinkAdaptation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use dci::PointInFtPlane;
use policy::{ActiveUe, MaxRate, PriorityPolicy, ProportionalFair, RoundRobin, SchedContext};
use tdma::{ActiveUeMap, BeamSymbolMap};

/// How the grid of a slot is shared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationScheme {
    /// One UE per symbol, whole band
    #[default]
    Tdma,
    /// Per-beam symbols, RBG ranges within a beam (DL only, UL stays TDMA)
    Ofdma,
}

/// UE priority policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    RoundRobin,
    ProportionalFair,
    MaxRate,
}

impl PolicyKind {
    fn build(self) -> Box<dyn PriorityPolicy> {
        match self {
            PolicyKind::RoundRobin => Box::new(RoundRobin),
            PolicyKind::ProportionalFair => Box::new(ProportionalFair::default()),
            PolicyKind::MaxRate => Box::new(MaxRate),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub scheme: AllocationScheme,
    #[serde(default)]
    pub policy: PolicyKind,
    /// Bandwidth in RBGs
    #[serde(default = "default_bandwidth_rbg")]
    pub bandwidth_rbg: u32,
    /// RBs in one RBG
    #[serde(default = "default_rb_per_rbg")]
    pub rb_per_rbg: u32,
    #[serde(default = "default_symbols_per_slot")]
    pub symbols_per_slot: u32,
    /// Symbols reserved for DL control at the start of the slot
    #[serde(default = "default_ctrl_symbols")]
    pub dl_ctrl_symbols: u32,
    /// Symbols reserved for UL control
    #[serde(default = "default_ctrl_symbols")]
    pub ul_ctrl_symbols: u32,
    /// HARQ processes per UE and direction
    #[serde(default = "default_harq_processes")]
    pub harq_processes: u8,
    /// Transmissions of a block before it is dropped
    #[serde(default = "default_max_tx")]
    pub max_tx: u8,
    /// Fixed DL MCS, ignoring CQI reports
    #[serde(default)]
    pub fixed_dl_mcs: Option<u8>,
    /// Fixed UL MCS, ignoring CQI reports
    #[serde(default)]
    pub fixed_ul_mcs: Option<u8>,
    /// MCS of a UE before its first CQI report
    #[serde(default = "default_initial_mcs")]
    pub initial_mcs: u8,
}

fn default_bandwidth_rbg() -> u32 {
    66
}

fn default_rb_per_rbg() -> u32 {
    1
}

fn default_symbols_per_slot() -> u32 {
    14
}

fn default_ctrl_symbols() -> u32 {
    1
}

fn default_harq_processes() -> u8 {
    16
}

fn default_max_tx() -> u8 {
    4
}

fn default_initial_mcs() -> u8 {
    0
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheme: AllocationScheme::default(),
            policy: PolicyKind::default(),
            bandwidth_rbg: default_bandwidth_rbg(),
            rb_per_rbg: default_rb_per_rbg(),
            symbols_per_slot: default_symbols_per_slot(),
            dl_ctrl_symbols: default_ctrl_symbols(),
            ul_ctrl_symbols: default_ctrl_symbols(),
            harq_processes: default_harq_processes(),
            max_tx: default_max_tx(),
            fixed_dl_mcs: None,
            fixed_ul_mcs: None,
            initial_mcs: default_initial_mcs(),
        }
    }
}

impl SchedulerConfig {
    fn validate(&self, max_mcs: u8) -> Result<(), MacError> {
        let invalid = |msg: String| Err(MacError::InvalidConfiguration(msg));
        if self.bandwidth_rbg == 0 || self.rb_per_rbg == 0 {
            return invalid(format!("empty band: {} RBGs of {} RBs", self.bandwidth_rbg, self.rb_per_rbg));
        }
        for ctrl in [self.dl_ctrl_symbols, self.ul_ctrl_symbols] {
            if ctrl >= self.symbols_per_slot {
                return invalid(format!("{} control symbols leave no data symbol out of {}",
                                       ctrl, self.symbols_per_slot));
            }
        }
        if self.harq_processes == 0 || self.max_tx == 0 {
            return invalid("at least one HARQ process and one transmission are needed".to_string());
        }
        for mcs in [self.fixed_dl_mcs, self.fixed_ul_mcs].into_iter().flatten().chain([self.initial_mcs]) {
            if mcs > max_mcs {
                return invalid(format!("MCS {} above the maximum {}", mcs, max_mcs));
            }
        }
        Ok(())
    }

    fn ctrl_symbols(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Dl => self.dl_ctrl_symbols,
            Direction::Ul => self.ul_ctrl_symbols,
        }
    }

    fn fixed_mcs(&self, direction: Direction) -> Option<u8> {
        match direction {
            Direction::Dl => self.fixed_dl_mcs,
            Direction::Ul => self.fixed_ul_mcs,
        }
    }
}

/// The cellular scheduler of one cell
pub struct MacScheduler {
    config: SchedulerConfig,
    amc: Arc<dyn LinkAdaptation>,
    policy: Box<dyn PriorityPolicy>,
    ues: BTreeMap<Rnti, UeInfo>,
    csched_user: Option<Arc<dyn CschedSapUser>>,
}

impl MacScheduler {
    /// Create a scheduler, validating `config` against the link model
    pub fn new(config: SchedulerConfig, amc: Arc<dyn LinkAdaptation>) -> Result<Self, MacError> {
        config.validate(amc.max_mcs())?;
        let policy = config.policy.build();
        info!("MAC scheduler: {:?} with {} policy, {} RBGs of {} RBs, {} symbols per slot",
              config.scheme, policy.name(), config.bandwidth_rbg, config.rb_per_rbg, config.symbols_per_slot);
        Ok(Self { config, amc, policy, ues: BTreeMap::new(), csched_user: None })
    }

    /// Set the user of the configuration SAP
    pub fn set_csched_sap_user(&mut self, user: Arc<dyn CschedSapUser>) {
        self.csched_user = Some(user);
    }

    /// Current configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Look up a UE
    pub fn ue(&self, rnti: Rnti) -> Option<&UeInfo> {
        self.ues.get(&rnti)
    }

    /// All UEs, by RNTI
    pub fn ues(&self) -> impl Iterator<Item = &UeInfo> {
        self.ues.values()
    }

    fn ue_mut(&mut self, rnti: Rnti) -> Result<&mut UeInfo, MacError> {
        self.ues.get_mut(&rnti).ok_or(MacError::UnknownUe(rnti))
    }

    fn ensure_ue(&mut self, rnti: Rnti, beam_id: BeamId) -> &mut UeInfo {
        let harq_processes = self.config.harq_processes;
        let dl_mcs = self.config.fixed_dl_mcs.unwrap_or(self.config.initial_mcs);
        let ul_mcs = self.config.fixed_ul_mcs.unwrap_or(self.config.initial_mcs);
        self.ues.entry(rnti).or_insert_with(|| {
            info!("Creating UE {} on {}", rnti, beam_id);
            let mut ue = UeInfo::new(rnti, beam_id, harq_processes, dl_mcs);
            ue.dir_mut(Direction::Ul).mcs = ul_mcs;
            ue
        })
    }

    /// Create UE `rnti` on `beam_id`, or move it there if it exists
    pub fn ue_config(&mut self, rnti: Rnti, beam_id: BeamId) {
        self.ensure_ue(rnti, beam_id).beam_id = beam_id;
    }

    /// Move an existing UE to another beam
    pub fn set_beam(&mut self, rnti: Rnti, beam_id: BeamId) -> Result<(), MacError> {
        let ue = self.ue_mut(rnti)?;
        if ue.beam_id != beam_id {
            debug!("UE {} moved from {} to {}", rnti, ue.beam_id, beam_id);
            ue.beam_id = beam_id;
        }
        Ok(())
    }

    /// Detach a UE, dropping its channels and HARQ processes
    pub fn remove_ue(&mut self, rnti: Rnti) -> Result<(), MacError> {
        self.ues.remove(&rnti).ok_or(MacError::UnknownUe(rnti))?;
        info!("Removed UE {}", rnti);
        Ok(())
    }

    /// Configure a logical channel, creating the UE and the group on first use
    ///
    /// In UL the UE reports per group, so the group holds a single channel
    /// keyed by the group ID.
    pub fn configure_logical_channel(&mut self, cfg: &LcConfig) -> Result<(), MacError> {
        let ue = self.ensure_ue(cfg.rnti, BeamId::default());

        if cfg.direction.carries(Direction::Dl) {
            let dl = ue.dir_mut(Direction::Dl);
            if let Some(lcg) = dl.lcgs.values().find(|lcg| lcg.contains(cfg.lc_id)) {
                return Err(MacError::DuplicateLogicalChannel { lcg_id: lcg.id(), lc_id: cfg.lc_id });
            }
            dl.lcgs
                .entry(cfg.lcg_id)
                .or_insert_with(|| LogicalChannelGroup::new(cfg.lcg_id))
                .insert(LogicalChannel::new(cfg.lc_id, cfg.lcg_id, cfg.priority))?;
            debug!("UE {}: DL LC {} in LCG {}", cfg.rnti, cfg.lc_id, cfg.lcg_id);
        }

        if cfg.direction.carries(Direction::Ul) {
            let lcg = ue
                .dir_mut(Direction::Ul)
                .lcgs
                .entry(cfg.lcg_id)
                .or_insert_with(|| LogicalChannelGroup::new(cfg.lcg_id));
            if !lcg.contains(cfg.lcg_id) {
                lcg.insert(LogicalChannel::new(cfg.lcg_id, cfg.lcg_id, cfg.priority))?;
                debug!("UE {}: UL LCG {}", cfg.rnti, cfg.lcg_id);
            }
        }

        if let Some(user) = &self.csched_user {
            user.lc_config_cnf(cfg.lcg_id, cfg.lc_id);
        }
        Ok(())
    }

    /// RLC buffer status of a DL logical channel
    pub fn dl_buffer_status(&mut self, report: &BufferStatusReport<Rnti>) -> Result<(), MacError> {
        let ue = self.ue_mut(report.destination)?;
        lcg::update_lcg_map(&mut ue.dir_mut(Direction::Dl).lcgs, report)?;
        Ok(())
    }

    /// UL buffer status report of one group
    pub fn ul_bsr(&mut self, bsr: &UlBsr) -> Result<(), MacError> {
        let ue = self.ue_mut(bsr.rnti)?;
        let lcg = ue
            .dir_mut(Direction::Ul)
            .lcgs
            .get_mut(&bsr.lcg_id)
            .ok_or(MacError::UnknownLogicalChannelGroup(bsr.lcg_id))?;
        trace!("UE {}: UL BSR LCG {} {}B", bsr.rnti, bsr.lcg_id, bsr.buffer_size);
        lcg.update_info(&BufferStatusReport::tx_only(bsr.rnti, bsr.lcg_id, bsr.buffer_size))
    }

    /// Wideband CQI: updates the MCS unless it is fixed
    pub fn cqi_report(&mut self, report: &CqiReport) -> Result<(), MacError> {
        let fixed = self.config.fixed_mcs(report.direction);
        let mcs = self.amc.mcs_from_cqi(report.cqi).min(self.amc.max_mcs());
        let state = self.ue_mut(report.rnti)?.dir_mut(report.direction);
        state.cqi = Some(report.cqi);
        if fixed.is_none() {
            trace!("UE {} {}: CQI {} -> MCS {}", report.rnti, report.direction, report.cqi, mcs);
            state.mcs = mcs;
        }
        Ok(())
    }

    /// HARQ feedback of a transport block
    ///
    /// An ACK, or a NACK for a block already sent `max_tx` times, releases
    /// the process; any other NACK marks it for retransmission.
    pub fn harq_feedback(&mut self, feedback: &HarqFeedback) -> Result<(), MacError> {
        let max_tx = self.config.max_tx;
        let rnti = feedback.rnti;
        let state = self.ue_mut(rnti)?.dir_mut(feedback.direction);

        let release = match state.in_flight.get_mut(&feedback.harq_id) {
            Some(_) if feedback.success => true,
            Some(tb) if tb.tx_count >= max_tx => {
                warn!("UE {} {}: HARQ id {} dropped after {} transmissions",
                      rnti, feedback.direction, feedback.harq_id, tb.tx_count);
                true
            }
            Some(tb) => {
                tb.needs_retx = true;
                false
            }
            None => true,
        };
        if release {
            state.in_flight.remove(&feedback.harq_id);
            state.harq.receive_feedback(rnti, feedback.harq_id)?;
        }
        Ok(())
    }

    /// Distribute the DL and UL grids of slot `sfn_sf`
    pub fn schedule_slot(&mut self, sfn_sf: SfnSf) -> Result<SlotAllocation, MacError> {
        let mut alloc = SlotAllocation::new(sfn_sf);
        for direction in [Direction::Dl, Direction::Ul] {
            let (dcis, sym_per_beam) = self.schedule_direction(direction)?;
            match direction {
                Direction::Dl => {
                    alloc.dl_dcis = dcis;
                    alloc.dl_sym_per_beam = sym_per_beam.into_iter().collect();
                }
                Direction::Ul => {
                    alloc.ul_dcis = dcis;
                    alloc.ul_sym_per_beam = sym_per_beam.into_iter().collect();
                }
            }
        }
        debug!("{}: {} DL DCIs, {} UL DCIs", sfn_sf, alloc.dl_dcis.len(), alloc.ul_dcis.len());
        Ok(alloc)
    }

    fn schedule_direction(&mut self, direction: Direction) -> Result<(Vec<Dci>, BeamSymbolMap), MacError> {
        for ue in self.ues.values_mut() {
            ue.reset_for_new_slot(direction);
        }

        let mut spoint = PointInFtPlane::new(0, self.config.ctrl_symbols(direction));
        let mut sym_avail = self.config.symbols_per_slot - self.config.ctrl_symbols(direction);
        let mut dcis = Vec::new();
        let mut used = BeamSymbolMap::new();

        self.schedule_retx(direction, &mut spoint, &mut sym_avail, &mut dcis, &mut used);
        if sym_avail == 0 {
            return Ok((dcis, used));
        }

        let bandwidth_rbg = self.config.bandwidth_rbg;
        let rb_per_rbg = self.config.rb_per_rbg;
        let ofdma = direction == Direction::Dl && self.config.scheme == AllocationScheme::Ofdma;

        let mut active = ActiveUeMap::new();
        for ue in self.ues.values_mut() {
            let buffer = ue.buffer_size(direction);
            let state = ue.dir(direction);
            if buffer == 0 || state.harq.available_count() == 0 || state.retx_rbg > 0 || ue.has_pending_retx(direction) {
                continue;
            }
            active.entry(ue.beam_id).or_insert_with(Vec::new).push(ActiveUe { ue, buffer });
        }
        if active.is_empty() {
            return Ok((dcis, used));
        }

        let ctx = SchedContext { amc: self.amc.as_ref(), rb_per_rbg };
        let policy = self.policy.as_ref();
        let sym_per_beam = if ofdma {
            ofdma::assign_dl_rbg_ofdma(sym_avail, bandwidth_rbg, &mut active, policy, &ctx)
        } else {
            tdma::assign_rbg_tdma(direction, sym_avail, bandwidth_rbg, &mut active, policy, &ctx)
        };
        let order: Vec<(BeamId, Vec<Rnti>)> = active
            .iter()
            .map(|(beam, ues)| (*beam, ues.iter().map(|ue| ue.ue.rnti()).collect()))
            .collect();
        drop(active);

        for (beam, rntis) in order {
            let beam_sym = sym_per_beam.get(&beam).copied().unwrap_or(0);
            for rnti in rntis {
                let ue = self.ues.get_mut(&rnti).ok_or(MacError::UnknownUe(rnti))?;
                let Some(harq_id) = finalize_ue(ue, direction, self.amc.as_ref(), rb_per_rbg) else {
                    continue;
                };
                let dci = if ofdma {
                    dci::create_ofdma_dci(&mut spoint, ue, direction, harq_id)
                } else {
                    dci::create_tdma_dci(&mut spoint, ue, direction, bandwidth_rbg, harq_id)
                };
                commit_tb(ue, direction, &dci)?;
                dcis.push(dci);
            }
            if ofdma {
                dci::change_beam(&mut spoint, beam_sym);
            }
        }
        for (beam, sym) in sym_per_beam {
            *used.entry(beam).or_insert(0) += sym;
        }

        Ok((dcis, used))
    }

    /// Serve the pending retransmissions, one after the other in time
    fn schedule_retx(
        &mut self,
        direction: Direction,
        spoint: &mut PointInFtPlane,
        sym_avail: &mut u32,
        dcis: &mut Vec<Dci>,
        used: &mut BeamSymbolMap,
    ) {
        for ue in self.ues.values_mut() {
            let beam_id = ue.beam_id;
            let rnti = ue.rnti();
            let state = ue.dir_mut(direction);
            for (harq_id, tb) in state.in_flight.iter_mut().filter(|(_, tb)| tb.needs_retx) {
                if tb.dci.num_sym > *sym_avail {
                    trace!("UE {} {}: no room for the retransmission of HARQ id {}", rnti, direction, harq_id);
                    continue;
                }
                let dci = dci::create_retx_dci(spoint, &tb.dci, beam_id, tb.tx_count);
                *sym_avail -= dci.num_sym;
                *used.entry(beam_id).or_insert(0) += dci.num_sym;
                state.retx_rbg += dci.num_rbg * dci.num_sym;
                tb.tx_count += 1;
                tb.needs_retx = false;
                tb.dci = dci.clone();
                dcis.push(dci);
            }
        }
    }
}

/// Derive the TBS of a UE and bind a HARQ process for it
///
/// `None` when the assigned resources carry no byte or no process is free;
/// the UE then gets no DCI this slot.
fn finalize_ue(ue: &mut UeInfo, direction: Direction, amc: &dyn LinkAdaptation, rb_per_rbg: u32) -> Option<HarqId> {
    let rnti = ue.rnti();
    if ue.derive_tb_size(direction, amc, rb_per_rbg) == 0 {
        trace!("UE {} {}: resources carry no byte", rnti, direction);
        ue.clear_tb_size(direction);
        return None;
    }
    match ue.dir_mut(direction).harq.try_assign_process(rnti) {
        Some(harq_id) => Some(harq_id),
        None => {
            warn!("UE {} {}: all HARQ processes busy", rnti, direction);
            ue.clear_tb_size(direction);
            None
        }
    }
}

/// Drain the transport block from the UE's channels and keep it for HARQ
fn commit_tb(ue: &mut UeInfo, direction: Direction, dci: &Dci) -> Result<(), MacError> {
    let rnti = ue.rnti();
    let state = ue.dir_mut(direction);
    let pdus = lcg::assign_bytes_to_lcs(&mut state.lcgs, dci.tb_size);
    for pdu in pdus {
        trace!("UE {} {}: {}B of LC {} in HARQ id {}", rnti, direction, pdu.size, pdu.lc_id, dci.harq_id);
        state.harq.add_payload(rnti, pdu.lc_id, dci.harq_id, pdu)?;
    }
    state.in_flight.insert(dci.harq_id, InFlightTb { dci: dci.clone(), tx_count: 1, needs_retx: false });
    Ok(())
}
