//! Sidelink Scheduler
//!
//! Schedules the transmissions of one UE towards its sidelink destinations.
//! Destinations are created on their first logical channel configuration and
//! hold their own channel groups and MCS. When the MAC triggers an allocation
//! it hands over the candidate slots from sensing; the scheduler picks them
//! first-fit and binds one HARQ process for the transport block.

use crate::harq::{redundancy_version, HarqTable};
use crate::lcg::{self, LcgMap, LogicalChannel, LogicalChannelGroup};
use crate::MacError;
use bytes::Bytes;
use common::types::{DstL2Id, HarqId, LcId};
use interfaces::message_types::{BufferStatusReport, SidelinkLcInfo, SlotAlloc, SlotCandidate};
use interfaces::{CschedSapUser, LinkAdaptation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Sidelink scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidelinkConfig {
    /// Always use `initial_mcs`, ignoring CQI
    #[serde(default)]
    pub fixed_mcs: bool,
    #[serde(default = "default_initial_mcs")]
    pub initial_mcs: u8,
    #[serde(default = "default_rb_per_subchannel")]
    pub rb_per_subchannel: u32,
    #[serde(default = "default_harq_processes")]
    pub harq_processes: u8,
    /// Transmissions of one transport block (new one plus blind
    /// retransmissions) for channels with HARQ enabled
    #[serde(default = "default_max_tx")]
    pub max_tx: u8,
}

fn default_initial_mcs() -> u8 {
    14
}

fn default_rb_per_subchannel() -> u32 {
    10
}

fn default_harq_processes() -> u8 {
    4
}

fn default_max_tx() -> u8 {
    2
}

impl Default for SidelinkConfig {
    fn default() -> Self {
        Self {
            fixed_mcs: false,
            initial_mcs: default_initial_mcs(),
            rb_per_subchannel: default_rb_per_subchannel(),
            harq_processes: default_harq_processes(),
            max_tx: default_max_tx(),
        }
    }
}

/// What the scheduler knows about a destination
#[derive(Debug, Clone)]
pub struct DstInfo {
    /// Channel groups towards the destination
    pub lcgs: LcgMap,
    /// MCS of the last allocation (the initial one before any)
    pub mcs: u8,
    /// Last reported CQI
    pub cqi: Option<u8>,
    /// Whether any channel asked for blind retransmissions
    pub harq_enabled: bool,
}

impl DstInfo {
    fn new(mcs: u8) -> Self {
        Self { lcgs: LcgMap::new(), mcs, cqi: None, harq_enabled: false }
    }

    /// Bytes queued towards the destination
    pub fn buffer_size(&self) -> u32 {
        lcg::buffer_size(&self.lcgs)
    }
}

/// Scheduler of the sidelink transmissions of one UE
pub struct SidelinkScheduler {
    config: SidelinkConfig,
    amc: Arc<dyn LinkAdaptation>,
    destinations: BTreeMap<DstL2Id, DstInfo>,
    harq: HarqTable<DstL2Id, Bytes>,
    csched_user: Option<Arc<dyn CschedSapUser>>,
}

impl SidelinkScheduler {
    /// Create a scheduler
    pub fn new(config: SidelinkConfig, amc: Arc<dyn LinkAdaptation>) -> Result<Self, MacError> {
        if config.initial_mcs > amc.max_mcs() {
            return Err(MacError::InvalidConfiguration(format!(
                "sidelink MCS {} above the maximum {}", config.initial_mcs, amc.max_mcs())));
        }
        if config.harq_processes == 0 || config.max_tx == 0 || config.rb_per_subchannel == 0 {
            return Err(MacError::InvalidConfiguration(
                "sidelink needs HARQ processes, transmissions and RBs per subchannel".to_string()));
        }
        let mut harq = HarqTable::new();
        harq.initialize(config.harq_processes)?;
        info!("Sidelink scheduler: MCS {} ({}), {} HARQ processes, up to {} transmissions",
              config.initial_mcs, if config.fixed_mcs { "fixed" } else { "adaptive" },
              config.harq_processes, config.max_tx);
        Ok(Self { config, amc, destinations: BTreeMap::new(), harq, csched_user: None })
    }

    /// Set the MAC that receives the configuration confirmations
    pub fn set_csched_sap_user(&mut self, user: Arc<dyn CschedSapUser>) {
        self.csched_user = Some(user);
    }

    /// Whether the MCS ignores CQI
    pub fn is_mcs_fixed(&self) -> bool {
        self.config.fixed_mcs
    }

    /// Redundancy version of transmission number `tx_num`
    pub fn get_rv(&self, tx_num: u8) -> u8 {
        redundancy_version(tx_num)
    }

    /// Look up a destination
    pub fn destination(&self, dst: DstL2Id) -> Option<&DstInfo> {
        self.destinations.get(&dst)
    }

    /// The HARQ processes of the UE
    pub fn harq(&self) -> &HarqTable<DstL2Id, Bytes> {
        &self.harq
    }

    fn destination_mut(&mut self, dst: DstL2Id) -> Result<&mut DstInfo, MacError> {
        self.destinations.get_mut(&dst).ok_or(MacError::UnknownDestination(dst))
    }

    /// Configure a channel towards a destination, creating the destination
    /// and the group on first use
    pub fn configure_logical_channel(&mut self, params: &SidelinkLcInfo) -> Result<(), MacError> {
        let initial_mcs = self.config.initial_mcs;
        let info = self.destinations.entry(params.dst).or_insert_with(|| {
            info!("Creating sidelink destination {}", params.dst);
            DstInfo::new(initial_mcs)
        });
        if let Some(lcg) = info.lcgs.values().find(|lcg| lcg.contains(params.lc_id)) {
            return Err(MacError::DuplicateLogicalChannel { lcg_id: lcg.id(), lc_id: params.lc_id });
        }

        let lcg = info.lcgs.entry(params.lcg_id).or_insert_with(|| {
            debug!("Created sidelink LCG {} for destination {}", params.lcg_id, params.dst);
            LogicalChannelGroup::new(params.lcg_id)
        });
        lcg.insert(LogicalChannel::new(params.lc_id, params.lcg_id, params.priority))?;
        info.harq_enabled |= params.harq_enabled;
        info!("Added sidelink LC {} in LCG {} for destination {}", params.lc_id, params.lcg_id, params.dst);

        if let Some(user) = &self.csched_user {
            user.lc_config_cnf(params.lcg_id, params.lc_id);
        }
        Ok(())
    }

    /// RLC buffer status of a channel towards a destination
    pub fn report_buffer_status(&mut self, report: &BufferStatusReport<DstL2Id>) -> Result<(), MacError> {
        let info = self.destination_mut(report.destination)?;
        lcg::update_lcg_map(&mut info.lcgs, report)?;
        Ok(())
    }

    /// CQI measured towards a destination
    pub fn report_cqi(&mut self, dst: DstL2Id, cqi: u8) -> Result<(), MacError> {
        self.destination_mut(dst)?.cqi = Some(cqi);
        Ok(())
    }

    fn select_mcs(&self, info: &DstInfo) -> u8 {
        if self.config.fixed_mcs {
            return self.config.initial_mcs;
        }
        match info.cqi {
            Some(cqi) => self.amc.mcs_from_cqi(cqi).min(self.amc.max_mcs()),
            None => info.mcs,
        }
    }

    /// Allocate a transport block towards `dst` on the candidate slots
    ///
    /// Candidates are taken in slot order, one per transmission. All the
    /// transmissions use the same subchannel count: the smallest that carries
    /// the queued bytes, within what every chosen candidate offers. `None`
    /// when nothing is queued, no candidate or HARQ process is available, or
    /// the resources would carry no byte.
    pub fn trigger_allocation(
        &mut self,
        dst: DstL2Id,
        candidates: &[SlotCandidate],
    ) -> Result<Option<Vec<SlotAlloc>>, MacError> {
        let info = self.destinations.get(&dst).ok_or(MacError::UnknownDestination(dst))?;
        let buffer = info.buffer_size();
        if buffer == 0 || candidates.is_empty() {
            trace!("Sidelink {}: {}B queued, {} candidates", dst, buffer, candidates.len());
            return Ok(None);
        }
        if self.harq.available_count() == 0 {
            warn!("Sidelink {}: all HARQ processes busy", dst);
            return Ok(None);
        }

        let mcs = self.select_mcs(info);
        let num_tx = if info.harq_enabled { self.config.max_tx } else { 1 };
        let mut chosen: Vec<&SlotCandidate> = candidates.iter().collect();
        chosen.sort_by_key(|candidate| candidate.sfn_sf);
        chosen.truncate(num_tx as usize);

        let max_subchannels = chosen.iter().map(|c| c.subchannel_count).min().unwrap_or(0);
        let symbols = chosen.iter().map(|c| u32::from(c.num_symbols)).min().unwrap_or(0);
        let rb_units = |count: u16| {
            u32::from(count).saturating_mul(self.config.rb_per_subchannel).saturating_mul(symbols)
        };

        let mut subchannels = 0;
        let mut tb_size = 0;
        for count in 1..=max_subchannels {
            subchannels = count;
            tb_size = self.amc.tb_size(mcs, rb_units(count));
            if tb_size >= buffer {
                break;
            }
        }
        if tb_size == 0 {
            debug!("Sidelink {}: candidates carry no byte at MCS {}", dst, mcs);
            return Ok(None);
        }

        let harq_id = self.harq.assign_process(dst)?;
        let info = self.destination_mut(dst)?;
        info.mcs = mcs;
        let lc_pdus = lcg::assign_bytes_to_lcs(&mut info.lcgs, tb_size);

        let allocs: Vec<SlotAlloc> = chosen
            .iter()
            .zip(0u8..)
            .map(|(candidate, tx_num)| SlotAlloc {
                sfn_sf: candidate.sfn_sf,
                dst,
                subchannel_start: candidate.subchannel_start,
                subchannel_count: subchannels,
                mcs,
                harq_id,
                rv: redundancy_version(tx_num),
                ndi: tx_num == 0,
                tx_num,
                tb_size,
                lc_pdus: if tx_num == 0 { lc_pdus.clone() } else { Vec::new() },
            })
            .collect();
        info!("Sidelink {}: TB of {}B on {} subchannels at MCS {}, HARQ id {}, {} transmissions from {}",
              dst, tb_size, subchannels, mcs, harq_id, allocs.len(), chosen[0].sfn_sf);
        Ok(Some(allocs))
    }

    /// Keep the PDU of channel `lc_id` in process `harq_id` until feedback
    pub fn add_packet(&mut self, dst: DstL2Id, lc_id: LcId, harq_id: HarqId, packet: Bytes) -> Result<(), MacError> {
        self.harq.add_payload(dst, lc_id, harq_id, packet)?;
        Ok(())
    }

    /// Feedback for process `harq_id` releases it
    pub fn receive_harq_feedback(&mut self, dst: DstL2Id, harq_id: HarqId) -> Result<(), MacError> {
        self.harq.receive_feedback(dst, harq_id)?;
        Ok(())
    }

    /// PDUs buffered in process `harq_id`, for a retransmission
    pub fn packet_burst(&self, dst: DstL2Id, harq_id: HarqId) -> Result<&[Bytes], MacError> {
        Ok(self.harq.buffer(dst, harq_id)?)
    }
}
