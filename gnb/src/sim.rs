//! Slot-level simulation driver
//!
//! Stands in for the layers around the scheduler: RLC queues filled at a
//! constant rate, buffer status and CQI reports, and a PHY that acknowledges
//! transport blocks with a configurable block error rate. Feedback for the
//! blocks of one slot is delivered before the next slot is scheduled.

use crate::config::{SidelinkScenario, SimConfig};
use anyhow::Result;
use bytes::Bytes;
use common::types::{BeamId, Direction, DstL2Id, HarqId, LcId, LcgId, Rnti, SfnSf, SubcarrierSpacing};
use common::utils::{calculate_nrbg, time};
use interfaces::message_types::{
    BufferStatusReport, CqiReport, Dci, DciFormat, HarqFeedback, LcConfig, LcDirection, SidelinkLcInfo, SlotAllocation,
    SlotCandidate, UlBsr,
};
use interfaces::{CschedSapUser, LinearAmc, LinkAdaptation};
use mac::{MacScheduler, SidelinkScheduler};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// MAC side of the configuration SAP: confirmations only get logged
struct ConfirmationLogger {
    name: &'static str,
}

impl CschedSapUser for ConfirmationLogger {
    fn lc_config_cnf(&self, lcg_id: LcgId, lc_id: LcId) {
        debug!("{}: LC {} configured in LCG {}", self.name, lc_id, lcg_id);
    }
}

/// Counters of one UE
#[derive(Debug, Clone, Default)]
pub struct UeStats {
    pub dl_bytes: u64,
    pub ul_bytes: u64,
    pub new_tbs: u64,
    pub retx_tbs: u64,
    pub nacks: u64,
}

/// Counters of one sidelink destination
#[derive(Debug, Clone, Default)]
pub struct SidelinkStats {
    pub bytes: u64,
    pub tbs: u64,
    pub transmissions: u64,
    pub failed_triggers: u64,
}

#[derive(Debug, Clone, Copy)]
struct UeTraffic {
    lc_id: LcId,
    lcg_id: LcgId,
    dl_rate: u32,
    ul_rate: u32,
    dl_queue: u32,
    ul_queue: u32,
}

#[derive(Debug, Clone, Copy)]
struct DstTraffic {
    lc_id: LcId,
    rate: u32,
    queue: u32,
}

struct PendingFeedback {
    feedback: HarqFeedback,
    tb_size: u32,
}

struct SidelinkSim {
    scheduler: SidelinkScheduler,
    scenario: SidelinkScenario,
    traffic: BTreeMap<DstL2Id, DstTraffic>,
    pending: Vec<(DstL2Id, HarqId)>,
    stats: BTreeMap<DstL2Id, SidelinkStats>,
}

/// The simulated cell
pub struct Simulator {
    scs: SubcarrierSpacing,
    bler: f64,
    mac: MacScheduler,
    sidelink: Option<SidelinkSim>,
    rng: StdRng,
    sfn: SfnSf,
    traffic: BTreeMap<Rnti, UeTraffic>,
    pending: Vec<PendingFeedback>,
    stats: BTreeMap<Rnti, UeStats>,
}

impl Simulator {
    /// Build the cell, its UEs and the sidelink destinations
    pub fn new(config: &SimConfig) -> Result<Self> {
        let bandwidth = config.cell.bandwidth()?;
        let scs = config.cell.scs()?;
        let amc: Arc<dyn LinkAdaptation> = Arc::new(LinearAmc::new(
            config.amc.max_mcs,
            config.amc.base_efficiency,
            config.amc.efficiency_step,
        )?);

        let mut sched_config = config.scheduler.clone();
        sched_config.bandwidth_rbg = calculate_nrbg(bandwidth, scs, sched_config.rb_per_rbg);
        info!("Cell {}: {} MHz, {} kHz, {} RBGs",
              config.cell.cell_id, config.cell.bandwidth_mhz, scs.khz(), sched_config.bandwidth_rbg);

        let mut mac = MacScheduler::new(sched_config, amc.clone())?;
        mac.set_csched_sap_user(Arc::new(ConfirmationLogger { name: "MAC" }));

        let mut traffic = BTreeMap::new();
        let mut stats = BTreeMap::new();
        for ue in &config.ues {
            let rnti = Rnti(ue.rnti);
            mac.ue_config(rnti, BeamId(ue.beam));
            mac.configure_logical_channel(&LcConfig {
                rnti,
                lc_id: ue.lc_id,
                lcg_id: ue.lcg_id,
                direction: LcDirection::Both,
                priority: 1,
            })?;
            if let Some(cqi) = ue.cqi {
                for direction in [Direction::Dl, Direction::Ul] {
                    mac.cqi_report(&CqiReport { rnti, direction, cqi })?;
                }
            }
            traffic.insert(rnti, UeTraffic {
                lc_id: ue.lc_id,
                lcg_id: ue.lcg_id,
                dl_rate: ue.dl_bytes_per_slot,
                ul_rate: ue.ul_bytes_per_slot,
                dl_queue: 0,
                ul_queue: 0,
            });
            stats.insert(rnti, UeStats::default());
        }

        let sidelink = match &config.sidelink {
            Some(scenario) => Some(SidelinkSim::new(scenario, amc)?),
            None => None,
        };

        let rng = match config.channel.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            scs,
            bler: config.channel.bler,
            mac,
            sidelink,
            rng,
            sfn: SfnSf::new(0, 0, 0, scs.numerology()),
            traffic,
            pending: Vec::new(),
            stats,
        })
    }

    /// Duration of one slot
    pub fn slot_duration(&self) -> Duration {
        Duration::from_micros(u64::from(time::slot_duration_us(self.scs)))
    }

    /// Slot that the next [`Self::step`] schedules
    pub fn current_slot(&self) -> SfnSf {
        self.sfn
    }

    /// Per-UE counters
    pub fn stats(&self) -> &BTreeMap<Rnti, UeStats> {
        &self.stats
    }

    /// Per-destination sidelink counters
    pub fn sidelink_stats(&self) -> Option<&BTreeMap<DstL2Id, SidelinkStats>> {
        self.sidelink.as_ref().map(|sl| &sl.stats)
    }

    /// The cellular scheduler
    pub fn scheduler(&self) -> &MacScheduler {
        &self.mac
    }

    /// Run one slot: deliver feedback, refresh buffers, schedule
    pub fn step(&mut self) -> Result<SlotAllocation> {
        self.deliver_feedback()?;
        self.report_buffers()?;

        let alloc = self.mac.schedule_slot(self.sfn)?;
        for dci in alloc.dl_dcis.iter().chain(&alloc.ul_dcis) {
            self.transmit(dci);
        }

        if let Some(sidelink) = &mut self.sidelink {
            sidelink.step(self.sfn, &mut self.rng)?;
        }

        self.sfn = self.sfn.next();
        Ok(alloc)
    }

    fn deliver_feedback(&mut self) -> Result<()> {
        for pending in std::mem::take(&mut self.pending) {
            let feedback = pending.feedback;
            self.mac.harq_feedback(&feedback)?;
            let stats = self.stats.entry(feedback.rnti).or_default();
            if !feedback.success {
                stats.nacks += 1;
                continue;
            }
            match feedback.direction {
                Direction::Dl => stats.dl_bytes += u64::from(pending.tb_size),
                Direction::Ul => stats.ul_bytes += u64::from(pending.tb_size),
            }
        }
        if let Some(sidelink) = &mut self.sidelink {
            sidelink.deliver_feedback()?;
        }
        Ok(())
    }

    fn report_buffers(&mut self) -> Result<()> {
        for (rnti, traffic) in self.traffic.iter_mut() {
            traffic.dl_queue = traffic.dl_queue.saturating_add(traffic.dl_rate);
            traffic.ul_queue = traffic.ul_queue.saturating_add(traffic.ul_rate);
            self.mac.dl_buffer_status(&BufferStatusReport::tx_only(*rnti, traffic.lc_id, traffic.dl_queue))?;
            self.mac.ul_bsr(&UlBsr { rnti: *rnti, lcg_id: traffic.lcg_id, buffer_size: traffic.ul_queue })?;
        }
        Ok(())
    }

    fn transmit(&mut self, dci: &Dci) {
        let direction = match dci.format {
            DciFormat::Dl => Direction::Dl,
            DciFormat::Ul => Direction::Ul,
        };
        let stats = self.stats.entry(dci.rnti).or_default();
        if dci.ndi {
            stats.new_tbs += 1;
            if let Some(traffic) = self.traffic.get_mut(&dci.rnti) {
                let queue = match direction {
                    Direction::Dl => &mut traffic.dl_queue,
                    Direction::Ul => &mut traffic.ul_queue,
                };
                *queue = queue.saturating_sub(dci.tb_size);
            }
        } else {
            stats.retx_tbs += 1;
        }

        let success = self.rng.gen::<f64>() >= self.bler;
        trace!("UE {} {} HARQ id {}: {}", dci.rnti, direction, dci.harq_id, if success { "ACK" } else { "NACK" });
        self.pending.push(PendingFeedback {
            feedback: HarqFeedback { rnti: dci.rnti, harq_id: dci.harq_id, direction, success },
            tb_size: dci.tb_size,
        });
    }

    /// Log the counters of every UE and destination
    pub fn log_stats(&self) {
        for (rnti, stats) in self.stats() {
            info!("UE {}: DL {} B, UL {} B, {} new TBs, {} retransmissions, {} NACKs",
                  rnti, stats.dl_bytes, stats.ul_bytes, stats.new_tbs, stats.retx_tbs, stats.nacks);
        }
        if let Some(stats) = self.sidelink_stats() {
            for (dst, stats) in stats {
                info!("Sidelink {}: {} B in {} TBs, {} transmissions, {} triggers without grant",
                      dst, stats.bytes, stats.tbs, stats.transmissions, stats.failed_triggers);
            }
        }
    }
}

impl SidelinkSim {
    fn new(scenario: &SidelinkScenario, amc: Arc<dyn LinkAdaptation>) -> Result<Self> {
        let mut scheduler = SidelinkScheduler::new(scenario.scheduler.clone(), amc)?;
        scheduler.set_csched_sap_user(Arc::new(ConfirmationLogger { name: "SL MAC" }));

        let mut traffic = BTreeMap::new();
        let mut stats = BTreeMap::new();
        for dest in &scenario.destinations {
            let dst = DstL2Id(dest.dst);
            scheduler.configure_logical_channel(&SidelinkLcInfo {
                dst,
                lc_id: dest.lc_id,
                lcg_id: dest.lcg_id,
                priority: 1,
                pdb_ms: 20,
                harq_enabled: dest.harq_enabled,
            })?;
            if let Some(cqi) = dest.cqi {
                scheduler.report_cqi(dst, cqi)?;
            }
            traffic.insert(dst, DstTraffic { lc_id: dest.lc_id, rate: dest.bytes_per_slot, queue: 0 });
            stats.insert(dst, SidelinkStats::default());
        }

        Ok(Self { scheduler, scenario: scenario.clone(), traffic, pending: Vec::new(), stats })
    }

    fn deliver_feedback(&mut self) -> Result<()> {
        for (dst, harq_id) in std::mem::take(&mut self.pending) {
            let bytes: usize = self.scheduler.packet_burst(dst, harq_id)?.iter().map(Bytes::len).sum();
            self.stats.entry(dst).or_default().bytes += bytes as u64;
            self.scheduler.receive_harq_feedback(dst, harq_id)?;
        }
        Ok(())
    }

    fn candidates(&self, sfn: SfnSf, rng: &mut StdRng) -> Vec<SlotCandidate> {
        let pool = self.scenario.subchannels.max(1);
        (1..=u64::from(self.scenario.candidates))
            .map(|offset| {
                let start = rng.gen_range(0..pool);
                SlotCandidate {
                    sfn_sf: sfn.add(offset),
                    subchannel_start: start,
                    subchannel_count: pool - start,
                    num_symbols: self.scenario.symbols,
                }
            })
            .collect()
    }

    fn step(&mut self, sfn: SfnSf, rng: &mut StdRng) -> Result<()> {
        for (dst, traffic) in self.traffic.iter_mut() {
            traffic.queue = traffic.queue.saturating_add(traffic.rate);
            self.scheduler.report_buffer_status(&BufferStatusReport::tx_only(*dst, traffic.lc_id, traffic.queue))?;
        }

        let period = u64::from(self.scenario.trigger_period_slots.max(1));
        if sfn.normalize() % period != 0 {
            return Ok(());
        }

        let dsts: Vec<DstL2Id> = self.traffic.keys().copied().collect();
        for dst in dsts {
            let candidates = self.candidates(sfn, rng);
            let Some(allocs) = self.scheduler.trigger_allocation(dst, &candidates)? else {
                self.stats.entry(dst).or_default().failed_triggers += 1;
                continue;
            };
            let Some(first) = allocs.first() else {
                continue;
            };
            for pdu in &first.lc_pdus {
                self.scheduler.add_packet(dst, pdu.lc_id, first.harq_id, Bytes::from(vec![0u8; pdu.size as usize]))?;
            }
            let sent: u32 = first.lc_pdus.iter().map(|pdu| pdu.size).sum();
            if let Some(traffic) = self.traffic.get_mut(&dst) {
                traffic.queue = traffic.queue.saturating_sub(sent);
            }
            let stats = self.stats.entry(dst).or_default();
            stats.tbs += 1;
            stats.transmissions += allocs.len() as u64;
            self.pending.push((dst, first.harq_id));
        }
        Ok(())
    }
}

/// Outcome of [`run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub slots: u64,
    pub interrupted: bool,
}

/// Drive `slots` slots, paced on the slot duration when `realtime`
///
/// Stops early on Ctrl-C. Every slot allocation is appended to `trace` as
/// one JSON line.
pub async fn run(
    sim: &mut Simulator,
    slots: u64,
    realtime: bool,
    stats_period: u64,
    mut trace: Option<&mut (dyn Write + Send)>,
) -> Result<RunSummary> {
    let mut interval = tokio::time::interval(sim.slot_duration());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut summary = RunSummary { slots: 0, interrupted: false };
    while summary.slots < slots {
        if realtime {
            tokio::select! {
                _ = &mut shutdown => {
                    summary.interrupted = true;
                }
                _ = interval.tick() => {}
            }
        } else {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    summary.interrupted = true;
                }
                _ = tokio::task::yield_now() => {}
            }
        }
        if summary.interrupted {
            info!("Received shutdown signal");
            break;
        }

        let alloc = sim.step()?;
        if let Some(writer) = trace.as_mut() {
            serde_json::to_writer(&mut **writer, &alloc)?;
            writeln!(writer)?;
        }
        summary.slots += 1;
        if stats_period > 0 && summary.slots % stats_period == 0 {
            info!("Statistics after {} slots ({}):", summary.slots, sim.current_slot());
            sim.log_stats();
        }
    }

    if let Some(writer) = trace.as_mut() {
        writer.flush()?;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
cell:
  bandwidth_mhz: 10
  scs_khz: 15
scheduler:
  policy: proportional_fair
  initial_mcs: 10
channel:
  bler: 0.2
  seed: 42
ues:
  - rnti: 1
    dl_bytes_per_slot: 200
    ul_bytes_per_slot: 50
  - rnti: 2
    beam: 1
    dl_bytes_per_slot: 100
    cqi: 15
sidelink:
  destinations:
    - dst: 9
      harq_enabled: true
      bytes_per_slot: 30
"#;

    #[tokio::test]
    async fn test_run_delivers_traffic() {
        let config = SimConfig::from_yaml(SCENARIO).unwrap();
        let mut sim = Simulator::new(&config).unwrap();
        let mut trace: Vec<u8> = Vec::new();

        let summary = run(&mut sim, 200, false, 0, Some(&mut trace)).await.unwrap();
        assert_eq!(summary, RunSummary { slots: 200, interrupted: false });

        for stats in sim.stats().values() {
            assert!(stats.dl_bytes > 0);
            assert!(stats.new_tbs > 0);
        }
        assert!(sim.stats()[&Rnti(1)].ul_bytes > 0);
        assert!(sim.stats().values().any(|stats| stats.nacks > 0));

        let sl = &sim.sidelink_stats().unwrap()[&DstL2Id(9)];
        assert!(sl.tbs > 0);
        assert_eq!(sl.transmissions, 2 * sl.tbs);

        let lines: Vec<&str> = std::str::from_utf8(&trace).unwrap().lines().collect();
        assert_eq!(lines.len(), 200);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert!(first.get("dl_dcis").is_some());
    }

    #[test]
    fn test_step_advances_slot() {
        let config = SimConfig::from_yaml("ues:\n  - rnti: 5\n    dl_bytes_per_slot: 100\n").unwrap();
        let mut sim = Simulator::new(&config).unwrap();
        assert_eq!(sim.current_slot().normalize(), 0);
        sim.step().unwrap();
        assert_eq!(sim.current_slot().normalize(), 1);
        assert_eq!(sim.slot_duration(), Duration::from_micros(500));
        assert!(sim.scheduler().ue(Rnti(5)).is_some());
    }
}
