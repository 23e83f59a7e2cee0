//! Simulation scenario configuration
//!
//! A scenario is read from YAML (`.yml`/`.yaml`) or TOML (`.toml`). Every
//! section is optional; missing values fall back to the defaults below.

use anyhow::{anyhow, Context, Result};
use common::types::{Bandwidth, SubcarrierSpacing};
use mac::{SchedulerConfig, SidelinkConfig};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SimConfig {
    /// Cell configuration
    #[serde(default)]
    pub cell: CellConfig,
    /// Cellular scheduler (the bandwidth in RBGs is derived from the cell)
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Link adaptation model
    #[serde(default)]
    pub amc: AmcConfig,
    /// Connected UEs
    #[serde(default)]
    pub ues: Vec<UeConfig>,
    /// Sidelink scenario
    #[serde(default)]
    pub sidelink: Option<SidelinkScenario>,
    /// Channel errors
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Cell configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellConfig {
    /// Cell ID
    #[serde(default = "default_cell_id")]
    pub cell_id: u16,
    /// Channel bandwidth in MHz
    #[serde(default = "default_bandwidth_mhz")]
    pub bandwidth_mhz: u32,
    /// Subcarrier spacing in kHz
    #[serde(default = "default_scs_khz")]
    pub scs_khz: u16,
}

fn default_cell_id() -> u16 {
    1
}

fn default_bandwidth_mhz() -> u32 {
    20
}

fn default_scs_khz() -> u16 {
    30
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            cell_id: default_cell_id(),
            bandwidth_mhz: default_bandwidth_mhz(),
            scs_khz: default_scs_khz(),
        }
    }
}

impl CellConfig {
    /// Channel bandwidth
    pub fn bandwidth(&self) -> Result<Bandwidth> {
        Bandwidth::from_mhz(self.bandwidth_mhz)
            .ok_or_else(|| anyhow!("Invalid bandwidth: {} MHz", self.bandwidth_mhz))
    }

    /// Subcarrier spacing
    pub fn scs(&self) -> Result<SubcarrierSpacing> {
        SubcarrierSpacing::from_u16(self.scs_khz)
            .ok_or_else(|| anyhow!("Invalid subcarrier spacing: {} kHz", self.scs_khz))
    }
}

/// Parameters of the linear link adaptation model
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AmcConfig {
    #[serde(default = "default_max_mcs")]
    pub max_mcs: u8,
    /// Bits per resource element at MCS 0
    #[serde(default = "default_efficiency")]
    pub base_efficiency: f64,
    /// Bits per resource element added by each MCS step
    #[serde(default = "default_efficiency")]
    pub efficiency_step: f64,
}

fn default_max_mcs() -> u8 {
    28
}

fn default_efficiency() -> f64 {
    0.2
}

impl Default for AmcConfig {
    fn default() -> Self {
        Self {
            max_mcs: default_max_mcs(),
            base_efficiency: default_efficiency(),
            efficiency_step: default_efficiency(),
        }
    }
}

/// A connected UE and its traffic
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UeConfig {
    pub rnti: u16,
    #[serde(default)]
    pub beam: u16,
    /// Logical channel carrying the traffic (both directions)
    #[serde(default = "default_lc_id")]
    pub lc_id: u8,
    #[serde(default = "default_lcg_id")]
    pub lcg_id: u8,
    /// DL bytes arriving every slot
    #[serde(default)]
    pub dl_bytes_per_slot: u32,
    /// UL bytes arriving every slot
    #[serde(default)]
    pub ul_bytes_per_slot: u32,
    /// Wideband CQI reported in both directions
    #[serde(default)]
    pub cqi: Option<u8>,
}

fn default_lc_id() -> u8 {
    1
}

fn default_lcg_id() -> u8 {
    1
}

/// Sidelink destinations served by the simulated UE
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SidelinkScenario {
    #[serde(default)]
    pub scheduler: SidelinkConfig,
    /// Subchannels of the sidelink resource pool
    #[serde(default = "default_subchannels")]
    pub subchannels: u16,
    /// PSSCH symbols per slot
    #[serde(default = "default_sl_symbols")]
    pub symbols: u16,
    /// Slots between two allocation triggers
    #[serde(default = "default_trigger_period")]
    pub trigger_period_slots: u32,
    /// Candidate slots offered per trigger
    #[serde(default = "default_candidates")]
    pub candidates: u32,
    #[serde(default)]
    pub destinations: Vec<SidelinkDestination>,
}

fn default_subchannels() -> u16 {
    10
}

fn default_sl_symbols() -> u16 {
    9
}

fn default_trigger_period() -> u32 {
    4
}

fn default_candidates() -> u32 {
    4
}

/// A sidelink destination and its traffic
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SidelinkDestination {
    pub dst: u32,
    #[serde(default = "default_lc_id")]
    pub lc_id: u8,
    #[serde(default = "default_lcg_id")]
    pub lcg_id: u8,
    /// Blind retransmissions allowed
    #[serde(default)]
    pub harq_enabled: bool,
    /// Bytes arriving every slot
    #[serde(default)]
    pub bytes_per_slot: u32,
    #[serde(default)]
    pub cqi: Option<u8>,
}

/// Channel error model
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    /// Probability that a transport block is NACKed
    #[serde(default = "default_bler")]
    pub bler: f64,
    /// Seed of the error generator (random if absent)
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_bler() -> f64 {
    0.1
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { bler: default_bler(), seed: None }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Slots between two statistics reports
    #[serde(default = "default_stats_period")]
    pub stats_period_slots: u64,
    /// JSON-lines slot trace
    #[serde(default)]
    pub trace_file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_period() -> u64 {
    1000
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stats_period_slots: default_stats_period(),
            trace_file: None,
        }
    }
}

impl SimConfig {
    /// Load a scenario, picking the format from the file extension
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yml") | Some("yaml") => Self::from_yaml(&text),
            Some("toml") => Self::from_toml(&text),
            _ => Err(anyhow!("Unknown configuration format: {}", path.display())),
        }
    }

    /// Parse a YAML scenario
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text).context("Invalid YAML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML scenario
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Invalid TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.cell.bandwidth()?;
        self.cell.scs()?;
        if !(0.0..=1.0).contains(&self.channel.bler) {
            return Err(anyhow!("BLER must be within [0, 1], got {}", self.channel.bler));
        }
        let mut rntis: Vec<u16> = self.ues.iter().map(|ue| ue.rnti).collect();
        rntis.sort_unstable();
        if rntis.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(anyhow!("Duplicate RNTI in UE list"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mac::{AllocationScheme, PolicyKind};

    #[test]
    fn test_yaml_scenario() {
        let yaml = r#"
cell:
  bandwidth_mhz: 40
scheduler:
  scheme: ofdma
  policy: max_rate
ues:
  - rnti: 17
    beam: 2
    dl_bytes_per_slot: 500
  - rnti: 18
    cqi: 12
sidelink:
  scheduler:
    fixed_mcs: true
  destinations:
    - dst: 255
      harq_enabled: true
      bytes_per_slot: 100
"#;
        let config = SimConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.cell.bandwidth().unwrap(), Bandwidth::Bw40);
        assert_eq!(config.cell.scs().unwrap(), SubcarrierSpacing::Scs30);
        assert_eq!(config.scheduler.scheme, AllocationScheme::Ofdma);
        assert_eq!(config.scheduler.policy, PolicyKind::MaxRate);
        assert_eq!(config.ues.len(), 2);
        assert_eq!(config.ues[0].lc_id, 1);
        assert_eq!(config.ues[1].cqi, Some(12));

        let sidelink = config.sidelink.unwrap();
        assert!(sidelink.scheduler.fixed_mcs);
        assert_eq!(sidelink.scheduler.initial_mcs, 14);
        assert_eq!(sidelink.trigger_period_slots, 4);
        assert_eq!(sidelink.destinations[0].dst, 255);
    }

    #[test]
    fn test_toml_scenario() {
        let text = r#"
[cell]
scs_khz = 15
bandwidth_mhz = 10

[channel]
bler = 0.0
seed = 7

[[ues]]
rnti = 1
ul_bytes_per_slot = 40
"#;
        let config = SimConfig::from_toml(text).unwrap();
        assert_eq!(config.cell.scs().unwrap(), SubcarrierSpacing::Scs15);
        assert_eq!(config.channel.seed, Some(7));
        assert_eq!(config.ues[0].ul_bytes_per_slot, 40);
        assert!(config.sidelink.is_none());
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_invalid_scenarios() {
        assert!(SimConfig::from_yaml("cell:\n  bandwidth_mhz: 33\n").is_err());
        assert!(SimConfig::from_yaml("cell:\n  scs_khz: 45\n").is_err());
        assert!(SimConfig::from_yaml("channel:\n  bler: 1.5\n").is_err());
        assert!(SimConfig::from_yaml("ues:\n  - rnti: 3\n  - rnti: 3\n").is_err());
    }
}
