//! Link Adaptation
//!
//! The scheduler never looks at MCS tables directly: it converts granted
//! resources into bytes, and CQI into MCS, through [`LinkAdaptation`].

use crate::InterfaceError;
use common::utils::SUBCARRIERS_PER_RB;
use tracing::debug;

/// Adaptive modulation and coding model consumed by the schedulers
pub trait LinkAdaptation: Send + Sync {
    /// Transport block size in bytes carried by `num_rb_units` resource
    /// blocks (one unit = one RB for one symbol) at `mcs`
    fn tb_size(&self, mcs: u8, num_rb_units: u32) -> u32;

    /// MCS to use for a wideband CQI report
    fn mcs_from_cqi(&self, cqi: u8) -> u8;

    /// Highest MCS index of the table
    fn max_mcs(&self) -> u8;
}

/// Highest CQI index
const MAX_CQI: u8 = 15;

/// Spectral efficiency growing linearly with the MCS index
///
/// A first-order stand-in for the 3GPP tables, used by the simulator and
/// tests. Efficiency is expressed in bits per resource element.
#[derive(Debug, Clone)]
pub struct LinearAmc {
    max_mcs: u8,
    base_efficiency: f64,
    efficiency_step: f64,
}

impl LinearAmc {
    /// Create a model with explicit parameters
    pub fn new(max_mcs: u8, base_efficiency: f64, efficiency_step: f64) -> Result<Self, InterfaceError> {
        if max_mcs == 0 {
            return Err(InterfaceError::InvalidConfig("max MCS must be positive".into()));
        }
        if base_efficiency < 0.0 || efficiency_step <= 0.0 {
            return Err(InterfaceError::InvalidConfig(format!(
                "invalid efficiency model: base={} step={}",
                base_efficiency, efficiency_step
            )));
        }
        debug!("Linear AMC: max_mcs={}, base={} bits/RE, step={} bits/RE",
               max_mcs, base_efficiency, efficiency_step);
        Ok(Self { max_mcs, base_efficiency, efficiency_step })
    }

    /// Bits per resource element at `mcs`
    pub fn spectral_efficiency(&self, mcs: u8) -> f64 {
        self.base_efficiency + self.efficiency_step * mcs.min(self.max_mcs) as f64
    }
}

impl Default for LinearAmc {
    fn default() -> Self {
        Self { max_mcs: 28, base_efficiency: 0.2, efficiency_step: 0.2 }
    }
}

impl LinkAdaptation for LinearAmc {
    fn tb_size(&self, mcs: u8, num_rb_units: u32) -> u32 {
        let res = num_rb_units as f64 * SUBCARRIERS_PER_RB as f64;
        (self.spectral_efficiency(mcs) * res / 8.0) as u32
    }

    fn mcs_from_cqi(&self, cqi: u8) -> u8 {
        if cqi == 0 {
            return 0;
        }
        let cqi = cqi.min(MAX_CQI) as u32;
        ((cqi - 1) * self.max_mcs as u32 / (MAX_CQI as u32 - 1)) as u8
    }

    fn max_mcs(&self) -> u8 {
        self.max_mcs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tb_size_scales_with_resources() {
        let amc = LinearAmc::default();
        // 2.0 bits/RE at MCS 9: 10 RBs * 12 REs * 2.0 / 8 = 30 bytes
        assert_eq!(amc.tb_size(9, 10), 30);
        assert_eq!(amc.tb_size(9, 20), 60);
        assert_eq!(amc.tb_size(9, 0), 0);
        // a single RB at MCS 0 cannot carry a byte
        assert_eq!(amc.tb_size(0, 1), 0);
    }

    #[test]
    fn test_mcs_from_cqi() {
        let amc = LinearAmc::default();
        assert_eq!(amc.mcs_from_cqi(0), 0);
        assert_eq!(amc.mcs_from_cqi(1), 0);
        assert_eq!(amc.mcs_from_cqi(15), 28);
        assert_eq!(amc.mcs_from_cqi(200), 28);
        assert_eq!(amc.mcs_from_cqi(8), 14);
    }

    #[test]
    fn test_invalid_model_rejected() {
        assert!(LinearAmc::new(0, 0.2, 0.2).is_err());
        assert!(LinearAmc::new(28, 0.2, 0.0).is_err());
        assert!(LinearAmc::new(28, 0.0, 0.1).is_ok());
    }
}
