//! NR MAC Scheduler Library
//!
//! Slot-by-slot allocation of the time-frequency grid among UEs (TDMA and
//! OFDMA flavours with pluggable priority policies), HARQ process bookkeeping,
//! and the sidelink destination scheduler.

pub mod lcg;
pub mod harq;
pub mod ue_info;
pub mod scheduler;
pub mod sidelink;

pub use harq::{HarqError, HarqTable};
pub use scheduler::{AllocationScheme, MacScheduler, PolicyKind, SchedulerConfig};
pub use sidelink::{SidelinkConfig, SidelinkScheduler};

use common::types::{DstL2Id, LcId, LcgId, Rnti};
use thiserror::Error;

/// Errors raised by the schedulers
///
/// Every variant except a wrapped [`HarqError::AllProcessesBusy`] is a
/// contract violation by the caller: the request referenced state the
/// scheduler was never told about, or broke a sequencing rule.
#[derive(Error, Debug, PartialEq)]
pub enum MacError {
    #[error("UE {0} not found")]
    UnknownUe(Rnti),

    #[error("UE {0} already exists")]
    DuplicateUe(Rnti),

    #[error("Destination {0} not found")]
    UnknownDestination(DstL2Id),

    #[error("Logical channel {0} does not exist")]
    UnknownLogicalChannel(LcId),

    #[error("Logical channel group {0} does not exist")]
    UnknownLogicalChannelGroup(LcgId),

    #[error("Logical channel {lc_id} already configured in group {lcg_id}")]
    DuplicateLogicalChannel { lcg_id: LcgId, lc_id: LcId },

    #[error("Logical channel {lc_id} belongs to group {channel_lcg}, not to group {group_lcg}")]
    LcgMismatch { lc_id: LcId, channel_lcg: LcgId, group_lcg: LcgId },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("HARQ error: {0}")]
    Harq(#[from] HarqError),
}

impl MacError {
    /// Whether the error reports a caller sequencing bug rather than a
    /// temporary lack of resources
    pub fn is_contract_violation(&self) -> bool {
        match self {
            MacError::Harq(e) => e.is_contract_violation(),
            _ => true,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use interfaces::LinkAdaptation;

    /// Link model with exact integer sizes: one byte per RB per MCS step
    #[derive(Debug, Clone, Copy, Default)]
    pub struct TestAmc;

    impl LinkAdaptation for TestAmc {
        fn tb_size(&self, mcs: u8, num_rb_units: u32) -> u32 {
            mcs as u32 * num_rb_units
        }

        fn mcs_from_cqi(&self, cqi: u8) -> u8 {
            cqi.min(28)
        }

        fn max_mcs(&self) -> u8 {
            28
        }
    }
}
