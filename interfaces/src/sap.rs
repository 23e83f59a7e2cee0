//! Service access points exposed by the schedulers

use common::types::{LcId, LcgId};

/// Configuration SAP implemented by the MAC entity that owns a scheduler
pub trait CschedSapUser: Send + Sync {
    /// Confirms that logical channel `lc_id` was configured in group `lcg_id`
    fn lc_config_cnf(&self, lcg_id: LcgId, lc_id: LcId);
}
