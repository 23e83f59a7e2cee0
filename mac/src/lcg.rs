//! Logical Channel and Logical Channel Group accounting
//!
//! Buffer status arrives per logical channel from RLC (or per group from an
//! uplink BSR). The scheduler only ever reads totals from here and drains
//! bytes when a transport block is built.

use crate::MacError;
use common::types::{LcId, LcgId};
use interfaces::message_types::{BufferStatusReport, LcPdu};
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::{debug, trace};

/// A logical channel and its latest buffer status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalChannel {
    /// Logical channel ID
    pub id: LcId,
    /// Group the channel is configured in
    pub lcg_id: LcgId,
    /// Priority (lower is more important)
    pub priority: u8,
    /// Bytes in the RLC transmission queue
    pub tx_queue_size: u32,
    /// Head-of-line delay of the transmission queue in ms
    pub tx_queue_hol_delay: u16,
    /// Bytes in the RLC retransmission queue
    pub retx_queue_size: u32,
    /// Head-of-line delay of the retransmission queue in ms
    pub retx_queue_hol_delay: u16,
    /// Pending status PDU size in bytes
    pub status_pdu_size: u32,
}

impl LogicalChannel {
    /// Create an empty channel
    pub fn new(id: LcId, lcg_id: LcgId, priority: u8) -> Self {
        Self {
            id,
            lcg_id,
            priority,
            tx_queue_size: 0,
            tx_queue_hol_delay: 0,
            retx_queue_size: 0,
            retx_queue_hol_delay: 0,
            status_pdu_size: 0,
        }
    }

    /// All bytes waiting on this channel
    pub fn total_size(&self) -> u32 {
        self.tx_queue_size + self.retx_queue_size + self.status_pdu_size
    }

    /// Overwrite the buffer status with an RLC report
    pub fn update<K>(&mut self, report: &BufferStatusReport<K>) {
        self.tx_queue_size = report.tx_queue_size;
        self.tx_queue_hol_delay = report.tx_queue_hol_delay;
        self.retx_queue_size = report.retx_queue_size;
        self.retx_queue_hol_delay = report.retx_queue_hol_delay;
        self.status_pdu_size = report.status_pdu_size as u32;
    }

    /// Drain up to `bytes`, status PDU first, then retransmissions, then new
    /// data. Returns the bytes actually drained.
    pub fn consume(&mut self, bytes: u32) -> u32 {
        let mut left = bytes;
        for queue in [&mut self.status_pdu_size, &mut self.retx_queue_size, &mut self.tx_queue_size] {
            let taken = left.min(*queue);
            *queue -= taken;
            left -= taken;
        }
        bytes - left
    }
}

/// Logical channels of one UE (or destination) sharing a group ID
#[derive(Debug, Clone)]
pub struct LogicalChannelGroup {
    id: LcgId,
    channels: BTreeMap<LcId, LogicalChannel>,
}

impl LogicalChannelGroup {
    /// Create an empty group
    pub fn new(id: LcgId) -> Self {
        Self { id, channels: BTreeMap::new() }
    }

    /// Group ID
    pub fn id(&self) -> LcgId {
        self.id
    }

    /// Add a channel to the group
    pub fn insert(&mut self, lc: LogicalChannel) -> Result<(), MacError> {
        if lc.lcg_id != self.id {
            return Err(MacError::LcgMismatch { lc_id: lc.id, channel_lcg: lc.lcg_id, group_lcg: self.id });
        }
        if self.channels.contains_key(&lc.id) {
            return Err(MacError::DuplicateLogicalChannel { lcg_id: self.id, lc_id: lc.id });
        }
        trace!("LCG {}: inserted LC {}", self.id, lc.id);
        self.channels.insert(lc.id, lc);
        Ok(())
    }

    /// Whether the group holds `lc_id`
    pub fn contains(&self, lc_id: LcId) -> bool {
        self.channels.contains_key(&lc_id)
    }

    /// Apply a buffer status report to one of the group's channels
    pub fn update_info<K>(&mut self, report: &BufferStatusReport<K>) -> Result<(), MacError> {
        let lc = self
            .channels
            .get_mut(&report.lc_id)
            .ok_or(MacError::UnknownLogicalChannel(report.lc_id))?;
        lc.update(report);
        Ok(())
    }

    /// Look up a channel
    pub fn channel(&self, lc_id: LcId) -> Option<&LogicalChannel> {
        self.channels.get(&lc_id)
    }

    /// Mutable channel lookup
    pub fn channel_mut(&mut self, lc_id: LcId) -> Option<&mut LogicalChannel> {
        self.channels.get_mut(&lc_id)
    }

    /// Channels ordered by ID
    pub fn channels(&self) -> impl Iterator<Item = &LogicalChannel> {
        self.channels.values()
    }

    /// Number of configured channels
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Bytes waiting across the group
    pub fn total_size(&self) -> u32 {
        self.channels.values().map(LogicalChannel::total_size).sum()
    }
}

/// Groups of one UE direction or sidelink destination, keyed by group ID
pub type LcgMap = BTreeMap<LcgId, LogicalChannelGroup>;

/// Apply a report to whichever group holds its channel, returning that group
pub fn update_lcg_map<K: Debug>(lcgs: &mut LcgMap, report: &BufferStatusReport<K>) -> Result<LcgId, MacError> {
    for (lcg_id, lcg) in lcgs.iter_mut() {
        if lcg.contains(report.lc_id) {
            debug!("Updating LC info: dest {:?} LC {} in LCG {}: tx={}B hol={}ms retx={}B hol={}ms status={}B",
                   report.destination, report.lc_id, lcg_id,
                   report.tx_queue_size, report.tx_queue_hol_delay,
                   report.retx_queue_size, report.retx_queue_hol_delay,
                   report.status_pdu_size);
            lcg.update_info(report)?;
            return Ok(*lcg_id);
        }
    }
    Err(MacError::UnknownLogicalChannel(report.lc_id))
}

/// Bytes waiting across all groups
pub fn buffer_size(lcgs: &LcgMap) -> u32 {
    lcgs.values().map(LogicalChannelGroup::total_size).sum()
}

/// Split `tb_size` bytes across the channels that have data
///
/// Every channel with data gets an equal share; what a channel cannot use is
/// shared again among the others until the block is full or no data is left.
/// The drained bytes are removed from the channels.
pub fn assign_bytes_to_lcs(lcgs: &mut LcgMap, tb_size: u32) -> Vec<LcPdu> {
    let mut remaining = tb_size;
    let mut assigned: BTreeMap<(LcgId, LcId), u32> = BTreeMap::new();

    while remaining > 0 {
        let active: Vec<(LcgId, LcId)> = lcgs
            .values()
            .flat_map(|lcg| {
                lcg.channels()
                    .filter(|lc| lc.total_size() > 0)
                    .map(move |lc| (lcg.id(), lc.id))
            })
            .collect();
        if active.is_empty() {
            break;
        }

        let share = (remaining / active.len() as u32).max(1);
        for (lcg_id, lc_id) in active {
            if remaining == 0 {
                break;
            }
            let Some(lc) = lcgs.get_mut(&lcg_id).and_then(|lcg| lcg.channel_mut(lc_id)) else {
                continue;
            };
            let taken = lc.consume(share.min(remaining));
            remaining -= taken;
            *assigned.entry((lcg_id, lc_id)).or_default() += taken;
        }
    }

    assigned
        .into_iter()
        .filter(|(_, size)| *size > 0)
        .map(|((lcg_id, lc_id), size)| LcPdu { lcg_id, lc_id, size })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_with(lcg_id: LcgId, lcs: &[LcId]) -> LogicalChannelGroup {
        let mut lcg = LogicalChannelGroup::new(lcg_id);
        for &lc in lcs {
            lcg.insert(LogicalChannel::new(lc, lcg_id, 1)).unwrap();
        }
        lcg
    }

    #[test]
    fn test_insert_rejects_foreign_and_duplicate_channels() {
        let mut lcg = group_with(1, &[3]);
        assert_eq!(
            lcg.insert(LogicalChannel::new(4, 2, 1)),
            Err(MacError::LcgMismatch { lc_id: 4, channel_lcg: 2, group_lcg: 1 })
        );
        assert_eq!(
            lcg.insert(LogicalChannel::new(3, 1, 1)),
            Err(MacError::DuplicateLogicalChannel { lcg_id: 1, lc_id: 3 })
        );
        assert_eq!(lcg.num_channels(), 1);
    }

    #[test]
    fn test_update_routes_report_to_owning_group() {
        let mut lcgs = LcgMap::new();
        lcgs.insert(1, group_with(1, &[1, 2]));
        lcgs.insert(2, group_with(2, &[5]));

        let mut report = BufferStatusReport::tx_only(7u16, 5, 1000);
        report.status_pdu_size = 20;
        assert_eq!(update_lcg_map(&mut lcgs, &report), Ok(2));
        assert_eq!(lcgs[&2].total_size(), 1020);

        // later reports overwrite the same entry
        let report = BufferStatusReport::tx_only(7u16, 5, 300);
        update_lcg_map(&mut lcgs, &report).unwrap();
        assert_eq!(buffer_size(&lcgs), 300);
    }

    #[test]
    fn test_update_unknown_channel_is_error() {
        let mut lcgs = LcgMap::new();
        lcgs.insert(1, group_with(1, &[1]));
        let report = BufferStatusReport::tx_only(7u16, 9, 10);
        assert_eq!(update_lcg_map(&mut lcgs, &report), Err(MacError::UnknownLogicalChannel(9)));
    }

    #[test]
    fn test_consume_drains_status_then_retx_then_tx() {
        let mut lc = LogicalChannel::new(1, 0, 1);
        lc.status_pdu_size = 5;
        lc.retx_queue_size = 10;
        lc.tx_queue_size = 100;

        assert_eq!(lc.consume(12), 12);
        assert_eq!(lc.status_pdu_size, 0);
        assert_eq!(lc.retx_queue_size, 3);
        assert_eq!(lc.tx_queue_size, 100);

        assert_eq!(lc.consume(500), 103);
        assert_eq!(lc.total_size(), 0);
    }

    #[test]
    fn test_assign_bytes_redistributes_leftover() {
        let mut lcgs = LcgMap::new();
        lcgs.insert(0, group_with(0, &[1, 2]));
        lcgs.insert(1, group_with(1, &[3]));
        lcgs.get_mut(&0).unwrap().channel_mut(1).unwrap().tx_queue_size = 10;
        lcgs.get_mut(&0).unwrap().channel_mut(2).unwrap().tx_queue_size = 500;
        // LC 3 has nothing queued and gets nothing

        let pdus = assign_bytes_to_lcs(&mut lcgs, 100);
        assert_eq!(
            pdus,
            vec![
                LcPdu { lcg_id: 0, lc_id: 1, size: 10 },
                LcPdu { lcg_id: 0, lc_id: 2, size: 90 },
            ]
        );
        assert_eq!(buffer_size(&lcgs), 410);
    }

    #[test]
    fn test_assign_bytes_larger_than_buffer() {
        let mut lcgs = LcgMap::new();
        lcgs.insert(0, group_with(0, &[1]));
        lcgs.get_mut(&0).unwrap().channel_mut(1).unwrap().tx_queue_size = 40;

        let pdus = assign_bytes_to_lcs(&mut lcgs, 1000);
        assert_eq!(pdus, vec![LcPdu { lcg_id: 0, lc_id: 1, size: 40 }]);
        assert_eq!(buffer_size(&lcgs), 0);
        assert!(assign_bytes_to_lcs(&mut lcgs, 1000).is_empty());
    }
}
