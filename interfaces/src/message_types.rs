//! Message Types for the MAC scheduler
//!
//! Defines the requests the scheduler consumes (channel configuration, buffer
//! status, HARQ feedback, CQI) and the descriptors it produces (DCIs and
//! sidelink grants)

use common::types::{BeamId, Direction, DstL2Id, HarqId, LcId, LcgId, Rnti, SfnSf};
use serde::{Deserialize, Serialize};

/// Directions a logical channel carries traffic in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LcDirection {
    /// Downlink only
    Dl,
    /// Uplink only
    Ul,
    /// Both directions
    Both,
}

impl LcDirection {
    /// Whether the channel carries traffic in `direction`
    pub fn carries(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (LcDirection::Both, _) | (LcDirection::Dl, Direction::Dl) | (LcDirection::Ul, Direction::Ul)
        )
    }
}

/// Logical channel configuration request for a cellular UE
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LcConfig {
    /// UE the channel belongs to
    pub rnti: Rnti,
    /// Logical channel ID
    pub lc_id: LcId,
    /// Logical channel group the channel is placed in
    pub lcg_id: LcgId,
    /// Traffic directions
    pub direction: LcDirection,
    /// Channel priority (lower is more important)
    pub priority: u8,
}

/// Logical channel configuration request for a sidelink destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidelinkLcInfo {
    /// Destination layer-2 ID
    pub dst: DstL2Id,
    /// Logical channel ID
    pub lc_id: LcId,
    /// Logical channel group ID
    pub lcg_id: LcgId,
    /// Channel priority (lower is more important)
    pub priority: u8,
    /// Packet delay budget in milliseconds
    pub pdb_ms: u16,
    /// Whether blind retransmissions are allowed
    pub harq_enabled: bool,
}

/// RLC buffer status report for one logical channel
///
/// `K` is the key of the entity the channel belongs to: an RNTI for cellular
/// traffic, a destination L2 ID for sidelink traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferStatusReport<K> {
    /// UE or destination
    pub destination: K,
    /// Logical channel ID
    pub lc_id: LcId,
    /// Bytes waiting in the transmission queue
    pub tx_queue_size: u32,
    /// Head-of-line delay of the transmission queue in ms
    pub tx_queue_hol_delay: u16,
    /// Bytes waiting in the retransmission queue
    pub retx_queue_size: u32,
    /// Head-of-line delay of the retransmission queue in ms
    pub retx_queue_hol_delay: u16,
    /// Size of the pending status PDU in bytes
    pub status_pdu_size: u16,
}

impl<K> BufferStatusReport<K> {
    /// Report carrying only new-transmission bytes
    pub fn tx_only(destination: K, lc_id: LcId, tx_queue_size: u32) -> Self {
        Self {
            destination,
            lc_id,
            tx_queue_size,
            tx_queue_hol_delay: 0,
            retx_queue_size: 0,
            retx_queue_hol_delay: 0,
            status_pdu_size: 0,
        }
    }
}

/// Uplink buffer status report (MAC CE), per logical channel group
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UlBsr {
    /// Reporting UE
    pub rnti: Rnti,
    /// Reported group
    pub lcg_id: LcgId,
    /// Buffered bytes in the group
    pub buffer_size: u32,
}

/// HARQ feedback for a cellular transmission
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HarqFeedback {
    /// UE the process belongs to
    pub rnti: Rnti,
    /// Process ID
    pub harq_id: HarqId,
    /// Direction of the acknowledged transmission
    pub direction: Direction,
    /// ACK (true) or NACK (false)
    pub success: bool,
}

/// Wideband channel quality report
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CqiReport {
    /// Reporting UE
    pub rnti: Rnti,
    /// Measured direction
    pub direction: Direction,
    /// CQI value (0-15)
    pub cqi: u8,
}

/// DCI format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DciFormat {
    /// Downlink assignment
    Dl,
    /// Uplink grant
    Ul,
}

impl From<Direction> for DciFormat {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Dl => DciFormat::Dl,
            Direction::Ul => DciFormat::Ul,
        }
    }
}

/// Downlink Control Information handed to the PHY for one UE and direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dci {
    /// Scheduled UE
    pub rnti: Rnti,
    /// Beam the transmission uses
    pub beam_id: BeamId,
    /// DL assignment or UL grant
    pub format: DciFormat,
    /// HARQ process carrying the transport block
    pub harq_id: HarqId,
    /// First resource block group
    pub start_rbg: u32,
    /// Number of resource block groups
    pub num_rbg: u32,
    /// First symbol
    pub start_sym: u32,
    /// Number of symbols
    pub num_sym: u32,
    /// Modulation and coding scheme
    pub mcs: u8,
    /// Transport block size in bytes
    pub tb_size: u32,
    /// New data indicator
    pub ndi: bool,
    /// Redundancy version
    pub rv: u8,
}

/// Bytes of one logical channel placed in a transport block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LcPdu {
    /// Group of the channel
    pub lcg_id: LcgId,
    /// Logical channel ID
    pub lc_id: LcId,
    /// Bytes taken from the channel
    pub size: u32,
}

/// Everything scheduled in one slot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotAllocation {
    /// Slot the allocation applies to
    pub sfn_sf: Option<SfnSf>,
    /// Downlink assignments
    pub dl_dcis: Vec<Dci>,
    /// Uplink grants
    pub ul_dcis: Vec<Dci>,
    /// DL symbols given to each beam, retransmissions included
    pub dl_sym_per_beam: Vec<(BeamId, u32)>,
    /// UL symbols given to each beam, retransmissions included
    pub ul_sym_per_beam: Vec<(BeamId, u32)>,
}

impl SlotAllocation {
    /// Create an empty allocation for a slot
    pub fn new(sfn_sf: SfnSf) -> Self {
        Self { sfn_sf: Some(sfn_sf), ..Default::default() }
    }

    /// DCIs of one direction
    pub fn dcis(&self, direction: Direction) -> &[Dci] {
        match direction {
            Direction::Dl => &self.dl_dcis,
            Direction::Ul => &self.ul_dcis,
        }
    }
}

/// A sidelink resource offered to the scheduler by the sensing procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotCandidate {
    /// Slot of the resource
    pub sfn_sf: SfnSf,
    /// First free subchannel
    pub subchannel_start: u16,
    /// Number of contiguous free subchannels
    pub subchannel_count: u16,
    /// PSSCH symbols in the slot
    pub num_symbols: u16,
}

/// One sidelink transmission scheduled for a destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAlloc {
    /// Slot of the transmission
    pub sfn_sf: SfnSf,
    /// Destination of the transport block
    pub dst: DstL2Id,
    /// First subchannel
    pub subchannel_start: u16,
    /// Number of subchannels
    pub subchannel_count: u16,
    /// Modulation and coding scheme
    pub mcs: u8,
    /// HARQ process ID
    pub harq_id: HarqId,
    /// Redundancy version
    pub rv: u8,
    /// New data indicator (first transmission only)
    pub ndi: bool,
    /// Transmission number of the transport block, starting from 0
    pub tx_num: u8,
    /// Transport block size in bytes
    pub tb_size: u32,
    /// Per-channel content of the transport block
    pub lc_pdus: Vec<LcPdu>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lc_direction_carries() {
        assert!(LcDirection::Both.carries(Direction::Ul));
        assert!(LcDirection::Dl.carries(Direction::Dl));
        assert!(!LcDirection::Dl.carries(Direction::Ul));
    }

    #[test]
    fn test_slot_allocation_serialization() {
        let mut alloc = SlotAllocation::new(SfnSf::new(3, 2, 1, 1));
        alloc.dl_dcis.push(Dci {
            rnti: Rnti(7),
            beam_id: BeamId(1),
            format: DciFormat::Dl,
            harq_id: 0,
            start_rbg: 0,
            num_rbg: 13,
            start_sym: 1,
            num_sym: 2,
            mcs: 10,
            tb_size: 400,
            ndi: true,
            rv: 0,
        });
        alloc.dl_sym_per_beam.push((BeamId(1), 2));

        let serialized = serde_json::to_string(&alloc).unwrap();
        let deserialized: SlotAllocation = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.sfn_sf, alloc.sfn_sf);
        assert_eq!(deserialized.dl_dcis, alloc.dl_dcis);
        assert_eq!(deserialized.dcis(Direction::Ul).len(), 0);
    }
}
