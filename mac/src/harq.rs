//! HARQ Process Table
//!
//! Fixed pool of HARQ process IDs. An ID is either free or bound to one
//! destination (a UE for cellular traffic, a destination L2 ID for sidelink).
//! While bound, the process buffers the payload awaiting feedback together
//! with the set of logical channels that payload came from.

use common::types::{HarqId, LcId};
use std::collections::{BTreeSet, VecDeque};
use std::fmt::Debug;
use thiserror::Error;
use tracing::{debug, trace};

/// HARQ table errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HarqError {
    #[error("HARQ buffers not empty, can not initialize")]
    AlreadyInitialized,

    #[error("All the HARQ processes are busy")]
    AllProcessesBusy,

    #[error("HARQ id {0} does not exist")]
    UnknownProcess(HarqId),

    #[error("HARQ id {id} does not belong to destination {destination}")]
    WrongDestination { id: HarqId, destination: String },

    #[error("Can not receive feedback for already available HARQ id {0}")]
    AlreadyFree(HarqId),

    #[error("Mismatch between {lcs} LCIDs and {packets} packets for HARQ id {id}")]
    PayloadMismatch { id: HarqId, lcs: usize, packets: usize },
}

impl HarqError {
    /// Everything but pool exhaustion is a caller bug
    pub fn is_contract_violation(&self) -> bool {
        !matches!(self, HarqError::AllProcessesBusy)
    }
}

/// State of one process
#[derive(Debug, Clone)]
struct HarqProcess<K, P> {
    owner: Option<K>,
    lc_ids: BTreeSet<LcId>,
    buffer: Vec<P>,
}

impl<K, P> HarqProcess<K, P> {
    fn empty() -> Self {
        Self { owner: None, lc_ids: BTreeSet::new(), buffer: Vec::new() }
    }
}

/// Pool of HARQ processes keyed by destination type `K`, buffering payload `P`
#[derive(Debug, Clone)]
pub struct HarqTable<K, P> {
    free_ids: VecDeque<HarqId>,
    processes: Vec<HarqProcess<K, P>>,
}

impl<K, P> Default for HarqTable<K, P> {
    fn default() -> Self {
        Self { free_ids: VecDeque::new(), processes: Vec::new() }
    }
}

impl<K: Copy + PartialEq + Debug, P> HarqTable<K, P> {
    /// Create an empty, uninitialized table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with `capacity` processes
    pub fn with_capacity(capacity: u8) -> Self {
        let mut table = Self::new();
        table.fill(capacity);
        table
    }

    /// Size the table. Fails if it already holds processes.
    pub fn initialize(&mut self, capacity: u8) -> Result<(), HarqError> {
        if !self.free_ids.is_empty() || !self.processes.is_empty() {
            return Err(HarqError::AlreadyInitialized);
        }
        self.fill(capacity);
        Ok(())
    }

    fn fill(&mut self, capacity: u8) {
        debug!("Initializing HARQ table with {} processes", capacity);
        self.free_ids = (0..capacity).collect();
        self.processes = (0..capacity).map(|_| HarqProcess::empty()).collect();
    }

    /// Drop every process, allowing a new `initialize`
    pub fn clear(&mut self) {
        self.free_ids.clear();
        self.processes.clear();
    }

    /// Total number of processes
    pub fn capacity(&self) -> usize {
        self.processes.len()
    }

    /// Bind the oldest free process to `destination`
    pub fn assign_process(&mut self, destination: K) -> Result<HarqId, HarqError> {
        let id = self.free_ids.pop_front().ok_or(HarqError::AllProcessesBusy)?;
        self.processes[id as usize].owner = Some(destination);
        trace!("HARQ id {} assigned to {:?}", id, destination);
        Ok(id)
    }

    /// Like [`Self::assign_process`], returning `None` when every process is busy
    pub fn try_assign_process(&mut self, destination: K) -> Option<HarqId> {
        self.assign_process(destination).ok()
    }

    /// Number of free processes
    pub fn available_count(&self) -> usize {
        self.free_ids.len()
    }

    /// Whether `id` is free
    pub fn is_free(&self, id: HarqId) -> bool {
        self.free_ids.contains(&id)
    }

    /// Destination `id` is bound to, if any
    pub fn owner(&self, id: HarqId) -> Option<K> {
        self.processes.get(id as usize).and_then(|p| p.owner)
    }

    fn bound_process(&self, destination: K, id: HarqId) -> Result<&HarqProcess<K, P>, HarqError> {
        let process = self.processes.get(id as usize).ok_or(HarqError::UnknownProcess(id))?;
        if process.owner != Some(destination) {
            return Err(HarqError::WrongDestination { id, destination: format!("{:?}", destination) });
        }
        Ok(process)
    }

    fn bound_process_mut(&mut self, destination: K, id: HarqId) -> Result<&mut HarqProcess<K, P>, HarqError> {
        self.bound_process(destination, id)?;
        Ok(&mut self.processes[id as usize])
    }

    /// Buffer `packet` of channel `lc_id` in process `id`
    ///
    /// Each channel contributes exactly one PDU to a transport block, so the
    /// channel set and the packet list must grow together. An insertion that
    /// would break this is rejected and leaves the process untouched.
    pub fn add_payload(&mut self, destination: K, lc_id: LcId, id: HarqId, packet: P) -> Result<(), HarqError> {
        let process = self.bound_process_mut(destination, id)?;
        let lcs = process.lc_ids.len() + usize::from(!process.lc_ids.contains(&lc_id));
        let packets = process.buffer.len() + 1;
        if lcs != packets {
            return Err(HarqError::PayloadMismatch { id, lcs, packets });
        }
        process.lc_ids.insert(lc_id);
        process.buffer.push(packet);
        trace!("HARQ id {}: buffered PDU of LC {} for {:?}", id, lc_id, destination);
        Ok(())
    }

    /// Feedback arrived for process `id`: release it and clear its buffer
    pub fn receive_feedback(&mut self, destination: K, id: HarqId) -> Result<(), HarqError> {
        if id as usize >= self.processes.len() {
            return Err(HarqError::UnknownProcess(id));
        }
        if self.is_free(id) {
            return Err(HarqError::AlreadyFree(id));
        }
        let process = self.bound_process_mut(destination, id)?;
        *process = HarqProcess::empty();
        self.free_ids.push_back(id);
        trace!("HARQ id {} released by {:?}", id, destination);
        Ok(())
    }

    /// Payload buffered in process `id`
    pub fn buffer(&self, destination: K, id: HarqId) -> Result<&[P], HarqError> {
        Ok(&self.bound_process(destination, id)?.buffer)
    }

    /// Logical channels carried by process `id`
    pub fn lc_ids(&self, destination: K, id: HarqId) -> Result<&BTreeSet<LcId>, HarqError> {
        Ok(&self.bound_process(destination, id)?.lc_ids)
    }
}

/// Redundancy version of transmission number `tx_num` (rvid 0 sequence)
///
/// See TS 38.214 Table 6.1.2.1-2: transmissions cycle through RV 0, 2, 3, 1.
pub fn redundancy_version(tx_num: u8) -> u8 {
    match tx_num % 4 {
        0 => 0,
        1 => 2,
        2 => 3,
        3 => 1,
        _ => unreachable!("remainder of a division by 4"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Table = HarqTable<u32, &'static str>;

    const DST: u32 = 100;
    const OTHER: u32 = 200;

    #[test]
    fn test_initialize_twice_fails() {
        let mut table = Table::new();
        assert!(table.initialize(4).is_ok());
        assert_eq!(table.initialize(4), Err(HarqError::AlreadyInitialized));

        table.clear();
        assert!(table.initialize(8).is_ok());
        assert_eq!(table.capacity(), 8);
    }

    #[test]
    fn test_exhaustion_and_reuse_of_freed_id() {
        let mut table = Table::with_capacity(4);
        for expected in 0..4 {
            let before = table.available_count();
            assert_eq!(table.assign_process(DST), Ok(expected));
            assert_eq!(table.available_count(), before - 1);
        }

        let err = table.assign_process(DST).unwrap_err();
        assert_eq!(err, HarqError::AllProcessesBusy);
        assert!(!err.is_contract_violation());
        assert_eq!(table.try_assign_process(DST), None);

        table.receive_feedback(DST, 2).unwrap();
        assert_eq!(table.available_count(), 1);
        assert!(table.is_free(2));
        assert_eq!(table.assign_process(DST), Ok(2));
    }

    #[test]
    fn test_process_bound_to_single_destination() {
        let mut table = Table::with_capacity(2);
        let id = table.assign_process(DST).unwrap();
        let other_id = table.assign_process(OTHER).unwrap();
        assert_ne!(id, other_id);
        assert_eq!(table.owner(id), Some(DST));

        let err = table.add_payload(OTHER, 1, id, "pkt").unwrap_err();
        assert!(matches!(err, HarqError::WrongDestination { id: 0, .. }));
        assert!(err.is_contract_violation());
        assert!(table.buffer(OTHER, id).is_err());
        assert!(table.receive_feedback(OTHER, id).is_err());
        assert!(!table.is_free(id));
    }

    #[test]
    fn test_payload_keeps_channels_and_packets_equal() {
        let mut table = Table::with_capacity(2);
        let id = table.assign_process(DST).unwrap();

        table.add_payload(DST, 1, id, "lc1").unwrap();
        table.add_payload(DST, 4, id, "lc4").unwrap();
        assert_eq!(table.lc_ids(DST, id).unwrap().len(), table.buffer(DST, id).unwrap().len());

        // a second PDU for LC 1 would leave 2 LCs for 3 packets
        assert_eq!(
            table.add_payload(DST, 1, id, "lc1-again"),
            Err(HarqError::PayloadMismatch { id, lcs: 2, packets: 3 })
        );
        assert_eq!(table.buffer(DST, id).unwrap(), &["lc1", "lc4"]);
    }

    #[test]
    fn test_feedback_clears_and_double_feedback_fails() {
        let mut table = Table::with_capacity(2);
        let id = table.assign_process(DST).unwrap();
        table.add_payload(DST, 3, id, "pkt").unwrap();

        let before = table.available_count();
        table.receive_feedback(DST, id).unwrap();
        assert_eq!(table.available_count(), before + 1);
        assert_eq!(table.owner(id), None);

        assert_eq!(table.receive_feedback(DST, id), Err(HarqError::AlreadyFree(id)));
        assert_eq!(table.receive_feedback(DST, 9), Err(HarqError::UnknownProcess(9)));

        // payload of the previous transport block is gone
        let id = table.assign_process(DST).unwrap();
        let again = table.assign_process(DST).unwrap();
        assert!(table.buffer(DST, id).unwrap().is_empty());
        assert!(table.buffer(DST, again).unwrap().is_empty());
    }

    #[test]
    fn test_redundancy_version_sequence() {
        let rvs: Vec<u8> = (0..8).map(redundancy_version).collect();
        assert_eq!(rvs, vec![0, 2, 3, 1, 0, 2, 3, 1]);
    }
}
