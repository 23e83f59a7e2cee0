//! Common Types for the NR MAC scheduler
//!
//! Defines the identifiers and timing types used throughout the scheduler

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};
use std::fmt;

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl fmt::Display for Rnti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the spatial beam serving a UE
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BeamId(pub u16);

impl fmt::Display for BeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "beam{}", self.0)
    }
}

/// Sidelink destination layer-2 identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DstL2Id(pub u32);

impl fmt::Display for DstL2Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical channel identifier
pub type LcId = u8;

/// Logical channel group identifier
pub type LcgId = u8;

/// HARQ process identifier
pub type HarqId = u8;

/// Link direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Downlink
    Dl,
    /// Uplink
    Ul,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Dl => write!(f, "DL"),
            Direction::Ul => write!(f, "UL"),
        }
    }
}

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
}

impl SubcarrierSpacing {
    /// Numerology index (mu)
    pub fn numerology(&self) -> u8 {
        match self {
            SubcarrierSpacing::Scs15 => 0,
            SubcarrierSpacing::Scs30 => 1,
            SubcarrierSpacing::Scs60 => 2,
            SubcarrierSpacing::Scs120 => 3,
            SubcarrierSpacing::Scs240 => 4,
        }
    }

    /// Spacing in kHz
    pub fn khz(&self) -> u16 {
        *self as u16
    }
}

/// Bandwidth values in MHz
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bandwidth {
    /// 5 MHz
    Bw5,
    /// 10 MHz
    Bw10,
    /// 15 MHz
    Bw15,
    /// 20 MHz
    Bw20,
    /// 25 MHz
    Bw25,
    /// 30 MHz
    Bw30,
    /// 40 MHz
    Bw40,
    /// 50 MHz
    Bw50,
    /// 60 MHz
    Bw60,
    /// 80 MHz
    Bw80,
    /// 100 MHz
    Bw100,
    /// 200 MHz (FR2)
    Bw200,
    /// 400 MHz (FR2)
    Bw400,
}

impl Bandwidth {
    /// Get bandwidth in Hz
    pub fn as_hz(&self) -> u32 {
        match self {
            Bandwidth::Bw5 => 5_000_000,
            Bandwidth::Bw10 => 10_000_000,
            Bandwidth::Bw15 => 15_000_000,
            Bandwidth::Bw20 => 20_000_000,
            Bandwidth::Bw25 => 25_000_000,
            Bandwidth::Bw30 => 30_000_000,
            Bandwidth::Bw40 => 40_000_000,
            Bandwidth::Bw50 => 50_000_000,
            Bandwidth::Bw60 => 60_000_000,
            Bandwidth::Bw80 => 80_000_000,
            Bandwidth::Bw100 => 100_000_000,
            Bandwidth::Bw200 => 200_000_000,
            Bandwidth::Bw400 => 400_000_000,
        }
    }

    /// Parse a channel bandwidth given in MHz
    pub fn from_mhz(mhz: u32) -> Option<Self> {
        let bw = match mhz {
            5 => Bandwidth::Bw5,
            10 => Bandwidth::Bw10,
            15 => Bandwidth::Bw15,
            20 => Bandwidth::Bw20,
            25 => Bandwidth::Bw25,
            30 => Bandwidth::Bw30,
            40 => Bandwidth::Bw40,
            50 => Bandwidth::Bw50,
            60 => Bandwidth::Bw60,
            80 => Bandwidth::Bw80,
            100 => Bandwidth::Bw100,
            200 => Bandwidth::Bw200,
            400 => Bandwidth::Bw400,
            _ => return None,
        };
        Some(bw)
    }
}

/// System frame number, subframe and slot of a given numerology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SfnSf {
    /// Frame number
    pub frame: u32,
    /// Subframe within the frame (0-9)
    pub subframe: u8,
    /// Slot within the subframe
    pub slot: u8,
    /// Numerology the slot index refers to
    pub numerology: u8,
}

impl SfnSf {
    /// Subframes in one radio frame
    pub const SUBFRAMES_PER_FRAME: u8 = 10;

    /// Create a new SFN/SF
    pub fn new(frame: u32, subframe: u8, slot: u8, numerology: u8) -> Self {
        Self { frame, subframe, slot, numerology }
    }

    /// Slots in one subframe for this numerology
    pub fn slots_per_subframe(&self) -> u8 {
        1 << self.numerology
    }

    /// Absolute slot count since frame 0
    pub fn normalize(&self) -> u64 {
        let subframes = self.frame as u64 * Self::SUBFRAMES_PER_FRAME as u64 + self.subframe as u64;
        subframes * self.slots_per_subframe() as u64 + self.slot as u64
    }

    /// Build from an absolute slot count
    pub fn from_normalized(slots: u64, numerology: u8) -> Self {
        let per_subframe = 1u64 << numerology;
        let slot = (slots % per_subframe) as u8;
        let subframes = slots / per_subframe;
        let subframe = (subframes % Self::SUBFRAMES_PER_FRAME as u64) as u8;
        let frame = (subframes / Self::SUBFRAMES_PER_FRAME as u64) as u32;
        Self { frame, subframe, slot, numerology }
    }

    /// The SFN/SF `slots` slots later
    pub fn add(&self, slots: u64) -> Self {
        Self::from_normalized(self.normalize() + slots, self.numerology)
    }

    /// The following slot
    pub fn next(&self) -> Self {
        self.add(1)
    }
}

impl PartialOrd for SfnSf {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SfnSf {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.normalize().cmp(&other.normalize())
    }
}

impl fmt::Display for SfnSf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.frame, self.subframe, self.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn test_bandwidth_conversion() {
        assert_eq!(Bandwidth::Bw20.as_hz(), 20_000_000);
        assert_eq!(Bandwidth::Bw100.as_hz(), 100_000_000);
        assert_eq!(Bandwidth::from_mhz(40), Some(Bandwidth::Bw40));
        assert_eq!(Bandwidth::from_mhz(7), None);
    }

    #[test]
    fn test_scs_from_khz() {
        assert_eq!(SubcarrierSpacing::from_u32(120), Some(SubcarrierSpacing::Scs120));
        assert_eq!(SubcarrierSpacing::from_u32(45), None);
        assert_eq!(SubcarrierSpacing::Scs120.numerology(), 3);
        assert_eq!(SubcarrierSpacing::Scs30.khz(), 30);
    }

    #[test]
    fn test_sfnsf_wraps_subframe_and_frame() {
        let sfn = SfnSf::new(0, 9, 1, 1);
        let next = sfn.next();
        assert_eq!(next, SfnSf::new(1, 0, 0, 1));
        assert_eq!(next.normalize(), 20);
        assert_eq!(SfnSf::from_normalized(45, 2), SfnSf::new(1, 1, 1, 2));
        assert!(sfn < next);
    }

    #[test]
    fn test_direction_serialization() {
        let json = serde_json::to_string(&Direction::Ul).unwrap();
        assert_eq!(json, "\"ul\"");
        assert_eq!(Direction::Dl.to_string(), "DL");
    }
}
