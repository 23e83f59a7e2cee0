//! Scheduler Collaborator Interfaces Library
//!
//! This crate defines the messages exchanged between the MAC scheduler and the
//! layers around it, plus the link-adaptation contract the scheduler consumes.

pub mod message_types;
pub mod amc;
pub mod sap;

pub use amc::{LinearAmc, LinkAdaptation};
pub use sap::CschedSapUser;

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug, PartialEq)]
pub enum InterfaceError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
