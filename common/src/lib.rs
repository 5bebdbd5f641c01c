//! Shared data model for fleetpulse.
//!
//! This crate provides:
//! - Device snapshots, alerts and system analytics as produced by a telemetry source
//! - Command request/response shapes used by the command dispatcher
//! - Device listing shapes consumed from the surrounding application

mod protocol;

pub use protocol::*;
