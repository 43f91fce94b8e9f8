//! MAVLink Bridge Module
//!
//! Implements the drone link on top of the `mavlink` crate for PX4 and
//! ArduPilot flight controllers over UDP, TCP or serial.

mod commands;
mod connection;
mod telemetry;

pub use connection::MavlinkLink;
