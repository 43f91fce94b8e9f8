//! MAVLink Console Shared Types
//!
//! This crate provides the link configuration and the telemetry values
//! exchanged between the drone link and the interactive console.

pub mod config;
pub mod telemetry;

pub use config::{ConfigError, LinkConfig, Protocol, SystemAddress};
pub use telemetry::{Autopilot, Battery, ConnectionState, FlightMode, Health, Position};

/// Default link parameters
pub mod defaults {
    /// Port used when `MAVLINK_PORT` is not set (PX4 SITL offboard port)
    pub const PORT: &str = "14540";

    /// Protocol used when `MAVLINK_PROTOCOL` is not set
    pub const PROTOCOL: &str = "udp";

    /// Altitude for `takeoff` without an argument
    pub const TAKEOFF_ALTITUDE_M: f32 = 10.0;

    /// System ID of this ground station
    pub const SYSTEM_ID: u8 = 245;

    /// MAV_COMP_ID_MISSIONPLANNER
    pub const COMPONENT_ID: u8 = 190;

    /// Autopilot system assumed until a heartbeat names one
    pub const TARGET_SYSTEM: u8 = 1;

    /// MAV_COMP_ID_AUTOPILOT1
    pub const TARGET_COMPONENT: u8 = 1;

    /// Wait for a COMMAND_ACK before resending
    pub const COMMAND_ACK_TIMEOUT_MS: u64 = 3000;

    /// Resends of an unacknowledged command before giving up
    pub const COMMAND_MAX_RETRIES: u32 = 3;

    /// Ground station heartbeat interval
    pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;
}
