//! MAVLink Command Sending
//!
//! Builds COMMAND_LONG messages for the vehicle and waits for their
//! COMMAND_ACK, resending on timeout.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mavlink::ardupilotmega::{
    MavAutopilot, MavCmd, MavMessage, MavModeFlag, MavParamType, MavResult, MavState, MavType,
    COMMAND_LONG_DATA, HEARTBEAT_DATA, PARAM_SET_DATA,
};
use mavlink::{MavConnection, MavHeader};
use mavlink_console_shared::{Autopilot, LinkConfig};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::telemetry::{CommandAck, ParamValue, TelemetryHub, Vehicle};
use crate::link::LinkError;

/// Shared handle to an open MAVLink connection
pub type Connection = Arc<Box<dyn MavConnection<MavMessage> + Send + Sync>>;

/// Message ids requested from the vehicle once it is discovered, with their
/// interval in microseconds
const STREAM_INTERVALS: [(u32, f32); 3] = [
    (33, 200_000.0),   // GLOBAL_POSITION_INT, 5 Hz
    (1, 1_000_000.0),  // SYS_STATUS, 1 Hz
    (24, 1_000_000.0), // GPS_RAW_INT, 1 Hz
];

/// HOME_POSITION message id
const HOME_POSITION_ID: f32 = 242.0;

/// PX4 climbs to this height above home when NAV_TAKEOFF has no altitude
const PX4_TAKEOFF_ALT_PARAM: &str = "MIS_TAKEOFF_ALT";

/// Writes frames for this ground station with a running sequence number
pub struct MavSender {
    connection: Connection,
    system_id: u8,
    component_id: u8,
    sequence: AtomicU8,
}

impl MavSender {
    pub fn new(connection: Connection, config: &LinkConfig) -> Self {
        Self {
            connection,
            system_id: config.system_id,
            component_id: config.component_id,
            sequence: AtomicU8::new(0),
        }
    }

    /// Send a message to the vehicle
    pub fn send(&self, msg: &MavMessage) -> Result<(), LinkError> {
        let header = MavHeader {
            system_id: self.system_id,
            component_id: self.component_id,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };

        self.connection
            .send(&header, msg)
            .map(|_| ())
            .map_err(|e| LinkError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
    }

    /// Announce this ground station
    pub fn heartbeat(&self) -> Result<(), LinkError> {
        self.send(&MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_GCS,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::empty(),
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        }))
    }

    /// Ask the vehicle for the telemetry the console reads
    pub fn request_streams(&self, vehicle: &Vehicle) -> Result<(), LinkError> {
        debug!("Requesting data streams from system {}", vehicle.system_id);

        for (message_id, interval_us) in STREAM_INTERVALS {
            self.send(&command_long(
                vehicle.system_id,
                vehicle.component_id,
                MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL,
                0,
                [message_id as f32, interval_us, 0.0, 0.0, 0.0, 0.0, 0.0],
            ))?;
        }

        self.send(&command_long(
            vehicle.system_id,
            vehicle.component_id,
            MavCmd::MAV_CMD_REQUEST_MESSAGE,
            0,
            [HOME_POSITION_ID, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        ))
    }
}

/// Build a COMMAND_LONG message
pub fn command_long(
    target_system: u8,
    target_component: u8,
    command: MavCmd,
    confirmation: u8,
    params: [f32; 7],
) -> MavMessage {
    MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
        target_system,
        target_component,
        command,
        confirmation,
        param1: params[0],
        param2: params[1],
        param3: params[2],
        param4: params[3],
        param5: params[4],
        param6: params[5],
        param7: params[6],
    })
}

/// Build a PARAM_SET message for a float parameter
pub fn param_set(target_system: u8, target_component: u8, name: &str, value: f32) -> MavMessage {
    let mut param_id = [0u8; 16];
    let len = name.len().min(param_id.len());
    param_id[..len].copy_from_slice(&name.as_bytes()[..len]);

    MavMessage::PARAM_SET(PARAM_SET_DATA {
        param_value: value,
        target_system,
        target_component,
        param_id,
        param_type: MavParamType::MAV_PARAM_TYPE_REAL32,
    })
}

/// Sends acknowledged commands to the flight controller
pub struct CommandSender {
    sender: Arc<MavSender>,
    hub: Arc<TelemetryHub>,
    target_system: u8,
    target_component: u8,
    ack_timeout: Duration,
    retries: u32,
}

impl CommandSender {
    pub fn new(sender: Arc<MavSender>, hub: Arc<TelemetryHub>, config: &LinkConfig) -> Self {
        Self {
            sender,
            hub,
            target_system: config.target_system,
            target_component: config.target_component,
            ack_timeout: config.command_timeout,
            retries: config.command_retries,
        }
    }

    /// Arm the drone
    pub async fn arm(&self) -> Result<(), LinkError> {
        info!("Sending ARM command");
        self.send_acknowledged(
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0], // 1 = arm
        )
        .await
    }

    /// Disarm the drone
    pub async fn disarm(&self) -> Result<(), LinkError> {
        info!("Sending DISARM command");
        self.send_acknowledged(
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0], // 0 = disarm
        )
        .await
    }

    /// Take off to an altitude above home
    pub async fn takeoff(&self, altitude_m: f32) -> Result<(), LinkError> {
        info!("Sending TAKEOFF to {}m", altitude_m);

        let autopilot = self.hub.vehicle().map(|v| v.autopilot);
        if autopilot == Some(Autopilot::Px4) {
            self.set_param(PX4_TAKEOFF_ALT_PARAM, altitude_m).await?;
        }
        let param7 = takeoff_altitude_param(autopilot, self.hub.home_altitude_m(), altitude_m);

        self.send_acknowledged(
            MavCmd::MAV_CMD_NAV_TAKEOFF,
            [
                0.0,      // Minimum pitch
                0.0,      // Empty
                0.0,      // Empty
                f32::NAN, // Yaw angle (NAN = current)
                f32::NAN, // Latitude (NAN = current)
                f32::NAN, // Longitude (NAN = current)
                param7,   // Altitude
            ],
        )
        .await
    }

    /// Land at current position
    pub async fn land(&self) -> Result<(), LinkError> {
        info!("Sending LAND command");
        self.send_acknowledged(
            MavCmd::MAV_CMD_NAV_LAND,
            [
                0.0,      // Abort altitude
                0.0,      // Land mode
                0.0,      // Empty
                f32::NAN, // Yaw angle
                f32::NAN, // Latitude
                f32::NAN, // Longitude
                0.0,      // Altitude
            ],
        )
        .await
    }

    /// Set a float parameter and wait for the vehicle to echo the new value
    pub async fn set_param(&self, name: &str, value: f32) -> Result<(), LinkError> {
        let (target_system, target_component) = self.target();
        let command = format!("PARAM_SET {}", name);

        let mut params = self.hub.params();
        let attempts = self.retries + 1;

        for attempt in 0..attempts {
            self.sender
                .send(&param_set(target_system, target_component, name, value))?;

            match timeout(self.ack_timeout, wait_for_param(&mut params, name)).await {
                Ok(Ok(actual)) if (actual - value).abs() < 1e-3 => {
                    debug!("{} set to {}", name, actual);
                    return Ok(());
                }
                Ok(Ok(actual)) => {
                    return Err(LinkError::Denied {
                        command,
                        result: format!("value stayed {}", actual),
                    });
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!("No PARAM_VALUE for {} (attempt {}/{})", name, attempt + 1, attempts);
                }
            }
        }

        Err(LinkError::Timeout { command, attempts })
    }

    /// The discovered vehicle, or the configured target until one is seen
    fn target(&self) -> (u8, u8) {
        match self.hub.vehicle() {
            Some(vehicle) => (vehicle.system_id, vehicle.component_id),
            None => (self.target_system, self.target_component),
        }
    }

    /// Send a COMMAND_LONG and wait for an accepting COMMAND_ACK
    async fn send_acknowledged(&self, command: MavCmd, params: [f32; 7]) -> Result<(), LinkError> {
        let (target_system, target_component) = self.target();

        // Subscribe before sending so a fast ACK is not missed
        let mut acks = self.hub.acks();
        let attempts = self.retries + 1;

        for attempt in 0..attempts {
            let confirmation = attempt.min(u8::MAX as u32) as u8;
            self.sender.send(&command_long(
                target_system,
                target_component,
                command,
                confirmation,
                params,
            ))?;

            match timeout(self.ack_timeout, wait_for_ack(&mut acks, command)).await {
                Ok(Ok(result)) if matches!(result, MavResult::MAV_RESULT_ACCEPTED) => {
                    debug!("{:?} accepted", command);
                    return Ok(());
                }
                Ok(Ok(result)) => {
                    return Err(LinkError::Denied {
                        command: format!("{:?}", command),
                        result: format!("{:?}", result),
                    });
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(
                        "No ACK for {:?} (attempt {}/{})",
                        command,
                        attempt + 1,
                        attempts
                    );
                }
            }
        }

        Err(LinkError::Timeout {
            command: format!("{:?}", command),
            attempts,
        })
    }
}

/// Wait for the final ACK of `command`, skipping in-progress reports
async fn wait_for_ack(
    acks: &mut broadcast::Receiver<CommandAck>,
    command: MavCmd,
) -> Result<MavResult, LinkError> {
    loop {
        match acks.recv().await {
            Ok(ack) if ack.command as u32 == command as u32 => {
                if matches!(ack.result, MavResult::MAV_RESULT_IN_PROGRESS) {
                    continue;
                }
                return Ok(ack.result);
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return Err(LinkError::StreamClosed),
        }
    }
}

/// Wait for the PARAM_VALUE reporting `name`
async fn wait_for_param(
    params: &mut broadcast::Receiver<ParamValue>,
    name: &str,
) -> Result<f32, LinkError> {
    loop {
        match params.recv().await {
            Ok(param) if param.name == name => return Ok(param.value),
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return Err(LinkError::StreamClosed),
        }
    }
}

/// NAV_TAKEOFF param7: PX4 expects AMSL, ArduPilot a height above home
fn takeoff_altitude_param(
    autopilot: Option<Autopilot>,
    home_altitude_m: Option<f32>,
    altitude_m: f32,
) -> f32 {
    match (autopilot, home_altitude_m) {
        (Some(Autopilot::Px4), Some(home)) => home + altitude_m,
        // PX4 then uses MIS_TAKEOFF_ALT, set just before
        (Some(Autopilot::Px4), None) => f32::NAN,
        _ => altitude_m,
    }
}
