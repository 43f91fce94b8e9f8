//! MAVLink Telemetry Hub
//!
//! Decodes inbound MAVLink messages and fans each telemetry kind out to
//! subscribers over broadcast channels.

use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::{stream, StreamExt};
use mavlink::ardupilotmega::{MavAutopilot, MavCmd, MavMessage, MavModeFlag, MavResult, MavType};
use mavlink::MavHeader;
use mavlink_console_shared::{
    Autopilot, Battery, ConnectionState, FlightMode, Health, Position,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::link::TelemetryStream;

const CHANNEL_CAPACITY: usize = 64;

/// An acknowledgement for a COMMAND_LONG
#[derive(Debug, Clone, Copy)]
pub struct CommandAck {
    pub command: MavCmd,
    pub result: MavResult,
}

/// A parameter reported by PARAM_VALUE
#[derive(Debug, Clone, PartialEq)]
pub struct ParamValue {
    pub name: String,
    pub value: f32,
}

/// The autopilot this link is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vehicle {
    pub system_id: u8,
    pub component_id: u8,
    pub autopilot: Autopilot,
}

#[derive(Debug, Default)]
struct VehicleState {
    vehicle: Option<Vehicle>,
    gps_fix_ok: bool,
    home_altitude_m: Option<f32>,
    armed: bool,
}

impl VehicleState {
    fn health(&self) -> Health {
        Health::new(self.gps_fix_ok, self.home_altitude_m.is_some())
    }
}

/// Fans out decoded telemetry to any number of subscribers
pub struct TelemetryHub {
    connection: broadcast::Sender<ConnectionState>,
    health: broadcast::Sender<Health>,
    position: broadcast::Sender<Position>,
    battery: broadcast::Sender<Battery>,
    flight_mode: broadcast::Sender<FlightMode>,
    acks: broadcast::Sender<CommandAck>,
    params: broadcast::Sender<ParamValue>,
    state: Mutex<VehicleState>,
}

impl TelemetryHub {
    pub fn new() -> Self {
        Self {
            connection: broadcast::channel(CHANNEL_CAPACITY).0,
            health: broadcast::channel(CHANNEL_CAPACITY).0,
            position: broadcast::channel(CHANNEL_CAPACITY).0,
            battery: broadcast::channel(CHANNEL_CAPACITY).0,
            flight_mode: broadcast::channel(CHANNEL_CAPACITY).0,
            acks: broadcast::channel(CHANNEL_CAPACITY).0,
            params: broadcast::channel(CHANNEL_CAPACITY).0,
            state: Mutex::new(VehicleState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, VehicleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The vehicle seen so far, if any
    pub fn vehicle(&self) -> Option<Vehicle> {
        self.state().vehicle
    }

    /// Home altitude above mean sea level
    pub fn home_altitude_m(&self) -> Option<f32> {
        self.state().home_altitude_m
    }

    /// Process a MAVLink message. Returns the vehicle when this message is
    /// the first heartbeat from it.
    pub fn process_message(&self, header: &MavHeader, msg: &MavMessage) -> Option<Vehicle> {
        let mut state = self.state();

        if let MavMessage::HEARTBEAT(hb) = msg {
            if matches!(hb.mavtype, MavType::MAV_TYPE_GCS)
                || matches!(hb.autopilot, MavAutopilot::MAV_AUTOPILOT_INVALID)
            {
                return None;
            }
            if state.vehicle.is_none() {
                let vehicle = Vehicle {
                    system_id: header.system_id,
                    component_id: header.component_id,
                    autopilot: autopilot_kind(hb.autopilot),
                };
                state.vehicle = Some(vehicle);
                drop(state);
                self.handle_message(msg);
                return Some(vehicle);
            }
        }

        // Ignore traffic from other systems on the same link
        match state.vehicle {
            Some(vehicle) if vehicle.system_id == header.system_id => {}
            _ => return None,
        }
        drop(state);

        self.handle_message(msg);
        None
    }

    fn handle_message(&self, msg: &MavMessage) {
        match msg {
            MavMessage::HEARTBEAT(hb) => {
                let armed = hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
                let autopilot = autopilot_kind(hb.autopilot);
                {
                    let mut state = self.state();
                    if state.armed != armed {
                        info!("Vehicle {}", if armed { "armed" } else { "disarmed" });
                        state.armed = armed;
                    }
                }

                let _ = self.connection.send(ConnectionState { is_connected: true });
                let _ = self
                    .flight_mode
                    .send(FlightMode::decode(autopilot, hb.custom_mode));
            }

            MavMessage::GPS_RAW_INT(gps) => {
                let health = {
                    let mut state = self.state();
                    state.gps_fix_ok = gps.fix_type as u8 >= 3; // 3D fix or better
                    state.health()
                };
                let _ = self.health.send(health);
            }

            MavMessage::HOME_POSITION(home) => {
                let health = {
                    let mut state = self.state();
                    if state.home_altitude_m.is_none() {
                        info!("Home position received");
                    }
                    state.home_altitude_m = Some(home.altitude as f32 / 1000.0);
                    state.health()
                };
                let _ = self.health.send(health);
            }

            MavMessage::GLOBAL_POSITION_INT(pos) => {
                let _ = self.position.send(Position::from_global_position_int(
                    pos.lat,
                    pos.lon,
                    pos.alt,
                    pos.relative_alt,
                ));
            }

            MavMessage::SYS_STATUS(sys) => {
                let _ = self
                    .battery
                    .send(Battery::from_sys_status(sys.voltage_battery, sys.battery_remaining));
            }

            MavMessage::COMMAND_ACK(ack) => {
                debug!("COMMAND_ACK {:?}: {:?}", ack.command, ack.result);
                let _ = self.acks.send(CommandAck {
                    command: ack.command,
                    result: ack.result,
                });
            }

            MavMessage::PARAM_VALUE(param) => {
                let name = param_name(&param.param_id);
                debug!("PARAM_VALUE {} = {}", name, param.param_value);
                let _ = self.params.send(ParamValue {
                    name,
                    value: param.param_value,
                });
            }

            MavMessage::STATUSTEXT(text) => {
                let text_str = String::from_utf8_lossy(&text.text).to_string();
                let text_str = text_str.trim_end_matches('\0');

                if text.severity as u8 <= 3 {
                    warn!("[FC] {}", text_str);
                } else {
                    debug!("[FC] {}", text_str);
                }
            }

            _ => {}
        }
    }

    /// The link went down; forget the vehicle
    pub fn disconnected(&self) {
        *self.state() = VehicleState::default();
        let _ = self.connection.send(ConnectionState { is_connected: false });
    }

    pub fn connection_state(&self) -> TelemetryStream<ConnectionState> {
        subscribe(&self.connection)
    }

    pub fn health(&self) -> TelemetryStream<Health> {
        subscribe(&self.health)
    }

    pub fn position(&self) -> TelemetryStream<Position> {
        subscribe(&self.position)
    }

    pub fn battery(&self) -> TelemetryStream<Battery> {
        subscribe(&self.battery)
    }

    pub fn flight_mode(&self) -> TelemetryStream<FlightMode> {
        subscribe(&self.flight_mode)
    }

    pub fn acks(&self) -> broadcast::Receiver<CommandAck> {
        self.acks.subscribe()
    }

    pub fn params(&self) -> broadcast::Receiver<ParamValue> {
        self.params.subscribe()
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new()
    }
}

fn autopilot_kind(autopilot: MavAutopilot) -> Autopilot {
    match autopilot {
        MavAutopilot::MAV_AUTOPILOT_PX4 => Autopilot::Px4,
        MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA => Autopilot::ArduPilot,
        _ => Autopilot::Generic,
    }
}

/// Parameter ids are NUL-padded to 16 bytes
fn param_name(id: &[u8; 16]) -> String {
    let end = id.iter().position(|&b| b == 0).unwrap_or(id.len());
    String::from_utf8_lossy(&id[..end]).into_owned()
}

/// A stream over a fresh receiver; dropping the stream unsubscribes
fn subscribe<T: Clone + Send + 'static>(sender: &broadcast::Sender<T>) -> TelemetryStream<T> {
    stream::unfold(sender.subscribe(), |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(value) => return Some((value, rx)),
                Err(RecvError::Lagged(skipped)) => debug!("Telemetry subscriber skipped {}", skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::first;
    use mavlink::ardupilotmega::{
        GpsFixType, MavState, GLOBAL_POSITION_INT_DATA, GPS_RAW_INT_DATA, HEARTBEAT_DATA,
        PARAM_VALUE_DATA,
    };

    fn header(system_id: u8) -> MavHeader {
        MavHeader {
            system_id,
            component_id: 1,
            sequence: 0,
        }
    }

    fn heartbeat(mavtype: MavType, autopilot: MavAutopilot, custom_mode: u32) -> MavMessage {
        MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode,
            mavtype,
            autopilot,
            base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
            system_status: MavState::MAV_STATE_STANDBY,
            mavlink_version: 3,
        })
    }

    #[test]
    fn test_first_heartbeat_discovers_vehicle() {
        let hub = TelemetryHub::new();
        let px4 = heartbeat(MavType::MAV_TYPE_QUADROTOR, MavAutopilot::MAV_AUTOPILOT_PX4, 0);

        let vehicle = hub.process_message(&header(1), &px4).unwrap();
        assert_eq!(vehicle.system_id, 1);
        assert_eq!(vehicle.autopilot, Autopilot::Px4);

        // Second heartbeat is not a new discovery
        assert!(hub.process_message(&header(1), &px4).is_none());
    }

    #[test]
    fn test_gcs_heartbeat_ignored() {
        let hub = TelemetryHub::new();
        let gcs = heartbeat(MavType::MAV_TYPE_GCS, MavAutopilot::MAV_AUTOPILOT_INVALID, 0);
        assert!(hub.process_message(&header(255), &gcs).is_none());
        assert!(hub.vehicle().is_none());
    }

    #[tokio::test]
    async fn test_position_published() {
        let hub = TelemetryHub::new();
        let px4 = heartbeat(MavType::MAV_TYPE_QUADROTOR, MavAutopilot::MAV_AUTOPILOT_PX4, 0);
        hub.process_message(&header(1), &px4);

        let positions = hub.position();
        let msg = MavMessage::GLOBAL_POSITION_INT(GLOBAL_POSITION_INT_DATA {
            time_boot_ms: 1000,
            lat: 473_977_418,
            lon: 85_455_939,
            alt: 488_000,
            relative_alt: 2_500,
            vx: 0,
            vy: 0,
            vz: 0,
            hdg: 0,
        });
        hub.process_message(&header(1), &msg);

        let position = first(positions).await.unwrap();
        assert!((position.relative_altitude_m - 2.5).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_gps_fix_reports_health() {
        let hub = TelemetryHub::new();
        let ardupilot = heartbeat(
            MavType::MAV_TYPE_QUADROTOR,
            MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
            4,
        );
        hub.process_message(&header(1), &ardupilot);

        let health = hub.health();
        let msg = MavMessage::GPS_RAW_INT(GPS_RAW_INT_DATA {
            fix_type: GpsFixType::GPS_FIX_TYPE_3D_FIX,
            satellites_visible: 12,
            ..Default::default()
        });
        hub.process_message(&header(1), &msg);

        let health = first(health).await.unwrap();
        assert!(health.is_global_position_ok);
        assert!(!health.is_home_position_ok);
        assert!(health.is_position_ready());
    }

    #[test]
    fn test_param_value_published() {
        let hub = TelemetryHub::new();
        let px4 = heartbeat(MavType::MAV_TYPE_QUADROTOR, MavAutopilot::MAV_AUTOPILOT_PX4, 0);
        hub.process_message(&header(1), &px4);

        let mut params = hub.params();
        let mut param_id = [0u8; 16];
        param_id[..15].copy_from_slice(b"MIS_TAKEOFF_ALT");
        hub.process_message(
            &header(1),
            &MavMessage::PARAM_VALUE(PARAM_VALUE_DATA {
                param_value: 25.0,
                param_id,
                ..Default::default()
            }),
        );

        assert_eq!(
            params.try_recv().unwrap(),
            ParamValue {
                name: "MIS_TAKEOFF_ALT".into(),
                value: 25.0,
            }
        );
    }

    #[test]
    fn test_other_systems_ignored() {
        let hub = TelemetryHub::new();
        let px4 = heartbeat(MavType::MAV_TYPE_QUADROTOR, MavAutopilot::MAV_AUTOPILOT_PX4, 0);
        hub.process_message(&header(1), &px4);
        hub.process_message(&header(2), &px4);
        assert_eq!(hub.vehicle().unwrap().system_id, 1);
    }
}
