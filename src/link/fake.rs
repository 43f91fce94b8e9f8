//! Scripted link for exercising the console without a vehicle

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use mavlink_console_shared::{Battery, ConnectionState, FlightMode, Health, Position, SystemAddress};

use super::{DroneLink, LinkError, TelemetryStream};

/// A call made against the link
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open(String),
    Subscribe(&'static str),
    Arm,
    Disarm,
    SetTakeoffAltitude(f32),
    Takeoff,
    Land,
}

/// Emits each configured telemetry value once, then stays silent forever.
/// Unset values never emit, which leaves a waiting command suspended.
#[derive(Default)]
pub struct FakeLink {
    pub calls: Arc<Mutex<Vec<Call>>>,
    pub connection: Option<ConnectionState>,
    pub health: Option<Health>,
    pub position: Option<Position>,
    pub battery: Option<Battery>,
    pub flight_mode: Option<FlightMode>,
    pub fail_open: bool,
    pub deny_commands: bool,
}

impl FakeLink {
    /// A vehicle that connects, has a GPS fix and reports telemetry
    pub fn healthy() -> Self {
        Self {
            connection: Some(ConnectionState { is_connected: true }),
            health: Some(Health::new(true, true)),
            position: Some(Position::from_global_position_int(473_977_418, 85_455_939, 488_000, 0)),
            battery: Some(Battery::from_sys_status(12_400, 76)),
            flight_mode: Some(FlightMode::Hold),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn emit<T: Send + 'static>(&self, name: &'static str, value: Option<T>) -> TelemetryStream<T> {
        self.record(Call::Subscribe(name));
        stream::iter(value).chain(stream::pending()).boxed()
    }

    fn command(&self, call: Call) -> Result<(), LinkError> {
        let name = format!("{:?}", call);
        self.record(call);
        if self.deny_commands {
            return Err(LinkError::Denied {
                command: name,
                result: "MAV_RESULT_DENIED".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DroneLink for FakeLink {
    async fn open(&mut self, address: &SystemAddress) -> Result<(), LinkError> {
        self.record(Call::Open(address.to_string()));
        if self.fail_open {
            return Err(LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "address in use",
            )));
        }
        Ok(())
    }

    fn connection_state(&self) -> TelemetryStream<ConnectionState> {
        self.emit("connection_state", self.connection)
    }

    fn health(&self) -> TelemetryStream<Health> {
        self.emit("health", self.health)
    }

    fn position(&self) -> TelemetryStream<Position> {
        self.emit("position", self.position)
    }

    fn battery(&self) -> TelemetryStream<Battery> {
        self.emit("battery", self.battery)
    }

    fn flight_mode(&self) -> TelemetryStream<FlightMode> {
        self.emit("flight_mode", self.flight_mode)
    }

    async fn arm(&self) -> Result<(), LinkError> {
        self.command(Call::Arm)
    }

    async fn disarm(&self) -> Result<(), LinkError> {
        self.command(Call::Disarm)
    }

    async fn set_takeoff_altitude(&self, altitude_m: f32) -> Result<(), LinkError> {
        self.command(Call::SetTakeoffAltitude(altitude_m))
    }

    async fn takeoff(&self) -> Result<(), LinkError> {
        self.command(Call::Takeoff)
    }

    async fn land(&self) -> Result<(), LinkError> {
        self.command(Call::Land)
    }
}
