//! Drone link abstraction
//!
//! The console talks to the vehicle only through [`DroneLink`]. Telemetry is
//! exposed as unbounded streams; callers that need a single value take the
//! first item with [`first`] and drop the subscription.

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use mavlink_console_shared::{Battery, ConnectionState, FlightMode, Health, Position, SystemAddress};
use thiserror::Error;

/// An unbounded telemetry subscription
pub type TelemetryStream<T> = BoxStream<'static, T>;

/// Errors reported by a drone link
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Link I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Link is not open")]
    NotOpen,

    #[error("No acknowledgement for {command} after {attempts} attempts")]
    Timeout { command: String, attempts: u32 },

    #[error("{command} rejected by vehicle: {result}")]
    Denied { command: String, result: String },

    #[error("Telemetry stream closed")]
    StreamClosed,
}

/// Capabilities of a connected drone
#[async_trait]
pub trait DroneLink: Send + Sync {
    /// Open (or reuse) a connection to the given system address
    async fn open(&mut self, address: &SystemAddress) -> Result<(), LinkError>;

    fn connection_state(&self) -> TelemetryStream<ConnectionState>;

    fn health(&self) -> TelemetryStream<Health>;

    fn position(&self) -> TelemetryStream<Position>;

    fn battery(&self) -> TelemetryStream<Battery>;

    fn flight_mode(&self) -> TelemetryStream<FlightMode>;

    async fn arm(&self) -> Result<(), LinkError>;

    async fn disarm(&self) -> Result<(), LinkError>;

    /// Altitude above home used by the next [`DroneLink::takeoff`]
    async fn set_takeoff_altitude(&self, altitude_m: f32) -> Result<(), LinkError>;

    async fn takeoff(&self) -> Result<(), LinkError>;

    async fn land(&self) -> Result<(), LinkError>;
}

/// Wait for the first value of a subscription, then release it
pub async fn first<T>(mut stream: TelemetryStream<T>) -> Result<T, LinkError> {
    stream.next().await.ok_or(LinkError::StreamClosed)
}

/// Wait for the first value matching `predicate`, then release the subscription
pub async fn first_matching<T>(
    stream: TelemetryStream<T>,
    predicate: impl Fn(&T) -> bool,
) -> Result<T, LinkError> {
    let mut matching = stream.filter(|item| futures::future::ready(predicate(item)));
    matching.next().await.ok_or(LinkError::StreamClosed)
}
