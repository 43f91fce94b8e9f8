//! Single-value telemetry reports

use std::io::Write;

use anyhow::Result;

use super::NOT_CONNECTED;
use crate::link::{first, DroneLink};
use crate::session::Session;

/// Handle `position`
pub async fn handle_position<L: DroneLink>(session: &Session<L>, out: &mut dyn Write) -> Result<()> {
    let Some(link) = session.connected_link() else {
        writeln!(out, "{}", NOT_CONNECTED)?;
        return Ok(());
    };

    let position = first(link.position()).await?;
    writeln!(out, "Position:")?;
    writeln!(out, "   Latitude:  {}°", position.latitude_deg)?;
    writeln!(out, "   Longitude: {}°", position.longitude_deg)?;
    writeln!(out, "   Altitude:  {}m", position.relative_altitude_m)?;
    Ok(())
}

/// Handle `battery`
pub async fn handle_battery<L: DroneLink>(session: &Session<L>, out: &mut dyn Write) -> Result<()> {
    let Some(link) = session.connected_link() else {
        writeln!(out, "{}", NOT_CONNECTED)?;
        return Ok(());
    };

    let battery = first(link.battery()).await?;
    match battery.remaining_percent {
        Some(percent) => writeln!(out, "Battery: {:.1}%", percent)?,
        None => writeln!(out, "Battery: unknown")?,
    }
    writeln!(out, "   Voltage: {:.2}V", battery.voltage_v)?;
    Ok(())
}

/// Handle `mode`
pub async fn handle_flight_mode<L: DroneLink>(
    session: &Session<L>,
    out: &mut dyn Write,
) -> Result<()> {
    let Some(link) = session.connected_link() else {
        writeln!(out, "{}", NOT_CONNECTED)?;
        return Ok(());
    };

    let mode = first(link.flight_mode()).await?;
    writeln!(out, "Flight Mode: {}", mode)?;
    Ok(())
}
