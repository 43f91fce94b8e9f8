//! Arm, disarm, takeoff and land

use std::io::Write;

use anyhow::Result;
use mavlink_console_shared::defaults;

use super::NOT_CONNECTED;
use crate::command::CommandError;
use crate::link::DroneLink;
use crate::session::Session;

/// Altitude from the first argument, 10 m when absent
pub fn parse_altitude(args: &[String]) -> Result<f32, CommandError> {
    let Some(value) = args.first() else {
        return Ok(defaults::TAKEOFF_ALTITUDE_M);
    };

    value
        .parse::<f32>()
        .ok()
        .filter(|altitude| altitude.is_finite())
        .ok_or_else(|| CommandError::InvalidAltitude {
            value: value.clone(),
        })
}

/// Handle `arm`
pub async fn handle_arm<L: DroneLink>(session: &Session<L>, out: &mut dyn Write) -> Result<()> {
    let Some(link) = session.connected_link() else {
        writeln!(out, "{}", NOT_CONNECTED)?;
        return Ok(());
    };

    writeln!(out, "Arming drone...")?;
    link.arm().await?;
    writeln!(out, "Drone armed!")?;
    Ok(())
}

/// Handle `disarm`
pub async fn handle_disarm<L: DroneLink>(session: &Session<L>, out: &mut dyn Write) -> Result<()> {
    let Some(link) = session.connected_link() else {
        writeln!(out, "{}", NOT_CONNECTED)?;
        return Ok(());
    };

    writeln!(out, "Disarming drone...")?;
    link.disarm().await?;
    writeln!(out, "Drone disarmed!")?;
    Ok(())
}

/// Handle `takeoff [altitude]`
///
/// The altitude is validated before the connection check, so a bad argument
/// is reported even while disconnected.
pub async fn handle_takeoff<L: DroneLink>(
    session: &Session<L>,
    args: &[String],
    out: &mut dyn Write,
) -> Result<()> {
    let altitude = parse_altitude(args)?;

    let Some(link) = session.connected_link() else {
        writeln!(out, "{}", NOT_CONNECTED)?;
        return Ok(());
    };

    writeln!(out, "Taking off to {}m...", altitude)?;
    link.set_takeoff_altitude(altitude).await?;
    link.takeoff().await?;
    writeln!(out, "Takeoff command sent! Target altitude: {}m", altitude)?;
    Ok(())
}

/// Handle `land`
pub async fn handle_land<L: DroneLink>(session: &Session<L>, out: &mut dyn Write) -> Result<()> {
    let Some(link) = session.connected_link() else {
        writeln!(out, "{}", NOT_CONNECTED)?;
        return Ok(());
    };

    writeln!(out, "Landing drone...")?;
    link.land().await?;
    writeln!(out, "Landing command sent!")?;
    Ok(())
}
