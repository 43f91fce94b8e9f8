//! Connect sequence: open the link, wait for the vehicle, wait for GPS

use std::io::Write;

use anyhow::Result;
use mavlink_console_shared::LinkConfig;
use tracing::{info, warn};

use super::Session;
use crate::link::{first_matching, DroneLink};

/// Establishes the session's connection from an explicit configuration
pub struct Connector {
    config: LinkConfig,
}

impl Connector {
    pub fn new(config: LinkConfig) -> Self {
        Self { config }
    }

    /// Run the connect sequence.
    ///
    /// Returns `Ok(false)` when the configuration is unusable. Both waits are
    /// unbounded: a vehicle that never answers keeps this pending until the
    /// caller drops it.
    pub async fn connect<L: DroneLink>(
        &self,
        session: &mut Session<L>,
        out: &mut dyn Write,
    ) -> Result<bool> {
        let address = match self.config.system_address() {
            Ok(address) => address,
            Err(e) => {
                warn!("Cannot connect: {}", e);
                writeln!(out, "ERROR: {}", e)?;
                return Ok(false);
            }
        };

        writeln!(out, "Connecting to drone at {}...", address)?;
        out.flush()?;

        session.link_mut().open(&address).await?;

        first_matching(session.link().connection_state(), |s| s.is_connected).await?;
        writeln!(out, "Connected to drone!")?;
        info!("Connected to drone at {}", address);

        writeln!(out, "Waiting for GPS lock...")?;
        out.flush()?;
        first_matching(session.link().health(), |h| h.is_position_ready()).await?;
        writeln!(out, "GPS lock acquired!")?;

        session.mark_connected();
        Ok(true)
    }
}
