//! Action handlers for console verbs
//!
//! Every handler checks the session first and reports [`NOT_CONNECTED`]
//! without touching the link when the connect sequence has not completed.

mod flight;
mod telemetry;

pub use flight::{handle_arm, handle_disarm, handle_land, handle_takeoff};
pub use telemetry::{handle_battery, handle_flight_mode, handle_position};

use std::io::{self, Write};

use super::HELP;

/// Printed by every handler while disconnected
pub const NOT_CONNECTED: &str = "Not connected to drone";

pub const RULE: &str = "============================================================";

/// Print the command table
pub fn print_help(out: &mut dyn Write) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", RULE)?;
    writeln!(out, "AVAILABLE COMMANDS")?;
    writeln!(out, "{}", RULE)?;
    for (usage, description) in HELP {
        writeln!(out, "  {:<15} - {}", usage, description)?;
    }
    writeln!(out, "{}", RULE)?;
    writeln!(out)
}
