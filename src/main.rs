mod command;
mod link;
mod mav;
mod repl;
mod session;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use mavlink_console_shared::LinkConfig;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mav::MavlinkLink;
use repl::{CtrlC, Repl};
use session::{Connector, Session};

/// Interactive MAVLink drone console
#[derive(Parser, Debug)]
#[command(name = "mavlink-console", version, about)]
struct Cli {
    /// Read MAVLINK_* settings from this file instead of ./.env
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Skip the connect attempt at startup
    #[arg(long)]
    no_connect: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout belongs to the console
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let (config, skipped) = LinkConfig::load(cli.env_file.as_deref())?;
    if let Some(e) = skipped {
        warn!("{}; using the process environment only", e);
    }
    info!(
        "MAVLink console starting (system {} component {})",
        config.system_id, config.component_id
    );

    let session = Session::new(MavlinkLink::new(config.clone()));
    let connector = Connector::new(config);

    let mut repl = Repl::new(
        session,
        connector,
        BufReader::new(tokio::io::stdin()),
        std::io::stdout(),
        CtrlC,
    )
    .auto_connect(!cli.no_connect);

    repl.run().await?;
    info!("Console closed (connected: {})", repl.session().is_connected());
    Ok(())
}
