//! Interactive command loop
//!
//! Reads one command per line, resolves the verb through the [`VerbTable`] and
//! runs its handler to completion. An interrupt drops whatever is in flight,
//! the line read or the handler, and the loop carries on.

use std::any::Any;
use std::io::Write;
use std::panic::AssertUnwindSafe;

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::{debug, error, warn};

use crate::command::handlers::{self, RULE};
use crate::command::{Command, Verb, VerbTable};
use crate::link::DroneLink;
use crate::session::{Connector, Session};

const PROMPT: &str = "Command> ";
const INTERRUPTED: &str = "Interrupted. Type 'quit' to exit.";

/// Source of user interrupts
#[async_trait]
pub trait Interrupts: Send {
    /// Resolves on the next interrupt
    async fn interrupted(&mut self);
}

/// Ctrl-C from the terminal
pub struct CtrlC;

#[async_trait]
impl Interrupts for CtrlC {
    async fn interrupted(&mut self) {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// What the loop does after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// The console: a session, its connector and the terminal around them
pub struct Repl<L, R, W, I> {
    session: Session<L>,
    connector: Connector,
    verbs: VerbTable,
    input: Lines<R>,
    out: W,
    interrupts: I,
    auto_connect: bool,
}

impl<L, R, W, I> Repl<L, R, W, I>
where
    L: DroneLink,
    R: AsyncBufRead + Unpin,
    W: Write,
    I: Interrupts,
{
    pub fn new(session: Session<L>, connector: Connector, input: R, out: W, interrupts: I) -> Self {
        Self {
            session,
            connector,
            verbs: VerbTable::new(),
            input: input.lines(),
            out,
            interrupts,
            auto_connect: true,
        }
    }

    /// Whether [`Repl::run`] tries to connect before the first prompt
    pub fn auto_connect(mut self, enabled: bool) -> Self {
        self.auto_connect = enabled;
        self
    }

    pub fn session(&self) -> &Session<L> {
        &self.session
    }

    /// Run until `quit`, `exit` or end of input
    pub async fn run(&mut self) -> Result<()> {
        self.banner()?;

        if self.auto_connect {
            let outcome = tokio::select! {
                result = self.connector.connect(&mut self.session, &mut self.out) => Some(result),
                _ = self.interrupts.interrupted() => None,
            };
            match outcome {
                Some(Ok(_)) => {}
                Some(Err(e)) => report_error(&mut self.out, &e)?,
                None => writeln!(self.out, "\n{}", INTERRUPTED)?,
            }
        }

        handlers::print_help(&mut self.out)?;

        loop {
            write!(self.out, "\n{}", PROMPT)?;
            self.out.flush()?;

            let line = tokio::select! {
                line = self.input.next_line() => line?,
                _ = self.interrupts.interrupted() => {
                    writeln!(self.out, "\n{}", INTERRUPTED)?;
                    continue;
                }
            };

            let Some(line) = line else {
                debug!("End of input");
                writeln!(self.out)?;
                return Ok(());
            };

            if self.dispatch(&line).await? == Flow::Quit {
                return Ok(());
            }
        }
    }

    async fn dispatch(&mut self, line: &str) -> Result<Flow> {
        let Some(command) = Command::parse(line) else {
            return Ok(Flow::Continue);
        };

        let Some(verb) = self.verbs.lookup(&command.verb) else {
            writeln!(self.out, "Unknown command: {}", command.verb)?;
            writeln!(self.out, "Type 'help' for available commands")?;
            return Ok(Flow::Continue);
        };

        debug!("Executing {:?} {:?}", verb, command.args);

        let outcome = tokio::select! {
            result = AssertUnwindSafe(execute(
                verb,
                &command.args,
                &mut self.session,
                &self.connector,
                &mut self.out,
            ))
            .catch_unwind() => Some(result),
            _ = self.interrupts.interrupted() => None,
        };

        match outcome {
            Some(Ok(Ok(flow))) => return Ok(flow),
            Some(Ok(Err(e))) => report_error(&mut self.out, &e)?,
            Some(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                error!("Command {:?} panicked: {}", verb, message);
                writeln!(self.out, "Error: {}", message)?;
            }
            None => writeln!(self.out, "\n{}", INTERRUPTED)?,
        }

        Ok(Flow::Continue)
    }

    fn banner(&mut self) -> Result<()> {
        writeln!(self.out, "{}", RULE)?;
        writeln!(self.out, "MAVLink Drone Interactive Controller")?;
        writeln!(self.out, "{}", RULE)?;
        writeln!(self.out)?;
        writeln!(self.out, "This is a direct controller that talks to your drone.")?;
        writeln!(self.out, "Type 'help' for available commands.")?;
        Ok(())
    }
}

/// Run one resolved verb against the session
async fn execute<L: DroneLink>(
    verb: Verb,
    args: &[String],
    session: &mut Session<L>,
    connector: &Connector,
    out: &mut dyn Write,
) -> Result<Flow> {
    match verb {
        Verb::Connect => {
            connector.connect(session, out).await?;
        }
        Verb::Arm => handlers::handle_arm(session, out).await?,
        Verb::Disarm => handlers::handle_disarm(session, out).await?,
        Verb::Takeoff => handlers::handle_takeoff(session, args, out).await?,
        Verb::Land => handlers::handle_land(session, out).await?,
        Verb::Position => handlers::handle_position(session, out).await?,
        Verb::Battery => handlers::handle_battery(session, out).await?,
        Verb::FlightMode => handlers::handle_flight_mode(session, out).await?,
        Verb::Help => handlers::print_help(out)?,
        Verb::Quit => {
            writeln!(out, "\nGoodbye!")?;
            return Ok(Flow::Quit);
        }
    }
    Ok(Flow::Continue)
}

fn report_error(out: &mut dyn Write, e: &anyhow::Error) -> Result<()> {
    error!("Command failed: {:?}", e);
    writeln!(out, "Error: {:#}", e)?;
    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "command panicked".to_string()
    }
}
