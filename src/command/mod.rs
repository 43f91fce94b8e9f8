//! Console command parsing and dispatch
//!
//! This module handles:
//! - Tokenizing an input line into a verb and its arguments
//! - Resolving verbs and aliases through the immutable verb table
//! - The per-verb action handlers

pub mod handlers;

use std::collections::HashMap;

use thiserror::Error;

/// Action selected by a verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Connect,
    Arm,
    Disarm,
    Takeoff,
    Land,
    Position,
    Battery,
    FlightMode,
    Help,
    Quit,
}

/// Verb strings and aliases, in help order
const VERBS: &[(&str, Verb)] = &[
    ("connect", Verb::Connect),
    ("arm", Verb::Arm),
    ("disarm", Verb::Disarm),
    ("takeoff", Verb::Takeoff),
    ("land", Verb::Land),
    ("position", Verb::Position),
    ("pos", Verb::Position),
    ("battery", Verb::Battery),
    ("bat", Verb::Battery),
    ("mode", Verb::FlightMode),
    ("help", Verb::Help),
    ("quit", Verb::Quit),
    ("exit", Verb::Quit),
];

/// Usage lines printed by `help`
pub const HELP: &[(&str, &str)] = &[
    ("connect", "Connect to the drone"),
    ("arm", "Arm the drone"),
    ("disarm", "Disarm the drone"),
    ("takeoff [alt]", "Take off to altitude (default: 10m)"),
    ("land", "Land the drone"),
    ("position", "Get current GPS position"),
    ("battery", "Get battery status"),
    ("mode", "Get current flight mode"),
    ("help", "Show this help message"),
    ("quit/exit", "Exit the program"),
];

/// Errors in command arguments
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Invalid altitude '{value}': expected a number of meters")]
    InvalidAltitude { value: String },
}

/// Normalized verb to action mapping, fixed for the life of the console
#[derive(Debug, Clone)]
pub struct VerbTable {
    verbs: HashMap<&'static str, Verb>,
}

impl VerbTable {
    pub fn new() -> Self {
        Self {
            verbs: VERBS.iter().copied().collect(),
        }
    }

    /// Exact-match lookup of an already lowercased verb
    pub fn lookup(&self, verb: &str) -> Option<Verb> {
        self.verbs.get(verb).copied()
    }
}

impl Default for VerbTable {
    fn default() -> Self {
        Self::new()
    }
}

/// One tokenized input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Lowercased first token
    pub verb: String,
    pub args: Vec<String>,
}

impl Command {
    /// Tokenize a line on whitespace. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let verb = tokens.next()?.to_lowercase();
        Some(Self {
            verb,
            args: tokens.map(String::from).collect(),
        })
    }
}
