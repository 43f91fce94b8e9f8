//! Link configuration
//!
//! The console reads its drone address from a `.env` settings file and the
//! process environment once at startup. Values are kept as given and only
//! validated when a connection is attempted, so a bad address leaves the
//! console running in the disconnected state.

use std::collections::HashMap;
use std::fmt;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::defaults;

/// Required: host or device of the drone link
pub const ADDRESS_VAR: &str = "MAVLINK_ADDRESS";
/// Optional: port (or baud rate for serial links)
pub const PORT_VAR: &str = "MAVLINK_PORT";
/// Optional: `udp`, `tcp` or `serial`, case-insensitive
pub const PROTOCOL_VAR: &str = "MAVLINK_PROTOCOL";

/// Settings file read when none is named
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Errors raised while loading or validating the link configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("MAVLINK_ADDRESS not set in environment or .env file")]
    MissingAddress,

    #[error("Invalid MAVLINK_PORT '{value}': {source}")]
    InvalidPort {
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("Unsupported MAVLINK_PROTOCOL '{0}' (expected udp, tcp or serial)")]
    UnsupportedProtocol(String),

    #[error("Failed to read settings file {}: {source}", path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

/// Transport used to reach the flight controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Udp,
    Tcp,
    Serial,
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "udp" => Ok(Self::Udp),
            "tcp" => Ok(Self::Tcp),
            "serial" => Ok(Self::Serial),
            _ => Err(ConfigError::UnsupportedProtocol(s.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Udp => write!(f, "udp"),
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Serial => write!(f, "serial"),
        }
    }
}

/// A validated `protocol://address:port` triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemAddress {
    pub protocol: Protocol,
    pub address: String,
    /// Port, or baud rate for serial links
    pub port: u16,
}

impl fmt::Display for SystemAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.address, self.port)
    }
}

/// Configuration for the drone link
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Host or serial device; no default
    pub address: Option<String>,
    /// Raw port value, validated on connect
    pub port: String,
    /// Raw protocol value, validated on connect
    pub protocol: String,
    /// System ID for this ground station
    pub system_id: u8,
    /// Component ID for this ground station
    pub component_id: u8,
    /// Target system until the autopilot announces itself
    pub target_system: u8,
    /// Target component ID (autopilot)
    pub target_component: u8,
    /// How long to wait for a COMMAND_ACK
    pub command_timeout: Duration,
    /// Resends before a command fails
    pub command_retries: u32,
    /// Ground station heartbeat period
    pub heartbeat_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: None,
            port: defaults::PORT.into(),
            protocol: defaults::PROTOCOL.into(),
            system_id: defaults::SYSTEM_ID,
            component_id: defaults::COMPONENT_ID,
            target_system: defaults::TARGET_SYSTEM,
            target_component: defaults::TARGET_COMPONENT,
            command_timeout: Duration::from_millis(defaults::COMMAND_ACK_TIMEOUT_MS),
            command_retries: defaults::COMMAND_MAX_RETRIES,
            heartbeat_interval: Duration::from_millis(defaults::HEARTBEAT_INTERVAL_MS),
        }
    }
}

impl LinkConfig {
    /// Load from a settings file overlaid by the process environment.
    ///
    /// A file named in `env_file` must exist and parse. Without one, `./.env`
    /// is read if it exists; when it is malformed its values are skipped and
    /// the error is returned next to a configuration built from the process
    /// environment alone.
    pub fn load(env_file: Option<&Path>) -> Result<(Self, Option<ConfigError>), ConfigError> {
        Self::load_from(env_file, Path::new(DEFAULT_ENV_FILE))
    }

    fn load_from(
        env_file: Option<&Path>,
        default_file: &Path,
    ) -> Result<(Self, Option<ConfigError>), ConfigError> {
        let (mut vars, skipped) = match env_file {
            Some(path) => (read_env_file(path)?, None),
            None if default_file.exists() => match read_env_file(default_file) {
                Ok(vars) => (vars, None),
                Err(e) => (HashMap::new(), Some(e)),
            },
            None => (HashMap::new(), None),
        };

        for key in [ADDRESS_VAR, PORT_VAR, PROTOCOL_VAR] {
            if let Ok(value) = std::env::var(key) {
                vars.insert(key.to_string(), value);
            }
        }

        Ok((Self::from_lookup(|key| vars.get(key).cloned()), skipped))
    }

    /// Build a configuration from a variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            address: lookup(ADDRESS_VAR).filter(|a| !a.trim().is_empty()),
            port: lookup(PORT_VAR).unwrap_or(defaults.port.clone()),
            protocol: lookup(PROTOCOL_VAR).unwrap_or(defaults.protocol.clone()),
            ..defaults
        }
    }

    /// Validate address, port and protocol into a connectable address
    pub fn system_address(&self) -> Result<SystemAddress, ConfigError> {
        let address = self
            .address
            .as_deref()
            .map(str::trim)
            .ok_or(ConfigError::MissingAddress)?;
        let protocol = self.protocol.parse::<Protocol>()?;
        let port = self
            .port
            .trim()
            .parse::<u16>()
            .map_err(|source| ConfigError::InvalidPort {
                value: self.port.clone(),
                source,
            })?;

        Ok(SystemAddress {
            protocol,
            address: address.to_string(),
            port,
        })
    }
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let to_err = |source| ConfigError::EnvFile {
        path: path.to_path_buf(),
        source,
    };

    dotenvy::from_path_iter(path)
        .map_err(to_err)?
        .map(|item| item.map_err(to_err))
        .collect()
}
