//! TOML boot configuration.
//!
//! The controller reads one file at start-up and never writes it back.
//! Every field has a default, so a missing file, or a file naming only the
//! TEC map, is enough to boot:
//!
//! ```toml
//! [controller]
//! box_no = 1
//! role = "controller"
//!
//! [network]
//! ip = "169.254.84.177"
//! port = 4500
//!
//! [[tec]]
//! id = 1
//! board = 1
//! channel = 0
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` take the value of
//! `some_fn()` when absent from the file.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tec_core::domain::{BoardRole, TecConfig, TecControllerConfig, TecMap};
use tec_core::protocol::message::DEFAULT_MESSAGE_CAPACITY;
use thiserror::Error;
use tracing::warn;

use crate::application::run_loop::ServiceOptions;
use crate::infrastructure::network::ConnectionLimits;

/// Smallest `message_capacity` that still fits every fixed-shape reply,
/// e.g. `{"Board":255,"Channel":255,"Result":-40,"BusError":4}` plus its NUL.
pub const MIN_MESSAGE_CAPACITY: usize = 64;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Two `[[tec]]` entries share an id.
    #[error("duplicate TEC id {0}")]
    DuplicateTec(u32),

    /// A TEC sits on a board the bus does not have.
    #[error("TEC {tec} is on board {board}, outside 1..={board_count}")]
    BoardOutOfRange { tec: u32, board: u8, board_count: u8 },

    /// A TEC uses a channel past the board's channel count.
    #[error("TEC {tec} uses channel {channel}, outside 0..{channels}")]
    ChannelOutOfRange { tec: u32, channel: u8, channels: u8 },

    /// A count or period that must be positive is zero.
    #[error("{0} must be at least 1")]
    ZeroLimit(&'static str),

    /// `message_capacity` is too small to hold a reply.
    #[error("message_capacity {capacity} is below the minimum of {minimum} bytes")]
    CapacityTooSmall { capacity: usize, minimum: usize },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level boot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub controller: ControllerSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub bus: BusSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default, rename = "tec")]
    pub tecs: Vec<TecConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerSection {
    #[serde(default = "default_box_no")]
    pub box_no: u32,
    /// This board's number; the lowest board in the TEC map when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_no: Option<u8>,
    #[serde(default)]
    pub role: BoardRole,
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    #[serde(default = "default_ip")]
    pub ip: Ipv4Addr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Key whose nested object holds the commands, e.g. `"TECCommand"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_filter: Option<String>,
    /// Key replies are nested under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_destination: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusSection {
    #[serde(default = "default_board_count")]
    pub board_count: u8,
    #[serde(default = "default_channels_per_board")]
    pub channels_per_board: u8,
    /// Largest single bus write in bytes.
    #[serde(default = "default_max_transfer")]
    pub max_transfer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimitsSection {
    /// Bytes per inbound frame and per encoded reply.
    #[serde(default = "default_message_capacity")]
    pub message_capacity: usize,
    /// Messages per connection queue, and commands in the command queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_collection_period_ms")]
    pub collection_period_ms: u64,
    #[serde(default = "default_commands_per_cycle")]
    pub commands_per_cycle: usize,
    /// Longest a reply send may block before the client is dropped.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_box_no() -> u32 {
    1
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_ip() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}
fn default_port() -> u16 {
    4500
}
fn default_max_clients() -> usize {
    4
}
fn default_board_count() -> u8 {
    5
}
fn default_channels_per_board() -> u8 {
    16
}
fn default_max_transfer() -> usize {
    32
}
fn default_message_capacity() -> usize {
    DEFAULT_MESSAGE_CAPACITY
}
fn default_queue_capacity() -> usize {
    64
}
fn default_collection_period_ms() -> u64 {
    1000
}
fn default_commands_per_cycle() -> usize {
    1
}
fn default_send_timeout_ms() -> u64 {
    50
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            box_no: default_box_no(),
            board_no: None,
            role: BoardRole::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            port: default_port(),
            max_clients: default_max_clients(),
            dest_filter: None,
            reply_destination: None,
        }
    }
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            board_count: default_board_count(),
            channels_per_board: default_channels_per_board(),
            max_transfer: default_max_transfer(),
        }
    }
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            message_capacity: default_message_capacity(),
            queue_capacity: default_queue_capacity(),
            collection_period_ms: default_collection_period_ms(),
            commands_per_cycle: default_commands_per_cycle(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

// ── Derived settings ──────────────────────────────────────────────────────────

impl AppConfig {
    /// Checks the TEC map against the bus geometry and the limits.
    ///
    /// # Errors
    ///
    /// The first problem found, as a [`ConfigError`] variant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.board_count == 0 {
            return Err(ConfigError::ZeroLimit("board_count"));
        }
        for (name, value) in [
            ("max_clients", self.network.max_clients as u64),
            ("queue_capacity", self.limits.queue_capacity as u64),
            ("commands_per_cycle", self.limits.commands_per_cycle as u64),
            ("collection_period_ms", self.limits.collection_period_ms),
            ("send_timeout_ms", self.limits.send_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroLimit(name));
            }
        }
        if self.limits.message_capacity < MIN_MESSAGE_CAPACITY {
            return Err(ConfigError::CapacityTooSmall {
                capacity: self.limits.message_capacity,
                minimum: MIN_MESSAGE_CAPACITY,
            });
        }

        let mut seen = HashSet::new();
        for tec in &self.tecs {
            if !seen.insert(tec.tec_no) {
                return Err(ConfigError::DuplicateTec(tec.tec_no));
            }
            if tec.board_no < 1 || tec.board_no > self.bus.board_count {
                return Err(ConfigError::BoardOutOfRange {
                    tec: tec.tec_no,
                    board: tec.board_no,
                    board_count: self.bus.board_count,
                });
            }
            if tec.channel_no >= self.bus.channels_per_board {
                return Err(ConfigError::ChannelOutOfRange {
                    tec: tec.tec_no,
                    channel: tec.channel_no,
                    channels: self.bus.channels_per_board,
                });
            }
        }
        Ok(())
    }

    /// This board's number: configured, else the lowest board in the TEC map, else 1.
    pub fn board_no(&self) -> u8 {
        self.controller
            .board_no
            .or_else(|| self.tec_map().lowest_board())
            .unwrap_or(1)
    }

    pub fn tec_map(&self) -> TecMap {
        TecMap::new(self.tecs.clone())
    }

    /// Validates and builds the device-wide configuration.
    ///
    /// # Errors
    ///
    /// See [`validate`](Self::validate).
    pub fn controller_config(&self) -> Result<TecControllerConfig, ConfigError> {
        self.validate()?;
        Ok(TecControllerConfig {
            box_no: self.controller.box_no,
            board_no: self.board_no(),
            role: self.controller.role,
            ip: self.network.ip,
            port: self.network.port,
            board_count: self.bus.board_count,
            channels_per_board: self.bus.channels_per_board,
            tecs: self.tec_map(),
        })
    }

    pub fn connection_limits(&self) -> ConnectionLimits {
        ConnectionLimits {
            max_clients: self.network.max_clients,
            message_capacity: self.limits.message_capacity,
            queue_capacity: self.limits.queue_capacity,
            send_timeout: Duration::from_millis(self.limits.send_timeout_ms),
        }
    }

    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            command_capacity: self.limits.queue_capacity,
            commands_per_cycle: self.limits.commands_per_cycle,
            dest_filter: self.network.dest_filter.clone(),
            reply_destination: self.network.reply_destination.clone(),
        }
    }

    pub fn collection_period(&self) -> Duration {
        Duration::from_millis(self.limits.collection_period_ms)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Parses a configuration document.
///
/// # Errors
///
/// [`ConfigError::Parse`] for malformed TOML.
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Loads the configuration at `path`, returning the default if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "config file not found, using defaults");
            Ok(AppConfig::default())
        }
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
