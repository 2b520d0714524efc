//! Inter-board bus implementations.
//!
//! The hardware I2C driver lives outside this crate; [`SimulatedBus`] hosts
//! peripheral boards in-process behind the same [`BusTransport`] seam.
//!
//! [`BusTransport`]: crate::application::route_commands::BusTransport

pub mod simulated;

pub use simulated::{SimulatedBus, DEFAULT_MAX_TRANSFER};
