//! Local TEC channel drivers.

pub mod simulated;

pub use simulated::SimulatedChannels;
