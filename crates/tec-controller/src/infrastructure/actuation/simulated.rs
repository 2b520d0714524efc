//! Simulated TEC channels.
//!
//! Stands in for the PWM and direction outputs of a board. A duty change
//! that flips the sign first drives the output to zero, as the H-bridge
//! must never switch direction under load. Seebeck readings are synthesized
//! from the commanded duty and carry the ADC channel in their top nibble,
//! like the real converter's output word.

use tec_core::domain::TecError;
use tec_core::protocol::bus::SEEBECK_MASK;
use tracing::debug;

use crate::application::route_commands::TecChannels;

/// ADC count reported for an idle channel.
const SEEBECK_IDLE: i32 = 2048;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ChannelState {
    duty: f64,
    reversals: u32,
}

/// In-memory set of TEC channels.
#[derive(Debug, Clone)]
pub struct SimulatedChannels {
    channels: Vec<ChannelState>,
}

impl SimulatedChannels {
    pub fn new(count: u8) -> Self {
        Self {
            channels: vec![ChannelState::default(); usize::from(count)],
        }
    }

    /// How many times `channel` has switched direction.
    pub fn reversals(&self, channel: u8) -> Option<u32> {
        self.channels.get(usize::from(channel)).map(|c| c.reversals)
    }
}

impl TecChannels for SimulatedChannels {
    fn channel_count(&self) -> u8 {
        u8::try_from(self.channels.len()).unwrap_or(u8::MAX)
    }

    fn set_duty_cycle(&mut self, channel: u8, percent: f64) -> Result<(), TecError> {
        if !percent.is_finite() || percent.abs() > 100.0 {
            return Err(TecError::PowerOutOfRange);
        }
        let state = self
            .channels
            .get_mut(usize::from(channel))
            .ok_or(TecError::ChannelOutOfRange)?;

        if state.duty * percent < 0.0 {
            state.duty = 0.0;
            state.reversals += 1;
            debug!(channel, "direction change, output zeroed");
        }
        state.duty = percent;
        Ok(())
    }

    fn duty_cycle(&self, channel: u8) -> Option<f64> {
        self.channels.get(usize::from(channel)).map(|c| c.duty)
    }

    fn seebeck(&mut self, channel: u8) -> Option<u16> {
        let state = self.channels.get(usize::from(channel))?;
        let count = (SEEBECK_IDLE + (state.duty * 10.0) as i32).clamp(0, i32::from(SEEBECK_MASK));
        // Clamped to 12 bits above.
        let count = count as u16;
        Some((u16::from(channel & 0x0F) << 12) | count)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
