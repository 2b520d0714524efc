//! Peer side of the inter-board bus.
//!
//! A peripheral board answers two bus callbacks:
//!
//! - **receive**: a 3-byte `SetPower` write is applied to the local channel
//!   immediately, inside the callback; a 1-byte write only selects what the
//!   next request returns.
//! - **request**: the selected channel's duty (in hundredths) or its last
//!   sampled seebeck value is returned as 2 big-endian bytes.
//!
//! Seebeck values are sampled into local storage when the board's own
//! collection cycle enters its collection state, so requests never wait on
//! the ADC.

use tec_core::domain::{BoardRole, CollectionState};
use tec_core::protocol::bus::{self, BusCommand, Opcode, READING_LEN};
use tracing::{debug, warn};

use super::route_commands::TecChannels;

/// Bus-facing state of a peripheral board.
pub struct Peripheral<T> {
    board_no: u8,
    channels: T,
    /// Command byte of the last write; selects the next request's reply.
    selected: Option<u8>,
    seebeck_storage: Vec<u16>,
    state: CollectionState,
}

impl<T: TecChannels> Peripheral<T> {
    pub fn new(board_no: u8, channels: T) -> Self {
        let count = usize::from(channels.channel_count());
        Self {
            board_no,
            channels,
            selected: None,
            seebeck_storage: vec![0; count],
            state: CollectionState::Init,
        }
    }

    pub fn board_no(&self) -> u8 {
        self.board_no
    }

    pub fn channels(&self) -> &T {
        &self.channels
    }

    pub fn state(&self) -> CollectionState {
        self.state
    }

    /// Handles a write from the controller.
    pub fn on_receive(&mut self, bytes: &[u8]) {
        let Some(&first) = bytes.first() else {
            return;
        };
        self.selected = Some(first);

        if bytes.len() == 1 {
            return;
        }

        match BusCommand::decode(bytes) {
            Ok(cmd) if cmd.opcode == Opcode::SetPower => {
                let percent = bus::hundredths_to_percent(cmd.payload);
                match self.channels.set_duty_cycle(cmd.channel, percent) {
                    Ok(()) => debug!(board = self.board_no, channel = cmd.channel, percent, "duty applied"),
                    Err(e) => warn!(board = self.board_no, channel = cmd.channel, "duty rejected: {e}"),
                }
            }
            Ok(cmd) => debug!(board = self.board_no, opcode = ?cmd.opcode, "write ignored"),
            Err(e) => warn!(board = self.board_no, "malformed bus write: {e}"),
        }
    }

    /// Produces the reply for a read request.
    pub fn on_request(&mut self) -> [u8; READING_LEN] {
        let decoded = self.selected.map(bus::decode_request);
        match decoded {
            Some(Ok((Opcode::ReportPower, channel))) => {
                let duty = self.channels.duty_cycle(channel).unwrap_or(0.0);
                let hundredths = bus::percent_to_hundredths(duty).unwrap_or(0);
                bus::encode_reading(hundredths)
            }
            Some(Ok((Opcode::ReportSeebeck, channel))) => {
                let raw = self
                    .seebeck_storage
                    .get(usize::from(channel))
                    .copied()
                    .unwrap_or(0);
                raw.to_be_bytes()
            }
            _ => {
                warn!(board = self.board_no, selected = ?self.selected, "request with no matching command");
                [0; READING_LEN]
            }
        }
    }

    /// Advances this board's own collection cycle by one tick.
    ///
    /// Entering the collection state samples every channel's seebeck value.
    pub fn tick(&mut self) -> CollectionState {
        self.state = self.state.advance(BoardRole::Peripheral, 1);
        if let CollectionState::CollectBoard(_) = self.state {
            self.sample_seebecks();
        }
        self.state
    }

    fn sample_seebecks(&mut self) {
        for channel in 0..self.channels.channel_count() {
            if let Some(value) = self.channels.seebeck(channel) {
                if let Some(slot) = self.seebeck_storage.get_mut(usize::from(channel)) {
                    *slot = value;
                }
            }
        }
        debug!(board = self.board_no, "seebeck values sampled");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
