//! CommandRouter: applies queued TEC commands locally or over the bus.
//!
//! A command whose board equals this board's number is applied through the
//! [`TecChannels`] collaborator. Any other board is reached over the
//! inter-board bus with a 3-byte `SetPower` write, or a one-byte request
//! followed by a 2-byte read for the report opcodes.
//!
//! # Shadow table
//!
//! Every duty the router confirms, locally or on a peer, is copied into a
//! [`ShadowTable`] keyed by `(board, channel)`. A failed bus write leaves the
//! shadow untouched, so it only ever reflects values known to be sent.
//!
//! # Architecture
//!
//! The router depends only on the [`BusTransport`] and [`TecChannels`]
//! traits. The hardware bus, the simulated bus, and test doubles are all
//! injected at construction time.

use std::collections::{BTreeMap, VecDeque};

use tec_core::domain::{
    BoardRole, CollectionState, RequestKind, TecControllerConfig, TecDataCommand, TecError,
    NO_ERROR,
};
use tec_core::protocol::bus::{self, BusCommand, Opcode, MAX_HUNDREDTHS, READING_LEN, SEEBECK_MASK};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Bus transmission failures, numbered like the bus driver's status codes.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    #[error("bus transmit buffer overflow")]
    TxOverflow,
    #[error("address not acknowledged")]
    AddressNack,
    #[error("data not acknowledged")]
    DataNack,
    #[error("bus error")]
    Other,
    #[error("bus timeout")]
    Timeout,
}

impl BusError {
    /// Driver status code (0 is reserved for success).
    pub const fn code(self) -> u8 {
        match self {
            BusError::TxOverflow => 1,
            BusError::AddressNack => 2,
            BusError::DataNack => 3,
            BusError::Other => 4,
            BusError::Timeout => 5,
        }
    }

    /// Maps a non-zero driver status code back to an error.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(BusError::TxOverflow),
            2 => Some(BusError::AddressNack),
            3 => Some(BusError::DataNack),
            4 => Some(BusError::Other),
            5 => Some(BusError::Timeout),
            _ => None,
        }
    }
}

/// Why a routed command did not complete.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    /// Validation failed; nothing was applied or transmitted.
    #[error(transparent)]
    Rejected(#[from] TecError),
    /// Validation passed but the bus transaction failed.
    #[error("bus transmission failed: {0}")]
    Bus(#[from] BusError),
}

impl RouteError {
    /// Validation result code; `0` when only the bus failed.
    pub fn result_code(&self) -> i32 {
        match self {
            RouteError::Rejected(e) => e.code(),
            RouteError::Bus(_) => NO_ERROR,
        }
    }

    pub fn bus_error(&self) -> Option<BusError> {
        match self {
            RouteError::Bus(e) => Some(*e),
            RouteError::Rejected(_) => None,
        }
    }
}

/// Blocking, bounded-time access to the inter-board bus.
///
/// Infrastructure implementations drive the bus controller; tests mock it.
#[cfg_attr(test, mockall::automock)]
pub trait BusTransport: Send {
    /// Writes `bytes` to the peer at `address`, waiting for the acknowledgement.
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError>;

    /// Requests `buf.len()` bytes from the peer at `address`; returns the count read.
    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<usize, BusError>;
}

/// The TEC channels physically attached to this board.
pub trait TecChannels: Send {
    fn channel_count(&self) -> u8;

    /// Drives `channel` at `percent` duty; the sign selects the direction.
    ///
    /// # Errors
    ///
    /// [`TecError::PowerOutOfRange`] when `|percent| > 100`,
    /// [`TecError::ChannelOutOfRange`] for an unknown channel.
    fn set_duty_cycle(&mut self, channel: u8, percent: f64) -> Result<(), TecError>;

    /// Last commanded signed duty of `channel`.
    fn duty_cycle(&self, channel: u8) -> Option<f64>;

    /// Samples the seebeck ADC of `channel`.
    fn seebeck(&mut self, channel: u8) -> Option<u16>;
}

/// Where a command was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    Local,
    Remote,
}

/// A value read back by a `DutyGet` or `SeebeckGet` command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    /// Signed duty in percent.
    Duty(f64),
    /// 12-bit seebeck ADC count.
    Seebeck(u16),
}

/// Outcome of one routed command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReport {
    pub command: TecDataCommand,
    pub target: RouteTarget,
    /// Validation result code (`0` on success).
    pub result: i32,
    pub bus_error: Option<BusError>,
    /// Duty in hundredths of a percent handed to the channel or the bus.
    pub applied_hundredths: Option<i32>,
    pub reading: Option<Reading>,
}

impl CommandReport {
    pub fn succeeded(&self) -> bool {
        self.result == NO_ERROR && self.bus_error.is_none()
    }
}

// ── Shadow table ──────────────────────────────────────────────────────────────

/// Last confirmed values of one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelShadow {
    /// Duty in percent.
    pub duty: Option<f64>,
    /// 12-bit seebeck count.
    pub seebeck: Option<u16>,
}

/// This board's view of every channel it has commanded or read.
#[derive(Debug, Clone, Default)]
pub struct ShadowTable {
    entries: BTreeMap<(u8, u8), ChannelShadow>,
}

impl ShadowTable {
    pub fn get(&self, board: u8, channel: u8) -> Option<&ChannelShadow> {
        self.entries.get(&(board, channel))
    }

    pub fn duty(&self, board: u8, channel: u8) -> Option<f64> {
        self.get(board, channel).and_then(|s| s.duty)
    }

    pub fn seebeck(&self, board: u8, channel: u8) -> Option<u16> {
        self.get(board, channel).and_then(|s| s.seebeck)
    }

    pub fn record_duty(&mut self, board: u8, channel: u8, percent: f64) {
        self.entries.entry((board, channel)).or_default().duty = Some(percent);
    }

    pub fn record_seebeck(&mut self, board: u8, channel: u8, count: u16) {
        self.entries.entry((board, channel)).or_default().seebeck = Some(count);
    }

    /// Entries ordered by board, then channel.
    pub fn iter(&self) -> impl Iterator<Item = (&(u8, u8), &ChannelShadow)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

/// Routes [`TecDataCommand`]s and drives the board collection cycle.
pub struct CommandRouter<B, T> {
    local_board: u8,
    board_count: u8,
    channels_per_board: u8,
    role: BoardRole,
    channels: T,
    bus: B,
    shadow: ShadowTable,
    state: CollectionState,
}

impl<B: BusTransport, T: TecChannels> CommandRouter<B, T> {
    pub fn new(config: &TecControllerConfig, channels: T, bus: B) -> Self {
        Self {
            local_board: config.board_no,
            board_count: config.board_count,
            channels_per_board: config.channels_per_board,
            role: config.role,
            channels,
            bus,
            shadow: ShadowTable::default(),
            state: CollectionState::Init,
        }
    }

    pub fn local_board(&self) -> u8 {
        self.local_board
    }

    pub fn shadow(&self) -> &ShadowTable {
        &self.shadow
    }

    pub fn state(&self) -> CollectionState {
        self.state
    }

    pub fn channels(&self) -> &T {
        &self.channels
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Pops and executes the oldest queued command.
    pub fn process_next(&mut self, queue: &mut VecDeque<TecDataCommand>) -> Option<CommandReport> {
        let command = queue.pop_front()?;
        Some(self.execute(command))
    }

    /// Executes one command, locally or over the bus.
    pub fn execute(&mut self, mut command: TecDataCommand) -> CommandReport {
        let target = if command.board == self.local_board {
            RouteTarget::Local
        } else {
            RouteTarget::Remote
        };
        let (board, channel) = (command.board, command.channel);
        let mut applied_hundredths = None;

        let outcome: Result<Option<Reading>, RouteError> = match (command.kind, target) {
            (RequestKind::DutySet, RouteTarget::Local) => {
                let duty = to_hundredths(command.value);
                applied_hundredths = Some(duty);
                self.set_local_tec_value(channel, duty)
                    .map(|_| None)
                    .map_err(RouteError::from)
            }
            (RequestKind::DutySet, RouteTarget::Remote) => {
                let duty = to_hundredths(command.value);
                applied_hundredths = Some(duty);
                self.set_remote_tec_value(board, channel, duty).map(|_| None)
            }
            (RequestKind::DutyGet, RouteTarget::Local) => self.local_duty(channel).map(Some),
            (RequestKind::DutyGet, RouteTarget::Remote) => {
                self.remote_duty(board, channel).map(Some)
            }
            (RequestKind::SeebeckGet, RouteTarget::Local) => {
                self.local_seebeck(channel).map(Some)
            }
            (RequestKind::SeebeckGet, RouteTarget::Remote) => {
                self.remote_seebeck(board, channel).map(Some)
            }
        };
        command.processed = true;

        let (result, bus_error, reading) = match outcome {
            Ok(reading) => (NO_ERROR, None, reading),
            Err(e) => (e.result_code(), e.bus_error(), None),
        };
        let bus_code = bus_error.map_or(0, BusError::code);
        match target {
            RouteTarget::Local => info!(
                board,
                channel,
                kind = ?command.kind,
                duty = command.value,
                result,
                "local TEC command"
            ),
            RouteTarget::Remote => info!(
                board,
                channel,
                kind = ?command.kind,
                duty = command.value,
                result,
                bus_error = bus_code,
                "remote TEC command"
            ),
        }

        CommandReport {
            command,
            target,
            result,
            bus_error,
            applied_hundredths,
            reading,
        }
    }

    /// Drives a local channel at `duty_hundredths` hundredths of a percent.
    ///
    /// # Errors
    ///
    /// [`TecError::PowerOutOfRange`] outside ±10000 and
    /// [`TecError::ChannelOutOfRange`] for a channel this board lacks.
    pub fn set_local_tec_value(&mut self, channel: u8, duty_hundredths: i32) -> Result<(), TecError> {
        check_power(duty_hundredths)?;
        if channel >= self.channels.channel_count() {
            return Err(TecError::ChannelOutOfRange);
        }
        let percent = f64::from(duty_hundredths) / 100.0;
        self.channels.set_duty_cycle(channel, percent)?;
        self.shadow.record_duty(self.local_board, channel, percent);
        Ok(())
    }

    /// Sends a `SetPower` write for `channel` to the peer `board`.
    ///
    /// The power range is checked first, then the board range; neither
    /// failure touches the bus.
    ///
    /// # Errors
    ///
    /// [`RouteError::Rejected`] for validation failures and
    /// [`RouteError::Bus`] when the write is not acknowledged.
    pub fn set_remote_tec_value(
        &mut self,
        board: u8,
        channel: u8,
        duty_hundredths: i32,
    ) -> Result<(), RouteError> {
        check_power(duty_hundredths)?;
        self.check_board(board)?;
        let (address, _) = self.remote_target(board, channel, Opcode::SetPower)?;

        let payload = i16::try_from(duty_hundredths).map_err(|_| TecError::PowerOutOfRange)?;
        let frame = BusCommand::set_power(channel, payload)
            .map_err(|_| TecError::ChannelOutOfRange)?
            .encode();
        self.bus.write(address, &frame)?;

        self.shadow
            .record_duty(board, channel, bus::hundredths_to_percent(payload));
        Ok(())
    }

    /// Advances the collection cycle by one tick and returns the new state.
    pub fn ping_collection_state_machine(&mut self) -> CollectionState {
        let next = self.state.advance(self.role, self.board_count);
        debug!(from = ?self.state, to = ?next, "collection state");
        self.state = next;
        next
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    fn local_duty(&mut self, channel: u8) -> Result<Reading, RouteError> {
        let percent = self
            .channels
            .duty_cycle(channel)
            .ok_or(TecError::ChannelOutOfRange)?;
        self.shadow.record_duty(self.local_board, channel, percent);
        Ok(Reading::Duty(percent))
    }

    fn local_seebeck(&mut self, channel: u8) -> Result<Reading, RouteError> {
        let raw = self
            .channels
            .seebeck(channel)
            .ok_or(TecError::ChannelOutOfRange)?;
        let count = raw & SEEBECK_MASK;
        self.shadow.record_seebeck(self.local_board, channel, count);
        Ok(Reading::Seebeck(count))
    }

    fn remote_duty(&mut self, board: u8, channel: u8) -> Result<Reading, RouteError> {
        let bytes = self.remote_reading(board, channel, Opcode::ReportPower)?;
        let hundredths = bus::decode_reading(&bytes).map_err(|_| BusError::DataNack)?;
        let percent = bus::hundredths_to_percent(hundredths);
        self.shadow.record_duty(board, channel, percent);
        Ok(Reading::Duty(percent))
    }

    fn remote_seebeck(&mut self, board: u8, channel: u8) -> Result<Reading, RouteError> {
        let bytes = self.remote_reading(board, channel, Opcode::ReportSeebeck)?;
        let count = bus::decode_seebeck(&bytes).map_err(|_| BusError::DataNack)?;
        self.shadow.record_seebeck(board, channel, count);
        Ok(Reading::Seebeck(count))
    }

    fn remote_reading(
        &mut self,
        board: u8,
        channel: u8,
        opcode: Opcode,
    ) -> Result<[u8; READING_LEN], RouteError> {
        self.check_board(board)?;
        let (address, request) = self.remote_target(board, channel, opcode)?;
        self.bus.write(address, &[request])?;

        let mut buf = [0u8; READING_LEN];
        let read = self.bus.read(address, &mut buf)?;
        if read < READING_LEN {
            warn!(board, channel, read, "short bus reading");
            return Err(BusError::DataNack.into());
        }
        Ok(buf)
    }

    // ── Validation ────────────────────────────────────────────────────────────

    fn check_board(&self, board: u8) -> Result<(), TecError> {
        if board < 1 || board > self.board_count {
            Err(TecError::BoardOutOfRange)
        } else {
            Ok(())
        }
    }

    /// Resolves the peer address and request byte for a remote channel.
    fn remote_target(&self, board: u8, channel: u8, opcode: Opcode) -> Result<(u8, u8), TecError> {
        if channel >= self.channels_per_board {
            return Err(TecError::ChannelOutOfRange);
        }
        let request =
            bus::encode_request(opcode, channel).map_err(|_| TecError::ChannelOutOfRange)?;
        let address = bus::peer_address(board).map_err(|_| TecError::BoardOutOfRange)?;
        Ok((address, request))
    }
}

fn check_power(duty_hundredths: i32) -> Result<(), TecError> {
    if duty_hundredths.unsigned_abs() > MAX_HUNDREDTHS.unsigned_abs() {
        Err(TecError::PowerOutOfRange)
    } else {
        Ok(())
    }
}

/// Rounds a duty percentage to hundredths.
///
/// Non-finite input maps out of range; huge values saturate at the `i32`
/// bounds, which `check_power` rejects.
fn to_hundredths(percent: f64) -> i32 {
    let scaled = (percent * 100.0).round();
    if scaled.is_finite() {
        scaled as i32
    } else {
        i32::MAX
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
