//! Byte codec for the inter-board control bus.
//!
//! Wire format of a write transaction:
//! ```text
//! [(channel << 4) | opcode][payload_hi][payload_lo]
//! ```
//! The payload is a signed 16-bit integer in hundredths of a percent,
//! big-endian. A read is a one-byte request `(channel << 4) | opcode`
//! followed by a 2-byte big-endian reading from the peer.
//!
//! Peer boards answer on address `I2C_OFFSET + board - 1`.

use thiserror::Error;

/// Base bus address of the first peer board.
pub const I2C_OFFSET: u8 = 20;

/// Length of a write transaction on the wire.
pub const COMMAND_LEN: usize = 3;

/// Length of a reading returned by a peer.
pub const READING_LEN: usize = 2;

/// Highest channel index that fits in the channel nibble.
pub const MAX_CHANNEL: u8 = 0x0F;

/// Inclusive magnitude limit of a duty value, in hundredths of a percent.
pub const MAX_HUNDREDTHS: i32 = 10_000;

/// Mask selecting the 12-bit ADC count of a seebeck reading.
pub const SEEBECK_MASK: u16 = 0x0FFF;

/// Errors produced while encoding or decoding bus transactions.
#[derive(Debug, Error, PartialEq)]
pub enum BusCodecError {
    /// The byte slice is shorter than the transaction requires.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The low nibble of the command byte is not a known opcode.
    #[error("unknown bus opcode: 0x{0:X}")]
    UnknownOpcode(u8),

    /// The channel does not fit in the 4-bit channel field.
    #[error("channel {0} does not fit the channel nibble")]
    ChannelOutOfRange(u8),

    /// The duty value lies outside ±10000 hundredths of a percent.
    #[error("duty value {0} is outside ±{MAX_HUNDREDTHS} hundredths")]
    PowerOutOfRange(f64),

    /// Board numbers start at 1.
    #[error("board {0} has no bus address")]
    NoAddress(u8),
}

/// Command selector carried in the low nibble of the first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Request the commanded duty of a channel.
    ReportPower = 1,
    /// Request the last seebeck sample of a channel.
    ReportSeebeck = 8,
    /// Apply a new duty to a channel.
    SetPower = 10,
}

impl TryFrom<u8> for Opcode {
    type Error = BusCodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Opcode::ReportPower),
            8 => Ok(Opcode::ReportSeebeck),
            10 => Ok(Opcode::SetPower),
            other => Err(BusCodecError::UnknownOpcode(other)),
        }
    }
}

/// A decoded 3-byte write transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusCommand {
    pub opcode: Opcode,
    pub channel: u8,
    /// Signed payload; for `SetPower` this is hundredths of a percent.
    pub payload: i16,
}

impl BusCommand {
    /// Builds a `SetPower` command for `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`BusCodecError::ChannelOutOfRange`] if the channel exceeds the nibble.
    pub fn set_power(channel: u8, hundredths: i16) -> Result<Self, BusCodecError> {
        check_channel(channel)?;
        Ok(Self {
            opcode: Opcode::SetPower,
            channel,
            payload: hundredths,
        })
    }

    /// Encodes the command into its 3-byte wire form.
    pub fn encode(&self) -> [u8; COMMAND_LEN] {
        let [hi, lo] = self.payload.to_be_bytes();
        [command_byte(self.opcode, self.channel), hi, lo]
    }

    /// Decodes a 3-byte write transaction.
    ///
    /// Bytes beyond the third are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`BusCodecError::InsufficientData`] for short input and
    /// [`BusCodecError::UnknownOpcode`] for an unrecognised low nibble.
    pub fn decode(bytes: &[u8]) -> Result<Self, BusCodecError> {
        require_len(bytes, COMMAND_LEN)?;
        let (opcode, channel) = decode_request(bytes[0])?;
        Ok(Self {
            opcode,
            channel,
            payload: i16::from_be_bytes([bytes[1], bytes[2]]),
        })
    }
}

/// Encodes the one-byte read request for `opcode` on `channel`.
///
/// # Errors
///
/// Returns [`BusCodecError::ChannelOutOfRange`] if the channel exceeds the nibble.
pub fn encode_request(opcode: Opcode, channel: u8) -> Result<u8, BusCodecError> {
    check_channel(channel)?;
    Ok(command_byte(opcode, channel))
}

/// Splits a command byte into its opcode and channel.
///
/// # Errors
///
/// Returns [`BusCodecError::UnknownOpcode`] for an unrecognised low nibble.
pub fn decode_request(byte: u8) -> Result<(Opcode, u8), BusCodecError> {
    let opcode = Opcode::try_from(byte & 0x0F)?;
    Ok((opcode, (byte >> 4) & 0x0F))
}

/// Computes the bus address of a peer board (boards are numbered from 1).
///
/// # Errors
///
/// Returns [`BusCodecError::NoAddress`] for board 0 or an address past `u8`.
pub fn peer_address(board: u8) -> Result<u8, BusCodecError> {
    if board == 0 {
        return Err(BusCodecError::NoAddress(board));
    }
    I2C_OFFSET
        .checked_add(board - 1)
        .ok_or(BusCodecError::NoAddress(board))
}

/// Converts a duty percentage into rounded hundredths of a percent.
///
/// # Errors
///
/// Returns [`BusCodecError::PowerOutOfRange`] when the rounded value falls
/// outside `[-10000, 10000]` or the input is not a finite number.
pub fn percent_to_hundredths(percent: f64) -> Result<i16, BusCodecError> {
    let scaled = (percent * 100.0).round();
    if !scaled.is_finite() || scaled.abs() > f64::from(MAX_HUNDREDTHS) {
        return Err(BusCodecError::PowerOutOfRange(percent));
    }
    Ok(scaled as i16)
}

/// Converts hundredths of a percent back into a percentage.
pub fn hundredths_to_percent(hundredths: i16) -> f64 {
    f64::from(hundredths) / 100.0
}

/// Encodes a peer reading as 2 big-endian bytes.
pub fn encode_reading(value: i16) -> [u8; READING_LEN] {
    value.to_be_bytes()
}

/// Decodes a 2-byte big-endian reading.
///
/// # Errors
///
/// Returns [`BusCodecError::InsufficientData`] for fewer than 2 bytes.
pub fn decode_reading(bytes: &[u8]) -> Result<i16, BusCodecError> {
    require_len(bytes, READING_LEN)?;
    Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Decodes a seebeck reading, dropping the ADC channel bits in the top nibble.
///
/// # Errors
///
/// Returns [`BusCodecError::InsufficientData`] for fewer than 2 bytes.
pub fn decode_seebeck(bytes: &[u8]) -> Result<u16, BusCodecError> {
    require_len(bytes, READING_LEN)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]) & SEEBECK_MASK)
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn command_byte(opcode: Opcode, channel: u8) -> u8 {
    ((channel & 0x0F) << 4) | opcode as u8
}

fn check_channel(channel: u8) -> Result<(), BusCodecError> {
    if channel > MAX_CHANNEL {
        Err(BusCodecError::ChannelOutOfRange(channel))
    } else {
        Ok(())
    }
}

fn require_len(bytes: &[u8], needed: usize) -> Result<(), BusCodecError> {
    if bytes.len() < needed {
        Err(BusCodecError::InsufficientData {
            needed,
            available: bytes.len(),
        })
    } else {
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_power_encodes_channel_in_high_nibble() {
        // Arrange
        let cmd = BusCommand::set_power(3, -4000).expect("valid channel");

        // Act
        let bytes = cmd.encode();

        // Assert
        assert_eq!(bytes[0], 0x3A);
        assert_eq!(i16::from_be_bytes([bytes[1], bytes[2]]), -4000);
    }

    #[test]
    fn test_negative_payload_sets_sign_bits_in_high_byte() {
        let cmd = BusCommand::set_power(0, -1).expect("valid channel");
        assert_eq!(cmd.encode(), [0x0A, 0xFF, 0xFF]);
    }

    #[test]
    fn test_decode_reconstructs_opcode_channel_and_payload() {
        let decoded = BusCommand::decode(&[0xFA, 0x27, 0x10]).expect("decode");
        assert_eq!(decoded.opcode, Opcode::SetPower);
        assert_eq!(decoded.channel, 15);
        assert_eq!(decoded.payload, 10_000);
    }

    #[test]
    fn test_decode_short_slice_returns_insufficient_data() {
        let err = BusCommand::decode(&[0x0A, 0x00]).unwrap_err();
        assert_eq!(
            err,
            BusCodecError::InsufficientData {
                needed: 3,
                available: 2
            }
        );
    }

    #[test]
    fn test_decode_unknown_opcode_is_rejected() {
        let err = BusCommand::decode(&[0x05, 0, 0]).unwrap_err();
        assert_eq!(err, BusCodecError::UnknownOpcode(5));
    }

    #[test]
    fn test_set_power_rejects_channel_past_nibble() {
        let err = BusCommand::set_power(16, 0).unwrap_err();
        assert_eq!(err, BusCodecError::ChannelOutOfRange(16));
    }

    #[test]
    fn test_encode_request_packs_opcode_and_channel() {
        assert_eq!(encode_request(Opcode::ReportSeebeck, 2), Ok(0x28));
        assert_eq!(encode_request(Opcode::ReportPower, 0), Ok(0x01));
    }

    #[test]
    fn test_peer_address_starts_at_offset_for_board_one() {
        assert_eq!(peer_address(1), Ok(20));
        assert_eq!(peer_address(5), Ok(24));
        assert_eq!(peer_address(0), Err(BusCodecError::NoAddress(0)));
    }

    #[test]
    fn test_percent_to_hundredths_accepts_boundaries() {
        assert_eq!(percent_to_hundredths(100.0), Ok(10_000));
        assert_eq!(percent_to_hundredths(-100.0), Ok(-10_000));
        assert_eq!(percent_to_hundredths(-40.0), Ok(-4_000));
    }

    #[test]
    fn test_percent_to_hundredths_rounds_to_nearest() {
        assert_eq!(percent_to_hundredths(12.345_6), Ok(1_235));
        assert_eq!(percent_to_hundredths(-0.004), Ok(0));
    }

    #[test]
    fn test_percent_to_hundredths_rejects_out_of_range() {
        assert!(matches!(
            percent_to_hundredths(100.01),
            Err(BusCodecError::PowerOutOfRange(_))
        ));
        assert!(matches!(
            percent_to_hundredths(f64::NAN),
            Err(BusCodecError::PowerOutOfRange(_))
        ));
    }

    #[test]
    fn test_seebeck_reading_masks_adc_channel_bits() {
        let bytes = encode_reading(0x3ABC_u16 as i16);
        assert_eq!(decode_seebeck(&bytes), Ok(0x0ABC));
    }
}
