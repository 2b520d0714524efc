//! Numeric result codes reported for TEC commands.

use thiserror::Error;

/// Result code reported for a command that was applied.
pub const NO_ERROR: i32 = 0;

/// Validation failures for a TEC command.
///
/// Each variant carries a fixed negative code that is logged and returned
/// to clients in replies.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TecError {
    /// A duty value arrived with no board/channel selected.
    #[error("no board specified (code -10)")]
    NoBoardSpecified,

    /// The duty value lies outside ±100 %.
    #[error("power out of range (code -20)")]
    PowerOutOfRange,

    /// The board number lies outside `1..=board_count`.
    #[error("board out of range (code -30)")]
    BoardOutOfRange,

    /// The channel index lies past the board's channels.
    #[error("channel out of range (code -40)")]
    ChannelOutOfRange,
}

impl TecError {
    pub const fn code(self) -> i32 {
        match self {
            TecError::NoBoardSpecified => -10,
            TecError::PowerOutOfRange => -20,
            TecError::BoardOutOfRange => -30,
            TecError::ChannelOutOfRange => -40,
        }
    }
}

/// Maps a validation result onto its numeric code.
pub fn result_code<T>(result: &Result<T, TecError>) -> i32 {
    match result {
        Ok(_) => NO_ERROR,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_wire_values() {
        assert_eq!(TecError::NoBoardSpecified.code(), -10);
        assert_eq!(TecError::PowerOutOfRange.code(), -20);
        assert_eq!(TecError::BoardOutOfRange.code(), -30);
        assert_eq!(TecError::ChannelOutOfRange.code(), -40);
    }

    #[test]
    fn test_result_code_of_ok_is_zero() {
        assert_eq!(result_code::<()>(&Ok(())), NO_ERROR);
        assert_eq!(result_code::<()>(&Err(TecError::BoardOutOfRange)), -30);
    }
}
