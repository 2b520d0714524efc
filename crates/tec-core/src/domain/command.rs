//! Application-level TEC commands queued for the command router.

use uuid::Uuid;

/// Identifies a client connection for reply routing.
pub type ConnectionId = Uuid;

/// What a [`TecDataCommand`] asks the router to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Apply a new duty cycle.
    DutySet,
    /// Read back the commanded duty cycle.
    DutyGet,
    /// Read the last seebeck sample.
    SeebeckGet,
}

/// A fully specified command for one TEC channel.
///
/// Commands are created by message handlers once board, channel and value
/// are all known, queued FIFO, and consumed by the router.
#[derive(Debug, Clone, PartialEq)]
pub struct TecDataCommand {
    pub kind: RequestKind,
    pub board: u8,
    pub channel: u8,
    /// Duty cycle in percent for `DutySet`; ignored for reads.
    pub value: f64,
    pub processed: bool,
    /// Connection to send the result to, if any.
    pub reply_to: Option<ConnectionId>,
    /// Logical TEC number echoed in replies.
    pub tec_no: Option<u32>,
}

impl TecDataCommand {
    fn new(kind: RequestKind, board: u8, channel: u8, value: f64) -> Self {
        Self {
            kind,
            board,
            channel,
            value,
            processed: false,
            reply_to: None,
            tec_no: None,
        }
    }

    pub fn duty_set(board: u8, channel: u8, percent: f64) -> Self {
        Self::new(RequestKind::DutySet, board, channel, percent)
    }

    pub fn duty_get(board: u8, channel: u8) -> Self {
        Self::new(RequestKind::DutyGet, board, channel, 0.0)
    }

    pub fn seebeck_get(board: u8, channel: u8) -> Self {
        Self::new(RequestKind::SeebeckGet, board, channel, 0.0)
    }

    /// Tags the command with the TEC number it was addressed by.
    pub fn with_tec_no(mut self, tec_no: u32) -> Self {
        self.tec_no = Some(tec_no);
        self
    }

    /// Routes the command's reading back to `connection`.
    pub fn reply_to(mut self, connection: ConnectionId) -> Self {
        self.reply_to = Some(connection);
        self
    }

    pub fn is_read(&self) -> bool {
        !matches!(self.kind, RequestKind::DutySet)
    }
}
