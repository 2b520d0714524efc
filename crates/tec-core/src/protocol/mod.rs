//! Wire-level protocol: JSON message framing and dispatch, plus the
//! inter-board bus codec.

pub mod bus;
pub mod dispatch;
pub mod framer;
pub mod message;

pub use bus::{BusCodecError, BusCommand, Opcode};
pub use dispatch::{Dispatch, DispatchSummary, DispatchTable, Handler, ValueKind};
pub use framer::{FrameResult, MessageFramer};
pub use message::{Message, MessageError, MessageState, OutboundMessage};
