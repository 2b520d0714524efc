//! # tec-core
//!
//! I/O-free building blocks of the TEC controller firmware.
//!
//! - **`protocol`** – How bytes travel. Client messages are JSON objects
//!   framed by brace counting and routed key by key through a typed
//!   dispatch table. Boards talk to each other with 3-byte bus commands.
//!
//! - **`domain`** – Commands, configuration, result codes, and the
//!   collection cycle that polls peer boards.
//!
//! Nothing here touches sockets, timers, or hardware; the controller crate
//! supplies those.

pub mod domain;
pub mod protocol;

pub use domain::{
    BoardRole, CollectionState, ConnectionId, RequestKind, TecConfig, TecControllerConfig,
    TecDataCommand, TecError, TecMap,
};
pub use protocol::{
    BusCommand, Dispatch, DispatchTable, FrameResult, Handler, Message, MessageFramer,
    OutboundMessage, ValueKind,
};
