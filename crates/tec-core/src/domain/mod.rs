//! Domain types shared by the controller and peripheral boards.

pub mod collection;
pub mod command;
pub mod config;
pub mod error;

pub use collection::CollectionState;
pub use command::{ConnectionId, RequestKind, TecDataCommand};
pub use config::{BoardRole, TecConfig, TecControllerConfig, TecMap};
pub use error::{result_code, TecError, NO_ERROR};
