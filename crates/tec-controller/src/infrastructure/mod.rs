//! Infrastructure layer of the TEC controller.
//!
//! Contains the adapters behind the application traits: client sockets,
//! the inter-board bus, local TEC channels, the collection timer, and the
//! boot configuration file.

pub mod actuation;
pub mod bus;
pub mod network;
pub mod storage;
pub mod timer;
