//! Application layer of the TEC controller.
//!
//! # Sub-modules
//!
//! - **`handlers`** – The message keys a client may send and what each one
//!   does to the [`ControllerContext`](handlers::ControllerContext).
//!
//! - **`route_commands`** – Applies queued TEC commands to the local
//!   channels or forwards them to a peer board over the bus. This is where
//!   range checks and result codes live.
//!
//! - **`peripheral`** – The other end of the bus: how a peer board answers
//!   writes and read requests from the controller.
//!
//! - **`run_loop`** – Ties the connection manager, dispatch table, router,
//!   and collection timer together into one cooperative cycle.
//!
//! Hardware and sockets stay behind the `BusTransport`, `TecChannels`,
//! `Transport`, and `TickSource` traits.

pub mod handlers;
pub mod peripheral;
pub mod route_commands;
pub mod run_loop;
