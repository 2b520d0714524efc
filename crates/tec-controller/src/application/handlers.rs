//! Application message handlers and the context they mutate.
//!
//! Handlers never touch sockets or the bus. They read and update a
//! [`ControllerContext`]: building pending commands, queueing
//! [`TecDataCommand`]s, and leaving replies for the run loop to deliver to
//! the active connection.
//!
//! # Recognised keys
//!
//! | Key          | Kind  | Effect                                                 |
//! |--------------|-------|--------------------------------------------------------|
//! | `Handshake`  | uint  | `0xDEAD` → reply `{"Handshake":0xBEEF}`, start timer   |
//! | `BoxNo`      | uint  | set the box identifier                                 |
//! | `TECNo`      | uint  | start a command for the TEC's board/channel            |
//! | `Board`      | uint  | start a command for an explicit board                  |
//! | `Channel`    | uint  | set the pending command's channel                      |
//! | `SetDuty`    | float | complete and queue the pending command                 |
//! | `SetPoint`   | float | same as `SetDuty`                                      |
//! | `SendAll`    | int   | queue a configuration dump to the requester            |
//! | `AllToZero`  | int   | queue a zero-duty command for every configured TEC     |
//! | `GetDuty`    | uint  | read a TEC's duty back to the requester                |
//! | `GetSeebeck` | uint  | read a TEC's seebeck value back to the requester       |
//! | `NoReply`    | bool  | suppress command acknowledgements on this connection   |

use std::collections::VecDeque;

use serde_json::json;
use tec_core::domain::{ConnectionId, TecControllerConfig, TecDataCommand, TecError};
use tec_core::protocol::dispatch::{DispatchTable, Handler};
use tec_core::protocol::message::OutboundMessage;
use tracing::{debug, info, warn};

use super::route_commands::ShadowTable;

/// Value a client sends to open a session.
pub const HANDSHAKE_REQUEST: u64 = 0xDEAD;

/// Value the controller answers a valid handshake with.
pub const HANDSHAKE_REPLY: u64 = 0xBEEF;

/// Which connections a reply goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTarget {
    /// The connection whose message is being processed.
    Active,
    /// Every connected client.
    All,
}

/// An outbound message produced by a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub message: OutboundMessage,
    pub target: SendTarget,
}

/// The connection whose messages are being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveConnection {
    pub id: ConnectionId,
    pub no_reply: bool,
}

/// A command being assembled from successive keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCommand {
    pub board: Option<u8>,
    pub channel: Option<u8>,
    pub tec_no: Option<u32>,
}

/// State shared by all handlers.
#[derive(Debug)]
pub struct ControllerContext {
    pub config: TecControllerConfig,
    pub box_no: u32,
    pub commands: VecDeque<TecDataCommand>,
    command_capacity: usize,
    pub pending: Option<PendingCommand>,
    pub active: Option<ActiveConnection>,
    pub replies: Vec<Reply>,
    /// Connections that asked for a configuration dump this cycle.
    pub dump_requests: Vec<ConnectionId>,
    /// Set by a valid handshake; the run loop starts the collection timer.
    pub collection_requested: bool,
}

impl ControllerContext {
    pub fn new(config: TecControllerConfig, command_capacity: usize) -> Self {
        Self {
            box_no: config.box_no,
            config,
            commands: VecDeque::with_capacity(command_capacity),
            command_capacity,
            pending: None,
            active: None,
            replies: Vec::new(),
            dump_requests: Vec::new(),
            collection_requested: false,
        }
    }

    /// Queues a command, dropping it when the queue is full.
    pub fn enqueue(&mut self, command: TecDataCommand) -> bool {
        if self.commands.len() >= self.command_capacity {
            warn!(
                capacity = self.command_capacity,
                board = command.board,
                channel = command.channel,
                "command queue full, command dropped"
            );
            return false;
        }
        self.commands.push_back(command);
        true
    }

    pub fn reply(&mut self, message: OutboundMessage) {
        self.replies.push(Reply {
            message,
            target: SendTarget::Active,
        });
    }

    pub fn broadcast(&mut self, message: OutboundMessage) {
        self.replies.push(Reply {
            message,
            target: SendTarget::All,
        });
    }

    fn active_id(&self) -> Option<ConnectionId> {
        self.active.map(|a| a.id)
    }

    /// Replaces any unfinished pending command.
    fn begin_command(&mut self, pending: PendingCommand) {
        if let Some(stale) = self.pending.replace(pending) {
            warn!(?stale, "incomplete command discarded");
        }
    }

    // ── Key handlers ──────────────────────────────────────────────────────────

    fn on_handshake(&mut self, value: u64) {
        if value != HANDSHAKE_REQUEST {
            warn!(value, "unexpected handshake value");
            return;
        }
        let mut reply = OutboundMessage::new();
        reply.add("Handshake", HANDSHAKE_REPLY);
        self.reply(reply);
        self.collection_requested = true;
        info!(connection = ?self.active_id(), "handshake accepted");
    }

    fn on_box_no(&mut self, value: u64) {
        self.box_no = u32::try_from(value).unwrap_or(u32::MAX);
        debug!(box_no = self.box_no, "box number set");
    }

    fn on_tec_no(&mut self, value: u64) {
        let tec = u32::try_from(value)
            .ok()
            .and_then(|n| self.config.tecs.lookup(n).copied());
        match tec {
            Some(tec) => self.begin_command(PendingCommand {
                board: Some(tec.board_no),
                channel: Some(tec.channel_no),
                tec_no: Some(tec.tec_no),
            }),
            None => {
                warn!(tec_no = value, "unknown TEC number");
                self.pending = None;
            }
        }
    }

    fn on_board(&mut self, value: u64) {
        let board = u8::try_from(value).unwrap_or(u8::MAX);
        self.begin_command(PendingCommand {
            board: Some(board),
            ..PendingCommand::default()
        });
    }

    fn on_channel(&mut self, value: u64) {
        match self.pending.as_mut() {
            Some(pending) => pending.channel = Some(u8::try_from(value).unwrap_or(u8::MAX)),
            None => warn!(
                code = TecError::NoBoardSpecified.code(),
                channel = value,
                "channel without board"
            ),
        }
    }

    fn on_set_duty(&mut self, percent: f64) {
        let pending = self.pending.take();
        let Some(PendingCommand {
            board: Some(board),
            channel: Some(channel),
            tec_no,
        }) = pending
        else {
            warn!(code = TecError::NoBoardSpecified.code(), percent, "duty without board/channel");
            return;
        };

        let mut command = TecDataCommand::duty_set(board, channel, percent);
        if let Some(tec_no) = tec_no {
            command = command.with_tec_no(tec_no);
        }
        if let Some(id) = self.active_id() {
            command = command.reply_to(id);
        }
        self.enqueue(command);
    }

    fn on_send_all(&mut self) {
        match self.active_id() {
            Some(id) => self.dump_requests.push(id),
            None => warn!("configuration dump requested with no active connection"),
        }
    }

    fn on_all_to_zero(&mut self) {
        let zeroes: Vec<TecDataCommand> = self
            .config
            .tecs
            .iter()
            .map(|t| TecDataCommand::duty_set(t.board_no, t.channel_no, 0.0).with_tec_no(t.tec_no))
            .collect();
        info!(count = zeroes.len(), "all TECs to zero");
        for command in zeroes {
            self.enqueue(command);
        }
    }

    fn on_read(&mut self, value: u64, build: fn(u8, u8) -> TecDataCommand) {
        let Some(tec) = u32::try_from(value)
            .ok()
            .and_then(|n| self.config.tecs.lookup(n).copied())
        else {
            warn!(tec_no = value, "unknown TEC number");
            return;
        };
        let mut command = build(tec.board_no, tec.channel_no).with_tec_no(tec.tec_no);
        if let Some(id) = self.active_id() {
            command = command.reply_to(id);
        }
        self.enqueue(command);
    }

    fn on_no_reply(&mut self, flag: bool) {
        match self.active.as_mut() {
            Some(active) => active.no_reply = flag,
            None => debug!("no-reply flag with no active connection"),
        }
    }
}

/// Registers every application key on `table`.
pub fn register_handlers(table: &mut DispatchTable<ControllerContext>) {
    table.register("Handshake", Handler::uint(ControllerContext::on_handshake));
    table.register("BoxNo", Handler::uint(ControllerContext::on_box_no));
    table.register("TECNo", Handler::uint(ControllerContext::on_tec_no));
    table.register("Board", Handler::uint(ControllerContext::on_board));
    table.register("Channel", Handler::uint(ControllerContext::on_channel));
    table.register("SetDuty", Handler::float(ControllerContext::on_set_duty));
    table.register("SetPoint", Handler::float(ControllerContext::on_set_duty));
    table.register("SendAll", Handler::int(|ctx: &mut ControllerContext, _| ctx.on_send_all()));
    table.register("AllToZero", Handler::int(|ctx: &mut ControllerContext, _| ctx.on_all_to_zero()));
    table.register(
        "GetDuty",
        Handler::uint(|ctx: &mut ControllerContext, v| ctx.on_read(v, TecDataCommand::duty_get)),
    );
    table.register(
        "GetSeebeck",
        Handler::uint(|ctx: &mut ControllerContext, v| ctx.on_read(v, TecDataCommand::seebeck_get)),
    );
    table.register("NoReply", Handler::boolean(ControllerContext::on_no_reply));
}

/// Splits the configuration and last known values into messages that each
/// fit within `capacity` bytes.
///
/// Each message carries `BoxNo`, `Part`, `Last`, and a `TECs` array of
/// `{ID, Board, Channel, Duty, Seebeck}` entries in configuration order.
pub fn build_config_dump(
    config: &TecControllerConfig,
    box_no: u32,
    shadow: &ShadowTable,
    capacity: usize,
) -> Vec<OutboundMessage> {
    let entries: Vec<serde_json::Value> = config
        .tecs
        .iter()
        .map(|t| {
            let known = shadow.get(t.board_no, t.channel_no);
            json!({
                "ID": t.tec_no,
                "Board": t.board_no,
                "Channel": t.channel_no,
                "Duty": known.and_then(|s| s.duty),
                "Seebeck": known.and_then(|s| s.seebeck),
            })
        })
        .collect();

    let chunk = |part: usize, items: &[serde_json::Value]| {
        let mut msg = OutboundMessage::new();
        msg.add("BoxNo", box_no)
            .add("Part", part)
            .add("Last", false)
            .add("TECs", items.to_vec());
        msg
    };

    let mut parts: Vec<Vec<serde_json::Value>> = Vec::new();
    let mut current: Vec<serde_json::Value> = Vec::new();
    for entry in entries {
        current.push(entry);
        if chunk(parts.len(), &current).encoded_len() <= capacity {
            continue;
        }
        let Some(overflowing) = current.pop() else {
            continue;
        };
        if current.is_empty() {
            warn!(capacity, entry = %overflowing, "dump entry larger than message capacity, skipped");
            continue;
        }
        parts.push(std::mem::take(&mut current));
        current.push(overflowing);
        if chunk(parts.len(), &current).encoded_len() > capacity {
            warn!(capacity, "dump entry larger than message capacity, skipped");
            current.clear();
        }
    }
    if !current.is_empty() || parts.is_empty() {
        parts.push(current);
    }

    let last = parts.len() - 1;
    parts
        .iter()
        .enumerate()
        .map(|(i, items)| {
            let mut msg = chunk(i, items);
            msg.add("Last", i == last);
            msg
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
