//! The cooperative run loop.
//!
//! One call to [`ControllerService::run_once`] performs a full cycle in a
//! fixed order:
//!
//! ```text
//! accept ─▶ read ─▶ dispatch ─▶ collection tick ─▶ route commands ─▶ flush ─▶ prune
//! ```
//!
//! The loop is the only code that touches the command queue or the
//! connection queues. The collection timer runs elsewhere and only posts a
//! [`TickFlag`]; the loop notices it on its next cycle, advances the
//! collection state machine, and enqueues any polling commands itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use tec_core::domain::{ConnectionId, RequestKind, TecControllerConfig, TecDataCommand};
use tec_core::protocol::dispatch::DispatchTable;
use tec_core::protocol::message::{Message, OutboundMessage};
use tracing::{debug, info, warn};

use super::handlers::{self, ActiveConnection, ControllerContext, SendTarget};
use super::route_commands::{BusTransport, CommandReport, CommandRouter, Reading, TecChannels};
use crate::infrastructure::network::ConnectionManager;

// ── Tick posting ──────────────────────────────────────────────────────────────

/// A pending-tick flag shared between a timer and the run loop.
///
/// Ticks posted while one is already pending coalesce into one.
#[derive(Debug, Clone, Default)]
pub struct TickFlag(Arc<AtomicBool>);

impl TickFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Clears the flag, returning whether a tick was pending.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Something that periodically posts collection ticks.
pub trait TickSource: Send {
    /// Starts posting ticks to `flag`. Called once.
    fn start(&mut self, flag: TickFlag);
}

// ── Service ───────────────────────────────────────────────────────────────────

/// Tunables of the run loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Capacity of the command queue.
    pub command_capacity: usize,
    /// Commands routed per cycle.
    pub commands_per_cycle: usize,
    /// When set, only the object nested under this key is dispatched.
    pub dest_filter: Option<String>,
    /// When set, replies are nested under this key.
    pub reply_destination: Option<String>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            command_capacity: 64,
            commands_per_cycle: 1,
            dest_filter: None,
            reply_destination: None,
        }
    }
}

/// What one cycle did.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub accepted: usize,
    pub messages: usize,
    pub commands: Vec<CommandReport>,
    pub sent: usize,
    pub pruned: usize,
}

/// Owns every piece of controller state and drives it one cycle at a time.
pub struct ControllerService<B, T> {
    connections: ConnectionManager,
    table: DispatchTable<ControllerContext>,
    ctx: ControllerContext,
    router: CommandRouter<B, T>,
    ticker: Box<dyn TickSource>,
    tick: TickFlag,
    timer_started: bool,
    options: ServiceOptions,
}

impl<B: BusTransport, T: TecChannels> ControllerService<B, T> {
    pub fn new(
        config: TecControllerConfig,
        connections: ConnectionManager,
        router: CommandRouter<B, T>,
        ticker: Box<dyn TickSource>,
        options: ServiceOptions,
    ) -> Self {
        let mut table = DispatchTable::new();
        handlers::register_handlers(&mut table);
        Self {
            ctx: ControllerContext::new(config, options.command_capacity),
            connections,
            table,
            router,
            ticker,
            tick: TickFlag::new(),
            timer_started: false,
            options,
        }
    }

    pub fn context(&self) -> &ControllerContext {
        &self.ctx
    }

    pub fn router(&self) -> &CommandRouter<B, T> {
        &self.router
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn timer_started(&self) -> bool {
        self.timer_started
    }

    /// Handle for posting collection ticks by hand.
    pub fn tick_flag(&self) -> TickFlag {
        self.tick.clone()
    }

    /// Runs one full cycle.
    pub async fn run_once(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        if self.connections.accept_incoming().await.is_some() {
            report.accepted = 1;
        }

        for id in self.connections.poll_readable() {
            report.messages += self.process_connection(id);
        }

        self.start_collection_timer();
        self.service_collection_tick();

        for _ in 0..self.options.commands_per_cycle {
            let Some(done) = self.router.process_next(&mut self.ctx.commands) else {
                break;
            };
            self.acknowledge(&done);
            report.commands.push(done);
        }

        report.sent = self.connections.flush().await;
        report.pruned = self.connections.prune_disconnected().await;
        report
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    fn process_connection(&mut self, id: ConnectionId) -> usize {
        let messages = self.connections.take_inbound(id);
        let count = messages.len();
        self.connections.set_active(id);
        self.ctx.active = Some(ActiveConnection {
            id,
            no_reply: self.connections.no_reply(id),
        });

        for mut message in messages {
            self.process_message(id, &mut message);
        }

        if let Some(active) = self.ctx.active.take() {
            self.connections.set_no_reply(id, active.no_reply);
        }
        self.deliver_replies();
        self.connections.clear_active();
        count
    }

    fn process_message(&mut self, id: ConnectionId, message: &mut Message) {
        let summary = match message.parse() {
            Ok(root) => match select_scope(root, self.options.dest_filter.as_deref()) {
                Some(object) => Some(self.table.dispatch_object(&mut self.ctx, object)),
                None => {
                    debug!(connection = %id, "message for another destination ignored");
                    None
                }
            },
            Err(e) => {
                warn!(connection = %id, "invalid message: {e}");
                return;
            }
        };
        message.mark_processed();
        if let Some(summary) = summary {
            debug!(
                connection = %id,
                handled = summary.handled,
                unhandled = summary.unhandled,
                "message dispatched"
            );
        }
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    fn deliver_replies(&mut self) {
        for mut reply in std::mem::take(&mut self.ctx.replies) {
            reply.message.set_destination(self.options.reply_destination.clone());
            match reply.target {
                SendTarget::Active => {
                    self.connections.queue_to_active(reply.message);
                }
                SendTarget::All => self.connections.broadcast(&reply.message),
            }
        }

        let requests = std::mem::take(&mut self.ctx.dump_requests);
        if requests.is_empty() {
            return;
        }
        let capacity = self
            .connections
            .limits()
            .message_capacity
            .saturating_sub(self.destination_overhead());
        let parts = handlers::build_config_dump(
            &self.ctx.config,
            self.ctx.box_no,
            self.router.shadow(),
            capacity,
        );
        for id in requests {
            info!(connection = %id, parts = parts.len(), "sending configuration");
            for part in &parts {
                let mut part = part.clone();
                part.set_destination(self.options.reply_destination.clone());
                self.connections.queue_outbound(id, part);
            }
        }
    }

    /// Queues the result of a finished command to the connection that sent it.
    fn acknowledge(&mut self, done: &CommandReport) {
        let Some(id) = done.command.reply_to else {
            return;
        };
        let mut msg = OutboundMessage::new();
        msg.set_destination(self.options.reply_destination.clone());
        match done.command.tec_no {
            Some(tec_no) => {
                msg.add("TECNo", tec_no);
            }
            None => {
                msg.add("Board", done.command.board)
                    .add("Channel", done.command.channel);
            }
        }
        match (done.command.kind, done.reading) {
            (RequestKind::DutySet, _) => {
                msg.add("Result", done.result);
            }
            (_, Some(Reading::Duty(percent))) => {
                msg.add("Duty", percent);
            }
            (_, Some(Reading::Seebeck(count))) => {
                msg.add("Seebeck", count);
            }
            (_, None) => {
                msg.add("Error", done.result);
            }
        }
        if let Some(e) = done.bus_error {
            msg.add("BusError", e.code());
        }
        self.connections.queue_acknowledgement(id, msg);
    }

    fn destination_overhead(&self) -> usize {
        self.options
            .reply_destination
            .as_deref()
            .map_or(0, OutboundMessage::wrapping_overhead)
    }

    // ── Collection ────────────────────────────────────────────────────────────

    fn start_collection_timer(&mut self) {
        if self.ctx.collection_requested && !self.timer_started {
            self.ticker.start(self.tick.clone());
            self.timer_started = true;
            info!("collection timer started");
        }
    }

    fn service_collection_tick(&mut self) {
        if !self.tick.take() {
            return;
        }
        let state = self.router.ping_collection_state_machine();
        if !self.ctx.config.is_controller() {
            return;
        }
        let Some(board) = state.collecting_board() else {
            return;
        };
        let polls: Vec<TecDataCommand> = self
            .ctx
            .config
            .tecs
            .on_board(board)
            .map(|t| TecDataCommand::seebeck_get(t.board_no, t.channel_no).with_tec_no(t.tec_no))
            .collect();
        debug!(board, count = polls.len(), "collecting board");
        for command in polls {
            self.ctx.enqueue(command);
        }
    }
}

/// The object to dispatch: the root, or the object nested under `filter`.
fn select_scope<'a>(root: &'a Map<String, Value>, filter: Option<&str>) -> Option<&'a Map<String, Value>> {
    match filter {
        None => Some(root),
        Some(key) => root.get(key).and_then(Value::as_object),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
