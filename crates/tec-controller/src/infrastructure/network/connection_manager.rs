//! ConnectionManager: per-client message queues over a pluggable transport.
//!
//! Each accepted [`Link`] becomes a [`Connection`] with its own framer, a
//! bounded inbound queue of framed [`Message`]s, a bounded outbound queue,
//! and a no-reply flag. Reads never wait: only bytes already available are
//! taken, so a stalled client cannot hold up command servicing.
//!
//! # Backpressure
//!
//! When a connection's inbound queue is full, bytes already read are held in
//! a carry buffer and no further reads are issued for that connection until
//! the queue drains. Nothing is discarded.
//!
//! # Teardown
//!
//! A framing overflow or read error flags the connection for teardown.
//! Frames completed before an overflow are still handed out by
//! [`ConnectionManager::poll_readable`]; only the overflowing fragment is
//! lost. A send that fails or outlasts `send_timeout` flags the connection
//! too, so one stalled client never holds up the loop.
//! [`ConnectionManager::prune_disconnected`] closes and removes flagged or
//! disconnected links; their queued messages are dropped silently.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tec_core::domain::ConnectionId;
use tec_core::protocol::framer::{FrameResult, MessageFramer};
use tec_core::protocol::message::{Message, OutboundMessage};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bytes requested from a link per read.
const READ_CHUNK: usize = 64;

/// Error type for transport-level operations.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
}

/// Error type for a single link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("peer closed the connection")]
    Closed,
    #[error("link I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One client byte stream.
#[async_trait]
pub trait Link: Send {
    /// Human-readable peer description for logs.
    fn peer(&self) -> String;

    /// Copies currently available bytes into `buf` without waiting.
    ///
    /// Returns `Ok(0)` when nothing is available.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, LinkError>;

    async fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError>;

    fn is_connected(&self) -> bool;

    async fn close(&mut self);
}

/// Source of new client links.
#[async_trait]
pub trait Transport: Send {
    /// Returns a newly connected link, or `None` if no client is waiting.
    async fn accept_incoming(&mut self) -> Result<Option<Box<dyn Link>>, NetworkError>;
}

/// Capacity limits applied to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    pub max_clients: usize,
    /// Bytes per inbound frame and per encoded outbound message.
    pub message_capacity: usize,
    /// Messages per inbound and per outbound queue.
    pub queue_capacity: usize,
    /// Longest a single outbound send may take before the client is dropped.
    pub send_timeout: Duration,
}

/// A tracked client connection.
pub struct Connection {
    id: ConnectionId,
    link: Box<dyn Link>,
    framer: MessageFramer,
    inbound: VecDeque<Message>,
    outbound: VecDeque<OutboundMessage>,
    carry: VecDeque<u8>,
    no_reply: bool,
    teardown: bool,
}

impl Connection {
    fn new(link: Box<dyn Link>, limits: &ConnectionLimits) -> Self {
        Self {
            id: Uuid::new_v4(),
            link,
            framer: MessageFramer::new(limits.message_capacity),
            inbound: VecDeque::with_capacity(limits.queue_capacity),
            outbound: VecDeque::new(),
            carry: VecDeque::new(),
            no_reply: false,
            teardown: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> String {
        self.link.peer()
    }

    pub fn no_reply(&self) -> bool {
        self.no_reply
    }

    pub fn is_flagged_for_teardown(&self) -> bool {
        self.teardown
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Frames carried bytes until they run out or the inbound queue fills.
    fn drain_carry(&mut self, queue_capacity: usize) {
        while self.inbound.len() < queue_capacity {
            let Some(byte) = self.carry.pop_front() else {
                return;
            };
            match self.framer.feed(byte) {
                FrameResult::Incomplete => {}
                FrameResult::Complete(msg) => self.inbound.push_back(msg),
                FrameResult::Overflow => {
                    warn!(
                        connection = %self.id,
                        capacity = self.framer.capacity(),
                        "message overflow, closing connection"
                    );
                    self.carry.clear();
                    self.teardown = true;
                    return;
                }
            }
        }
    }

    /// Reads until the link has nothing more or the inbound queue is full.
    fn poll(&mut self, queue_capacity: usize) {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            if self.teardown {
                return;
            }
            self.drain_carry(queue_capacity);
            if self.teardown || !self.carry.is_empty() || self.inbound.len() >= queue_capacity {
                return;
            }

            match self.link.read_available(&mut buf) {
                Ok(0) => return,
                Ok(n) => self.carry.extend(&buf[..n]),
                Err(LinkError::Closed) => {
                    debug!(connection = %self.id, "peer closed");
                    self.teardown = true;
                    return;
                }
                Err(e) => {
                    warn!(connection = %self.id, "read failed: {e}");
                    self.teardown = true;
                    return;
                }
            }
        }
    }
}

/// Tracks every client connection and the active-connection scope.
pub struct ConnectionManager {
    transport: Box<dyn Transport>,
    limits: ConnectionLimits,
    connections: Vec<Connection>,
    active: Option<ConnectionId>,
}

impl ConnectionManager {
    pub fn new(transport: Box<dyn Transport>, limits: ConnectionLimits) -> Self {
        Self {
            transport,
            limits,
            connections: Vec::new(),
            active: None,
        }
    }

    pub fn limits(&self) -> &ConnectionLimits {
        &self.limits
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(Connection::id).collect()
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id == id)
    }

    fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|c| c.id == id)
    }

    /// Accepts at most one waiting client.
    ///
    /// Clients beyond `max_clients` are closed straight away.
    pub async fn accept_incoming(&mut self) -> Option<ConnectionId> {
        let mut link = match self.transport.accept_incoming().await {
            Ok(Some(link)) => link,
            Ok(None) => return None,
            Err(e) => {
                warn!("{e}");
                return None;
            }
        };

        if self.connections.len() >= self.limits.max_clients {
            warn!(
                peer = %link.peer(),
                max_clients = self.limits.max_clients,
                "connection limit reached, rejecting client"
            );
            link.close().await;
            return None;
        }

        let connection = Connection::new(link, &self.limits);
        let id = connection.id;
        info!(connection = %id, peer = %connection.peer(), "client connected");
        self.connections.push(connection);
        Some(id)
    }

    /// Reads available bytes from every connection into its framer.
    ///
    /// Returns the connections that have framed messages waiting, including
    /// ones flagged for teardown whose earlier frames completed cleanly.
    pub fn poll_readable(&mut self) -> Vec<ConnectionId> {
        let capacity = self.limits.queue_capacity;
        self.connections
            .iter_mut()
            .filter_map(|c| {
                c.poll(capacity);
                (!c.inbound.is_empty()).then_some(c.id)
            })
            .collect()
    }

    /// Removes and returns every framed message queued on `id`.
    pub fn take_inbound(&mut self, id: ConnectionId) -> Vec<Message> {
        self.get_mut(id)
            .map(|c| c.inbound.drain(..).collect())
            .unwrap_or_default()
    }

    /// Scopes replies to `id` until [`clear_active`](Self::clear_active).
    pub fn set_active(&mut self, id: ConnectionId) {
        self.active = Some(id);
    }

    pub fn clear_active(&mut self) {
        self.active = None;
    }

    pub fn active(&self) -> Option<ConnectionId> {
        self.active
    }

    pub fn no_reply(&self, id: ConnectionId) -> bool {
        self.get(id).map_or(false, |c| c.no_reply)
    }

    pub fn set_no_reply(&mut self, id: ConnectionId, flag: bool) {
        if let Some(c) = self.get_mut(id) {
            c.no_reply = flag;
        }
    }

    /// Queues `message` on the active connection.
    pub fn queue_to_active(&mut self, message: OutboundMessage) -> bool {
        match self.active {
            Some(id) => self.queue_outbound(id, message),
            None => {
                warn!("reply with no active connection dropped");
                false
            }
        }
    }

    /// Queues `message` on connection `id`, dropping it if the queue is full.
    pub fn queue_outbound(&mut self, id: ConnectionId, message: OutboundMessage) -> bool {
        let capacity = self.limits.queue_capacity;
        let Some(c) = self.get_mut(id) else {
            debug!(connection = %id, "reply for unknown connection dropped");
            return false;
        };
        if c.outbound.len() >= capacity {
            warn!(connection = %id, "outbound queue full, message dropped");
            return false;
        }
        c.outbound.push_back(message);
        true
    }

    /// Queues a command acknowledgement unless `id` has set no-reply.
    pub fn queue_acknowledgement(&mut self, id: ConnectionId, message: OutboundMessage) -> bool {
        if self.no_reply(id) {
            debug!(connection = %id, "acknowledgement suppressed");
            return false;
        }
        self.queue_outbound(id, message)
    }

    /// Queues `message` on every connection.
    pub fn broadcast(&mut self, message: &OutboundMessage) {
        for id in self.ids() {
            self.queue_outbound(id, message.clone());
        }
    }

    /// Encodes and sends every queued outbound message.
    ///
    /// Connections flagged for teardown are skipped; their queues go with them.
    pub async fn flush(&mut self) -> usize {
        let capacity = self.limits.message_capacity;
        let deadline = self.limits.send_timeout;
        let mut sent = 0;
        for c in self.connections.iter_mut().filter(|c| !c.teardown) {
            while let Some(msg) = c.outbound.pop_front() {
                let bytes = match msg.encode(capacity) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(connection = %c.id, "outbound message dropped: {e}");
                        continue;
                    }
                };
                match timeout(deadline, c.link.send(&bytes)).await {
                    Ok(Ok(())) => sent += 1,
                    Ok(Err(e)) => {
                        warn!(connection = %c.id, "send failed: {e}");
                        c.teardown = true;
                        break;
                    }
                    Err(_) => {
                        warn!(
                            connection = %c.id,
                            timeout_ms = deadline.as_millis() as u64,
                            "send timed out, closing connection"
                        );
                        c.teardown = true;
                        break;
                    }
                }
            }
        }
        sent
    }

    /// Closes and removes connections that are disconnected or flagged.
    ///
    /// Returns how many were removed.
    pub async fn prune_disconnected(&mut self) -> usize {
        let (keep, gone): (Vec<Connection>, Vec<Connection>) = std::mem::take(&mut self.connections)
            .into_iter()
            .partition(|c| c.link.is_connected() && !c.teardown);
        self.connections = keep;

        let removed = gone.len();
        for mut c in gone {
            let dropped = c.inbound.len() + c.outbound.len();
            c.link.close().await;
            if dropped > 0 {
                debug!(connection = %c.id, dropped, "queued messages discarded");
            }
            info!(connection = %c.id, "client disconnected");
            if self.active == Some(c.id) {
                self.active = None;
            }
        }
        removed
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::network::memory::{MemoryPeer, MemoryTransport};

    fn limits() -> ConnectionLimits {
        ConnectionLimits {
            max_clients: 2,
            message_capacity: 32,
            queue_capacity: 2,
            send_timeout: Duration::from_millis(50),
        }
    }

    async fn manager_with_peers(n: usize) -> (ConnectionManager, Vec<MemoryPeer>, Vec<ConnectionId>) {
        let transport = MemoryTransport::new();
        let peers: Vec<MemoryPeer> = (0..n).map(|_| transport.connect()).collect();
        let mut mgr = ConnectionManager::new(Box::new(transport), limits());
        let mut ids = Vec::new();
        while let Some(id) = mgr.accept_incoming().await {
            ids.push(id);
        }
        (mgr, peers, ids)
    }

    #[tokio::test]
    async fn test_accept_incoming_tracks_new_connection() {
        let (mgr, _peers, ids) = manager_with_peers(1).await;
        assert_eq!(ids.len(), 1);
        assert_eq!(mgr.len(), 1);
        assert!(!mgr.no_reply(ids[0]));
    }

    #[tokio::test]
    async fn test_clients_past_limit_are_closed() {
        // Arrange / Act
        let (mgr, peers, ids) = manager_with_peers(3).await;

        // Assert
        assert_eq!(ids.len(), 2);
        assert_eq!(mgr.len(), 2);
        assert!(peers[2].was_closed());
    }

    #[tokio::test]
    async fn test_poll_readable_frames_fragmented_message() {
        let (mut mgr, peers, ids) = manager_with_peers(1).await;

        peers[0].push(b"{\"Box");
        assert!(mgr.poll_readable().is_empty());
        peers[0].push(b"No\":1}");
        let ready = mgr.poll_readable();

        assert_eq!(ready, vec![ids[0]]);
        let msgs = mgr.take_inbound(ids[0]);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].as_bytes(), b"{\"BoxNo\":1}");
    }

    #[tokio::test]
    async fn test_full_inbound_queue_defers_bytes_without_loss() {
        let (mut mgr, peers, ids) = manager_with_peers(1).await;
        peers[0].push(b"{\"A\":1}{\"B\":2}{\"C\":3}");

        mgr.poll_readable();
        let first = mgr.take_inbound(ids[0]);
        mgr.poll_readable();
        let second = mgr.take_inbound(ids[0]);

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].as_bytes(), b"{\"C\":3}");
    }

    #[tokio::test]
    async fn test_overflow_flags_teardown_and_prune_removes() {
        // Arrange
        let (mut mgr, peers, ids) = manager_with_peers(1).await;
        peers[0].push(b"{\"Key\":\"0123456789012345678901234567\"}");

        // Act
        let ready = mgr.poll_readable();

        // Assert
        assert!(ready.is_empty());
        assert!(mgr.get(ids[0]).unwrap().is_flagged_for_teardown());
        assert_eq!(mgr.prune_disconnected().await, 1);
        assert!(mgr.is_empty());
        assert!(peers[0].was_closed());
    }

    #[tokio::test]
    async fn test_frames_before_overflow_are_still_delivered() {
        // Arrange
        let (mut mgr, peers, ids) = manager_with_peers(1).await;
        peers[0].push(b"{\"A\":1}{\"Key\":\"0123456789012345678901234567\"}");

        // Act
        let ready = mgr.poll_readable();

        // Assert
        assert_eq!(ready, vec![ids[0]]);
        assert!(mgr.get(ids[0]).unwrap().is_flagged_for_teardown());
        let msgs = mgr.take_inbound(ids[0]);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].as_bytes(), b"{\"A\":1}");
        assert_eq!(mgr.prune_disconnected().await, 1);
    }

    #[tokio::test]
    async fn test_prune_drops_queued_messages_of_disconnected_client() {
        let (mut mgr, peers, ids) = manager_with_peers(2).await;
        peers[0].push(b"{\"A\":1}");
        mgr.poll_readable();
        peers[0].disconnect();

        assert_eq!(mgr.prune_disconnected().await, 1);
        assert_eq!(mgr.ids(), vec![ids[1]]);
        assert!(mgr.take_inbound(ids[0]).is_empty());
    }

    #[tokio::test]
    async fn test_flush_sends_nul_terminated_json() {
        let (mut mgr, peers, ids) = manager_with_peers(1).await;
        let mut msg = OutboundMessage::new();
        msg.add("Handshake", 48879);
        mgr.set_active(ids[0]);

        assert!(mgr.queue_to_active(msg));
        assert_eq!(mgr.flush().await, 1);

        assert_eq!(peers[0].sent(), b"{\"Handshake\":48879}\0".to_vec());
    }

    #[tokio::test]
    async fn test_acknowledgement_suppressed_when_no_reply_set() {
        let (mut mgr, peers, ids) = manager_with_peers(1).await;
        mgr.set_no_reply(ids[0], true);
        let mut msg = OutboundMessage::new();
        msg.add("Result", 0);

        assert!(!mgr.queue_acknowledgement(ids[0], msg));
        mgr.flush().await;
        assert!(peers[0].sent().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_connection() {
        let (mut mgr, peers, _) = manager_with_peers(2).await;
        let mut msg = OutboundMessage::new();
        msg.add("BoxNo", 1);

        mgr.broadcast(&msg);
        mgr.flush().await;

        assert!(peers.iter().all(|p| p.sent() == b"{\"BoxNo\":1}\0".to_vec()));
    }

    // ── Stalled sends ─────────────────────────────────────────────────────────

    /// A client that never drains its receive buffer.
    struct StalledLink;

    #[async_trait]
    impl Link for StalledLink {
        fn peer(&self) -> String {
            "stalled".to_string()
        }

        fn read_available(&mut self, _buf: &mut [u8]) -> Result<usize, LinkError> {
            Ok(0)
        }

        async fn send(&mut self, _bytes: &[u8]) -> Result<(), LinkError> {
            std::future::pending().await
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn close(&mut self) {}
    }

    /// Hands out a fixed list of links, one per accept.
    struct QueuedTransport(VecDeque<Box<dyn Link>>);

    #[async_trait]
    impl Transport for QueuedTransport {
        async fn accept_incoming(&mut self) -> Result<Option<Box<dyn Link>>, NetworkError> {
            Ok(self.0.pop_front())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_send_times_out_and_other_clients_still_receive() {
        // Arrange
        let mut memory = MemoryTransport::new();
        let healthy = memory.connect();
        let healthy_link = memory
            .accept_incoming()
            .await
            .expect("accept")
            .expect("link");
        let stalled: Box<dyn Link> = Box::new(StalledLink);
        let links = VecDeque::from([stalled, healthy_link]);
        let mut mgr = ConnectionManager::new(Box::new(QueuedTransport(links)), limits());
        let stalled_id = mgr.accept_incoming().await.expect("stalled accepted");
        mgr.accept_incoming().await.expect("healthy accepted");
        let mut msg = OutboundMessage::new();
        msg.add("BoxNo", 1);
        mgr.broadcast(&msg);

        // Act
        let sent = mgr.flush().await;

        // Assert
        assert_eq!(sent, 1);
        assert_eq!(healthy.sent(), b"{\"BoxNo\":1}\0".to_vec());
        assert!(mgr.get(stalled_id).unwrap().is_flagged_for_teardown());
        assert_eq!(mgr.prune_disconnected().await, 1);
        assert_eq!(mgr.len(), 1);
    }
}
