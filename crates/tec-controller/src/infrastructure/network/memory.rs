//! In-memory transport for tests and local simulation.
//!
//! [`MemoryTransport::connect`] creates a client: the returned
//! [`MemoryPeer`] stays with the test, and the matching [`Link`] is handed to
//! the next [`Transport::accept_incoming`] call.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::connection_manager::{Link, LinkError, NetworkError, Transport};

#[derive(Debug, Default)]
struct LinkState {
    incoming: VecDeque<u8>,
    sent: Vec<u8>,
    connected: bool,
    closed: bool,
}

type SharedState = Arc<Mutex<LinkState>>;

/// Transport whose clients are created by the test itself.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    pending: Arc<Mutex<VecDeque<MemoryLink>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a client that will be accepted on the next accept call.
    pub fn connect(&self) -> MemoryPeer {
        let state: SharedState = Arc::new(Mutex::new(LinkState {
            connected: true,
            ..LinkState::default()
        }));
        self.pending
            .lock()
            .expect("lock poisoned")
            .push_back(MemoryLink {
                state: Arc::clone(&state),
            });
        MemoryPeer { state }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn accept_incoming(&mut self) -> Result<Option<Box<dyn Link>>, NetworkError> {
        let link = self.pending.lock().expect("lock poisoned").pop_front();
        Ok(link.map(|l| Box::new(l) as Box<dyn Link>))
    }
}

/// Server side of an in-memory client.
pub struct MemoryLink {
    state: SharedState,
}

#[async_trait]
impl Link for MemoryLink {
    fn peer(&self) -> String {
        "memory".to_string()
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.incoming.is_empty() && !state.connected {
            return Err(LinkError::Closed);
        }
        let n = buf.len().min(state.incoming.len());
        for (slot, byte) in buf.iter_mut().zip(state.incoming.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let mut state = self.state.lock().expect("lock poisoned");
        if !state.connected {
            return Err(LinkError::Closed);
        }
        state.sent.extend_from_slice(bytes);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().expect("lock poisoned").connected
    }

    async fn close(&mut self) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.connected = false;
        state.closed = true;
    }
}

/// Client side of an in-memory link, held by the test.
#[derive(Clone)]
pub struct MemoryPeer {
    state: SharedState,
}

impl MemoryPeer {
    /// Makes `bytes` available to the server's next read.
    pub fn push(&self, bytes: &[u8]) {
        self.state
            .lock()
            .expect("lock poisoned")
            .incoming
            .extend(bytes.iter().copied());
    }

    /// Everything the server has sent so far.
    pub fn sent(&self) -> Vec<u8> {
        self.state.lock().expect("lock poisoned").sent.clone()
    }

    /// Takes the server's output and splits it into NUL-terminated JSON values.
    pub fn take_replies(&self) -> Vec<serde_json::Value> {
        let bytes = std::mem::take(&mut self.state.lock().expect("lock poisoned").sent);
        bytes
            .split(|b| *b == 0)
            .filter(|chunk| !chunk.is_empty())
            .filter_map(|chunk| serde_json::from_slice(chunk).ok())
            .collect()
    }

    /// Simulates the client hanging up.
    pub fn disconnect(&self) {
        self.state.lock().expect("lock poisoned").connected = false;
    }

    /// Whether the server closed this link.
    pub fn was_closed(&self) -> bool {
        self.state.lock().expect("lock poisoned").closed
    }
}
