//! In-process inter-board bus.
//!
//! Each attached [`Peripheral`] answers at its board's bus address. A write
//! is delivered to the peer's receive handler and a read returns its request
//! reply, so the controller's router exercises the same byte protocol it
//! would on the wire.
//!
//! The bus is cheaply cloneable; clones share the attached peers, which lets
//! a timer task tick the peripherals while the router owns another handle.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tec_core::protocol::bus;
use tracing::{debug, trace};

use crate::application::peripheral::Peripheral;
use crate::application::route_commands::{BusError, BusTransport, TecChannels};
use crate::infrastructure::actuation::SimulatedChannels;

/// Default largest single write, in bytes.
pub const DEFAULT_MAX_TRANSFER: usize = 32;

type Peers = BTreeMap<u8, Peripheral<SimulatedChannels>>;

#[derive(Clone)]
pub struct SimulatedBus {
    peers: Arc<Mutex<Peers>>,
    max_transfer: usize,
}

impl SimulatedBus {
    pub fn new(max_transfer: usize) -> Self {
        Self {
            peers: Arc::new(Mutex::new(BTreeMap::new())),
            max_transfer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Peers> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attaches a peripheral board with `channels` TEC channels.
    ///
    /// Returns `false` if the board number has no bus address.
    pub fn attach(&self, board: u8, channels: u8) -> bool {
        let Ok(address) = bus::peer_address(board) else {
            return false;
        };
        self.lock()
            .insert(address, Peripheral::new(board, SimulatedChannels::new(channels)));
        debug!(board, address, "peripheral attached");
        true
    }

    pub fn detach(&self, board: u8) {
        if let Ok(address) = bus::peer_address(board) {
            self.lock().remove(&address);
        }
    }

    /// Advances every peripheral's collection cycle by one tick.
    pub fn tick_peripherals(&self) {
        for peer in self.lock().values_mut() {
            peer.tick();
        }
    }

    /// Last duty a peer board applied to `channel`.
    pub fn peer_duty(&self, board: u8, channel: u8) -> Option<f64> {
        let address = bus::peer_address(board).ok()?;
        self.lock()
            .get(&address)
            .and_then(|p| p.channels().duty_cycle(channel))
    }
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRANSFER)
    }
}

impl BusTransport for SimulatedBus {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError> {
        if bytes.len() > self.max_transfer {
            return Err(BusError::TxOverflow);
        }
        let mut peers = self.lock();
        let peer = peers.get_mut(&address).ok_or(BusError::AddressNack)?;
        trace!(address, ?bytes, "bus write");
        peer.on_receive(bytes);
        Ok(())
    }

    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<usize, BusError> {
        let mut peers = self.lock();
        let peer = peers.get_mut(&address).ok_or(BusError::AddressNack)?;
        let reply = peer.on_request();
        let n = buf.len().min(reply.len());
        buf[..n].copy_from_slice(&reply[..n]);
        trace!(address, reply = ?&buf[..n], "bus read");
        Ok(n)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
