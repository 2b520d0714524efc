//! Inbound and outbound JSON messages with a fixed byte capacity.
//!
//! # Message lifecycle
//!
//! ```text
//! Empty ──push──▶ Accumulating ──framer──▶ Framed ──parse──▶ Parsed ──▶ Processed
//! ```
//!
//! The buffer never grows past the capacity given at construction. A push
//! that would exceed it fails and leaves the buffer untouched; the framer
//! turns that failure into an overflow for the connection.

use serde_json::{Map, Value};
use thiserror::Error;

/// Default buffer capacity, sized for a JSON document of about twenty members.
pub const DEFAULT_MESSAGE_CAPACITY: usize = 320;

/// Terminator written after every outbound JSON document.
pub const OUTBOUND_TERMINATOR: u8 = 0;

/// Errors raised while building, parsing, or encoding messages.
#[derive(Debug, Error, PartialEq)]
pub enum MessageError {
    /// A byte was pushed into a buffer that is already full.
    #[error("message buffer full ({capacity} bytes)")]
    CapacityExceeded { capacity: usize },

    /// `parse` was called before the framer completed the message.
    #[error("message is not framed (state {0:?})")]
    NotFramed(MessageState),

    /// The framed bytes are not valid JSON.
    #[error("invalid message: {0}")]
    InvalidJson(String),

    /// The framed bytes are valid JSON but not an object.
    #[error("message is not a JSON object")]
    NotAnObject,

    /// The encoded outbound document plus terminator exceeds the capacity.
    #[error("outbound message of {size} bytes exceeds capacity {capacity}")]
    OutboundTooLarge { size: usize, capacity: usize },
}

/// Processing state of an inbound [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Empty,
    Accumulating,
    Framed,
    Parsed,
    Processed,
}

/// An inbound message: a bounded byte buffer plus the parsed document.
#[derive(Debug, Clone)]
pub struct Message {
    buf: Vec<u8>,
    capacity: usize,
    state: MessageState,
    document: Option<Map<String, Value>>,
}

impl Message {
    /// Creates an empty message that holds at most `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            state: MessageState::Empty,
            document: None,
        }
    }

    /// Appends one byte.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::CapacityExceeded`] when the buffer is full; the
    /// buffer is left unchanged.
    pub fn push(&mut self, byte: u8) -> Result<(), MessageError> {
        if self.buf.len() >= self.capacity {
            return Err(MessageError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.buf.push(byte);
        self.state = MessageState::Accumulating;
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self) -> MessageState {
        self.state
    }

    /// Marks the buffered bytes as one complete frame.
    pub(crate) fn mark_framed(&mut self) {
        self.state = MessageState::Framed;
    }

    /// Parses the framed bytes into a JSON object.
    ///
    /// Bytes before the first `{` are skipped, since the framer buffers
    /// everything it receives.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::NotFramed`] unless the message is `Framed`,
    /// [`MessageError::InvalidJson`] for malformed JSON and
    /// [`MessageError::NotAnObject`] for a non-object document.
    pub fn parse(&mut self) -> Result<&Map<String, Value>, MessageError> {
        if self.state != MessageState::Framed {
            return Err(MessageError::NotFramed(self.state));
        }
        let start = self
            .buf
            .iter()
            .position(|&b| b == b'{')
            .ok_or_else(|| MessageError::InvalidJson("no opening brace".to_string()))?;
        let value: Value = serde_json::from_slice(&self.buf[start..])
            .map_err(|e| MessageError::InvalidJson(e.to_string()))?;
        match value {
            Value::Object(map) => {
                self.state = MessageState::Parsed;
                Ok(&*self.document.insert(map))
            }
            _ => Err(MessageError::NotAnObject),
        }
    }

    /// The parsed document, once `parse` has succeeded.
    pub fn document(&self) -> Option<&Map<String, Value>> {
        self.document.as_ref()
    }

    /// Marks the message as fully handled.
    pub fn mark_processed(&mut self) {
        self.state = MessageState::Processed;
    }
}

/// Builder for an outbound JSON message.
///
/// Fields keep insertion order. When a destination key is set the fields are
/// nested under it, e.g. `{"TECCommand":{"Handshake":48879}}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundMessage {
    destination: Option<String>,
    fields: Map<String, Value>,
}

impl OutboundMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a message whose fields are wrapped under `key`.
    pub fn with_destination(key: impl Into<String>) -> Self {
        Self {
            destination: Some(key.into()),
            fields: Map::new(),
        }
    }

    pub fn set_destination(&mut self, key: Option<String>) {
        self.destination = key;
    }

    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// Adds or replaces a field.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Removes a field, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.shift_remove(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of bytes `encode` would produce, terminator included.
    pub fn encoded_len(&self) -> usize {
        self.to_json().len() + 1
    }

    /// Bytes added by nesting a message under destination `key`: the key as
    /// serialized JSON (escapes included) plus `{`, `:` and `}`.
    pub fn wrapping_overhead(key: &str) -> usize {
        Value::from(key).to_string().len() + 3
    }

    /// Serializes the message and appends the NUL terminator.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::OutboundTooLarge`] if the result would exceed
    /// `capacity` bytes.
    pub fn encode(&self, capacity: usize) -> Result<Vec<u8>, MessageError> {
        let mut bytes = self.to_json().into_bytes();
        bytes.push(OUTBOUND_TERMINATOR);
        if bytes.len() > capacity {
            return Err(MessageError::OutboundTooLarge {
                size: bytes.len(),
                capacity,
            });
        }
        Ok(bytes)
    }

    fn to_json(&self) -> String {
        let body = Value::Object(self.fields.clone());
        let root = match &self.destination {
            Some(key) => {
                let mut outer = Map::new();
                outer.insert(key.clone(), body);
                Value::Object(outer)
            }
            None => body,
        };
        root.to_string()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
