//! Brace-counting framer that cuts a byte stream into JSON-object messages.
//!
//! # How framing works (for beginners)
//!
//! The network link carries JSON objects back to back with no length prefix.
//! The framer does not understand JSON; it only counts braces:
//!
//! - every `{` increments an open counter and records that an object started;
//! - every `}` seen after an object started decrements it;
//! - when the counter returns to zero the frame is complete.
//!
//! Every byte, including bytes before the first `{`, lands in the message
//! buffer. Braces inside string literals are counted too, so a client must
//! not send unbalanced braces inside strings.
//!
//! The framer is fed one byte at a time, so a frame split across any number
//! of reads is reassembled without loss.

use tracing::trace;

use super::message::Message;

/// Result of feeding one byte to a [`MessageFramer`].
#[derive(Debug)]
pub enum FrameResult {
    /// More bytes are needed.
    Incomplete,
    /// The byte closed the outermost object.
    Complete(Message),
    /// The buffer filled before the object closed; the partial frame is discarded.
    Overflow,
}

/// Resumable per-connection framing state.
#[derive(Debug)]
pub struct MessageFramer {
    capacity: usize,
    current: Message,
    open: u32,
    seen_open: bool,
}

impl MessageFramer {
    /// Creates a framer whose messages hold at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            current: Message::with_capacity(capacity),
            open: 0,
            seen_open: false,
        }
    }

    /// Feeds one byte.
    ///
    /// After `Complete` or `Overflow` the framer starts a fresh message.
    pub fn feed(&mut self, byte: u8) -> FrameResult {
        if self.current.push(byte).is_err() {
            trace!(capacity = self.capacity, "frame overflow");
            self.reset();
            return FrameResult::Overflow;
        }

        match byte {
            b'{' => {
                self.open += 1;
                self.seen_open = true;
            }
            b'}' if self.seen_open => {
                self.open = self.open.saturating_sub(1);
                if self.open == 0 {
                    let mut done = self.take_current();
                    done.mark_framed();
                    return FrameResult::Complete(done);
                }
            }
            _ => {}
        }
        FrameResult::Incomplete
    }

    /// Number of bytes buffered for the frame in progress.
    pub fn buffered(&self) -> usize {
        self.current.len()
    }

    /// Current nesting depth of the frame in progress.
    pub fn depth(&self) -> u32 {
        self.open
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops any partial frame.
    pub fn reset(&mut self) {
        self.current = Message::with_capacity(self.capacity);
        self.open = 0;
        self.seen_open = false;
    }

    fn take_current(&mut self) -> Message {
        let done = std::mem::replace(&mut self.current, Message::with_capacity(self.capacity));
        self.open = 0;
        self.seen_open = false;
        done
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::MessageState;

    fn feed_all(framer: &mut MessageFramer, bytes: &[u8]) -> Vec<FrameResult> {
        bytes
            .iter()
            .map(|&b| framer.feed(b))
            .filter(|r| !matches!(r, FrameResult::Incomplete))
            .collect()
    }

    #[test]
    fn test_single_object_completes_on_closing_brace() {
        // Arrange
        let mut framer = MessageFramer::new(64);

        // Act
        let results = feed_all(&mut framer, br#"{"BoxNo":1}"#);

        // Assert
        assert_eq!(results.len(), 1);
        match &results[0] {
            FrameResult::Complete(msg) => {
                assert_eq!(msg.as_bytes(), br#"{"BoxNo":1}"#);
                assert_eq!(msg.state(), MessageState::Framed);
            }
            other => panic!("expected Complete, got {other:?}"),
        }
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_nested_object_does_not_complete_on_inner_brace() {
        let mut framer = MessageFramer::new(64);
        let input = br#"{"a":{"b":1}}"#;
        let last = input.len() - 1;
        for (i, &b) in input.iter().enumerate() {
            let result = framer.feed(b);
            if i < last {
                assert!(matches!(result, FrameResult::Incomplete), "byte {i}");
            } else {
                assert!(matches!(result, FrameResult::Complete(_)));
            }
        }
    }

    #[test]
    fn test_closing_brace_before_any_open_is_buffered_but_ignored() {
        let mut framer = MessageFramer::new(64);
        let results = feed_all(&mut framer, b"}{}");
        match &results[..] {
            [FrameResult::Complete(msg)] => assert_eq!(msg.as_bytes(), b"}{}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_two_back_to_back_objects_yield_two_frames() {
        let mut framer = MessageFramer::new(64);
        let results = feed_all(&mut framer, b"{\"a\":1}{\"b\":2}");
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(r, FrameResult::Complete(_))));
    }

    #[test]
    fn test_overflow_when_buffer_fills_before_close() {
        // Arrange
        let mut framer = MessageFramer::new(4);

        // Act
        let results = feed_all(&mut framer, b"{\"abc");

        // Assert
        assert!(matches!(results[..], [FrameResult::Overflow]));
        assert_eq!(framer.buffered(), 0);
        assert_eq!(framer.depth(), 0);
    }

    #[test]
    fn test_object_exactly_at_capacity_completes() {
        let mut framer = MessageFramer::new(7);
        let results = feed_all(&mut framer, b"{\"a\":1}");
        assert!(matches!(results[..], [FrameResult::Complete(_)]));
    }
}
