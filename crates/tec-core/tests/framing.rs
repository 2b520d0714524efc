//! Integration tests for stream framing followed by typed dispatch.
//!
//! Bytes are pushed through the public framer the way a connection reader
//! does, then the completed frames are parsed and dispatched.

use tec_core::protocol::{
    dispatch::{Dispatch, DispatchTable, Handler},
    framer::{FrameResult, MessageFramer},
    message::{Message, DEFAULT_MESSAGE_CAPACITY},
};

/// Feeds `bytes` and returns every completed frame, panicking on overflow.
fn frames(framer: &mut MessageFramer, bytes: &[u8]) -> Vec<Message> {
    let mut out = Vec::new();
    for &b in bytes {
        match framer.feed(b) {
            FrameResult::Incomplete => {}
            FrameResult::Complete(msg) => out.push(msg),
            FrameResult::Overflow => panic!("unexpected overflow"),
        }
    }
    out
}

#[test]
fn test_single_object_frame_equals_input_through_closing_brace() {
    let input = br#"{"TECNo":3,"SetDuty":-40.0}"#;
    let mut framer = MessageFramer::new(DEFAULT_MESSAGE_CAPACITY);

    let got = frames(&mut framer, input);

    assert_eq!(got.len(), 1);
    assert_eq!(got[0].as_bytes(), input);
}

#[test]
fn test_byte_at_a_time_matches_all_at_once() {
    let input = br#"{"a":{"b":{"c":1}},"d":[1,2]}"#;

    // One continuous feed.
    let mut whole = MessageFramer::new(DEFAULT_MESSAGE_CAPACITY);
    let all_at_once = frames(&mut whole, input);

    // One byte per "read", with the framer persisting between reads.
    let mut split = MessageFramer::new(DEFAULT_MESSAGE_CAPACITY);
    let mut one_by_one = Vec::new();
    for chunk in input.chunks(1) {
        one_by_one.extend(frames(&mut split, chunk));
    }

    assert_eq!(all_at_once.len(), 1);
    assert_eq!(one_by_one.len(), 1);
    assert_eq!(all_at_once[0].as_bytes(), one_by_one[0].as_bytes());
}

#[test]
fn test_frame_split_across_irregular_reads_is_reassembled() {
    let input = br#"{"BoxNo":2}{"Handshake":57005}"#;
    let mut framer = MessageFramer::new(DEFAULT_MESSAGE_CAPACITY);
    let mut got = Vec::new();
    for chunk in [&input[..3], &input[3..14], &input[14..]] {
        got.extend(frames(&mut framer, chunk));
    }
    let texts: Vec<&[u8]> = got.iter().map(Message::as_bytes).collect();
    assert_eq!(texts, vec![&br#"{"BoxNo":2}"#[..], &br#"{"Handshake":57005}"#[..]]);
}

#[test]
fn test_oversized_frame_overflows_and_framer_recovers() {
    let mut framer = MessageFramer::new(16);
    let mut overflowed = false;
    for &b in br#"{"Key":"0123456789abcdef"}"#.iter() {
        if let FrameResult::Overflow = framer.feed(b) {
            overflowed = true;
            break;
        }
    }
    assert!(overflowed);

    let got = frames(&mut framer, br#"{"A":1}"#);
    assert_eq!(got.len(), 1);
}

#[test]
fn test_framed_message_dispatches_keys_in_order() {
    // Arrange
    let mut table: DispatchTable<Vec<String>> = DispatchTable::new();
    table.register("TECNo", Handler::uint(|log: &mut Vec<String>, v| log.push(format!("TECNo={v}"))));
    table.register("SetDuty", Handler::float(|log: &mut Vec<String>, v| log.push(format!("SetDuty={v}"))));
    let mut framer = MessageFramer::new(DEFAULT_MESSAGE_CAPACITY);
    let mut msg = frames(&mut framer, br#"{"TECNo":3,"Unknown":true,"SetDuty":-40.0}"#)
        .pop()
        .expect("one frame");

    // Act
    let mut log = Vec::new();
    let doc = msg.parse().expect("valid json").clone();
    let outcomes: Vec<Dispatch> = doc
        .iter()
        .map(|(k, v)| table.dispatch(&mut log, k, v))
        .collect();

    // Assert
    assert_eq!(log, vec!["TECNo=3", "SetDuty=-40"]);
    assert_eq!(
        outcomes,
        vec![Dispatch::Handled, Dispatch::Unhandled, Dispatch::Handled]
    );
}
