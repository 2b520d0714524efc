//! Criterion benchmarks for the per-byte framer and the bus codec.
//!
//! Run with:
//! ```bash
//! cargo bench --package tec-core --bench framer_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tec_core::protocol::bus::BusCommand;
use tec_core::protocol::framer::{FrameResult, MessageFramer};
use tec_core::protocol::message::DEFAULT_MESSAGE_CAPACITY;

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn fixtures() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("handshake", br#"{"Handshake":57005}"#.to_vec()),
        ("set_duty", br#"{"TECNo":3,"SetDuty":-40.0}"#.to_vec()),
        (
            "nested",
            br#"{"TECCommand":{"BoxNo":1,"Board":2,"Channel":5,"SetPoint":12.5}}"#.to_vec(),
        ),
    ]
}

fn bench_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");
    for (name, bytes) in fixtures() {
        group.bench_with_input(BenchmarkId::new("msg", name), &bytes, |b, bytes| {
            b.iter(|| {
                let mut framer = MessageFramer::new(DEFAULT_MESSAGE_CAPACITY);
                let mut frames = 0usize;
                for &byte in bytes.iter() {
                    if let FrameResult::Complete(msg) = framer.feed(black_box(byte)) {
                        frames += msg.len();
                    }
                }
                frames
            })
        });
    }
    group.finish();
}

fn bench_frame_and_parse(c: &mut Criterion) {
    let bytes = br#"{"TECNo":3,"SetDuty":-40.0}"#;
    c.bench_function("frame_and_parse/set_duty", |b| {
        b.iter(|| {
            let mut framer = MessageFramer::new(DEFAULT_MESSAGE_CAPACITY);
            for &byte in bytes.iter() {
                if let FrameResult::Complete(mut msg) = framer.feed(byte) {
                    let _ = black_box(msg.parse().map(|doc| doc.len()));
                }
            }
        })
    });
}

fn bench_bus_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("bus");
    group.bench_function("encode_set_power", |b| {
        b.iter(|| BusCommand::set_power(black_box(7), black_box(-4_000)).map(|c| c.encode()))
    });
    group.bench_function("decode_set_power", |b| {
        b.iter(|| BusCommand::decode(black_box(&[0x7Au8, 0xF0, 0x60][..])))
    });
    group.finish();
}

criterion_group!(benches, bench_framing, bench_frame_and_parse, bench_bus_codec);
criterion_main!(benches);
