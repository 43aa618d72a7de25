//! Codec benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use helilink_core::{codec, Action, Command, PidGains, PidReport, StickPositions};

fn encode_benchmark(c: &mut Criterion) {
    let sticks = StickPositions {
        throttle: 64,
        pitch: -12,
        roll: 7,
        yaw: 0,
    }
    .encode();

    c.bench_function("encode_sticks_frame", |b| {
        b.iter(|| black_box(codec::encode(Command::Control, Action::Sticks, &sticks).unwrap()))
    });
}

fn decode_benchmark(c: &mut Criterion) {
    let report = PidReport {
        pitch: PidGains::new(1.2, 0.05, 0.3),
        roll: PidGains::new(1.1, 0.04, 0.3),
        yaw: PidGains::new(2.5, 0.0, 0.0),
    };
    let encoded = codec::encode(Command::Response, Action::Tune, &report.encode()).unwrap();

    c.bench_function("decode_tune_report", |b| {
        b.iter(|| match codec::decode(&encoded).unwrap() {
            codec::Inbound::Frame(frame) => black_box(PidReport::decode(&frame.payload).unwrap()),
            codec::Inbound::Ack(_) => unreachable!(),
        })
    });
}

fn ack_benchmark(c: &mut Criterion) {
    let ack: &[u8] = &[0x01];

    c.bench_function("decode_ack", |b| {
        b.iter(|| black_box(codec::decode(black_box(ack)).unwrap()))
    });
}

criterion_group!(benches, encode_benchmark, decode_benchmark, ack_benchmark);
criterion_main!(benches);
