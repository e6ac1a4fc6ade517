//! Criterion benchmarks for the inputshare binary codec.
//!
//! The forwarding path serializes one envelope per coalescer tick (250 Hz)
//! plus every non-coalescable event, so encode+decode must stay far below a
//! millisecond. These benchmarks watch the hot payloads: a coalesced mouse
//! move, a scroll, and a key event.
//!
//! Run with:
//! ```bash
//! cargo bench --package inputshare-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use inputshare_core::protocol::{
    decode_envelope, decode_input_event, encode_envelope, encode_input_event, frame, Envelope,
    FrameBuffer, InputEvent, MessageType, MouseButton, PressState, PROTOCOL_VERSION,
};

fn bench_events() -> Vec<(&'static str, InputEvent)> {
    vec![
        (
            "MouseMove",
            InputEvent::MouseMove {
                dx: 11,
                dy: -4,
                normalized: Some((0.41, 0.77)),
                modifiers: 1 << 17,
            },
        ),
        ("Scroll", InputEvent::Scroll { dx: 0.0, dy: -3.25, modifiers: 0 }),
        ("Key", InputEvent::Key { keycode: 0x0004, state: PressState::Down, modifiers: 0 }),
        (
            "MouseButton",
            InputEvent::MouseButton {
                button: MouseButton::Left,
                state: PressState::Down,
                modifiers: 0,
            },
        ),
    ]
}

fn envelope_for(event: &InputEvent) -> Envelope {
    Envelope {
        version: PROTOCOL_VERSION,
        message_type: MessageType::InputEvent,
        sequence: 123_456,
        monotonic_ns: 987_654_321,
        source_device_id: "bench-peer".to_string(),
        payload: encode_input_event(event),
    }
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for (name, event) in bench_events() {
        let env = envelope_for(&event);
        group.bench_with_input(BenchmarkId::new("envelope", name), &env, |b, env| {
            b.iter(|| frame(&encode_envelope(black_box(env))));
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for (name, event) in bench_events() {
        let framed = frame(&encode_envelope(&envelope_for(&event)));
        group.bench_with_input(BenchmarkId::new("envelope", name), &framed, |b, framed| {
            b.iter(|| {
                let mut buf = FrameBuffer::new();
                buf.extend(black_box(framed));
                for f in buf.drain_frames().unwrap() {
                    let env = decode_envelope(&f).unwrap();
                    black_box(decode_input_event(&env.payload).unwrap());
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
