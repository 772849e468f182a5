//! Upload window benchmark suite.
//!
//! Measures the sliding-window pump in isolation (no I/O):
//! - Buffer sizes: 64 KiB, 1 MiB, 4 MiB
//! - Ack cadence: every frame, every 10th frame (device firmware default)
//!
//! Run with: cargo bench --bench upload_window
//! Results saved to: target/criterion/

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use device_link::NamedMessage;
use device_link::upload::{AckOutcome, UploadSession};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const BUFFER_SIZES: &[usize] = &[64 * 1024, 1024 * 1024, 4 * 1024 * 1024];
const ACK_EVERY: &[usize] = &[1, 10];

// ============================================================================
// Helpers
// ============================================================================

/// Runs a whole upload, acking every `ack_every` frames and at the end.
fn drive(data: Vec<u8>, ack_every: usize) -> usize {
    let Ok(mut session) = UploadSession::new(data) else {
        return 0;
    };

    let mut received = 0usize;
    let mut bytes = 0usize;

    loop {
        let mut ack = None;
        for frame in session.next_frames() {
            received += 1;
            bytes += frame.payload.len();
            if received % ack_every == 0 || frame.is_end_of_stream() {
                ack = Some(received);
            }
        }

        let count = ack.unwrap_or(received) as u64;
        match session.acknowledge(count) {
            AckOutcome::Progress => {}
            AckOutcome::Complete | AckOutcome::Ignored => return bytes,
        }
    }
}

// ============================================================================
// Benchmark: Window Pump
// ============================================================================

fn bench_window_pump(c: &mut Criterion) {
    let mut group = c.benchmark_group("upload_window");

    for &size in BUFFER_SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();

        for &ack_every in ACK_EVERY {
            group.bench_with_input(
                BenchmarkId::new(format!("ack_every_{ack_every}"), size),
                &data,
                |b, data| b.iter(|| drive(black_box(data.clone()), ack_every)),
            );
        }
    }

    group.finish();
}

// ============================================================================
// Benchmark: Message Parsing
// ============================================================================

fn bench_parse_ack(c: &mut Criterion) {
    c.bench_function("parse_uploadack", |b| {
        b.iter(|| NamedMessage::parse(black_box(r#"["uploadack",120]"#)))
    });
}

criterion_group!(benches, bench_window_pump, bench_parse_ack);
criterion_main!(benches);
