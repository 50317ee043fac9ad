//! Buffered stream benchmarks.
//!
//! Compares small writes through a buffered filter against the same writes
//! sent straight to the sink, across buffer capacities.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use frankenio_core::io::{
    BufferedOutputStream, BufferedReader, BufferedWriter, NullSink, StringReader, StringWriter,
};
use frankenio_core::{ByteSink, CharSink};

const RECORD: &[u8] = b"0123456789abcdef0123456789abcdef";
const RECORDS: usize = 4096;

fn bench_byte_sink(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffered_output_stream");
    group.throughput(Throughput::Bytes((RECORD.len() * RECORDS) as u64));

    group.bench_function("unbuffered", |b| {
        b.iter(|| {
            let mut sink = NullSink::new();
            for _ in 0..RECORDS {
                sink.write(black_box(RECORD)).ok();
            }
            black_box(sink.discarded())
        });
    });
    for capacity in [64usize, 512, 8192] {
        group.bench_with_input(
            BenchmarkId::new("buffered", capacity),
            &capacity,
            |b, &capacity| {
                b.iter(|| {
                    let Ok(mut out) = BufferedOutputStream::with_capacity(NullSink::new(), capacity)
                    else {
                        return;
                    };
                    for _ in 0..RECORDS {
                        out.write(black_box(RECORD)).ok();
                    }
                    out.flush().ok();
                });
            },
        );
    }
    group.finish();
}

fn bench_writer_lines(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffered_writer_lines");
    group.throughput(Throughput::Elements(RECORDS as u64));

    group.bench_function("string_writer_direct", |b| {
        b.iter(|| {
            let mut w = StringWriter::new();
            for _ in 0..RECORDS {
                w.write_str("line of text").ok();
                w.write_char('\n').ok();
            }
            black_box(w.len())
        });
    });
    for capacity in [16usize, 1024, 8192] {
        group.bench_with_input(
            BenchmarkId::new("buffered", capacity),
            &capacity,
            |b, &capacity| {
                b.iter(|| {
                    let Ok(w) = BufferedWriter::with_capacity(StringWriter::new(), capacity) else {
                        return;
                    };
                    for _ in 0..RECORDS {
                        w.write_str("line of text").ok();
                        w.new_line().ok();
                    }
                    w.flush().ok();
                });
            },
        );
    }
    group.finish();
}

fn bench_read_line(c: &mut Criterion) {
    let text = "a line of moderate length\r\n".repeat(RECORDS);
    let mut group = c.benchmark_group("buffered_reader");
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("read_line", |b| {
        b.iter(|| {
            let mut reader = BufferedReader::new(StringReader::new(&text));
            let mut lines = 0usize;
            while let Ok(Some(line)) = reader.read_line() {
                lines += line.len();
            }
            black_box(lines)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_byte_sink, bench_writer_lines, bench_read_line);
criterion_main!(benches);
