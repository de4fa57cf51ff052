use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use wale::{FileBlockIo, Lsn, Wale, WaleConfig};

const CONCURRENCY_LEVELS: &[usize] = &[1, 4, 8, 16];
const PAYLOAD_SIZE: usize = 256;
const APPENDS_PER_WORKER: usize = 512;

static NEXT_LOG_ID: AtomicU64 = AtomicU64::new(0);

fn bench_data_dir() -> PathBuf {
    PathBuf::from("target/bench-data-append-throughput")
}

fn open_bench_log(label: &str) -> Wale<FileBlockIo> {
    let log_id = NEXT_LOG_ID.fetch_add(1, Ordering::Relaxed);
    let dir = bench_data_dir();
    let _ = std::fs::create_dir_all(&dir);
    let path = dir.join(format!("{label}-{log_id}.wale"));
    let _ = std::fs::remove_file(&path);
    let io = FileBlockIo::open(&path, 4096).expect("open bench log");
    Wale::initialize(io, WaleConfig::new().buffer_block_count(64), Lsn::from_u64(1))
        .expect("initialize bench log")
}

fn run_append_batch(log: &Wale<FileBlockIo>, concurrency: usize, payload: &[u8]) {
    let barrier = Barrier::new(concurrency);
    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            let barrier_ref = &barrier;
            handles.push(scope.spawn(move || {
                barrier_ref.wait();
                for _ in 0..APPENDS_PER_WORKER {
                    let lsn = log
                        .append_log_record(payload, false)
                        .expect("bench append failed");
                    assert!(lsn.is_valid());
                }
            }));
        }
        for handle in handles {
            handle.join().expect("append worker panicked");
        }
    });
    log.flush_all_log_records().expect("bench flush failed");
}

fn bench_append_throughput_scaling(c: &mut Criterion) {
    let _ = std::fs::remove_dir_all(bench_data_dir());
    let payload = vec![b'x'; PAYLOAD_SIZE];

    let mut group = c.benchmark_group("append_throughput_scaling");
    group.sample_size(10);
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(5));

    for &concurrency in CONCURRENCY_LEVELS {
        let log = Arc::new(open_bench_log("append_throughput"));
        group.throughput(Throughput::Elements((concurrency * APPENDS_PER_WORKER) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("c{concurrency}")),
            &concurrency,
            |b, &concurrency| {
                b.iter(|| run_append_batch(&log, concurrency, &payload));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_append_throughput_scaling);
criterion_main!(benches);
