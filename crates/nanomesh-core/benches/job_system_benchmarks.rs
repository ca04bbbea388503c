//! Job System Benchmarks
//!
//! Performance benchmarks for the job system

use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use nanomesh_core::job::{Job, JobSystem};

struct IncrementJob {
    counter: Arc<AtomicU32>,
    chunks: u32,
}

impl Job for IncrementJob {
    fn execute(&self, _chunk_index: u32, _chunk_count: u32) {
        self.counter.fetch_add(1, Ordering::Relaxed);
    }

    fn chunk_count(&self) -> u32 {
        self.chunks
    }

    fn name(&self) -> &str {
        "increment"
    }
}

fn bench_job_submit_wait(c: &mut Criterion) {
    let mut group = c.benchmark_group("job_submit_wait");

    for count in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let job_system = JobSystem::new(4).unwrap();
            let counter = Arc::new(AtomicU32::new(0));

            b.iter(|| {
                counter.store(0, Ordering::Relaxed);

                let handles: Vec<_> = (0..count)
                    .map(|_| {
                        job_system.submit(IncrementJob {
                            counter: counter.clone(),
                            chunks: 1,
                        })
                    })
                    .collect();

                for handle in &handles {
                    handle.wait();
                }

                black_box(counter.load(Ordering::Relaxed))
            });
        });
    }

    group.finish();
}

fn bench_chunked_job(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunked_job");

    for chunks in [4, 64, 512].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(chunks), chunks, |b, &chunks| {
            let job_system = JobSystem::new(4).unwrap();
            let counter = Arc::new(AtomicU32::new(0));

            b.iter(|| {
                counter.store(0, Ordering::Relaxed);
                job_system
                    .submit(IncrementJob {
                        counter: counter.clone(),
                        chunks,
                    })
                    .wait();
                black_box(counter.load(Ordering::Relaxed))
            });
        });
    }

    group.finish();
}

fn bench_closure_job(c: &mut Criterion) {
    let mut group = c.benchmark_group("closure_job");

    for count in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let job_system = JobSystem::new(4).unwrap();
            let counter = Arc::new(AtomicU32::new(0));

            b.iter(|| {
                counter.store(0, Ordering::Relaxed);

                for _ in 0..count {
                    let c = counter.clone();
                    job_system.submit_fn("increment", move || {
                        c.fetch_add(1, Ordering::Relaxed);
                    });
                }
                job_system.wait_idle();

                black_box(counter.load(Ordering::Relaxed))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_job_submit_wait, bench_chunked_job, bench_closure_job);

criterion_main!(benches);
