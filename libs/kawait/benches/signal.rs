// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use criterion::{Criterion, criterion_group, criterion_main};
use kawait::{Completion, Fault, TaskRunner};
use std::hint::black_box;
use std::sync::Arc;

fn resume_then_consume(c: &mut Criterion) {
    c.bench_function("resume_then_consume", |b| {
        b.iter(|| {
            let signal = Completion::new();
            signal.resume(black_box(42_u64));
            black_box(signal.consume_result().unwrap());
        });
    });
}

fn runner_ready_10k(c: &mut Criterion) {
    const RUNS: usize = 10_000;

    c.bench_function("runner_ready_10k", |b| {
        b.iter(|| {
            for i in 0..RUNS {
                let mut runner = TaskRunner::new(async move { Ok::<_, Fault>(i) });
                black_box(runner.result_channel().recv().unwrap());
            }
        });
    });
}

fn runner_suspend_resume_10k(c: &mut Criterion) {
    const RUNS: usize = 10_000;

    c.bench_function("runner_suspend_resume_10k", |b| {
        b.iter(|| {
            for i in 0..RUNS {
                let signal = Arc::new(Completion::new());
                let mut runner = TaskRunner::new({
                    let signal = signal.clone();
                    async move { signal.wait().await }
                });
                signal.resume(i);
                black_box(runner.result_channel().recv().unwrap());
            }
        });
    });
}

fn cross_thread_recv_1k(c: &mut Criterion) {
    const RUNS: usize = 1_000;

    c.bench_function("cross_thread_recv_1k", |b| {
        b.iter(|| {
            for i in 0..RUNS {
                let signal = Arc::new(Completion::new());
                let mut runner = TaskRunner::new({
                    let signal = signal.clone();
                    async move { signal.wait().await }
                });
                let rx = runner.result_channel();

                let h = std::thread::spawn(move || signal.resume(i));
                black_box(rx.recv().unwrap());
                h.join().unwrap();
            }
        });
    });
}

criterion_group!(
    benches,
    resume_then_consume,
    runner_ready_10k,
    runner_suspend_resume_10k,
    cross_thread_recv_1k,
);
criterion_main!(benches);
