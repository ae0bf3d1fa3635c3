// Copyright The AckBus Authors
// SPDX-License-Identifier: Apache-2.0

//! Benchmarks for the publish/ack round trip compared to bare task spawning.
//!
//! Scenarios:
//! - publish burst through a channel with one acking subscriber
//! - publish burst with four acking subscribers (fan-out cost)
//! - bare `tokio::spawn` of equivalent no-op tasks as a floor

#![allow(missing_docs)]

use ackbus_config::ChannelSettings;
use ackbus_engine::{Channel, Message};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const MSG_COUNT: usize = 10_000;

fn bench_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()
        .expect("benchmark runtime should build")
}

/// Publishes a burst through a freshly built channel and waits for every
/// round to resolve.
async fn run_publish_burst(subscribers: usize) {
    let channel =
        Channel::new("bench", ChannelSettings::default()).expect("channel should build");
    for _ in 0..subscribers {
        channel
            .subscribe_fn(|delivery| async move {
                delivery.ack()?;
                Ok(())
            })
            .expect("subscribe should succeed");
    }

    for i in 0..MSG_COUNT {
        let tracker = channel
            .publish(Message::new(i as u64))
            .await
            .expect("publish should succeed");
        _ = black_box(tracker);
    }
    while channel.is_pending() {
        tokio::task::yield_now().await;
    }
}

/// Spawns the same number of no-op tasks directly; the floor the fan-out
/// machinery sits on.
async fn run_spawn_floor() {
    let done = Arc::new(AtomicUsize::new(0));
    for i in 0..MSG_COUNT {
        let done = Arc::clone(&done);
        let _ = tokio::spawn(async move {
            _ = black_box(i);
            let _ = done.fetch_add(1, Ordering::Relaxed);
        });
    }
    while done.load(Ordering::Relaxed) < MSG_COUNT {
        tokio::task::yield_now().await;
    }
}

fn publish_benches(c: &mut Criterion) {
    let rt = bench_runtime();
    let mut group = c.benchmark_group("publish");
    let _ = group.throughput(Throughput::Elements(MSG_COUNT as u64));

    let _ = group.bench_function("single_subscriber_ack", |b| {
        b.to_async(&rt).iter(|| run_publish_burst(1));
    });
    let _ = group.bench_function("four_subscriber_ack", |b| {
        b.to_async(&rt).iter(|| run_publish_burst(4));
    });
    let _ = group.bench_function("spawn_floor", |b| {
        b.to_async(&rt).iter(run_spawn_floor);
    });

    group.finish();
}

criterion_group!(benches, publish_benches);
criterion_main!(benches);
