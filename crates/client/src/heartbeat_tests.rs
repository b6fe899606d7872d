// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use super::*;

const INTERVAL: Duration = Duration::from_secs(15);
const TIMEOUT: Duration = Duration::from_secs(30);

struct Probe {
    pings: AtomicUsize,
    deaths: AtomicUsize,
    died: Notify,
}

impl Probe {
    fn new() -> Arc<Self> {
        Arc::new(Self { pings: AtomicUsize::new(0), deaths: AtomicUsize::new(0), died: Notify::new() })
    }
}

fn start(monitor: &LivenessMonitor, probe: &Arc<Probe>) {
    let ping_probe = Arc::clone(probe);
    let dead_probe = Arc::clone(probe);
    monitor.start(
        move || {
            ping_probe.pings.fetch_add(1, Ordering::SeqCst);
        },
        move || {
            dead_probe.deaths.fetch_add(1, Ordering::SeqCst);
            dead_probe.died.notify_one();
        },
    );
}

#[tokio::test(start_paused = true)]
async fn dead_fires_once_at_timeout_mark_without_pongs() {
    let monitor = LivenessMonitor::new(INTERVAL, TIMEOUT);
    let probe = Probe::new();
    let started = tokio::time::Instant::now();

    start(&monitor, &probe);
    probe.died.notified().await;

    // Exactly at the 30s mark (two missed heartbeats), not later.
    assert_eq!(started.elapsed(), TIMEOUT);
    // Pings at 0s and 15s; the 30s tick fires on_dead instead of pinging.
    assert_eq!(probe.pings.load(Ordering::SeqCst), 2);
    assert_eq!(probe.deaths.load(Ordering::SeqCst), 1);

    // The monitor stopped itself: nothing further happens.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(probe.deaths.load(Ordering::SeqCst), 1);
    assert_eq!(probe.pings.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn pongs_keep_the_channel_alive() {
    let monitor = LivenessMonitor::new(INTERVAL, TIMEOUT);
    let probe = Probe::new();
    let pong = monitor.pong_handle();

    start(&monitor, &probe);

    // Pong every 10s for 100s: well inside the timeout window throughout.
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        pong.record();
    }

    assert_eq!(probe.deaths.load(Ordering::SeqCst), 0);
    // Ticks at 0,15,...,90 all pinged.
    assert_eq!(probe.pings.load(Ordering::SeqCst), 7);
    monitor.stop();
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_and_is_idempotent() {
    let monitor = LivenessMonitor::new(INTERVAL, TIMEOUT);
    let probe = Probe::new();

    start(&monitor, &probe);
    tokio::time::sleep(Duration::from_secs(1)).await;
    monitor.stop();
    monitor.stop();

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(probe.deaths.load(Ordering::SeqCst), 0);
    assert_eq!(probe.pings.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn restart_after_stop_begins_a_fresh_window() {
    let monitor = LivenessMonitor::new(INTERVAL, TIMEOUT);
    let probe = Probe::new();

    start(&monitor, &probe);
    tokio::time::sleep(Duration::from_secs(20)).await;
    monitor.stop();

    // 20s already elapsed without a pong, but restarting resets the window.
    let restarted = tokio::time::Instant::now();
    start(&monitor, &probe);
    probe.died.notified().await;
    assert_eq!(restarted.elapsed(), TIMEOUT);
    assert_eq!(probe.deaths.load(Ordering::SeqCst), 1);
}
