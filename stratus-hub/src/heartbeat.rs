//! Server heartbeats.
//!
//! Every `heartbeat_interval` the server queues a heartbeat on the
//! connection's writer. The first unanswered heartbeat starts the timeout;
//! an ack for the latest sequence stops it and records the round trip.
//! When the timeout elapses the reader loop is told to stop, which tears
//! the connection down.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};

use stratus_codec::hub;

use crate::connection::HubConnection;

#[derive(Debug, Default)]
struct Waiting {
    sequence: i32,
    sent: Option<Instant>,
    deadline: Option<Instant>,
}

/// Heartbeat bookkeeping of one connection.
#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    timeout: Option<Duration>,
    waiting: Mutex<Waiting>,
    latency: Mutex<Option<Duration>>,
    timed_out: Notify,
}

impl HeartbeatMonitor {
    pub(crate) fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            waiting: Mutex::new(Waiting::default()),
            latency: Mutex::new(None),
            timed_out: Notify::new(),
        }
    }

    fn sent(&self, sequence: i32, at: Instant) {
        let mut waiting = self.waiting.lock();
        waiting.sequence = sequence;
        waiting.sent = Some(at);
        if waiting.deadline.is_none() {
            waiting.deadline = self.timeout.map(|timeout| at + timeout);
        }
    }

    /// Record the client's answer. Acks for anything but the latest
    /// heartbeat are ignored.
    pub(crate) fn ack(&self, sequence: i32) -> bool {
        let mut waiting = self.waiting.lock();
        let Some(sent) = waiting.sent else {
            return false;
        };
        if waiting.sequence != sequence {
            return false;
        }
        waiting.sent = None;
        waiting.deadline = None;
        *self.latency.lock() = Some(sent.elapsed());
        true
    }

    fn deadline(&self) -> Option<Instant> {
        self.waiting.lock().deadline
    }

    pub(crate) fn latency(&self) -> Option<Duration> {
        *self.latency.lock()
    }

    /// Resolves once the heartbeat timeout has elapsed.
    pub(crate) async fn expired(&self) {
        self.timed_out.notified().await;
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Send heartbeats until the connection goes away or stops answering.
pub(crate) async fn run(connection: Arc<HubConnection>, interval: Duration) {
    let monitor = connection.heartbeat();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sequence: i32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !connection.writer().write(hub::heartbeat_message(sequence, unix_millis(), None)) {
                    return;
                }
                monitor.sent(sequence, Instant::now());
                tracing::trace!(connection = %connection.id(), sequence, "heartbeat sent");
                sequence = sequence.wrapping_add(1);
            }
            () = wait_until(monitor.deadline()) => {
                // An ack may have cleared the deadline while we slept.
                if monitor.deadline().is_some_and(|deadline| deadline <= Instant::now()) {
                    tracing::warn!(connection = %connection.id(), sequence, "heartbeat timed out");
                    monitor.timed_out.notify_one();
                    return;
                }
            }
        }
    }
}
