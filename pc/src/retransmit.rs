//! Periodic retransmission of an unanswered payload
//!
//! A retransmission task sends the same payload to every target channel once
//! per interval until its [`CancelSignal`] fires. Cancellation is observed
//! while waiting for the next tick and while sends are in flight, so a task
//! stops within one interval of being cancelled.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::channel::{Channel, ListenerId};

/// Cooperative, idempotent cancellation flag shared by an exchange
#[derive(Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation; returns `true` for the first request only
    pub fn cancel(&self) -> bool {
        let already = self.tx.send_replace(true);
        if !already {
            debug!("CancelSignal::cancel: cancellation requested");
        }
        !already
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once cancellation has been requested
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this only returns once cancelled
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// One channel a retransmission task sends to
#[derive(Clone)]
pub struct RetransmitTarget {
    pub channel: Arc<dyn Channel>,

    /// Listener waiting for this channel's reply, for log correlation
    pub listener_id: Option<ListenerId>,
}

impl RetransmitTarget {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self {
            channel,
            listener_id: None,
        }
    }

    pub fn with_listener(mut self, id: ListenerId) -> Self {
        self.listener_id = Some(id);
        self
    }
}

/// Spawns retransmission tasks at a fixed interval
#[derive(Debug, Clone, Copy)]
pub struct Retransmitter {
    interval: Duration,
}

impl Retransmitter {
    /// Shortest interval a task will tick at
    pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

    /// Zero intervals are raised to [`MIN_INTERVAL`](Self::MIN_INTERVAL)
    pub fn new(interval: Duration) -> Self {
        if interval < Self::MIN_INTERVAL {
            warn!(?interval, min = ?Self::MIN_INTERVAL, "Retransmission interval too short, raising to minimum");
            return Self {
                interval: Self::MIN_INTERVAL,
            };
        }
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start sending `payload` to every target
    ///
    /// The first round goes out immediately; later rounds follow every
    /// interval. Send failures are logged and retried on the next tick.
    pub fn spawn(&self, payload: Vec<u8>, targets: Vec<RetransmitTarget>, cancel: CancelSignal) -> RetransmitHandle {
        let rounds = Arc::new(AtomicU64::new(0));
        let interval = self.interval;
        debug!(targets = targets.len(), ?interval, "Retransmitter::spawn: called");

        let task = tokio::spawn(run(payload, targets, interval, cancel.clone(), rounds.clone()));
        RetransmitHandle {
            cancel,
            rounds,
            task: Some(task),
        }
    }
}

async fn run(
    payload: Vec<u8>,
    targets: Vec<RetransmitTarget>,
    interval: Duration,
    cancel: CancelSignal,
    rounds: Arc<AtomicU64>,
) -> u64 {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let attempt = rounds.fetch_add(1, Ordering::SeqCst) + 1;
        let sends = targets.iter().map(|target| send_once(target, &payload, attempt));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = join_all(sends) => {}
        }
    }

    let rounds = rounds.load(Ordering::SeqCst);
    debug!(rounds, "Retransmission stopped");
    rounds
}

async fn send_once(target: &RetransmitTarget, payload: &[u8], attempt: u64) {
    let channel = target.channel.name();
    match target.listener_id {
        Some(listener_id) => debug!(%channel, %listener_id, attempt, "Sending payload"),
        None => debug!(%channel, attempt, "Sending payload"),
    }
    if let Err(e) = target.channel.send(payload).await {
        warn!(%channel, attempt, error = %e, "Retransmission send failed, retrying next tick");
    }
}

/// Owner's handle on a running retransmission task
///
/// Dropping the handle cancels the task.
pub struct RetransmitHandle {
    cancel: CancelSignal,
    rounds: Arc<AtomicU64>,
    task: Option<JoinHandle<u64>>,
}

impl RetransmitHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Rounds started so far
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Cancel and wait up to `grace` for the task to stop
    ///
    /// A task that does not stop in time (e.g. stuck in a transport write) is
    /// aborted. Returns the number of rounds that were started.
    pub async fn shutdown(mut self, grace: Duration) -> u64 {
        self.cancel.cancel();
        let Some(mut task) = self.task.take() else {
            return self.rounds();
        };

        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(rounds)) => rounds,
            Ok(Err(e)) => {
                warn!(error = %e, "Retransmission task failed");
                self.rounds()
            }
            Err(_) => {
                warn!(?grace, "Retransmission task did not stop in time, aborting");
                task.abort();
                self.rounds()
            }
        }
    }
}

impl Drop for RetransmitHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{MemoryChannel, OpenOptions};
    use std::time::Instant;

    async fn open_channel(name: &str) -> Arc<MemoryChannel> {
        let channel = MemoryChannel::builder(name).build();
        channel.open(&OpenOptions::new(Duration::from_secs(1))).await.unwrap();
        channel
    }

    #[test]
    fn test_cancel_signal_is_idempotent() {
        let cancel = CancelSignal::new();
        assert!(!cancel.is_cancelled());
        assert!(cancel.cancel());
        assert!(!cancel.cancel());
        assert!(cancel.clone().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let cancel = CancelSignal::new();
        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move { cancel.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_sends_to_every_target_each_round() {
        let a = open_channel("COM1").await;
        let b = open_channel("COM2").await;
        let targets = vec![
            RetransmitTarget::new(a.clone()),
            RetransmitTarget::new(b.clone()).with_listener(ListenerId::new()),
        ];

        let handle = Retransmitter::new(Duration::from_millis(50)).spawn(b"probe".to_vec(), targets, CancelSignal::new());
        tokio::time::sleep(Duration::from_millis(120)).await;
        let rounds = handle.shutdown(Duration::from_secs(1)).await;

        assert!(rounds >= 2);
        assert_eq!(a.send_count() as u64, rounds);
        assert_eq!(b.send_count() as u64, rounds);
        assert!(a.sent().iter().all(|p| p == b"probe"));
    }

    #[tokio::test]
    async fn test_zero_interval_is_raised_and_still_sends() {
        let retransmitter = Retransmitter::new(Duration::ZERO);
        assert_eq!(retransmitter.interval(), Retransmitter::MIN_INTERVAL);

        let channel = open_channel("COM1").await;
        let handle = retransmitter.spawn(
            b"ping".to_vec(),
            vec![RetransmitTarget::new(channel.clone())],
            CancelSignal::new(),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        let rounds = handle.shutdown(Duration::from_secs(1)).await;

        assert!(rounds >= 1);
        assert!(channel.send_count() >= 1);
    }

    #[tokio::test]
    async fn test_cadence_matches_interval() {
        let channel = open_channel("COM1").await;
        let interval = Duration::from_millis(100);
        let handle = Retransmitter::new(interval).spawn(
            b"ping".to_vec(),
            vec![RetransmitTarget::new(channel.clone())],
            CancelSignal::new(),
        );

        tokio::time::sleep(Duration::from_millis(550)).await;
        handle.shutdown(Duration::from_secs(1)).await;

        // floor(550 / 100) +/- 1
        let sends = channel.send_count();
        assert!((4..=6).contains(&sends), "unexpected send count {sends}");
    }

    #[tokio::test]
    async fn test_no_sends_after_cancel() {
        let channel = open_channel("COM1").await;
        let cancel = CancelSignal::new();
        let handle = Retransmitter::new(Duration::from_millis(30)).spawn(
            b"ping".to_vec(),
            vec![RetransmitTarget::new(channel.clone())],
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(70)).await;
        cancel.cancel();
        let start = Instant::now();
        while !handle.is_finished() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(start.elapsed() < Duration::from_millis(30));

        let after_cancel = channel.send_count();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(channel.send_count(), after_cancel);
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_send_failures_do_not_stop_loop() {
        let channel = MemoryChannel::builder("COM1").fail_first_sends(2).build();
        channel.open(&OpenOptions::new(Duration::from_secs(1))).await.unwrap();

        let handle = Retransmitter::new(Duration::from_millis(20)).spawn(
            b"ping".to_vec(),
            vec![RetransmitTarget::new(channel.clone())],
            CancelSignal::new(),
        );
        tokio::time::sleep(Duration::from_millis(110)).await;
        handle.shutdown(Duration::from_secs(1)).await;

        assert!(channel.send_attempts() > 2);
        assert!(channel.send_count() >= 1);
    }

    #[tokio::test]
    async fn test_drop_cancels_task() {
        let channel = open_channel("COM1").await;
        let cancel = CancelSignal::new();
        let handle = Retransmitter::new(Duration::from_millis(20)).spawn(
            b"ping".to_vec(),
            vec![RetransmitTarget::new(channel.clone())],
            cancel.clone(),
        );
        drop(handle);

        assert!(cancel.is_cancelled());
        tokio::time::sleep(Duration::from_millis(30)).await;
        let count = channel.send_count();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(channel.send_count(), count);
    }
}
