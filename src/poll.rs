//! Eventual-consistency polling.
//!
//! A freshly created resource is not guaranteed to be visible to describe
//! calls right away. [`wait_for`] re-runs a describe closure on a fixed
//! cadence until the resource appears or a deadline elapses; [`spawn_wait`]
//! does the same on a background task and hands back a cancellable handle.
//! The deadline is an explicit instant checked each iteration; once it has
//! passed no further describe call is issued.

use crate::error::{self, Result};
use log::debug;
use snafu::ResultExt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

/// Timing knobs for the poller. Defaults match the consistency window the
/// EC2 API exhibits in practice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay before the first describe attempt.
    pub initial_delay: Duration,
    /// Fixed interval between attempts.
    pub interval: Duration,
    /// Total time allowed before giving up.
    pub deadline: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            initial_delay: Duration::from_millis(500),
            interval: Duration::from_secs(1),
            deadline: Duration::from_secs(60),
        }
    }
}

/// Terminal state of a spawned poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The resource became visible.
    Found(T),
    /// The poll was cancelled before the resource appeared.
    Cancelled,
}

/// Blocks the caller until `describe` yields a value or the deadline
/// elapses.
///
/// `describe` returns `Ok(None)` while the resource is not yet visible.
/// Transport and decode errors abort the poll immediately; only deadline
/// expiry produces [`Error::Timeout`](crate::Error).
pub async fn wait_for<T, F, Fut>(
    resource_id: &str,
    config: &PollConfig,
    mut describe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let started = Instant::now();
    let deadline = started + config.deadline;
    sleep(config.initial_delay).await;
    loop {
        if Instant::now() >= deadline {
            return error::Timeout {
                resource_id,
                waited: started.elapsed(),
            }
            .fail();
        }
        debug!("polling for {}", resource_id);
        if let Some(found) = describe().await? {
            debug!("{} became visible", resource_id);
            return Ok(found);
        }
        sleep(config.interval).await;
    }
}

/// Handle to a poll running on a background task.
#[derive(Debug)]
pub struct PollHandle<T> {
    task: JoinHandle<Result<PollOutcome<T>>>,
    cancel: watch::Sender<bool>,
}

impl<T> PollHandle<T> {
    /// Asks the poll to stop. An in-flight describe call is not
    /// interrupted, but its result is discarded.
    pub fn cancel(&self) {
        // send only fails once the task has already finished
        let _ = self.cancel.send(true);
    }

    /// Waits for the poll to reach a terminal state.
    pub async fn wait(self) -> Result<PollOutcome<T>> {
        self.task.await.context(error::PollTask)?
    }
}

/// Runs the same loop as [`wait_for`] on a background task, returning a
/// handle the caller can await later or cancel.
pub fn spawn_wait<T, F, Fut>(
    resource_id: impl Into<String>,
    config: PollConfig,
    mut describe: F,
) -> PollHandle<T>
where
    T: Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<T>>> + Send,
{
    let resource_id = resource_id.into();
    let (cancel, mut cancelled) = watch::channel(false);
    let task = tokio::spawn(async move {
        let started = Instant::now();
        let deadline = started + config.deadline;
        if sleep_or_cancel(&mut cancelled, config.initial_delay).await {
            return Ok(PollOutcome::Cancelled);
        }
        loop {
            if Instant::now() >= deadline {
                return error::Timeout {
                    resource_id,
                    waited: started.elapsed(),
                }
                .fail();
            }
            debug!("polling for {}", resource_id);
            let attempt = describe().await;
            // a cancellation that arrived mid-call suppresses its effect
            if *cancelled.borrow() {
                return Ok(PollOutcome::Cancelled);
            }
            if let Some(found) = attempt? {
                debug!("{} became visible", resource_id);
                return Ok(PollOutcome::Found(found));
            }
            if sleep_or_cancel(&mut cancelled, config.interval).await {
                return Ok(PollOutcome::Cancelled);
            }
        }
    });
    PollHandle { task, cancel }
}

/// Sleeps for `duration` unless cancellation arrives first. Returns whether
/// the poll was cancelled.
async fn sleep_or_cancel(cancelled: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    let slept = sleep(duration);
    tokio::pin!(slept);
    loop {
        tokio::select! {
            _ = &mut slept => return *cancelled.borrow(),
            changed = cancelled.changed() => {
                if changed.is_err() {
                    // the handle is gone, nobody can cancel anymore
                    slept.as_mut().await;
                    return false;
                }
                if *cancelled.borrow() {
                    return true;
                }
            }
        }
    }
}
