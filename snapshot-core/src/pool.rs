//! Bounded fan-out of per-host work.
//!
//! Hosts are started in order, at most `concurrency` at a time. The first
//! failure cancels the run: in-flight tasks are dropped at their next await
//! point and hosts not yet started are never started. Results are reported
//! in host order regardless of completion order, so a concurrency of 1 is
//! exactly the sequential loop.

use crate::error::{Error, Result};
use crate::host::Host;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

enum Outcome<T> {
    Done(T),
    Failed(Error),
    Cancelled,
}

/// Per-host results of one pool run, each list in host order.
#[derive(Debug)]
pub struct PoolReport<T> {
    pub completed: Vec<(Host, T)>,
    pub failures: Vec<(Host, Error)>,
    /// Started, then dropped because of a failure or external cancellation.
    pub cancelled: Vec<Host>,
    /// Never started.
    pub skipped: Vec<Host>,
}

impl<T> PoolReport<T> {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.cancelled.is_empty() && self.skipped.is_empty()
    }

    /// Stopped by the external token rather than by a failing host.
    pub fn is_interrupted(&self) -> bool {
        self.failures.is_empty() && !self.is_success()
    }

    pub fn completed_hosts(&self) -> Vec<Host> {
        self.completed.iter().map(|(h, _)| h.clone()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct HostPool {
    concurrency: usize,
    cancel: CancellationToken,
}

impl HostPool {
    pub fn new(concurrency: usize) -> Self {
        Self::with_cancel(concurrency, CancellationToken::new())
    }

    /// Pool that also stops when `cancel` fires.
    pub fn with_cancel(concurrency: usize, cancel: CancellationToken) -> Self {
        Self {
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn run<T, F, Fut>(&self, hosts: &[Host], task: F) -> PoolReport<T>
    where
        F: Fn(Host) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        // child token: a failing host must not cancel the caller's token
        let token = self.cancel.child_token();
        let mut outcomes: Vec<Option<Outcome<T>>> = hosts.iter().map(|_| None).collect();
        let mut queue = hosts.iter().cloned().enumerate();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < self.concurrency && !token.is_cancelled() {
                let Some((idx, host)) = queue.next() else {
                    break;
                };
                debug!(host = %host, "Starting host task");
                let work = task(host);
                let token = token.clone();
                in_flight.push(async move {
                    tokio::select! {
                        biased;
                        res = work => match res {
                            Ok(value) => (idx, Outcome::Done(value)),
                            Err(e) => (idx, Outcome::Failed(e)),
                        },
                        _ = token.cancelled() => (idx, Outcome::Cancelled),
                    }
                });
            }

            let Some((idx, outcome)) = in_flight.next().await else {
                break;
            };
            if let Outcome::Failed(e) = &outcome {
                warn!(host = %hosts[idx], error = %e, "Host task failed, cancelling remaining hosts");
                token.cancel();
            }
            outcomes[idx] = Some(outcome);
        }

        let mut report = PoolReport {
            completed: Vec::new(),
            failures: Vec::new(),
            cancelled: Vec::new(),
            skipped: Vec::new(),
        };
        for (host, outcome) in hosts.iter().cloned().zip(outcomes) {
            match outcome {
                Some(Outcome::Done(value)) => report.completed.push((host, value)),
                Some(Outcome::Failed(e)) => report.failures.push((host, e)),
                Some(Outcome::Cancelled) => report.cancelled.push(host),
                None => report.skipped.push(host),
            }
        }
        report
    }
}
