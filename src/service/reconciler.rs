use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{ReconcileSummary, ServiceManager};
use crate::background::BackgroundLoop;
use crate::error::PodiumError;

#[derive(Debug)]
pub enum TriggerOutcome {
    Completed(ReconcileSummary),
    /// Another pass was in flight; nothing was done.
    AlreadyRunning,
    /// The pass hit its deadline and was cut short.
    TimedOut(Duration),
    Failed(PodiumError),
}

/// Periodic driver of [`ServiceManager::reconcile_services`].
///
/// At most one pass runs at a time, whether it was started by the loop or on
/// demand. Each pass is bounded by half the tick interval.
pub struct Reconciler {
    manager: Arc<ServiceManager>,
    interval: Duration,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag however the pass ends, including when the
/// caller drops it.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Reconciler {
    pub fn new(manager: Arc<ServiceManager>, interval: Duration) -> Self {
        Self {
            manager,
            interval,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn deadline(&self) -> Duration {
        self.interval / 2
    }

    pub async fn run_once(&self) -> TriggerOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("Reconciliation already in progress, skipping");
            return TriggerOutcome::AlreadyRunning;
        }
        let _in_flight = InFlight(&self.in_flight);

        let deadline = self.deadline();
        match tokio::time::timeout(deadline, self.manager.reconcile_services()).await {
            Ok(Ok(summary)) => TriggerOutcome::Completed(summary),
            Ok(Err(e)) => {
                log::error!("Error reconciling services: {}", e);
                TriggerOutcome::Failed(e)
            }
            Err(_) => {
                log::warn!("Reconciliation pass exceeded its {:?} deadline", deadline);
                TriggerOutcome::TimedOut(deadline)
            }
        }
    }

    pub fn spawn(self: Arc<Self>) -> BackgroundLoop {
        let interval = self.interval;
        BackgroundLoop::spawn("reconciler", interval, move || {
            let reconciler = Arc::clone(&self);
            async move {
                reconciler.run_once().await;
            }
        })
    }
}
