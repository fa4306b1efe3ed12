//! Periodic background tasks.
//!
//! Each loop is its own task owning its cancel channel and an activity flag;
//! there is no process-wide loop state. A tick's work runs to completion
//! inside the select arm, so stopping never cuts an in-flight pass short.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub struct BackgroundLoop {
    name: &'static str,
    cancel_tx: mpsc::Sender<()>,
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl BackgroundLoop {
    /// Runs `tick` every `interval`, first after one full interval.
    /// Ticks missed while a pass was running are skipped, not replayed.
    pub fn spawn<F, Fut>(name: &'static str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel_tx, mut cancel_rx) = mpsc::channel::<()>(1);
        let running = Arc::new(AtomicBool::new(true));
        let running_flag = Arc::clone(&running);

        let task = tokio::spawn(async move {
            log::info!("Starting {name} loop (every {interval:?})");
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel_rx.recv() => break,
                    _ = ticker.tick() => {
                        let started = std::time::Instant::now();
                        tick().await;
                        log::debug!("{name} tick took {:?}", started.elapsed());
                    }
                }
            }
            running_flag.store(false, Ordering::SeqCst);
            log::info!("{name} loop stopped");
        });

        Self {
            name,
            cancel_tx,
            running,
            task,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signals the loop and waits for the current tick, if any, to finish.
    pub async fn stop(self) {
        if !self.is_running() {
            log::warn!("{} loop already exited", self.name);
        }
        log::info!("Stopping {} loop", self.name);
        let _ = self.cancel_tx.send(()).await;
        if let Err(e) = self.task.await {
            log::error!("{} loop ended abnormally: {}", self.name, e);
        }
    }
}
