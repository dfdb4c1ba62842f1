use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::debug;

const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingState {
    Idle,
    Polling,
}

struct PollingHandle {
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl PollingHandle {
    fn cancel(self) {
        self.active.store(false, Ordering::Release);
        self.task.abort();
    }
}

/// Runs a recurring tick on a background task.
///
/// At most one recurring task exists at a time. The first tick fires one full
/// interval after `start`, ticks run one after another (a slow tick pushes the
/// next one back rather than overlapping it), and once `stop` returns no new
/// tick is dispatched.
#[derive(Default)]
pub struct PollingScheduler {
    handle: Option<PollingHandle>,
}

impl PollingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PollingState {
        match self.handle {
            Some(_) => PollingState::Polling,
            None => PollingState::Idle,
        }
    }

    pub fn is_polling(&self) -> bool {
        self.handle.is_some()
    }

    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut>(&mut self, period: Duration, mut on_tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop();

        let period = period.max(MIN_PERIOD);
        let active = Arc::new(AtomicBool::new(true));
        let task_active = Arc::clone(&active);
        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !task_active.load(Ordering::Acquire) {
                    break;
                }
                on_tick().await;
            }
        });

        debug!(?period, "status polling started");
        self.handle = Some(PollingHandle { active, task });
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.cancel();
            debug!("status polling stopped");
        }
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "tests/polling_tests.rs"]
mod tests;
