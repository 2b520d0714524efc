//! Tokio interval that posts collection ticks.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use crate::application::run_loop::{TickFlag, TickSource};

/// Posts a tick every `period` once started.
pub struct IntervalTicker {
    period: Duration,
    task: Option<JoinHandle<()>>,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        Self { period, task: None }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

impl TickSource for IntervalTicker {
    fn start(&mut self, flag: TickFlag) {
        if self.task.is_some() {
            return;
        }
        let period = self.period;
        debug!(?period, "starting collection ticker");
        self.task = Some(tokio::spawn(async move {
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticks.tick().await;
            loop {
                ticks.tick().await;
                flag.post();
            }
        }));
    }
}

impl Drop for IntervalTicker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
