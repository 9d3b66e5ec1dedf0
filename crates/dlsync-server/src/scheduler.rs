//! Daily trigger for scheduled sync passes

use crate::sync::SyncOrchestrator;
use chrono::{Local, NaiveDateTime, NaiveTime};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Runs [`SyncOrchestrator::run_scheduled_pass`] once a day at a local
/// wall-clock time. The time can be changed while running; the change
/// applies from the next firing.
pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    time: watch::Sender<NaiveTime>,
}

impl SyncScheduler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, at: NaiveTime) -> Self {
        let (time, _) = watch::channel(at);
        Self { orchestrator, time }
    }

    pub fn schedule_time(&self) -> NaiveTime {
        *self.time.borrow()
    }

    pub fn reschedule(&self, at: NaiveTime) {
        let previous = self.time.send_replace(at);
        info!(from = %previous, to = %at, "Sync schedule changed");
    }

    /// Spawn the timer loop. It ends when the scheduler is dropped.
    pub fn start(&self) -> JoinHandle<()> {
        let mut time = self.time.subscribe();
        let orchestrator = self.orchestrator.clone();

        tokio::spawn(async move {
            loop {
                let at = *time.borrow_and_update();
                let now = Local::now().naive_local();
                let next = next_fire_after(now, at);
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                info!(next = %next, "Next sync pass scheduled");

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {
                        orchestrator.run_scheduled_pass().await;
                    }
                    changed = time.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

/// The first occurrence of `at` strictly after `now`.
pub fn next_fire_after(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}
