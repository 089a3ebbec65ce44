//! Auto-sync lifecycle.
//!
//! Every trigger (start, interval tick, foreground, reconnect, manual) is a
//! message on one channel consumed by a single task. Triggers that pile up
//! while a round runs are drained before the next round, so a burst costs at
//! most one extra round.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::sync::{SyncCoordinator, SyncOutcome, SyncTransport};

/// Why a round was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Startup,
    Interval,
    Foreground,
    Reconnect,
    Manual,
    Reauthenticated,
}

/// Observable scheduler state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerState {
    pub rounds_completed: u64,
    pub rounds_failed: u64,
    /// Set after an authorization failure until re-authentication
    pub paused: bool,
    pub last_error: Option<String>,
}

enum Command {
    Trigger(SyncTrigger),
    Stop,
}

pub struct SyncScheduler;

impl SyncScheduler {
    /// Spawn the scheduler task. A round is requested immediately, then every
    /// `interval`.
    pub fn start<T>(coordinator: Arc<SyncCoordinator<T>>, interval: Duration) -> SchedulerHandle
    where
        T: SyncTransport + 'static,
    {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SchedulerState::default());

        // Startup trigger is queued before the task runs; the send cannot fail
        // while `receiver` is still held here.
        let _ = commands.send(Command::Trigger(SyncTrigger::Startup));
        let task = tokio::spawn(run(coordinator, interval, receiver, state_tx));
        tracing::info!(interval_secs = interval.as_secs(), "Auto-sync started");

        SchedulerHandle {
            commands,
            state,
            task,
        }
    }
}

/// Control handle for a running scheduler. Dropping it stops the task.
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SchedulerState>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// App came to the foreground / became visible.
    pub fn notify_foreground(&self) {
        self.send(SyncTrigger::Foreground);
    }

    /// Network connectivity came back.
    pub fn notify_reconnect(&self) {
        self.send(SyncTrigger::Reconnect);
    }

    pub fn trigger_now(&self) {
        self.send(SyncTrigger::Manual);
    }

    /// Clear an authorization pause and run a round.
    pub fn resume_after_reauth(&self) {
        self.send(SyncTrigger::Reauthenticated);
    }

    pub fn state(&self) -> SchedulerState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.clone()
    }

    /// Stop the task and wait for any running round to finish.
    pub async fn stop(self) {
        let _ = self.commands.send(Command::Stop);
        if let Err(error) = self.task.await {
            tracing::warn!(%error, "Auto-sync task ended abnormally");
        }
        tracing::info!("Auto-sync stopped");
    }

    fn send(&self, trigger: SyncTrigger) {
        if self.commands.send(Command::Trigger(trigger)).is_err() {
            tracing::debug!(?trigger, "Auto-sync is not running; trigger dropped");
        }
    }
}

async fn run<T>(
    coordinator: Arc<SyncCoordinator<T>>,
    interval: Duration,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<SchedulerState>,
) where
    T: SyncTransport + 'static,
{
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut paused = false;

    loop {
        let mut trigger = tokio::select! {
            _ = ticker.tick() => SyncTrigger::Interval,
            command = commands.recv() => match command {
                Some(Command::Trigger(trigger)) => trigger,
                Some(Command::Stop) | None => break,
            },
        };

        // Collapse everything queued while the previous round ran.
        let mut stop = false;
        while let Ok(command) = commands.try_recv() {
            match command {
                Command::Trigger(SyncTrigger::Reauthenticated) => {
                    trigger = SyncTrigger::Reauthenticated;
                }
                Command::Trigger(_) => {}
                Command::Stop => stop = true,
            }
        }
        if stop {
            break;
        }

        if trigger == SyncTrigger::Reauthenticated && paused {
            paused = false;
            state.send_modify(|state| state.paused = false);
            tracing::info!("Auto-sync resumed after re-authentication");
        }
        if paused {
            tracing::debug!(?trigger, "Auto-sync paused until re-authentication");
            continue;
        }

        tracing::debug!(?trigger, "Starting sync round");
        match coordinator.sync_now().await {
            Ok(SyncOutcome::Completed(_)) => state.send_modify(|state| {
                state.rounds_completed += 1;
                state.last_error = None;
            }),
            Ok(SyncOutcome::Skipped) => {}
            Err(error) => {
                let recoverable = error.is_recoverable();
                if !recoverable {
                    paused = true;
                    tracing::warn!("Authorization failed; pausing auto-sync");
                }
                state.send_modify(|state| {
                    state.rounds_failed += 1;
                    state.paused = !recoverable;
                    state.last_error = Some(error.to_string());
                });
            }
        }
    }
}
