use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use futures::{stream::select_all, StreamExt};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_stream::wrappers::IntervalStream;
use tracing::debug;

use crate::config::EngineSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tick {
    SelectionPin,
    AvatarRefresh,
    ConnectionRefresh,
    HistoryPoll,
}

#[derive(Debug, Clone)]
pub struct Schedule {
    pub entries: Vec<(Tick, Duration)>,
}

impl Schedule {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            entries: vec![
                (Tick::SelectionPin, settings.selection_pin_interval),
                (Tick::AvatarRefresh, settings.avatar_refresh_interval),
                (Tick::ConnectionRefresh, settings.connection_refresh_interval),
                (Tick::HistoryPoll, settings.history_poll_interval),
            ],
        }
    }
}

#[derive(Default)]
pub struct Scheduler {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Starts emitting ticks into `ticks`, replacing any running schedule.
    /// The first tick of each entry fires one period after start.
    pub fn start(&self, schedule: Schedule, ticks: mpsc::Sender<Tick>) {
        let streams = schedule
            .entries
            .into_iter()
            .filter(|(_, period)| !period.is_zero())
            .map(|(tick, period)| {
                let mut interval = interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                IntervalStream::new(interval).map(move |_| tick)
            })
            .collect::<Vec<_>>();

        let handle = tokio::spawn(async move {
            let mut merged = select_all(streams);
            while let Some(tick) = merged.next().await {
                if ticks.send(tick).await.is_err() {
                    debug!("scheduler: tick receiver closed, stopping");
                    return;
                }
            }
        });

        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = task.replace(handle) {
            previous.abort();
        }
    }

    pub fn stop(&self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
            debug!("scheduler: intervals cleared");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}
