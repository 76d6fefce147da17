//! Cooperative periodic tasks
//!
//! The host calls [`Scheduler::advance`] once per server tick; every task
//! whose period divides the new tick count is due. Nothing runs on its own
//! thread, so due tasks execute one after another on the caller's thread.

use std::fmt;

use tracing::debug;

use crate::config::settings::SchedulerSettings;

/// Periodic work owned by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Backend keep-alive
    Ping,
    /// Session garbage collection and idle timeouts
    SessionSweep,
    /// Scheduled backup check
    BackupSchedule,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ping => "ping",
            Self::SessionSweep => "session-sweep",
            Self::BackupSchedule => "backup-schedule",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
struct Task {
    kind: TaskKind,
    period: u64,
}

/// Task table plus the tick counter
#[derive(Debug, Default)]
pub struct Scheduler {
    tasks: Vec<Task>,
    tick: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduler with the three core tasks at their configured periods
    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        let mut scheduler = Self::new();
        scheduler.schedule(TaskKind::SessionSweep, settings.session_period);
        scheduler.schedule(TaskKind::BackupSchedule, settings.backup_period);
        scheduler.schedule(TaskKind::Ping, settings.ping_period);
        scheduler
    }

    /// Run `kind` every `period` ticks, replacing any earlier registration
    ///
    /// A zero period leaves the task unscheduled.
    pub fn schedule(&mut self, kind: TaskKind, period: u64) {
        self.cancel(kind);
        if period == 0 {
            return;
        }
        self.tasks.push(Task { kind, period });
        debug!(task = %kind, period, "task scheduled");
    }

    /// Returns `false` if the task was not scheduled
    pub fn cancel(&mut self, kind: TaskKind) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.kind != kind);
        self.tasks.len() != before
    }

    pub fn cancel_all(&mut self) {
        self.tasks.clear();
    }

    pub fn is_scheduled(&self, kind: TaskKind) -> bool {
        self.tasks.iter().any(|t| t.kind == kind)
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Count one tick and return the tasks due on it, in registration order
    pub fn advance(&mut self) -> Vec<TaskKind> {
        self.tick = self.tick.wrapping_add(1);
        let tick = self.tick;
        self.tasks
            .iter()
            .filter(|t| tick % t.period == 0)
            .map(|t| t.kind)
            .collect()
    }
}
