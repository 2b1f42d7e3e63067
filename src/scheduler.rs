//! Periodic task scheduling for the dashboard timeline.
//!
//! The scheduler does not own a clock or spawn anything: the main loop asks
//! which tasks are [`due`](Scheduler::due) at `now` and runs them to
//! completion on the same timeline that handles feed events. A tick that
//! arrives late fires each overdue task once and realigns it to its cadence
//! rather than replaying every missed period.

use std::time::Duration;

/// A periodic dashboard action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Task {
    /// Re-evaluate liveness timeouts.
    Sweep,
    /// Recompute the aggregate.
    Recompute,
    /// Persist snapshots.
    Flush,
}

#[derive(Debug, Clone)]
struct Timer {
    task: Task,
    period_ms: u64,
    next_due: Option<u64>,
}

/// Cooperative timer set.
#[derive(Debug, Clone)]
pub struct Scheduler {
    timers: Vec<Timer>,
}

impl Scheduler {
    /// Create a stopped scheduler with the sweep and recompute timers.
    pub fn new(sweep_every: Duration, recompute_every: Duration) -> Self {
        let mut scheduler = Self { timers: Vec::new() };
        scheduler.add(Task::Sweep, sweep_every);
        scheduler.add(Task::Recompute, recompute_every);
        scheduler
    }

    /// Add the persistence flush timer.
    pub fn with_flush(mut self, flush_every: Duration) -> Self {
        self.add(Task::Flush, flush_every);
        self
    }

    fn add(&mut self, task: Task, period: Duration) {
        self.timers.retain(|t| t.task != task);
        self.timers.push(Timer {
            task,
            period_ms: (period.as_millis() as u64).max(1),
            next_due: None,
        });
    }

    /// Arm every timer; the first firing is one period after `now`.
    pub fn start(&mut self, now: u64) {
        for timer in &mut self.timers {
            timer.next_due = Some(now + timer.period_ms);
        }
    }

    /// Cancel every timer.
    pub fn stop(&mut self) {
        for timer in &mut self.timers {
            timer.next_due = None;
        }
    }

    pub fn is_running(&self) -> bool {
        self.timers.iter().any(|t| t.next_due.is_some())
    }

    /// Tasks due at `now`, in timer order. Each fires at most once per call.
    pub fn due(&mut self, now: u64) -> Vec<Task> {
        let mut tasks = Vec::new();
        for timer in &mut self.timers {
            let Some(next) = timer.next_due else {
                continue;
            };
            if next > now {
                continue;
            }
            // First deadline on the cadence strictly after `now`
            let missed = (now - next) / timer.period_ms;
            timer.next_due = Some(next + (missed + 1) * timer.period_ms);
            tasks.push(timer.task);
        }
        tasks
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.iter().filter_map(|t| t.next_due).min()
    }

    /// Period of a task, if it is scheduled.
    pub fn period(&self, task: Task) -> Option<Duration> {
        self.timers
            .iter()
            .find(|t| t.task == task)
            .map(|t| Duration::from_millis(t.period_ms))
    }
}
