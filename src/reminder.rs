//! Reminder-scheduler collaborator.
//!
//! Pickup/return reminder timers live outside the core. The core only promises
//! to call `schedule` after a successful order mutation and `cancel` after a
//! deletion. Re-scheduling replaces prior timers (cancel-then-schedule), cancel
//! is idempotent, and a scheduler failure never rolls back the booking that
//! triggered it.

use std::sync::Mutex;

pub trait ReminderScheduler: Send + Sync {
    fn schedule(&self, order_id: &str) -> anyhow::Result<()>;
    fn cancel(&self, order_id: &str) -> anyhow::Result<()>;
}

/// Scheduler that does nothing. The default for callers that run their own
/// timer service out of band.
#[derive(Debug, Default)]
pub struct NoopScheduler;

impl ReminderScheduler for NoopScheduler {
    fn schedule(&self, _order_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
    fn cancel(&self, _order_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderCall {
    Schedule(String),
    Cancel(String),
}

/// Records every call for inspection. Test double.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    calls: Mutex<Vec<ReminderCall>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ReminderCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn schedule_count(&self, order_id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, ReminderCall::Schedule(id) if id == order_id))
            .count()
    }

    pub fn cancel_count(&self, order_id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, ReminderCall::Cancel(id) if id == order_id))
            .count()
    }
}

impl ReminderScheduler for RecordingScheduler {
    fn schedule(&self, order_id: &str) -> anyhow::Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(ReminderCall::Schedule(order_id.to_string()));
        }
        Ok(())
    }

    fn cancel(&self, order_id: &str) -> anyhow::Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(ReminderCall::Cancel(order_id.to_string()));
        }
        Ok(())
    }
}
