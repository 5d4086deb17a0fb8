//! Observer notifications for session, step and task transitions.
//!
//! A single callback receives every event as `(event_type, payload)`.
//! Delivery failures are logged and swallowed so an observer can never
//! abort an agent loop.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::warn;

use crate::models::iteration::Iteration;
use crate::models::session::SessionStatus;
use crate::models::step::Step;
use crate::models::task::TaskStatus;
use crate::{AppError, Result};

/// Events pushed to observers.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A session changed lifecycle status.
    StatusChanged {
        /// Session that changed.
        session_id: String,
        /// New status.
        status: SessionStatus,
    },
    /// A step was created.
    StepCreated {
        /// Snapshot after creation.
        step: Step,
    },
    /// A step changed status or received output.
    StepUpdated {
        /// Snapshot after the update.
        step: Step,
    },
    /// A session loop finished.
    Complete {
        /// Session that finished.
        session_id: String,
        /// Terminal status.
        status: SessionStatus,
        /// Completion summary.
        summary: Option<String>,
        /// Failure text.
        error_message: Option<String>,
    },
    /// A pool task changed lifecycle status.
    TaskStatusChanged {
        /// Task that changed.
        task_id: String,
        /// Owning pool.
        pool_id: String,
        /// New status.
        status: TaskStatus,
    },
    /// A background iteration was recorded.
    IterationRecorded {
        /// The appended record.
        iteration: Iteration,
    },
}

impl AgentEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "status_changed",
            Self::StepCreated { .. } => "step_created",
            Self::StepUpdated { .. } => "step_updated",
            Self::Complete { .. } => "complete",
            Self::TaskStatusChanged { .. } => "task_status_changed",
            Self::IterationRecorded { .. } => "iteration_recorded",
        }
    }

    /// JSON payload of the event.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::StatusChanged { session_id, status } => {
                json!({ "session_id": session_id, "status": status })
            }
            Self::StepCreated { step } | Self::StepUpdated { step } => {
                json!({ "session_id": step.session_id, "step": step })
            }
            Self::Complete {
                session_id,
                status,
                summary,
                error_message,
            } => json!({
                "session_id": session_id,
                "status": status,
                "summary": summary,
                "error_message": error_message,
            }),
            Self::TaskStatusChanged {
                task_id,
                pool_id,
                status,
            } => json!({ "task_id": task_id, "pool_id": pool_id, "status": status }),
            Self::IterationRecorded { iteration } => json!({ "iteration": iteration }),
        }
    }
}

/// Callback signature: `(event_type, payload)`.
pub type NotifyFn = dyn Fn(&str, Value) -> Result<()> + Send + Sync;

#[derive(Clone)]
enum Sink {
    Callback(Arc<NotifyFn>),
    Channel(mpsc::Sender<AgentEvent>),
}

/// Cloneable handle to the registered event sink.
#[derive(Clone, Default)]
pub struct Notifier {
    sink: Option<Sink>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("registered", &self.sink.is_some())
            .finish()
    }
}

impl Notifier {
    /// Notifier that drops every event.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Register `callback` as the single event sink.
    #[must_use]
    pub fn from_fn<F>(callback: F) -> Self
    where
        F: Fn(&str, Value) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            sink: Some(Sink::Callback(Arc::new(callback))),
        }
    }

    /// Notifier that forwards typed events into a bounded channel.
    ///
    /// A full or closed channel counts as a delivery failure.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                sink: Some(Sink::Channel(tx)),
            },
            rx,
        )
    }

    /// Deliver an event. Failures are logged, never returned.
    pub fn emit(&self, event: &AgentEvent) {
        let delivered = match self.sink {
            None => return,
            Some(Sink::Callback(ref callback)) => callback(event.event_type(), event.payload()),
            Some(Sink::Channel(ref tx)) => tx
                .try_send(event.clone())
                .map_err(|err| AppError::Io(format!("event channel: {err}"))),
        };
        if let Err(err) = delivered {
            warn!(%err, event_type = event.event_type(), "notify callback failed");
        }
    }
}
