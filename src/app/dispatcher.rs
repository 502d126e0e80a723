//! Background task dispatch.
//!
//! Every front-end action becomes a task: a closure run on its own worker thread under the
//! [`TaskScheduler`] limits. The caller never blocks; it receives [`TaskEvent`]s on a channel
//! and drains them on its own thread. Each task produces exactly one `Finished` event, whether
//! the work returns, fails, panics, or is cancelled before it gets to run. Progress events are
//! best effort.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info};

use crate::app::error::AppError;
use crate::app::scheduler::TaskScheduler;

pub type TaskResult = Result<String, AppError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum TaskEventKind {
    Started,
    Progress(String),
    Finished(TaskOutcome),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Ok(String),
    Err(AppError),
}

impl From<TaskResult> for TaskOutcome {
    fn from(result: TaskResult) -> Self {
        match result {
            Ok(text) => TaskOutcome::Ok(text),
            Err(err) => TaskOutcome::Err(err),
        }
    }
}

impl TaskOutcome {
    /// Text shown to the user for this outcome.
    pub fn display_text(&self) -> String {
        match self {
            TaskOutcome::Ok(text) => text.clone(),
            TaskOutcome::Err(err) => err.user_message(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskEvent {
    pub task_id: u64,
    pub trace_id: String,
    pub label: String,
    pub serial: Option<String>,
    pub kind: TaskEventKind,
}

impl TaskEvent {
    pub fn is_finished(&self) -> bool {
        matches!(self.kind, TaskEventKind::Finished(_))
    }
}

/// Handed to the work closure.
pub struct TaskContext {
    task_id: u64,
    trace_id: String,
    label: String,
    serial: Option<String>,
    cancel: Arc<AtomicBool>,
    events: Sender<TaskEvent>,
}

impl TaskContext {
    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    pub fn progress(&self, message: impl Into<String>) {
        let _ = self.events.send(self.event(TaskEventKind::Progress(message.into())));
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn check_cancelled(&self) -> Result<(), AppError> {
        if self.is_cancelled() {
            Err(AppError::cancelled(&self.trace_id))
        } else {
            Ok(())
        }
    }

    /// Shared flag for loops that outlive a single call, such as streaming readers.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn event(&self, kind: TaskEventKind) -> TaskEvent {
        TaskEvent {
            task_id: self.task_id,
            trace_id: self.trace_id.clone(),
            label: self.label.clone(),
            serial: self.serial.clone(),
            kind,
        }
    }
}

pub struct TaskHandle {
    pub id: u64,
    pub trace_id: String,
    cancel: Arc<AtomicBool>,
    join: JoinHandle<TaskResult>,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Flag behind [`TaskHandle::cancel`], for cancelling from another thread or a signal handler.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn wait(self) -> TaskResult {
        let trace_id = self.trace_id;
        self.join
            .join()
            .unwrap_or_else(|payload| Err(panic_error(payload.as_ref(), &trace_id)))
    }
}

fn panic_error(payload: &(dyn Any + Send), trace_id: &str) -> AppError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|value| value.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    AppError::system(format!("Worker panicked: {message}"), trace_id)
}

#[derive(Clone)]
pub struct Dispatcher {
    scheduler: Arc<TaskScheduler>,
    events: Sender<TaskEvent>,
    next_id: Arc<AtomicU64>,
}

impl Dispatcher {
    pub fn new(global_limit: usize) -> (Self, Receiver<TaskEvent>) {
        let (events, receiver) = mpsc::channel();
        (
            Self {
                scheduler: Arc::new(TaskScheduler::new(global_limit)),
                events,
                next_id: Arc::new(AtomicU64::new(1)),
            },
            receiver,
        )
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn spawn<F>(&self, label: &str, serial: Option<String>, work: F) -> TaskHandle
    where
        F: FnOnce(&TaskContext) -> TaskResult + Send + 'static,
    {
        self.spawn_traced(label, serial, None, work)
    }

    pub fn spawn_traced<F>(
        &self,
        label: &str,
        serial: Option<String>,
        trace_id: Option<String>,
        work: F,
    ) -> TaskHandle
    where
        F: FnOnce(&TaskContext) -> TaskResult + Send + 'static,
    {
        let task_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let trace_id = crate::app::commands::resolve_trace_id(trace_id);
        let cancel = Arc::new(AtomicBool::new(false));
        let context = TaskContext {
            task_id,
            trace_id: trace_id.clone(),
            label: label.to_string(),
            serial: serial.filter(|value| !value.trim().is_empty()),
            cancel: Arc::clone(&cancel),
            events: self.events.clone(),
        };
        let scheduler = Arc::clone(&self.scheduler);

        let join = thread::spawn(move || {
            let started = Instant::now();
            let result = scheduler.run_exclusive(context.serial(), || {
                context.check_cancelled()?;
                let _ = context.events.send(context.event(TaskEventKind::Started));
                debug!(trace_id = %context.trace_id, task = %context.label, "task started");
                panic::catch_unwind(AssertUnwindSafe(|| work(&context)))
                    .unwrap_or_else(|payload| Err(panic_error(payload.as_ref(), &context.trace_id)))
            });
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(_) => info!(
                    trace_id = %context.trace_id,
                    task = %context.label,
                    serial = context.serial().unwrap_or("-"),
                    elapsed_ms,
                    "task finished"
                ),
                Err(err) => error!(
                    trace_id = %context.trace_id,
                    task = %context.label,
                    serial = context.serial().unwrap_or("-"),
                    error = %err,
                    elapsed_ms,
                    "task failed"
                ),
            }
            let _ = context
                .events
                .send(context.event(TaskEventKind::Finished(result.clone().into())));
            result
        });

        TaskHandle {
            id: task_id,
            trace_id,
            cancel,
            join,
        }
    }
}

/// Handles every event already queued without blocking. Returns the number of `Finished` events.
pub fn drain<H>(receiver: &Receiver<TaskEvent>, mut handler: H) -> usize
where
    H: FnMut(TaskEvent),
{
    let mut finished = 0;
    for event in receiver.try_iter() {
        if event.is_finished() {
            finished += 1;
        }
        handler(event);
    }
    finished
}

/// Blocks until `expected` tasks have finished or `timeout` passes. Returns the number of
/// `Finished` events seen.
pub fn pump_until_idle<H>(
    receiver: &Receiver<TaskEvent>,
    expected: usize,
    timeout: Duration,
    mut handler: H,
) -> usize
where
    H: FnMut(TaskEvent),
{
    let deadline = Instant::now() + timeout;
    let mut finished = 0;
    while finished < expected {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match receiver.recv_timeout(remaining) {
            Ok(event) => {
                if event.is_finished() {
                    finished += 1;
                }
                handler(event);
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    finished
}
