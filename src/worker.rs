//! Worker lifecycle state machine and owner-side bookkeeping
//!
//! Every pipeline stage runs as a spawned tokio task and follows the same
//! lifecycle: NotStarted -> Starting -> Running -> Stopping -> Stopped. The
//! state is mirrored on both sides: the worker's loop drives the real
//! transitions and reports them as events; the owner tracks its own copy
//! from its start/stop calls and the events it drains each tick.
//!
//! A worker that fails setup reports `Warning` then `Stopped` and its task
//! returns. The owner treats an observed `Stopped` as the terminal state:
//! it joins the task, resets the stage's ring buffers, and rebuilds the
//! control channel before any restart.

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::control::{Command, ControlChannel, TaskEvent, WarningCode};
use crate::error::Result;

/// Worker run state, mirrored by owner and worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::NotStarted => write!(f, "not_started"),
            WorkerState::Starting => write!(f, "starting"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::Stopping => write!(f, "stopping"),
            WorkerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Owner-side view of a worker: lightweight state plus a sticky warning flag
///
/// Repeated warnings coalesce into the single flag rather than surfacing one
/// indicator per occurrence; the flag clears on the next `Running` report.
#[derive(Debug)]
pub struct WorkerMonitor {
    state: WorkerState,
    warning: Option<WarningCode>,
}

impl WorkerMonitor {
    pub fn new() -> Self {
        Self {
            state: WorkerState::NotStarted,
            warning: None,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Last unresolved warning, if any
    pub fn warning(&self) -> Option<WarningCode> {
        self.warning
    }

    /// Owner called start
    pub fn mark_starting(&mut self) {
        self.state = WorkerState::Starting;
        self.warning = None;
    }

    /// Owner requested a stop while the worker is live
    pub fn mark_stopping(&mut self) {
        if matches!(self.state, WorkerState::Starting | WorkerState::Running) {
            self.state = WorkerState::Stopping;
        }
    }

    /// Fold one observed event into the owner-side state
    ///
    /// Returns true when `Stopped` was observed, signalling that the owner
    /// must reclaim the task and buffers before reuse.
    pub fn observe(&mut self, event: TaskEvent) -> bool {
        match event {
            TaskEvent::Starting => self.state = WorkerState::Starting,
            TaskEvent::Started | TaskEvent::Running => {
                if event == TaskEvent::Running {
                    self.warning = None;
                }
                if !matches!(self.state, WorkerState::Stopping) {
                    self.state = WorkerState::Running;
                }
            }
            TaskEvent::Idle => {}
            TaskEvent::Stopping => self.state = WorkerState::Stopping,
            TaskEvent::Stopped => {
                self.state = WorkerState::Stopped;
                return true;
            }
            TaskEvent::Warning { code } => self.warning = Some(code),
        }
        false
    }
}

impl Default for WorkerMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner-side handle plumbing shared by every stage
///
/// Holds the control channel and task handle for the current worker
/// lifecycle, and performs reclamation when the worker reports `Stopped`.
pub(crate) struct WorkerHandle {
    control: Option<ControlChannel>,
    task: Option<JoinHandle<()>>,
    monitor: WorkerMonitor,
}

impl WorkerHandle {
    pub fn new() -> Self {
        Self {
            control: None,
            task: None,
            monitor: WorkerMonitor::new(),
        }
    }

    /// Whether a worker task is currently live
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Install a freshly spawned worker
    pub fn install(&mut self, control: ControlChannel, task: JoinHandle<()>) {
        self.control = Some(control);
        self.task = Some(task);
        self.monitor.mark_starting();
    }

    pub fn state(&self) -> WorkerState {
        self.monitor.state()
    }

    pub fn warning(&self) -> Option<WarningCode> {
        self.monitor.warning()
    }

    /// Deliver a command to the live worker
    pub async fn send_command(&self, command: Command) -> Result<()> {
        match &self.control {
            Some(control) => control.send_command(command).await,
            None => Err(crate::error::Error::InvalidState(
                "worker is not started".to_string(),
            )),
        }
    }

    /// Owner-initiated stop request bookkeeping
    pub fn mark_stopping(&mut self) {
        self.monitor.mark_stopping();
    }

    /// Drain pending events, fold them into the monitor, and reclaim the
    /// task when `Stopped` is observed
    ///
    /// Returns the drained events so supervising loops (the pipeline's watch
    /// step) can react to individual transitions.
    pub fn poll_events(&mut self) -> Vec<TaskEvent> {
        let events = match &mut self.control {
            Some(control) => control.drain_events(),
            None => Vec::new(),
        };

        for event in &events {
            if self.monitor.observe(*event) {
                debug!("Worker reported stopped; reclaiming task");
                if let Some(task) = self.task.take() {
                    // The task has already returned (or is about to); abort is
                    // a no-op on a finished task and bounds the reclaim.
                    task.abort();
                }
                self.control = None;
            }
        }

        events
    }
}
