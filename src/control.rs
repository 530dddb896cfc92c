//! Command and event plumbing between owners and workers
//!
//! Each worker gets a bounded command queue (owner -> worker) and a bounded
//! event queue (worker -> owner). Commands are delivered exactly once;
//! events are drained by the owner's per-tick poll.
//!
//! Emission policy: lifecycle events and warnings await queue space (the
//! owner is required to poll every tick), while per-iteration status events
//! (`Running`/`Idle`) are sent best-effort with `try_send` and dropped when
//! the queue is full; the next iteration's status supersedes them. This
//! keeps a stalled owner from wedging a worker mid-loop.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tracing::trace;

use crate::error::{Error, Result};

/// Default command/event queue capacity in messages
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10;

/// Command sent from an owner to a worker
///
/// Constructed by the caller, copied into the bounded command channel,
/// consumed exactly once by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    /// Begin (or re-begin) streaming; carries the URI for network readers
    Start { uri: Option<String> },

    /// Stop immediately, discarding buffered content
    Stop,

    /// Close upstream input, drain buffered content, then stop
    StopGracefully,

    /// Set the media ducking gain; `ratio` is clamped to [0.0, 1.0]
    Duck { ratio: f32 },

    /// Suspend draining of the media stream (announcement keeps flowing)
    PauseMedia,

    /// Resume draining of the media stream
    ResumeMedia,
}

/// Warning classification carried by `TaskEvent::Warning`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningCode {
    /// Scratch buffer could not be allocated at worker start
    NoMemory,

    /// The hardware sink accepted fewer bytes than submitted
    Timeout,

    /// Transient transport read failure
    Transport,
}

/// Event reported by a worker to its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TaskEvent {
    Starting,
    Started,
    Running,
    Idle,
    Stopping,
    Stopped,
    Warning { code: WarningCode },
}

/// Owner-held side of a worker's control channel
///
/// `send_command` awaits queue space (the owner is lightly loaded, so the
/// wait is bounded); `drain_events` empties the event queue without blocking
/// and is called once per scheduling tick.
pub struct ControlChannel {
    command_tx: mpsc::Sender<Command>,
    event_rx: mpsc::Receiver<TaskEvent>,
}

impl ControlChannel {
    /// Deliver a command, waiting for queue space if needed
    pub async fn send_command(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| Error::Channel("worker command queue is closed".to_string()))
    }

    /// Drain all pending events without blocking
    pub fn drain_events(&mut self) -> Vec<TaskEvent> {
        let mut events = Vec::new();
        loop {
            match self.event_rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        events
    }
}

/// Worker-held side of a control channel
pub struct WorkerLink {
    pub commands: CommandReceiver,
    pub events: EventSender,
}

/// Build the bounded command + event queue pair for one worker lifecycle
pub fn control_channel(capacity: usize) -> (ControlChannel, WorkerLink) {
    let (command_tx, command_rx) = mpsc::channel(capacity);
    let (event_tx, event_rx) = mpsc::channel(capacity);

    (
        ControlChannel { command_tx, event_rx },
        WorkerLink {
            commands: CommandReceiver { rx: command_rx },
            events: EventSender { tx: event_tx },
        },
    )
}

/// Worker-side command intake
pub struct CommandReceiver {
    rx: mpsc::Receiver<Command>,
}

impl CommandReceiver {
    /// Wait up to `window` for the next command
    ///
    /// Interleaved with transfer work each iteration so the worker stays
    /// responsive to stop requests without busy-spinning. If the owner has
    /// dropped its side, the window is still slept to keep the loop paced.
    pub async fn poll(&mut self, window: Duration) -> Option<Command> {
        match tokio::time::timeout(window, self.rx.recv()).await {
            Ok(Some(command)) => Some(command),
            Ok(None) => {
                // Owner gone; pace the loop instead of spinning on a closed
                // channel until the worker notices and stops.
                tokio::time::sleep(window).await;
                None
            }
            Err(_) => None,
        }
    }
}

/// Worker-side event emission
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<TaskEvent>,
}

impl EventSender {
    /// Emit a lifecycle event, awaiting queue space
    ///
    /// Used for `Starting`/`Started`/`Stopping`/`Stopped`, which the owner
    /// must observe. A closed channel (owner gone) is ignored.
    pub async fn lifecycle(&self, event: TaskEvent) {
        let _ = self.tx.send(event).await;
    }

    /// Emit a per-iteration status event, best-effort
    ///
    /// Dropped when the queue is full; the next iteration's status replaces
    /// it. Never used for warnings or lifecycle transitions.
    pub fn status(&self, event: TaskEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            trace!(?event, "event queue full, dropping status event");
        }
    }

    /// Emit a warning, awaiting queue space
    pub async fn warning(&self, code: WarningCode) {
        let _ = self.tx.send(TaskEvent::Warning { code }).await;
    }
}
