/// Outbound side of the message transport a task sends through.
///
/// The connection is shared, so every frame is addressed by task id. `false`
/// means the frame could not be handed to the peer; tasks treat that as a
/// hard failure.
pub trait Transport: Send + Sync {
    fn send(&self, task_id: &str, bytes: &[u8]) -> bool;
}

/// Lifecycle notifications delivered to a task's listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    /// Negotiation completed; chunks will flow next.
    Offered,
    /// Coverage advanced to the given whole percentage.
    Progress(u32),
    Finished,
    Errored,
    Interrupted,
}

impl TaskEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskEvent::Finished | TaskEvent::Errored | TaskEvent::Interrupted)
    }
}

/// Externally observable task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Active,
    Finished,
    Errored,
    Interrupted,
}

pub type EventListener = Box<dyn Fn(TaskEvent) + Send + Sync>;

/// Fans events out to the listener, guaranteeing at most one terminal event
/// over the task's lifetime no matter how many paths reach a terminal state.
pub(crate) struct EventSink {
    listener: Option<EventListener>,
    terminal_fired: bool,
}

impl EventSink {
    pub(crate) fn new(listener: Option<EventListener>) -> Self {
        Self { listener, terminal_fired: false }
    }

    pub(crate) fn emit(&mut self, event: TaskEvent) {
        if event.is_terminal() {
            if self.terminal_fired {
                return;
            }
            self.terminal_fired = true;
        }
        if let Some(listener) = &self.listener {
            listener(event);
        }
    }
}
