//! Main-thread message bus.
//!
//! Any thread may send; delivery happens only when the main thread drains
//! the bus. Handlers are registered per message kind, so subsystems can
//! subscribe to the events they care about without seeing the rest.

use crossbeam_channel::{Receiver, Sender, unbounded};
use std::collections::HashMap;
use tracing::trace;

/// Control messages routed through the main thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// A hotword capture node fired.
    HotwordTriggered {
        /// Device name.
        device: String,
    },
    /// A device hit a fatal condition and should be suspended/torn down.
    SuspendDevice {
        /// Device name.
        device: String,
    },
    /// The graph description changed; rebuild every pipeline.
    ReloadPipelines,
    /// A timer created through the timer service expired.
    TimerFired {
        /// The timer's identifier.
        id: u64,
    },
}

/// Kind tag used for handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// [`ServerMessage::HotwordTriggered`]
    HotwordTriggered,
    /// [`ServerMessage::SuspendDevice`]
    SuspendDevice,
    /// [`ServerMessage::ReloadPipelines`]
    ReloadPipelines,
    /// [`ServerMessage::TimerFired`]
    TimerFired,
}

impl ServerMessage {
    /// The kind tag of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            ServerMessage::HotwordTriggered { .. } => MessageKind::HotwordTriggered,
            ServerMessage::SuspendDevice { .. } => MessageKind::SuspendDevice,
            ServerMessage::ReloadPipelines => MessageKind::ReloadPipelines,
            ServerMessage::TimerFired { .. } => MessageKind::TimerFired,
        }
    }
}

type Handler = Box<dyn FnMut(&ServerMessage)>;

/// The bus: a lock-free channel plus per-kind handlers.
///
/// Only the owner (the main thread) registers handlers and dispatches;
/// [`sender`](Self::sender) hands out cloneable endpoints for the other
/// threads.
pub struct MessageBus {
    tx: Sender<ServerMessage>,
    rx: Receiver<ServerMessage>,
    handlers: HashMap<MessageKind, Vec<Handler>>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            handlers: HashMap::new(),
        }
    }

    /// A cloneable sending endpoint usable from any thread.
    pub fn sender(&self) -> Sender<ServerMessage> {
        self.tx.clone()
    }

    /// Registers a handler for one message kind.
    pub fn add_handler(&mut self, kind: MessageKind, handler: impl FnMut(&ServerMessage) + 'static) {
        self.handlers.entry(kind).or_default().push(Box::new(handler));
    }

    /// Removes every handler for a kind.
    pub fn remove_handlers(&mut self, kind: MessageKind) {
        self.handlers.remove(&kind);
    }

    /// Drains pending messages, invoking matching handlers. Returns how
    /// many messages were dispatched. Main thread only.
    pub fn dispatch(&mut self) -> usize {
        let mut count = 0;
        while let Ok(message) = self.rx.try_recv() {
            trace!(?message, "dispatching");
            if let Some(handlers) = self.handlers.get_mut(&message.kind()) {
                for handler in handlers.iter_mut() {
                    handler(&message);
                }
            }
            count += 1;
        }
        count
    }
}
