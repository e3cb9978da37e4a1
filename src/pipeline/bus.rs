//! The bus: asynchronous messages from elements to the application.
//!
//! Streaming threads never call into application code to report what
//! happened. They post a [`Message`]; the application pops messages from the
//! pipeline's [`Bus`] on its own thread.

use crate::caps::Structure;
use crate::element::State;
use crate::observability::record_bus_message;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

/// What a message reports.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    /// Every sink reached end of stream.
    Eos,
    /// A fatal error. Streaming has stopped.
    Error {
        /// Area of the error, e.g. "stream" or "resource".
        domain: String,
        /// Human-readable description.
        text: String,
        /// Details for developers.
        debug: Option<String>,
    },
    /// A non-fatal problem.
    Warning {
        /// Human-readable description.
        text: String,
        /// Details for developers.
        debug: Option<String>,
    },
    /// An element committed a state.
    StateChanged {
        /// State before the step.
        old: State,
        /// State after the step.
        new: State,
        /// Final state still to reach, if any.
        pending: Option<State>,
    },
    /// An element lost its state and started an async change.
    AsyncStart,
    /// An async state change completed.
    AsyncDone,
    /// A pad was added to an element.
    PadAdded {
        /// Pad name.
        pad: String,
    },
    /// A pad was removed from an element.
    PadRemoved {
        /// Pad name.
        pad: String,
    },
    /// A new stream started on a sink.
    StreamStart,
    /// Element-specific message.
    Element(Structure),
}

impl MessageKind {
    /// Lowercase name used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::Eos => "eos",
            MessageKind::Error { .. } => "error",
            MessageKind::Warning { .. } => "warning",
            MessageKind::StateChanged { .. } => "state-changed",
            MessageKind::AsyncStart => "async-start",
            MessageKind::AsyncDone => "async-done",
            MessageKind::PadAdded { .. } => "pad-added",
            MessageKind::PadRemoved { .. } => "pad-removed",
            MessageKind::StreamStart => "stream-start",
            MessageKind::Element(_) => "element",
        }
    }
}

/// A message posted by an element.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Name of the posting element.
    pub source: String,
    /// Payload.
    pub kind: MessageKind,
}

impl Message {
    /// Create a message from `source`.
    pub fn new(source: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            source: source.into(),
            kind,
        }
    }

    /// Error message.
    pub fn error(
        source: impl Into<String>,
        domain: impl Into<String>,
        text: impl Into<String>,
        debug: Option<String>,
    ) -> Self {
        Self::new(
            source,
            MessageKind::Error {
                domain: domain.into(),
                text: text.into(),
                debug,
            },
        )
    }

    /// Whether this is an EOS or error message.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, MessageKind::Eos | MessageKind::Error { .. })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            MessageKind::Error { domain, text, .. } => {
                write!(f, "{}: error ({}): {}", self.source, domain, text)
            }
            MessageKind::Warning { text, .. } => write!(f, "{}: warning: {}", self.source, text),
            MessageKind::StateChanged { old, new, pending } => match pending {
                Some(pending) => write!(
                    f,
                    "{}: state changed {} -> {} (pending {})",
                    self.source, old, new, pending
                ),
                None => write!(f, "{}: state changed {} -> {}", self.source, old, new),
            },
            kind => write!(f, "{}: {}", self.source, kind.name()),
        }
    }
}

struct BusInner {
    sender: kanal::Sender<Message>,
    receiver: kanal::Receiver<Message>,
    flushing: AtomicBool,
}

/// Multi-producer message queue read by the application.
///
/// Clones share the same queue.
#[derive(Clone)]
pub struct Bus(Arc<BusInner>);

impl Bus {
    /// Create an empty bus.
    pub fn new() -> Self {
        let (sender, receiver) = kanal::unbounded();
        Bus(Arc::new(BusInner {
            sender,
            receiver,
            flushing: AtomicBool::new(false),
        }))
    }

    /// Queue a message. Returns false while the bus is flushing.
    pub fn post(&self, message: Message) -> bool {
        if self.0.flushing.load(Ordering::Acquire) {
            trace!(source = %message.source, kind = message.kind.name(), "bus flushing, message dropped");
            return false;
        }
        record_bus_message(message.kind.name());
        trace!(source = %message.source, kind = message.kind.name(), "posted");
        self.0.sender.send(message).is_ok()
    }

    /// Take the next message without waiting.
    pub fn pop(&self) -> Option<Message> {
        self.0.receiver.try_recv().ok().flatten()
    }

    /// Wait up to `timeout` for a message; `None` waits forever.
    pub fn timed_pop(&self, timeout: Option<Duration>) -> Option<Message> {
        match timeout {
            Some(timeout) => self.0.receiver.recv_timeout(timeout).ok(),
            None => self.0.receiver.recv().ok(),
        }
    }

    /// Wait up to `timeout` for a message accepted by `filter`, dropping the others.
    pub fn timed_pop_filtered(
        &self,
        timeout: Option<Duration>,
        filter: impl Fn(&MessageKind) -> bool,
    ) -> Option<Message> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let remaining = match deadline {
                Some(deadline) => Some(deadline.checked_duration_since(Instant::now())?),
                None => None,
            };
            let message = self.timed_pop(remaining)?;
            if filter(&message.kind) {
                return Some(message);
            }
        }
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.0.receiver.len()
    }

    /// Whether no message is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// While flushing, queued messages are dropped and new ones refused.
    pub fn set_flushing(&self, flushing: bool) {
        self.0.flushing.store(flushing, Ordering::Release);
        if flushing {
            while self.pop().is_some() {}
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("queued", &self.len())
            .field("flushing", &self.0.flushing.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_and_pop() {
        let bus = Bus::new();
        assert!(bus.pop().is_none());
        assert!(bus.post(Message::new("src", MessageKind::Eos)));
        assert_eq!(bus.len(), 1);
        let msg = bus.pop().unwrap();
        assert_eq!(msg.source, "src");
        assert!(msg.is_terminal());
        assert!(bus.is_empty());
    }

    #[test]
    fn test_flushing_drops_messages() {
        let bus = Bus::new();
        bus.post(Message::new("a", MessageKind::AsyncDone));
        bus.set_flushing(true);
        assert!(bus.is_empty());
        assert!(!bus.post(Message::new("a", MessageKind::Eos)));
        bus.set_flushing(false);
        assert!(bus.post(Message::new("a", MessageKind::Eos)));
    }

    #[test]
    fn test_timed_pop_filtered() {
        let bus = Bus::new();
        let poster = bus.clone();
        let handle = std::thread::spawn(move || {
            poster.post(Message::new("sink", MessageKind::AsyncDone));
            poster.post(Message::error("sink", "stream", "broken", None));
        });
        let msg = bus
            .timed_pop_filtered(Some(Duration::from_secs(5)), |k| {
                matches!(k, MessageKind::Error { .. })
            })
            .unwrap();
        assert_eq!(msg.kind.name(), "error");
        handle.join().unwrap();
    }

    #[test]
    fn test_timed_pop_timeout() {
        let bus = Bus::new();
        assert!(bus.timed_pop(Some(Duration::from_millis(10))).is_none());
    }

    #[test]
    fn test_message_display() {
        let msg = Message::new(
            "pipeline0",
            MessageKind::StateChanged {
                old: State::Ready,
                new: State::Paused,
                pending: Some(State::Playing),
            },
        );
        assert_eq!(
            msg.to_string(),
            "pipeline0: state changed READY -> PAUSED (pending PLAYING)"
        );
        assert_eq!(
            Message::error("src", "resource", "gone", None).to_string(),
            "src: error (resource): gone"
        );
    }
}
