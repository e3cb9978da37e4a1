//! Queue element for asynchronous buffering.
//!
//! Provides a buffer queue between pipeline elements, enabling:
//! - Decoupling of producer and consumer rates
//! - Backpressure handling
//! - Thread boundary crossing: downstream runs on the queue's own task

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{Element, ElementImpl, Pad, PadMode, PadTemplate};
use crate::elements::property_usize;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::flow::{FlowError, FlowResult, FlowSuccess};
use crate::observability::record_queue_level;
use crate::pipeline::parser::PropertyValue;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, trace};

/// Leaky mode determines what happens when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeakyMode {
    /// Block until space is available (default).
    #[default]
    None,
    /// Drop new buffers when full (upstream leaky).
    Upstream,
    /// Drop old buffers when full (downstream leaky).
    Downstream,
}

impl FromStr for LeakyMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "no" | "none" | "0" => Ok(LeakyMode::None),
            "upstream" | "1" => Ok(LeakyMode::Upstream),
            "downstream" | "2" => Ok(LeakyMode::Downstream),
            other => Err(format!("unknown leaky mode {other}")),
        }
    }
}

/// Statistics about queue operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    /// Current number of buffers in the queue.
    pub current_buffers: usize,
    /// Current total bytes in the queue.
    pub current_bytes: usize,
    /// Total buffers pushed to the queue.
    pub total_pushed: u64,
    /// Total buffers popped from the queue.
    pub total_popped: u64,
    /// Total buffers dropped (due to leaky mode).
    pub total_dropped: u64,
}

enum Item {
    Buffer(Buffer),
    Event(Event),
}

struct QueueState {
    items: VecDeque<Item>,
    max_buffers: usize,
    max_bytes: Option<usize>,
    leaky: LeakyMode,
    stats: QueueStats,
    flushing: bool,
    /// Result of the last push downstream, returned to upstream.
    last_flow: FlowResult,
}

impl QueueState {
    fn is_full(&self) -> bool {
        self.stats.current_buffers >= self.max_buffers
            || self.max_bytes.is_some_and(|max| self.stats.current_bytes >= max)
    }

    fn drop_oldest_buffer(&mut self) {
        let Some(index) = self.items.iter().position(|i| matches!(i, Item::Buffer(_))) else {
            return;
        };
        if let Some(Item::Buffer(old)) = self.items.remove(index) {
            self.stats.current_buffers -= 1;
            self.stats.current_bytes = self.stats.current_bytes.saturating_sub(old.size());
            self.stats.total_dropped += 1;
        }
    }

    fn clear(&mut self) {
        self.items.clear();
        self.stats.current_buffers = 0;
        self.stats.current_bytes = 0;
    }
}

struct QueueInner {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
}

/// A queue element that buffers data between pipeline stages.
///
/// Buffers and serialized events arriving on the sink pad are stored and
/// pushed out of the src pad by a task, so upstream and downstream run on
/// different threads. When the queue is full upstream blocks, unless the
/// queue is leaky.
///
/// Properties: `max-size-buffers` (default 200), `max-size-bytes`
/// (0 for unlimited), `leaky` (`no`, `upstream`, `downstream`).
///
/// # Example
///
/// ```rust
/// use padflow::element::Element;
/// use padflow::elements::{LeakyMode, Queue};
///
/// let queue = Element::new(
///     "queue",
///     Queue::default().with_max_buffers(16).with_leaky(LeakyMode::Downstream),
/// );
/// assert_eq!(queue.imp::<Queue>().unwrap().len(), 0);
/// ```
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Default for Queue {
    fn default() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    max_buffers: 200,
                    max_bytes: None,
                    leaky: LeakyMode::None,
                    stats: QueueStats::default(),
                    flushing: true,
                    last_flow: Ok(FlowSuccess::Ok),
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
            }),
        }
    }
}

impl Queue {
    /// Set the maximum buffer count.
    pub fn with_max_buffers(self, max_buffers: usize) -> Self {
        self.inner.state.lock().max_buffers = max_buffers.max(1);
        self
    }

    /// Set a byte limit.
    pub fn with_max_bytes(self, max_bytes: usize) -> Self {
        self.inner.state.lock().max_bytes = Some(max_bytes);
        self
    }

    /// Set the leaky mode.
    pub fn with_leaky(self, mode: LeakyMode) -> Self {
        self.inner.state.lock().leaky = mode;
        self
    }

    /// Get the current number of buffers in the queue.
    pub fn len(&self) -> usize {
        self.inner.state.lock().stats.current_buffers
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the current byte count in the queue.
    pub fn current_bytes(&self) -> usize {
        self.inner.state.lock().stats.current_bytes
    }

    /// Get statistics about the queue.
    pub fn stats(&self) -> QueueStats {
        self.inner.state.lock().stats
    }
}

impl QueueInner {
    fn set_flushing(&self, flushing: bool) {
        let mut state = self.state.lock();
        state.flushing = flushing;
        if flushing {
            self.not_empty.notify_all();
            self.not_full.notify_all();
        } else {
            state.last_flow = Ok(FlowSuccess::Ok);
        }
    }

    fn chain(&self, pad: &Pad, parent: Option<&Element>, buffer: Buffer) -> FlowResult {
        let mut state = self.state.lock();
        loop {
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            state.last_flow?;
            if !state.is_full() {
                break;
            }
            match state.leaky {
                LeakyMode::None => {
                    trace!(pad = %pad.debug_name(), "queue full, waiting");
                    self.not_full.wait(&mut state);
                }
                LeakyMode::Upstream => {
                    state.stats.total_dropped += 1;
                    trace!(pad = %pad.debug_name(), "queue full, dropping incoming buffer");
                    return Ok(FlowSuccess::Ok);
                }
                LeakyMode::Downstream => {
                    state.drop_oldest_buffer();
                    trace!(pad = %pad.debug_name(), "queue full, dropped oldest buffer");
                    break;
                }
            }
        }

        state.stats.current_buffers += 1;
        state.stats.current_bytes += buffer.size();
        state.stats.total_pushed += 1;
        state.items.push_back(Item::Buffer(buffer));
        self.report_level(parent, &state);
        self.not_empty.notify_one();
        Ok(FlowSuccess::Ok)
    }

    fn sink_event(self: &Arc<Self>, pad: &Pad, parent: Option<&Element>, event: Event) -> bool {
        let src = parent.and_then(|p| p.static_pad("src"));
        match event {
            Event::FlushStart => {
                self.set_flushing(true);
                let forwarded = Pad::event_default(pad, parent, Event::FlushStart);
                if let Some(src) = &src {
                    src.pause_task();
                }
                forwarded
            }
            Event::FlushStop { .. } => {
                let forwarded = Pad::event_default(pad, parent, event);
                {
                    let mut state = self.state.lock();
                    state.clear();
                }
                self.set_flushing(false);
                if let Some(src) = &src
                    && src.mode() == PadMode::Push
                {
                    self.start(src);
                }
                forwarded
            }
            event if event.is_serialized() => {
                let mut state = self.state.lock();
                if state.flushing {
                    return false;
                }
                if matches!(event, Event::Eos) && state.last_flow.is_err() {
                    // Downstream already failed; nothing will drain the queue.
                    drop(state);
                    return Pad::event_default(pad, parent, event);
                }
                state.items.push_back(Item::Event(event));
                self.not_empty.notify_one();
                true
            }
            event => Pad::event_default(pad, parent, event),
        }
    }

    fn start(self: &Arc<Self>, src: &Pad) -> bool {
        let inner = self.clone();
        let weak = src.downgrade();
        src.start_task(move || {
            if let Some(src) = weak.upgrade() {
                inner.push_one(&src);
            }
        })
    }

    /// One iteration of the src task: wait for an item and push it.
    fn push_one(&self, src: &Pad) {
        let parent = src.parent();
        let item = {
            let mut state = self.state.lock();
            while state.items.is_empty() && !state.flushing {
                self.not_empty.wait(&mut state);
            }
            if state.flushing {
                drop(state);
                src.pause_task();
                return;
            }
            let item = state.items.pop_front();
            if let Some(Item::Buffer(buffer)) = &item {
                state.stats.current_buffers -= 1;
                state.stats.current_bytes = state.stats.current_bytes.saturating_sub(buffer.size());
                state.stats.total_popped += 1;
                self.report_level(parent.as_ref(), &state);
            }
            self.not_full.notify_one();
            item
        };

        let result = match item {
            Some(Item::Buffer(buffer)) => src.push(buffer),
            Some(Item::Event(Event::Eos)) => {
                src.push_event(Event::Eos);
                Err(FlowError::Eos)
            }
            Some(Item::Event(event)) => {
                let name = event.name().to_string();
                if !src.push_event(event) {
                    debug!(pad = %src.debug_name(), event = %name, "event not handled downstream");
                }
                Ok(FlowSuccess::Ok)
            }
            None => Ok(FlowSuccess::Ok),
        };

        if let Err(flow) = result {
            {
                let mut state = self.state.lock();
                state.last_flow = Err(flow);
                self.not_full.notify_all();
            }
            debug!(pad = %src.debug_name(), %flow, "pausing queue task");
            src.pause_task();
            if flow.is_fatal()
                && let Some(parent) = &parent
            {
                parent.post_error(
                    "stream",
                    "internal data stream error",
                    Some(format!("streaming stopped, reason {}", flow.name())),
                );
                src.push_event(Event::Eos);
            }
        }
    }

    fn report_level(&self, parent: Option<&Element>, state: &MutexGuard<'_, QueueState>) {
        if let Some(parent) = parent {
            record_queue_level(parent.name(), state.stats.current_buffers);
        }
    }
}

impl ElementImpl for Queue {
    fn constructed(&self, element: &Element) {
        let sink = Pad::from_template(&PadTemplate::sink("sink", Caps::new_any()), "sink");
        let src = Pad::from_template(&PadTemplate::src("src", Caps::new_any()), "src");
        sink.set_proxy_caps(true);
        src.set_proxy_caps(true);

        let inner = self.inner.clone();
        sink.set_chain_function(move |pad, parent, buffer| inner.chain(pad, parent, buffer));
        let inner = self.inner.clone();
        sink.set_event_function(move |pad, parent, event| inner.sink_event(pad, parent, event));
        let inner = self.inner.clone();
        sink.set_activatemode_function(move |_pad, _parent, _mode, active| {
            inner.set_flushing(!active);
            true
        });

        let inner = self.inner.clone();
        src.set_activatemode_function(move |pad, _parent, mode, active| match (mode, active) {
            (PadMode::Push, true) => {
                inner.set_flushing(false);
                inner.start(pad)
            }
            (PadMode::Push, false) => {
                inner.set_flushing(true);
                pad.stop_task()
            }
            _ => false,
        });

        for pad in [sink, src] {
            if let Err(e) = element.add_pad(&pad) {
                debug!(element = %element.name(), error = %e, "cannot add pad");
            }
        }
    }

    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![
            PadTemplate::sink("sink", Caps::new_any()),
            PadTemplate::src("src", Caps::new_any()),
        ]
    }

    fn set_property(&self, element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        match name {
            "max-size-buffers" => {
                let max = property_usize(element, name, value)?;
                self.inner.state.lock().max_buffers = max.max(1);
            }
            "max-size-bytes" => {
                let max = property_usize(element, name, value)?;
                self.inner.state.lock().max_bytes = (max > 0).then_some(max);
            }
            "leaky" => {
                let mode = value
                    .as_string()
                    .parse()
                    .map_err(|e: String| Error::invalid_property(element.name(), name, e))?;
                self.inner.state.lock().leaky = mode;
            }
            _ => return Err(Error::invalid_property(element.name(), name, "no such property")),
        }
        self.inner.not_full.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{PadDirection, State};
    use std::time::{Duration, Instant};

    fn buffer(n: u8) -> Buffer {
        Buffer::from_vec(vec![n; 10])
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Queue wired between two free pads; the downstream pad blocks until `gate` opens.
    fn harness(queue: Queue) -> (Element, Pad, Arc<Mutex<Vec<u8>>>, Arc<Mutex<bool>>) {
        let element = Element::new("queue", queue);
        let upstream = Pad::new("up", PadDirection::Src);
        let downstream = Pad::new("down", PadDirection::Sink);
        let received = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(Mutex::new(true));
        let (store, open) = (received.clone(), gate.clone());
        downstream.set_chain_function(move |pad, _, buffer| {
            while !*open.lock() {
                if pad.is_flushing() {
                    return Err(FlowError::Flushing);
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            store.lock().push(buffer.data()[0]);
            Ok(FlowSuccess::Ok)
        });
        downstream.set_active(true);
        upstream.set_active(true);
        upstream.link(&element.static_pad("sink").unwrap()).unwrap();
        element.static_pad("src").unwrap().link(&downstream).unwrap();
        element.set_state(State::Paused).unwrap();
        (element, upstream, received, gate)
    }

    #[test]
    fn test_queue_passes_buffers_in_order() {
        let (element, upstream, received, _gate) = harness(Queue::default());
        for n in 0..20 {
            upstream.push(buffer(n)).unwrap();
        }
        wait_for(|| received.lock().len() == 20);
        assert_eq!(*received.lock(), (0..20).collect::<Vec<u8>>());
        let stats = element.imp::<Queue>().unwrap().stats();
        assert_eq!(stats.total_pushed, 20);
        assert_eq!(stats.total_popped, 20);
        element.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_queue_leaky_upstream() {
        let (element, upstream, received, gate) =
            harness(Queue::default().with_max_buffers(2).with_leaky(LeakyMode::Upstream));
        *gate.lock() = false;
        upstream.push(buffer(0)).unwrap();
        // The task holds buffer 0 at the closed gate.
        wait_for(|| element.imp::<Queue>().unwrap().is_empty());
        for n in 1..6 {
            upstream.push(buffer(n)).unwrap();
        }
        let queue = element.imp::<Queue>().unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.stats().total_dropped, 3);
        *gate.lock() = true;
        wait_for(|| received.lock().len() == 3);
        assert_eq!(*received.lock(), vec![0, 1, 2]);
        element.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_queue_leaky_downstream() {
        let (element, upstream, received, gate) =
            harness(Queue::default().with_max_buffers(2).with_leaky(LeakyMode::Downstream));
        *gate.lock() = false;
        upstream.push(buffer(0)).unwrap();
        wait_for(|| element.imp::<Queue>().unwrap().is_empty());
        for n in 1..6 {
            upstream.push(buffer(n)).unwrap();
        }
        assert_eq!(element.imp::<Queue>().unwrap().stats().total_dropped, 3);
        *gate.lock() = true;
        wait_for(|| received.lock().len() == 3);
        assert_eq!(*received.lock(), vec![0, 4, 5]);
        element.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_queue_flush_empties() {
        let (element, upstream, received, gate) = harness(Queue::default());
        *gate.lock() = false;
        for n in 0..5 {
            upstream.push(buffer(n)).unwrap();
        }
        assert!(upstream.push_event(Event::FlushStart));
        assert_eq!(upstream.push(buffer(9)), Err(FlowError::Flushing));
        *gate.lock() = true;
        assert!(upstream.push_event(Event::flush_stop()));
        assert!(element.imp::<Queue>().unwrap().is_empty());
        upstream.push(buffer(7)).unwrap();
        wait_for(|| received.lock().last() == Some(&7));
        assert!(received.lock().len() <= 2);
        element.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_downstream_error_reaches_upstream() {
        let element = Element::new("queue", Queue::default());
        let upstream = Pad::new("up", PadDirection::Src);
        upstream.set_active(true);
        upstream.link(&element.static_pad("sink").unwrap()).unwrap();
        element.set_state(State::Paused).unwrap();
        upstream.push(buffer(0)).unwrap();
        wait_for(|| upstream.push(buffer(1)) == Err(FlowError::NotLinked));
        element.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_properties() {
        let element = Element::new("queue", Queue::default());
        element.set_property("max-size-buffers", 5i64).unwrap();
        element.set_property("max-size-bytes", 4096i64).unwrap();
        element.set_property("leaky", "downstream").unwrap();
        assert!(element.set_property("leaky", "sideways").is_err());
        assert!(matches!(
            element.set_property("max-size-bytes", -1i64),
            Err(Error::InvalidProperty { .. })
        ));
        let state = element.imp::<Queue>().unwrap().inner.state.lock();
        assert_eq!(state.max_buffers, 5);
        assert_eq!(state.max_bytes, Some(4096));
        assert_eq!(state.leaky, LeakyMode::Downstream);
    }
}
