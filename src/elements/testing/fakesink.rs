//! Sink discarding everything it receives.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{
    Element, ElementImpl, Pad, PadTemplate, State, StateChange, StateChangeResult,
    StateChangeSuccess,
};
use crate::elements::property_bool;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::flow::{FlowResult, FlowSuccess};
use crate::pipeline::bus::{Message, MessageKind};
use crate::pipeline::parser::PropertyValue;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, trace};

/// Callback run on the streaming thread for every received buffer.
pub type BufferCallback = Arc<dyn Fn(&Buffer) + Send + Sync>;

#[derive(Default)]
struct Preroll {
    prerolled: bool,
    /// An async READY to PAUSED is waiting for the first buffer.
    waiting: bool,
}

struct Inner {
    preroll: Mutex<Preroll>,
    is_async: AtomicBool,
    count: AtomicU64,
    got_eos: AtomicBool,
    on_buffer: Mutex<Option<BufferCallback>>,
}

impl Inner {
    /// Mark the sink prerolled, finishing a waiting async state change.
    fn preroll(&self, element: Option<&Element>) {
        let waiting = {
            let mut preroll = self.preroll.lock();
            if preroll.prerolled {
                return;
            }
            preroll.prerolled = true;
            std::mem::take(&mut preroll.waiting)
        };
        if waiting && let Some(element) = element {
            debug!(element = %element.name(), "prerolled");
            element.complete_async();
        }
    }

    fn chain(&self, pad: &Pad, parent: Option<&Element>, buffer: Buffer) -> FlowResult {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(pad = %pad.debug_name(), n, pts = %buffer.pts(), size = buffer.size(), "received");
        let callback = self.on_buffer.lock().clone();
        if let Some(callback) = callback {
            callback(&buffer);
        }
        self.preroll(parent);
        Ok(FlowSuccess::Ok)
    }

    fn event(&self, pad: &Pad, parent: Option<&Element>, event: Event) -> bool {
        match event {
            Event::Eos => {
                debug!(pad = %pad.debug_name(), buffers = self.count.load(Ordering::Relaxed), "eos");
                self.got_eos.store(true, Ordering::Release);
                self.preroll(parent);
                if let Some(parent) = parent {
                    parent.post_message(Message::new(parent.name(), MessageKind::Eos));
                }
            }
            Event::FlushStop { .. } => {
                self.got_eos.store(false, Ordering::Release);
                let lost = {
                    let mut preroll = self.preroll.lock();
                    preroll.prerolled = false;
                    let lost = self.is_async.load(Ordering::Relaxed)
                        && parent.is_some_and(|p| p.current_state() >= State::Paused);
                    preroll.waiting = lost;
                    lost
                };
                if lost && let Some(parent) = parent {
                    parent.lost_state();
                }
            }
            _ => {}
        }
        true
    }
}

/// A sink that counts and drops buffers.
///
/// In async mode (the default) READY to PAUSED returns `Async` and the
/// state change completes once the first buffer or EOS arrived, the way a
/// real sink prerolls. An EOS event posts an `Eos` message.
///
/// Properties: `async`.
///
/// ```rust
/// use padflow::element::Element;
/// use padflow::elements::FakeSink;
///
/// let sink = Element::new("sink", FakeSink::default().with_async(false));
/// assert_eq!(sink.imp::<FakeSink>().unwrap().buffer_count(), 0);
/// ```
pub struct FakeSink {
    inner: Arc<Inner>,
}

impl Default for FakeSink {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                preroll: Mutex::new(Preroll::default()),
                is_async: AtomicBool::new(true),
                count: AtomicU64::new(0),
                got_eos: AtomicBool::new(false),
                on_buffer: Mutex::new(None),
            }),
        }
    }
}

impl FakeSink {
    /// Preroll asynchronously.
    pub fn with_async(self, is_async: bool) -> Self {
        self.inner.is_async.store(is_async, Ordering::Relaxed);
        self
    }

    /// Call `callback` for every buffer, on the streaming thread.
    pub fn on_buffer(self, callback: impl Fn(&Buffer) + Send + Sync + 'static) -> Self {
        *self.inner.on_buffer.lock() = Some(Arc::new(callback));
        self
    }

    /// Buffers received so far.
    pub fn buffer_count(&self) -> u64 {
        self.inner.count.load(Ordering::Relaxed)
    }

    /// Whether EOS arrived since the last flush.
    pub fn got_eos(&self) -> bool {
        self.inner.got_eos.load(Ordering::Acquire)
    }
}

impl ElementImpl for FakeSink {
    fn constructed(&self, element: &Element) {
        let pad = Pad::from_template(&PadTemplate::sink("sink", Caps::new_any()), "sink");
        let inner = self.inner.clone();
        pad.set_chain_function(move |pad, parent, buffer| inner.chain(pad, parent, buffer));
        let inner = self.inner.clone();
        pad.set_event_function(move |pad, parent, event| inner.event(pad, parent, event));
        if let Err(e) = element.add_pad(&pad) {
            debug!(element = %element.name(), error = %e, "cannot add pad");
        }
    }

    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::sink("sink", Caps::new_any())]
    }

    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
        if transition == StateChange::ReadyToPaused {
            *self.inner.preroll.lock() = Preroll::default();
            self.inner.got_eos.store(false, Ordering::Release);
        }
        let result = element.default_change_state(transition)?;
        match transition {
            StateChange::ReadyToPaused if self.inner.is_async.load(Ordering::Relaxed) => {
                let mut preroll = self.inner.preroll.lock();
                if preroll.prerolled {
                    return Ok(result);
                }
                preroll.waiting = true;
                debug!(element = %element.name(), "waiting for preroll");
                Ok(StateChangeSuccess::Async)
            }
            StateChange::PausedToReady => {
                *self.inner.preroll.lock() = Preroll::default();
                Ok(result)
            }
            _ => Ok(result),
        }
    }

    fn set_property(&self, element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        match name {
            "async" => {
                let is_async = property_bool(element, name, value)?;
                self.inner.is_async.store(is_async, Ordering::Relaxed);
                Ok(())
            }
            _ => Err(Error::invalid_property(element.name(), name, "no such property")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::PadDirection;
    use crate::pipeline::Bus;
    use std::time::Duration;

    fn linked(sink: &Element) -> Pad {
        let src = Pad::new("src", PadDirection::Src);
        src.set_active(true);
        src.link(&sink.static_pad("sink").unwrap()).unwrap();
        src
    }

    #[test]
    fn test_async_preroll_completes_on_first_buffer() {
        let sink = Element::new("sink", FakeSink::default());
        let src = linked(&sink);
        assert_eq!(sink.set_state(State::Paused), Ok(StateChangeSuccess::Async));
        assert_eq!(sink.current_state(), State::Ready);

        src.push(Buffer::from_vec(vec![1, 2, 3])).unwrap();
        let (result, current, pending) = sink.get_state(Some(Duration::from_secs(5)));
        assert_eq!(result, Ok(StateChangeSuccess::Success));
        assert_eq!(current, State::Paused);
        assert_eq!(pending, None);
        assert_eq!(sink.imp::<FakeSink>().unwrap().buffer_count(), 1);
        sink.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_sync_mode() {
        let sink = Element::new("sink", FakeSink::default());
        sink.set_property("async", false).unwrap();
        assert_eq!(sink.set_state(State::Playing), Ok(StateChangeSuccess::Success));
        sink.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_eos_posts_message_and_prerolls() {
        let bus = Bus::new();
        let sink = Element::new("sink", FakeSink::default());
        sink.set_bus(Some(bus.clone()));
        let src = linked(&sink);
        assert_eq!(sink.set_state(State::Paused), Ok(StateChangeSuccess::Async));
        assert!(src.push_event(Event::Eos));

        let msg = bus
            .timed_pop_filtered(Some(Duration::from_secs(5)), |k| matches!(k, MessageKind::Eos))
            .unwrap();
        assert_eq!(msg.source, "sink");
        let (result, current, _) = sink.get_state(Some(Duration::from_secs(5)));
        assert_eq!(result, Ok(StateChangeSuccess::Success));
        assert_eq!(current, State::Paused);
        assert!(sink.imp::<FakeSink>().unwrap().got_eos());
        sink.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_flush_loses_preroll() {
        let sink = Element::new("sink", FakeSink::default());
        let src = linked(&sink);
        sink.set_state(State::Paused).unwrap();
        src.push(Buffer::from_vec(vec![0])).unwrap();
        sink.get_state(Some(Duration::from_secs(5)));

        assert!(src.push_event(Event::FlushStart));
        assert!(src.push_event(Event::flush_stop()));
        assert!(sink.is_async_pending());
        src.push(Buffer::from_vec(vec![1])).unwrap();
        let (result, current, _) = sink.get_state(Some(Duration::from_secs(5)));
        assert_eq!(result, Ok(StateChangeSuccess::Success));
        assert_eq!(current, State::Paused);
        sink.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_on_buffer_callback() {
        let seen = Arc::new(AtomicU64::new(0));
        let counter = seen.clone();
        let sink = Element::new(
            "sink",
            FakeSink::default()
                .with_async(false)
                .on_buffer(move |b| {
                    counter.fetch_add(b.size() as u64, Ordering::Relaxed);
                }),
        );
        let src = linked(&sink);
        sink.set_state(State::Paused).unwrap();
        src.push(Buffer::from_vec(vec![0; 4])).unwrap();
        src.push(Buffer::from_vec(vec![0; 6])).unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), 10);
        sink.set_state(State::Null).unwrap();
    }
}
