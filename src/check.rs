//! Test harness driving a single element.
//!
//! [`Harness`] links a test src pad to the element's sink pad and a test
//! sink pad to its src pad. Buffers and events pushed through the harness
//! enter the element; whatever comes out is collected on channels that the
//! test reads with [`Harness::pull`] and friends.
//!
//! ```rust
//! use padflow::buffer::Buffer;
//! use padflow::check::Harness;
//!
//! let mut h = Harness::new_factory("identity").unwrap();
//! h.play().unwrap();
//! h.push(Buffer::from_slice(b"abc")).unwrap();
//! assert_eq!(h.pull().unwrap().data(), b"abc");
//! ```

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{Element, Pad, PadDirection, State, StateChangeResult};
use crate::error::{Error, Result};
use crate::event::{Event, Segment};
use crate::flow::{FlowResult, FlowSuccess};
use crate::pipeline::{Bus, ElementFactory};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct Counters {
    buffers: AtomicUsize,
    events: AtomicUsize,
    upstream_events: AtomicUsize,
}

/// Drives one element from a test.
pub struct Harness {
    element: Element,
    bus: Bus,
    srcpad: Option<Pad>,
    sinkpad: Option<Pad>,
    buffer_tx: kanal::Sender<Buffer>,
    buffers: kanal::Receiver<Buffer>,
    event_tx: kanal::Sender<Event>,
    events: kanal::Receiver<Event>,
    upstream_tx: kanal::Sender<Event>,
    upstream_events: kanal::Receiver<Event>,
    counters: Arc<Counters>,
    stream_started: bool,
    timeout: Duration,
}

impl Harness {
    /// Wrap `element`, linking its `sink` and `src` pads where present.
    ///
    /// A pad that cannot be linked is left alone and logged.
    pub fn new(element: Element) -> Self {
        let mut harness = Self::unlinked(element);
        if let Some(pad) = harness.element.static_pad("sink")
            && let Err(e) = harness.attach_input(&pad)
        {
            warn!(pad = %pad.debug_name(), error = %e, "harness input not linked");
        }
        if let Some(pad) = harness.element.static_pad("src")
            && let Err(e) = harness.attach_output(&pad)
        {
            warn!(pad = %pad.debug_name(), error = %e, "harness output not linked");
        }
        harness
    }

    /// Wrap `element`, linking the named pads. Request pad templates such as
    /// `sink_%u` are requested.
    pub fn with_pads(element: Element, sink_pad: Option<&str>, src_pad: Option<&str>) -> Result<Self> {
        let mut harness = Self::unlinked(element);
        if let Some(name) = sink_pad {
            let target = lookup_pad(&harness.element, name)?;
            harness.attach_input(&target)?;
        }
        if let Some(name) = src_pad {
            let target = lookup_pad(&harness.element, name)?;
            harness.attach_output(&target)?;
        }
        Ok(harness)
    }

    fn unlinked(element: Element) -> Self {
        let bus = Bus::new();
        element.set_bus(Some(bus.clone()));
        let (buffer_tx, buffers) = kanal::unbounded();
        let (event_tx, events) = kanal::unbounded();
        let (upstream_tx, upstream_events) = kanal::unbounded();
        debug!(element = %element.name(), "harness created");
        Self {
            element,
            bus,
            srcpad: None,
            sinkpad: None,
            buffer_tx,
            buffers,
            event_tx,
            events,
            upstream_tx,
            upstream_events,
            counters: Arc::new(Counters::default()),
            stream_started: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    fn attach_input(&mut self, target: &Pad) -> Result<()> {
        let pad = Pad::new("harness-src", PadDirection::Src);
        let counters = self.counters.clone();
        let upstream_tx = self.upstream_tx.clone();
        pad.set_event_function(move |_pad, _parent, event| {
            counters.upstream_events.fetch_add(1, Ordering::Relaxed);
            upstream_tx.send(event).is_ok()
        });
        pad.link(target)?;
        self.srcpad = Some(pad);
        Ok(())
    }

    fn attach_output(&mut self, target: &Pad) -> Result<()> {
        let pad = Pad::new("harness-sink", PadDirection::Sink);
        let counters = self.counters.clone();
        let buffer_tx = self.buffer_tx.clone();
        pad.set_chain_function(move |_pad, _parent, buffer| {
            counters.buffers.fetch_add(1, Ordering::Relaxed);
            // The harness keeps the receiver, so this only fails during drop.
            let _ = buffer_tx.send(buffer);
            Ok(FlowSuccess::Ok)
        });
        let counters = self.counters.clone();
        let event_tx = self.event_tx.clone();
        pad.set_event_function(move |_pad, _parent, event| {
            counters.events.fetch_add(1, Ordering::Relaxed);
            let _ = event_tx.send(event);
            true
        });
        target.link(&pad)?;
        self.sinkpad = Some(pad);
        Ok(())
    }

    /// Create the element from the built-in factory and wrap it.
    pub fn new_factory(factory: &str) -> Result<Self> {
        Ok(Self::new(ElementFactory::default().make(factory, None)?))
    }

    /// How long [`pull`](Self::pull) and [`pull_event`](Self::pull_event) wait.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// The element under test.
    pub fn element(&self) -> &Element {
        &self.element
    }

    /// The bus the element posts to.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// The test pad feeding the element.
    pub fn srcpad(&self) -> Option<&Pad> {
        self.srcpad.as_ref()
    }

    /// The test pad receiving the element's output.
    pub fn sinkpad(&self) -> Option<&Pad> {
        self.sinkpad.as_ref()
    }

    /// Activate the test pads and set the element to PLAYING.
    pub fn play(&mut self) -> StateChangeResult {
        for pad in self.srcpad.iter().chain(self.sinkpad.iter()) {
            pad.set_active(true);
        }
        self.element.set_state(State::Playing)
    }

    /// Send `caps` into the element, preceded by stream-start and followed
    /// by a time segment when the stream has not started yet.
    pub fn set_src_caps(&mut self, caps: Caps) -> bool {
        if self.stream_started {
            return self.push_event(Event::Caps(caps));
        }
        self.stream_started = true;
        self.push_event(self.stream_start_event())
            && self.push_event(Event::Caps(caps))
            && self.push_event(Event::Segment(Segment::default()))
    }

    fn stream_start_event(&self) -> Event {
        Event::stream_start(format!("harness/{}", self.element.name()))
    }

    fn start_stream(&mut self) -> bool {
        if self.stream_started {
            return true;
        }
        self.stream_started = true;
        self.push_event(self.stream_start_event())
            && self.push_event(Event::Segment(Segment::default()))
    }

    /// Push `buffer` into the element, starting the stream first if needed.
    pub fn push(&mut self, buffer: Buffer) -> FlowResult {
        self.start_stream();
        match &self.srcpad {
            Some(pad) => pad.push(buffer),
            None => Err(crate::flow::FlowError::NotLinked),
        }
    }

    /// Push a downstream event into the element.
    pub fn push_event(&self, event: Event) -> bool {
        self.srcpad.as_ref().is_some_and(|pad| pad.push_event(event))
    }

    /// Send an upstream event into the element's src pad.
    pub fn push_upstream_event(&self, event: Event) -> bool {
        self.sinkpad.as_ref().is_some_and(|pad| pad.push_event(event))
    }

    /// Wait for the next output buffer.
    pub fn pull(&self) -> Option<Buffer> {
        self.buffers.recv_timeout(self.timeout).ok()
    }

    /// The next output buffer, if one is waiting.
    pub fn try_pull(&self) -> Option<Buffer> {
        self.buffers.try_recv().ok().flatten()
    }

    /// Push `buffer` and wait for one output buffer.
    pub fn push_and_pull(&mut self, buffer: Buffer) -> Option<Buffer> {
        self.push(buffer).ok()?;
        self.pull()
    }

    /// Wait for the next event leaving the element downstream.
    pub fn pull_event(&self) -> Option<Event> {
        self.events.recv_timeout(self.timeout).ok()
    }

    /// The next downstream event, if one is waiting.
    pub fn try_pull_event(&self) -> Option<Event> {
        self.events.try_recv().ok().flatten()
    }

    /// The next event the element sent upstream, if one is waiting.
    pub fn try_pull_upstream_event(&self) -> Option<Event> {
        self.upstream_events.try_recv().ok().flatten()
    }

    /// Buffers received from the element so far.
    pub fn buffers_received(&self) -> usize {
        self.counters.buffers.load(Ordering::Relaxed)
    }

    /// Buffers received but not pulled yet.
    pub fn buffers_in_queue(&self) -> usize {
        self.buffers.len()
    }

    /// Downstream events received from the element so far.
    pub fn events_received(&self) -> usize {
        self.counters.events.load(Ordering::Relaxed)
    }

    /// Upstream events received from the element so far.
    pub fn upstream_events_received(&self) -> usize {
        self.counters.upstream_events.load(Ordering::Relaxed)
    }
}

fn lookup_pad(element: &Element, name: &str) -> Result<Pad> {
    if let Some(pad) = element.static_pad(name) {
        return Ok(pad);
    }
    element.request_pad(name).ok_or_else(|| Error::PadNotFound {
        element: element.name().to_string(),
        pad: name.to_string(),
    })
}

impl Drop for Harness {
    fn drop(&mut self) {
        if self.element.set_state(State::Null).is_err() {
            warn!(element = %self.element.name(), "element did not shut down");
        }
        for pad in self.srcpad.iter().chain(self.sinkpad.iter()) {
            pad.set_active(false);
        }
    }
}
