//! N-to-1 synchronization of sink pads.
//!
//! Muxer and mixer style elements register their sink pads with a
//! [`CollectPads`]. It installs chain and event functions on each pad that
//! park incoming buffers instead of handing them to the element. Whenever
//! every registered pad either holds a buffer or reached end of stream, and
//! at least one buffer is held, the collect function runs.
//!
//! # Accounting
//!
//! Each pad owns a single slot and is in exactly one of three conditions:
//!
//! - **queued**: its slot holds a buffer
//! - **eos**: EOS received and the slot is empty
//! - **waiting**: neither
//!
//! The collect function fires while `queued + eos == pads` and `queued > 0`.
//! Once every pad is EOS, the EOS function runs, or EOS is pushed out of the
//! element's src pads when none is set.
//!
//! # Locking
//!
//! A chain call on a pad whose slot is still full blocks until the collect
//! function pops it, the pad flushes or the collect pads stop. Upstream is
//! throttled to the pace of the slowest input.
//!
//! Collect rounds are serialized by a reentrant stream lock. The slot lock is
//! only taken inside the [`Collected`] accessors, so the collect and EOS
//! functions may push downstream, and downstream may call back into the
//! collect pads from the same thread. A full slot cannot be replaced while
//! the collect function looks at it.
//!
//! # Example
//!
//! ```rust
//! use padflow::buffer::Buffer;
//! use padflow::element::{CollectPads, Pad, PadDirection};
//! use padflow::flow::FlowSuccess;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let collect = CollectPads::new("mux");
//! let rounds = Arc::new(AtomicUsize::new(0));
//! let counter = rounds.clone();
//! collect.set_function(move |collected| {
//!     for pad in collected.pad_list() {
//!         collected.pop(&pad);
//!     }
//!     counter.fetch_add(1, Ordering::SeqCst);
//!     Ok(FlowSuccess::Ok)
//! });
//!
//! let a = Pad::new("sink_0", PadDirection::Sink);
//! let b = Pad::new("sink_1", PadDirection::Sink);
//! collect.add_pad(&a);
//! collect.add_pad(&b);
//! collect.start();
//!
//! collect.chain(&a, Buffer::with_size(4)).unwrap();
//! assert_eq!(rounds.load(Ordering::SeqCst), 0);
//! collect.chain(&b, Buffer::with_size(4)).unwrap();
//! assert_eq!(rounds.load(Ordering::SeqCst), 1);
//! ```

use crate::buffer::Buffer;
use crate::element::Element;
use crate::element::pad::Pad;
use crate::event::{Event, Segment};
use crate::flow::{FlowError, FlowResult, FlowSuccess};
use crate::observability::record_collect_round;
use parking_lot::{Condvar, Mutex, ReentrantMutex};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Collect function: called with every non-EOS pad holding data.
pub type CollectFunction =
    Arc<dyn Fn(&mut Collected<'_>) -> FlowResult + Send + Sync + 'static>;
/// Called once when every pad is EOS.
pub type EosFunction = Arc<dyn Fn(&mut Collected<'_>) -> bool + Send + Sync + 'static>;
/// Called for every event before the default handling; `true` means handled.
pub type CollectEventFunction = Arc<dyn Fn(&Pad, &Event) -> bool + Send + Sync + 'static>;

// ============================================================================
// Per-pad data
// ============================================================================

/// What a [`CollectPads`] keeps for one pad.
#[derive(Debug, Clone)]
pub struct CollectData {
    pad: Pad,
    buffer: Option<Buffer>,
    eos: bool,
    flushing: bool,
    segment: Segment,
}

impl CollectData {
    fn new(pad: Pad) -> Self {
        Self {
            pad,
            buffer: None,
            eos: false,
            flushing: false,
            segment: Segment::default(),
        }
    }

    /// The pad.
    pub fn pad(&self) -> &Pad {
        &self.pad
    }

    /// Buffer in the slot.
    pub fn peek(&self) -> Option<&Buffer> {
        self.buffer.as_ref()
    }

    /// Whether the slot holds a buffer.
    pub fn is_queued(&self) -> bool {
        self.buffer.is_some()
    }

    /// EOS received and the slot is empty.
    pub fn is_eos(&self) -> bool {
        self.eos && self.buffer.is_none()
    }

    /// Last segment received on the pad.
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    fn reset(&mut self) {
        self.buffer = None;
        self.eos = false;
        self.flushing = false;
        self.segment = Segment::default();
    }
}

#[derive(Debug, Default)]
struct Slots {
    pads: Vec<CollectData>,
    started: bool,
    eos_sent: bool,
    popped: u64,
}

impl Slots {
    fn data(&self, pad: &Pad) -> Option<&CollectData> {
        self.pads.iter().find(|d| d.pad.ptr_eq(pad))
    }

    fn data_mut(&mut self, pad: &Pad) -> Option<&mut CollectData> {
        self.pads.iter_mut().find(|d| d.pad.ptr_eq(pad))
    }

    fn queued_pads(&self) -> usize {
        self.pads.iter().filter(|d| d.is_queued()).count()
    }

    fn eos_pads(&self) -> usize {
        self.pads.iter().filter(|d| d.is_eos()).count()
    }

    fn all_eos(&self) -> bool {
        !self.pads.is_empty() && self.eos_pads() == self.pads.len()
    }

    fn ready(&self) -> bool {
        let queued = self.queued_pads();
        queued > 0 && queued + self.eos_pads() == self.pads.len()
    }
}

/// View of the pads handed to the collect and EOS functions.
///
/// Every accessor takes the slot lock for the duration of the call only.
pub struct Collected<'a> {
    inner: &'a CollectInner,
}

impl Collected<'_> {
    /// Snapshot of the registered pads.
    pub fn pads(&self) -> Vec<CollectData> {
        self.inner.state.lock().pads.clone()
    }

    /// Handles of the registered pads.
    pub fn pad_list(&self) -> Vec<Pad> {
        self.inner.state.lock().pads.iter().map(|d| d.pad.clone()).collect()
    }

    /// Snapshot of the data of `pad`.
    pub fn data(&self, pad: &Pad) -> Option<CollectData> {
        self.inner.state.lock().data(pad).cloned()
    }

    /// Buffer in the slot of `pad`, without removing it.
    pub fn peek(&self, pad: &Pad) -> Option<Buffer> {
        self.inner.state.lock().data(pad).and_then(|d| d.buffer.clone())
    }

    /// Empty the slot of `pad`, releasing a chain call waiting on it.
    pub fn pop(&mut self, pad: &Pad) -> Option<Buffer> {
        let mut state = self.inner.state.lock();
        let buffer = state.data_mut(pad).and_then(|d| d.buffer.take());
        if buffer.is_some() {
            state.popped += 1;
            self.inner.cond.notify_all();
        }
        buffer
    }

    /// Pads with a buffer in their slot.
    pub fn queued_pads(&self) -> usize {
        self.inner.state.lock().queued_pads()
    }

    /// Pads at EOS with an empty slot.
    pub fn eos_pads(&self) -> usize {
        self.inner.state.lock().eos_pads()
    }

    /// Whether every registered pad is EOS.
    pub fn all_eos(&self) -> bool {
        self.inner.state.lock().all_eos()
    }
}

impl fmt::Debug for Collected<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collected")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// CollectPads
// ============================================================================

struct CollectInner {
    name: String,
    stream_lock: ReentrantMutex<()>,
    state: Mutex<Slots>,
    cond: Condvar,
    func: Mutex<Option<CollectFunction>>,
    eos_func: Mutex<Option<EosFunction>>,
    event_func: Mutex<Option<CollectEventFunction>>,
}

/// Barrier over a set of sink pads. Clones share the same state.
#[derive(Clone)]
pub struct CollectPads(Arc<CollectInner>);

impl CollectPads {
    /// Create a collect pads owned by the element called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        CollectPads(Arc::new(CollectInner {
            name: name.into(),
            stream_lock: ReentrantMutex::new(()),
            state: Mutex::new(Slots::default()),
            cond: Condvar::new(),
            func: Mutex::new(None),
            eos_func: Mutex::new(None),
            event_func: Mutex::new(None),
        }))
    }

    /// Install the collect function.
    pub fn set_function<F>(&self, func: F)
    where
        F: Fn(&mut Collected<'_>) -> FlowResult + Send + Sync + 'static,
    {
        *self.0.func.lock() = Some(Arc::new(func));
    }

    /// Install the function run once every pad is EOS.
    pub fn set_eos_function<F>(&self, func: F)
    where
        F: Fn(&mut Collected<'_>) -> bool + Send + Sync + 'static,
    {
        *self.0.eos_func.lock() = Some(Arc::new(func));
    }

    /// Install a function seeing every event first.
    pub fn set_event_function<F>(&self, func: F)
    where
        F: Fn(&Pad, &Event) -> bool + Send + Sync + 'static,
    {
        *self.0.event_func.lock() = Some(Arc::new(func));
    }

    /// Register a sink pad and take over its chain and event functions.
    pub fn add_pad(&self, pad: &Pad) {
        {
            let mut state = self.0.state.lock();
            if state.data(pad).is_some() {
                return;
            }
            state.pads.push(CollectData::new(pad.clone()));
        }
        let weak = Arc::downgrade(&self.0);
        pad.set_chain_function(move |pad, _parent, buffer| match upgrade(&weak) {
            Some(collect) => collect.chain(pad, buffer),
            None => Err(FlowError::NotLinked),
        });
        let weak = Arc::downgrade(&self.0);
        pad.set_event_function(move |pad, parent, event| match upgrade(&weak) {
            Some(collect) => collect.event(pad, parent, event),
            None => Pad::event_default(pad, parent, event),
        });
        debug!(element = %self.0.name, pad = %pad.name(), "pad added to collect pads");
    }

    /// Unregister a pad. The remaining pads may now be ready to collect.
    pub fn remove_pad(&self, pad: &Pad) -> FlowResult {
        {
            let mut state = self.0.state.lock();
            let before = state.pads.len();
            state.pads.retain(|d| !d.pad.ptr_eq(pad));
            if state.pads.len() == before {
                return Ok(FlowSuccess::Ok);
            }
            self.0.cond.notify_all();
        }
        debug!(element = %self.0.name, pad = %pad.name(), "pad removed from collect pads");
        self.collect()
    }

    /// Number of registered pads.
    pub fn n_pads(&self) -> usize {
        self.0.state.lock().pads.len()
    }

    /// Empty all slots and accept data.
    pub fn start(&self) {
        let mut state = self.0.state.lock();
        for data in &mut state.pads {
            data.reset();
        }
        state.eos_sent = false;
        state.started = true;
        debug!(element = %self.0.name, "collect pads started");
    }

    /// Drop all held data and refuse new data. Waiting chain calls return
    /// [`FlowError::Flushing`].
    pub fn stop(&self) {
        let mut state = self.0.state.lock();
        for data in &mut state.pads {
            data.reset();
        }
        state.started = false;
        self.0.cond.notify_all();
        debug!(element = %self.0.name, "collect pads stopped");
    }

    /// Mark every pad flushing (dropping its data) or not.
    pub fn set_flushing(&self, flushing: bool) {
        let mut state = self.0.state.lock();
        for data in &mut state.pads {
            data.flushing = flushing;
            if flushing {
                data.buffer = None;
            }
        }
        self.0.cond.notify_all();
    }

    /// Run `f` between collect rounds.
    pub fn with_collected<R>(&self, f: impl FnOnce(&mut Collected<'_>) -> R) -> R {
        let _stream = self.0.stream_lock.lock();
        f(&mut Collected { inner: &self.0 })
    }

    /// Park `buffer` in the slot of `pad` and collect if every pad is
    /// satisfied. Blocks while the slot is still full.
    ///
    /// This is the chain function installed on registered pads.
    pub fn chain(&self, pad: &Pad, buffer: Buffer) -> FlowResult {
        {
            let mut state = self.0.state.lock();
            loop {
                if !state.started {
                    trace!(element = %self.0.name, "collect pads not started");
                    return Err(FlowError::Flushing);
                }
                let Some(data) = state.data_mut(pad) else {
                    warn!(element = %self.0.name, pad = %pad.name(), "buffer on unregistered pad");
                    return Err(FlowError::NotLinked);
                };
                if data.flushing {
                    return Err(FlowError::Flushing);
                }
                if data.eos {
                    return Err(FlowError::Eos);
                }
                if data.buffer.is_none() {
                    if let Some(pts) = buffer.pts().to_option() {
                        data.segment.position = pts.nanos();
                    }
                    data.buffer = Some(buffer);
                    trace!(element = %self.0.name, pad = %pad.name(), "buffer queued");
                    break;
                }
                trace!(element = %self.0.name, pad = %pad.name(), "slot full, waiting");
                self.0.cond.wait(&mut state);
            }
        }
        self.collect()
    }

    fn collect(&self) -> FlowResult {
        let _stream = self.0.stream_lock.lock();
        let func = self.0.func.lock().clone();
        loop {
            let mut state = self.0.state.lock();
            if !state.started || !state.ready() {
                break;
            }
            let Some(func) = func.as_ref() else {
                warn!(element = %self.0.name, "no collect function, dropping data");
                for data in &mut state.pads {
                    data.buffer = None;
                }
                self.0.cond.notify_all();
                return Err(FlowError::NotSupported);
            };
            let popped = state.popped;
            record_collect_round(&self.0.name);
            trace!(element = %self.0.name, queued = state.queued_pads(), eos = state.eos_pads(), "collect");
            drop(state);

            if let Err(e) = func(&mut Collected { inner: &self.0 }) {
                debug!(element = %self.0.name, flow = %e, "collect function failed");
                return Err(e);
            }
            if self.0.state.lock().popped == popped {
                warn!(element = %self.0.name, "collect function consumed nothing");
                break;
            }
        }

        let send_eos = {
            let mut state = self.0.state.lock();
            let send = state.started && state.all_eos() && !state.eos_sent;
            if send {
                state.eos_sent = true;
            }
            send
        };
        if send_eos && !self.handle_all_eos() {
            warn!(element = %self.0.name, "eos not handled");
        }
        Ok(FlowSuccess::Ok)
    }

    fn handle_all_eos(&self) -> bool {
        debug!(element = %self.0.name, "all pads are eos");
        let eos_func = self.0.eos_func.lock().clone();
        if let Some(eos_func) = eos_func {
            return eos_func(&mut Collected { inner: &self.0 });
        }
        let parent = self.0.state.lock().pads.first().and_then(|d| d.pad.parent());
        match parent {
            Some(parent) => parent.src_pads().iter().all(|pad| pad.push_event(Event::Eos)),
            None => true,
        }
    }

    /// Event function installed on registered pads.
    ///
    /// EOS and segment events are consumed; flushes reset the pad's slot and
    /// travel on. Other events are forwarded with the default handler.
    pub fn event(&self, pad: &Pad, parent: Option<&Element>, event: Event) -> bool {
        let user = self.0.event_func.lock().clone();
        let handled = user.is_some_and(|f| f(pad, &event));

        match &event {
            Event::FlushStart => {
                if let Some(data) = self.0.state.lock().data_mut(pad) {
                    data.flushing = true;
                    data.buffer = None;
                }
                self.0.cond.notify_all();
            }
            Event::FlushStop { .. } => {
                let mut state = self.0.state.lock();
                if let Some(data) = state.data_mut(pad) {
                    data.flushing = false;
                    data.eos = false;
                    data.buffer = None;
                    data.segment = Segment::default();
                }
                state.eos_sent = false;
                self.0.cond.notify_all();
            }
            Event::Eos => {
                if let Some(data) = self.0.state.lock().data_mut(pad) {
                    data.eos = true;
                }
                debug!(element = %self.0.name, pad = %pad.name(), "pad eos");
                if let Err(flow) = self.collect() {
                    warn!(element = %self.0.name, pad = %pad.name(), %flow, "collect on eos failed");
                }
                return true;
            }
            Event::Segment(segment) => {
                if let Some(data) = self.0.state.lock().data_mut(pad) {
                    data.segment = *segment;
                }
                return true;
            }
            _ => {}
        }
        handled || Pad::event_default(pad, parent, event)
    }
}

fn upgrade(weak: &Weak<CollectInner>) -> Option<CollectPads> {
    weak.upgrade().map(CollectPads)
}

impl fmt::Debug for CollectPads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.lock();
        f.debug_struct("CollectPads")
            .field("name", &self.0.name)
            .field("pads", &state.pads.len())
            .field("queued", &state.queued_pads())
            .field("eos", &state.eos_pads())
            .finish()
    }
}
