//! Pads: the connection points between elements.
//!
//! A src pad is linked to at most one sink pad. Data moves in one of two
//! modes:
//!
//! - **Push**: upstream calls [`Pad::push`] on its src pad, which runs the
//!   peer sink pad's chain function on the calling thread.
//! - **Pull**: downstream calls [`Pad::pull_range`] on its sink pad, which
//!   runs the peer src pad's getrange function on the calling thread.
//!
//! Events travel next to the data. Serialized events and buffers are
//! delivered under the receiving pad's stream lock, so they reach the peer
//! in the order they were sent. Sticky events (stream-start, caps, segment,
//! EOS) are stored on the src pad and replayed to a peer linked later,
//! before the next buffer.
//!
//! # Pad state
//!
//! ```text
//! inactive (flushing) --activate--> active --caps event--> negotiated
//!                                     ^  |                     |
//!                        flush-stop   |  +--flush-start--> flushing
//!                                     |                        |
//!                                     +-------- EOS <----------+
//! ```
//!
//! A freshly created pad is flushing until it is activated, usually by its
//! element on READY to PAUSED.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{Element, WeakElement};
use crate::event::{Event, Segment};
use crate::flow::{FlowError, FlowResult, FlowSuccess};
use crate::observability::{buffers_pushed_counter, record_flow_error};
use crate::query::Query;
use crate::task::{StreamLock, Task, TaskState};
use metrics::Counter;
use parking_lot::{Mutex, ReentrantMutex};
use std::fmt;
use std::mem::discriminant;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, trace, warn};

// ============================================================================
// Directions, presence, modes
// ============================================================================

/// Direction of a pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadDirection {
    /// Produces data (output).
    Src,
    /// Consumes data (input).
    Sink,
}

impl PadDirection {
    /// The other direction.
    pub fn opposite(self) -> Self {
        match self {
            PadDirection::Src => PadDirection::Sink,
            PadDirection::Sink => PadDirection::Src,
        }
    }
}

/// Whether a pad is always present or created dynamically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadPresence {
    /// Pad is always present on the element.
    Always,
    /// Pad is created on demand (e.g., for demuxers).
    Sometimes,
    /// Pad is created when requested.
    Request,
}

/// Scheduling mode of an active pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PadMode {
    /// Inactive.
    #[default]
    None,
    /// Upstream pushes.
    Push,
    /// Downstream pulls.
    Pull,
}

/// Template for creating pads.
///
/// Pad templates define the characteristics of pads that an element can have.
/// Their caps are what the pad answers to a caps query by default.
#[derive(Debug, Clone)]
pub struct PadTemplate {
    /// Name pattern for this pad (e.g., "src", "sink", "sink_%u").
    pub name_template: String,
    /// Direction of this pad.
    pub direction: PadDirection,
    /// Whether this pad is always present or created on demand.
    pub presence: PadPresence,
    /// Formats the pad can handle.
    pub caps: Caps,
}

impl PadTemplate {
    /// Create a new pad template.
    pub fn new(
        name_template: impl Into<String>,
        direction: PadDirection,
        presence: PadPresence,
        caps: Caps,
    ) -> Self {
        Self {
            name_template: name_template.into(),
            direction,
            presence,
            caps,
        }
    }

    /// Create a template for an always-present sink pad.
    pub fn sink(name: impl Into<String>, caps: Caps) -> Self {
        Self::new(name, PadDirection::Sink, PadPresence::Always, caps)
    }

    /// Create a template for an always-present src pad.
    pub fn src(name: impl Into<String>, caps: Caps) -> Self {
        Self::new(name, PadDirection::Src, PadPresence::Always, caps)
    }

    /// Create a template for request pads such as `sink_%u`.
    pub fn request(name_template: impl Into<String>, direction: PadDirection, caps: Caps) -> Self {
        Self::new(name_template, direction, PadPresence::Request, caps)
    }

    /// Whether `name` could have been produced from this template.
    pub fn matches_name(&self, name: &str) -> bool {
        match self.name_template.split_once('%') {
            None => self.name_template == name,
            Some((prefix, _)) => name
                .strip_prefix(prefix)
                .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit())),
        }
    }

    /// Expand the template with `index`; `sink_%u` becomes `sink_3`.
    pub fn expand(&self, index: u32) -> String {
        match self.name_template.split_once('%') {
            None => self.name_template.clone(),
            Some((prefix, _)) => format!("{prefix}{index}"),
        }
    }
}

/// Why two pads could not be linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum PadLinkError {
    /// The first pad must be a src pad and the second a sink pad.
    #[error("pads have wrong direction")]
    WrongDirection,
    /// One of the pads already has a peer.
    #[error("pad was already linked")]
    WasLinked,
    /// The pads have no format in common.
    #[error("pads have no common format")]
    NoFormat,
    /// The parent elements live in different bins.
    #[error("pads are in different bins")]
    WrongHierarchy,
}

// ============================================================================
// Function types
// ============================================================================

/// Sink pad callback receiving pushed buffers.
pub type ChainFunction =
    Arc<dyn Fn(&Pad, Option<&Element>, Buffer) -> FlowResult + Send + Sync + 'static>;
/// Src pad callback serving pull requests: `(pad, parent, offset, size)`.
pub type GetRangeFunction = Arc<
    dyn Fn(&Pad, Option<&Element>, u64, usize) -> Result<Buffer, FlowError>
        + Send
        + Sync
        + 'static,
>;
/// Callback handling an event arriving on the pad.
pub type EventFunction = Arc<dyn Fn(&Pad, Option<&Element>, Event) -> bool + Send + Sync + 'static>;
/// Callback answering a query in place.
pub type QueryFunction =
    Arc<dyn Fn(&Pad, Option<&Element>, &mut Query) -> bool + Send + Sync + 'static>;
/// Callback choosing the scheduling mode when the pad is activated.
pub type ActivateFunction = Arc<dyn Fn(&Pad, Option<&Element>) -> bool + Send + Sync + 'static>;
/// Callback run when the pad enters or leaves a scheduling mode.
pub type ActivateModeFunction =
    Arc<dyn Fn(&Pad, Option<&Element>, PadMode, bool) -> bool + Send + Sync + 'static>;

// ============================================================================
// Probes
// ============================================================================

/// Which traffic a probe sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeMask(u32);

impl ProbeMask {
    /// Buffers.
    pub const BUFFER: Self = Self(1 << 0);
    /// Downstream events.
    pub const EVENT_DOWNSTREAM: Self = Self(1 << 1);
    /// Upstream events.
    pub const EVENT_UPSTREAM: Self = Self(1 << 2);
    /// Events in both directions.
    pub const EVENT_BOTH: Self = Self(Self::EVENT_DOWNSTREAM.0 | Self::EVENT_UPSTREAM.0);
    /// Everything.
    pub const ALL: Self = Self(Self::BUFFER.0 | Self::EVENT_BOTH.0);

    /// Whether any bit of `other` is set.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for ProbeMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Data passing a probe. The callback may replace it.
#[derive(Debug)]
pub enum ProbeData {
    /// A buffer.
    Buffer(Buffer),
    /// An event.
    Event(Event),
}

impl ProbeData {
    fn mask(&self) -> ProbeMask {
        match self {
            ProbeData::Buffer(_) => ProbeMask::BUFFER,
            ProbeData::Event(e) if e.is_downstream() => ProbeMask::EVENT_DOWNSTREAM,
            ProbeData::Event(_) => ProbeMask::EVENT_UPSTREAM,
        }
    }
}

/// What to do with probed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeReturn {
    /// Let the data pass, keep the probe.
    Ok,
    /// Discard the data; the sender sees success.
    Drop,
    /// Let the data pass and remove the probe.
    Remove,
}

/// Handle returned by [`Pad::add_probe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeId(u64);

type ProbeFunction = Arc<dyn Fn(&Pad, &mut ProbeData) -> ProbeReturn + Send + Sync + 'static>;

static NEXT_PROBE_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Pad
// ============================================================================

#[derive(Debug, Clone)]
struct StickyEvent {
    event: Event,
    /// Delivered to the current peer.
    received: bool,
}

#[derive(Default)]
struct PadState {
    peer: Option<WeakPad>,
    parent: Option<WeakElement>,
    mode: PadMode,
    flushing: bool,
    eos: bool,
    proxy_caps: bool,
    sticky: Vec<StickyEvent>,
    chain: Option<ChainFunction>,
    getrange: Option<GetRangeFunction>,
    event: Option<EventFunction>,
    query: Option<QueryFunction>,
    activate: Option<ActivateFunction>,
    activate_mode: Option<ActivateModeFunction>,
    probes: Vec<(ProbeId, ProbeMask, ProbeFunction)>,
    task: Option<Task>,
}

impl PadState {
    fn store_sticky(&mut self, event: Event, received: bool) {
        let Some(rank) = event.sticky_rank() else {
            return;
        };
        if let Some(slot) = self
            .sticky
            .iter_mut()
            .find(|s| discriminant(&s.event) == discriminant(&event))
        {
            slot.event = event;
            slot.received = received;
            return;
        }
        let at = self
            .sticky
            .iter()
            .position(|s| s.event.sticky_rank().is_some_and(|r| r > rank))
            .unwrap_or(self.sticky.len());
        self.sticky.insert(at, StickyEvent { event, received });
    }

    fn clear_eos(&mut self) {
        self.eos = false;
        self.sticky
            .retain(|s| !matches!(s.event, Event::Eos | Event::Segment(_)));
    }

    fn has_caps(&self) -> bool {
        self.sticky.iter().any(|s| matches!(s.event, Event::Caps(_)))
    }
}

struct PadInner {
    name: String,
    direction: PadDirection,
    template: Option<PadTemplate>,
    stream_lock: StreamLock,
    state: Mutex<PadState>,
    pushed: OnceLock<Counter>,
}

/// A connection point of an element. Clones refer to the same pad.
#[derive(Clone)]
pub struct Pad(Arc<PadInner>);

/// Non-owning pad reference, used for peers.
#[derive(Clone)]
pub struct WeakPad(Weak<PadInner>);

impl WeakPad {
    /// The pad, if it still exists.
    pub fn upgrade(&self) -> Option<Pad> {
        self.0.upgrade().map(Pad)
    }
}

impl Pad {
    /// Create a new pad without template; its template caps are `ANY`.
    pub fn new(name: impl Into<String>, direction: PadDirection) -> Self {
        Self::build(name.into(), direction, None)
    }

    /// Create a pad from a template.
    pub fn from_template(template: &PadTemplate, name: impl Into<String>) -> Self {
        Self::build(name.into(), template.direction, Some(template.clone()))
    }

    fn build(name: String, direction: PadDirection, template: Option<PadTemplate>) -> Self {
        Pad(Arc::new(PadInner {
            name,
            direction,
            template,
            stream_lock: Arc::new(ReentrantMutex::new(())),
            state: Mutex::new(PadState {
                flushing: true,
                ..PadState::default()
            }),
            pushed: OnceLock::new(),
        }))
    }

    /// Get the pad's name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Get the pad's direction.
    pub fn direction(&self) -> PadDirection {
        self.0.direction
    }

    /// Get the template this pad was created from.
    pub fn template(&self) -> Option<&PadTemplate> {
        self.0.template.as_ref()
    }

    /// Caps of the template, `ANY` without template.
    pub fn template_caps(&self) -> Caps {
        self.0
            .template
            .as_ref()
            .map_or_else(Caps::new_any, |t| t.caps.clone())
    }

    /// Element owning this pad.
    pub fn parent(&self) -> Option<Element> {
        self.0.state.lock().parent.as_ref().and_then(WeakElement::upgrade)
    }

    pub(crate) fn set_parent(&self, parent: Option<&Element>) {
        self.0.state.lock().parent = parent.map(Element::downgrade);
    }

    /// `element:pad`, for logs.
    pub fn debug_name(&self) -> String {
        match self.parent() {
            Some(parent) => format!("{}:{}", parent.name(), self.0.name),
            None => self.0.name.clone(),
        }
    }

    /// Non-owning handle.
    pub fn downgrade(&self) -> WeakPad {
        WeakPad(Arc::downgrade(&self.0))
    }

    /// Whether both handles refer to the same pad.
    pub fn ptr_eq(&self, other: &Pad) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// The recursive lock held while data or serialized events are processed on this pad.
    pub fn stream_lock(&self) -> StreamLock {
        self.0.stream_lock.clone()
    }

    // ------------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------------

    /// Install the chain function (sink pads).
    pub fn set_chain_function<F>(&self, func: F)
    where
        F: Fn(&Pad, Option<&Element>, Buffer) -> FlowResult + Send + Sync + 'static,
    {
        self.0.state.lock().chain = Some(Arc::new(func));
    }

    /// Install the getrange function (src pads).
    pub fn set_getrange_function<F>(&self, func: F)
    where
        F: Fn(&Pad, Option<&Element>, u64, usize) -> Result<Buffer, FlowError>
            + Send
            + Sync
            + 'static,
    {
        self.0.state.lock().getrange = Some(Arc::new(func));
    }

    /// Install the event function.
    pub fn set_event_function<F>(&self, func: F)
    where
        F: Fn(&Pad, Option<&Element>, Event) -> bool + Send + Sync + 'static,
    {
        self.0.state.lock().event = Some(Arc::new(func));
    }

    /// Install the query function.
    pub fn set_query_function<F>(&self, func: F)
    where
        F: Fn(&Pad, Option<&Element>, &mut Query) -> bool + Send + Sync + 'static,
    {
        self.0.state.lock().query = Some(Arc::new(func));
    }

    /// Install the function choosing the scheduling mode on activation.
    pub fn set_activate_function<F>(&self, func: F)
    where
        F: Fn(&Pad, Option<&Element>) -> bool + Send + Sync + 'static,
    {
        self.0.state.lock().activate = Some(Arc::new(func));
    }

    /// Install the function run when a scheduling mode is entered or left.
    pub fn set_activatemode_function<F>(&self, func: F)
    where
        F: Fn(&Pad, Option<&Element>, PadMode, bool) -> bool + Send + Sync + 'static,
    {
        self.0.state.lock().activate_mode = Some(Arc::new(func));
    }

    /// Answer caps queries by also asking the peers of the element's opposite pads.
    pub fn set_proxy_caps(&self, proxy: bool) {
        self.0.state.lock().proxy_caps = proxy;
    }

    // ------------------------------------------------------------------------
    // Linking
    // ------------------------------------------------------------------------

    /// The linked pad.
    pub fn peer(&self) -> Option<Pad> {
        self.0.state.lock().peer.as_ref().and_then(WeakPad::upgrade)
    }

    /// Whether the pad has a peer.
    pub fn is_linked(&self) -> bool {
        self.peer().is_some()
    }

    /// Link this src pad to `sink`.
    ///
    /// Both pads must be unlinked and their parents must share a bin. Unless
    /// one side accepts `ANY` caps, the caps each side can handle must
    /// intersect. Sticky events already pushed on this pad are replayed to
    /// `sink` before the next buffer.
    pub fn link(&self, sink: &Pad) -> Result<(), PadLinkError> {
        if self.direction() != PadDirection::Src || sink.direction() != PadDirection::Sink {
            warn!(src = %self.debug_name(), sink = %sink.debug_name(), "link with wrong direction");
            return Err(PadLinkError::WrongDirection);
        }
        if !same_hierarchy(self, sink) {
            warn!(src = %self.debug_name(), sink = %sink.debug_name(), "link across bins");
            return Err(PadLinkError::WrongHierarchy);
        }
        if self.is_linked() || sink.is_linked() {
            debug!(src = %self.debug_name(), sink = %sink.debug_name(), "pad already linked");
            return Err(PadLinkError::WasLinked);
        }

        let src_caps = self.query_caps(None);
        let sink_caps = sink.query_caps(None);
        if !src_caps.is_any() && !sink_caps.is_any() && !src_caps.can_intersect(&sink_caps) {
            debug!(
                src = %self.debug_name(),
                sink = %sink.debug_name(),
                %src_caps,
                %sink_caps,
                "no common caps"
            );
            return Err(PadLinkError::NoFormat);
        }

        let mut src_state = self.0.state.lock();
        let mut sink_state = sink.0.state.lock();
        let linked = |p: &Option<WeakPad>| p.as_ref().is_some_and(|w| w.upgrade().is_some());
        if linked(&src_state.peer) || linked(&sink_state.peer) {
            return Err(PadLinkError::WasLinked);
        }
        src_state.peer = Some(sink.downgrade());
        sink_state.peer = Some(self.downgrade());
        for sticky in &mut src_state.sticky {
            sticky.received = false;
        }
        drop(sink_state);
        drop(src_state);

        debug!(src = %self.debug_name(), sink = %sink.debug_name(), "linked");
        Ok(())
    }

    /// Remove the link between this src pad and `sink`. Returns false if they were not linked.
    pub fn unlink(&self, sink: &Pad) -> bool {
        let mut src_state = self.0.state.lock();
        let mut sink_state = sink.0.state.lock();
        let points_to = |p: &Option<WeakPad>, target: &Pad| {
            p.as_ref()
                .and_then(WeakPad::upgrade)
                .is_some_and(|p| p.ptr_eq(target))
        };
        if !points_to(&src_state.peer, sink) || !points_to(&sink_state.peer, self) {
            return false;
        }
        src_state.peer = None;
        sink_state.peer = None;
        drop(sink_state);
        drop(src_state);
        debug!(src = %self.debug_name(), sink = %sink.debug_name(), "unlinked");
        true
    }

    // ------------------------------------------------------------------------
    // Activation
    // ------------------------------------------------------------------------

    /// Current scheduling mode.
    pub fn mode(&self) -> PadMode {
        self.0.state.lock().mode
    }

    /// Whether the pad is active in any mode.
    pub fn is_active(&self) -> bool {
        self.mode() != PadMode::None
    }

    /// Whether data is currently refused.
    pub fn is_flushing(&self) -> bool {
        self.0.state.lock().flushing
    }

    /// Whether EOS went through this pad.
    pub fn is_eos(&self) -> bool {
        self.0.state.lock().eos
    }

    /// Activate in the mode chosen by the activate function (push by default),
    /// or deactivate whatever mode is active.
    pub fn set_active(&self, active: bool) -> bool {
        if active {
            let (func, parent) = {
                let state = self.0.state.lock();
                (state.activate.clone(), state.parent.as_ref().and_then(WeakElement::upgrade))
            };
            match func {
                Some(func) => func(self, parent.as_ref()),
                None => self.activate_mode(PadMode::Push, true),
            }
        } else {
            match self.mode() {
                PadMode::None => true,
                mode => self.activate_mode(mode, false),
            }
        }
    }

    /// Enter or leave a scheduling mode.
    ///
    /// Activating a sink pad in pull mode asks the peer with a scheduling
    /// query and activates the peer in pull mode too. Deactivation sets the
    /// pad flushing, then waits for the streaming thread to leave the pad
    /// before dropping the sticky events.
    pub fn activate_mode(&self, mode: PadMode, active: bool) -> bool {
        let current = self.mode();
        if active {
            if mode == PadMode::None {
                return self.set_active(false);
            }
            if current == mode {
                return true;
            }
            if current != PadMode::None && !self.activate_mode(current, false) {
                return false;
            }
            if mode == PadMode::Pull && self.direction() == PadDirection::Sink {
                let Some(peer) = self.peer() else {
                    debug!(pad = %self.debug_name(), "pull activation without peer");
                    return false;
                };
                let mut query = Query::new_scheduling();
                if !peer.query(&mut query) || !matches!(query, Query::Scheduling { pull_mode: true, .. }) {
                    debug!(pad = %self.debug_name(), "peer cannot operate in pull mode");
                    return false;
                }
                if !peer.activate_mode(PadMode::Pull, true) {
                    return false;
                }
            }

            let (func, parent) = {
                let mut state = self.0.state.lock();
                state.mode = mode;
                state.flushing = false;
                (state.activate_mode.clone(), state.parent.as_ref().and_then(WeakElement::upgrade))
            };
            let ok = func.is_none_or(|f| f(self, parent.as_ref(), mode, true));
            if !ok {
                let mut state = self.0.state.lock();
                state.mode = PadMode::None;
                state.flushing = true;
                warn!(pad = %self.debug_name(), ?mode, "activation failed");
                return false;
            }
            debug!(pad = %self.debug_name(), ?mode, "activated");
            true
        } else {
            if current != mode || current == PadMode::None {
                return true;
            }
            let (func, parent) = {
                let mut state = self.0.state.lock();
                state.flushing = true;
                (state.activate_mode.clone(), state.parent.as_ref().and_then(WeakElement::upgrade))
            };
            if let Some(func) = func
                && !func(self, parent.as_ref(), mode, false)
            {
                warn!(pad = %self.debug_name(), ?mode, "deactivation hook failed");
            }
            // Wait for the streaming thread to leave the pad.
            drop(self.0.stream_lock.lock());
            {
                let mut state = self.0.state.lock();
                state.mode = PadMode::None;
                state.eos = false;
                state.sticky.clear();
            }
            if mode == PadMode::Pull
                && self.direction() == PadDirection::Sink
                && let Some(peer) = self.peer()
            {
                peer.activate_mode(PadMode::Pull, false);
            }
            debug!(pad = %self.debug_name(), ?mode, "deactivated");
            true
        }
    }

    // ------------------------------------------------------------------------
    // Data flow
    // ------------------------------------------------------------------------

    /// Push a buffer to the peer's chain function.
    ///
    /// Pending sticky events are delivered first; a refused caps event makes
    /// the push fail with `NotNegotiated`.
    pub fn push(&self, buffer: Buffer) -> FlowResult {
        if self.direction() != PadDirection::Src {
            warn!(pad = %self.debug_name(), "push on a sink pad");
            return Err(FlowError::Error);
        }
        let peer = {
            let state = self.0.state.lock();
            if state.flushing {
                return self.flow_failed(FlowError::Flushing);
            }
            if state.eos {
                return self.flow_failed(FlowError::Eos);
            }
            match state.peer.as_ref().and_then(WeakPad::upgrade) {
                Some(peer) => peer,
                None => {
                    drop(state);
                    return self.flow_failed(FlowError::NotLinked);
                }
            }
        };

        if let Err(e) = self.send_sticky_events(&peer) {
            return self.flow_failed(e);
        }
        let buffer = match self.run_probes(ProbeData::Buffer(buffer)) {
            Some(ProbeData::Buffer(b)) => b,
            _ => return Ok(FlowSuccess::Ok),
        };

        trace!(pad = %self.name(), size = buffer.size(), pts = %buffer.pts(), "push");
        match peer.chain(buffer) {
            Ok(ok) => {
                self.0
                    .pushed
                    .get_or_init(|| buffers_pushed_counter(&self.debug_name()))
                    .increment(1);
                Ok(ok)
            }
            Err(e) => self.flow_failed(e),
        }
    }

    fn chain(&self, buffer: Buffer) -> FlowResult {
        let _stream = self.0.stream_lock.lock();
        let (func, parent) = {
            let state = self.0.state.lock();
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            if state.eos {
                return Err(FlowError::Eos);
            }
            if !state.has_caps() && !self.template_caps().is_any() {
                debug!(pad = %self.debug_name(), "buffer before caps");
                return Err(FlowError::NotNegotiated);
            }
            (state.chain.clone(), state.parent.as_ref().and_then(WeakElement::upgrade))
        };
        let Some(func) = func else {
            warn!(pad = %self.debug_name(), "no chain function");
            return Err(FlowError::NotSupported);
        };
        let buffer = match self.run_probes(ProbeData::Buffer(buffer)) {
            Some(ProbeData::Buffer(b)) => b,
            _ => return Ok(FlowSuccess::Ok),
        };
        func(self, parent.as_ref(), buffer)
    }

    /// Pull exactly `size` bytes at `offset` from the peer.
    ///
    /// A shorter answer is reported as `Eos`, a longer one as `Error`. The pad
    /// must be active in pull mode.
    pub fn pull_range(&self, offset: u64, size: usize) -> Result<Buffer, FlowError> {
        let buffer = self.pull_range_partial(offset, size)?;
        match buffer.size().cmp(&size) {
            std::cmp::Ordering::Equal => Ok(buffer),
            std::cmp::Ordering::Less => {
                debug!(pad = %self.debug_name(), offset, size, got = buffer.size(), "short read");
                Err(FlowError::Eos)
            }
            std::cmp::Ordering::Greater => {
                warn!(pad = %self.debug_name(), offset, size, got = buffer.size(), "getrange returned too much data");
                Err(FlowError::Error)
            }
        }
    }

    /// Like [`pull_range`](Self::pull_range) but accepts a shorter, non-empty buffer.
    pub fn pull_range_partial(&self, offset: u64, size: usize) -> Result<Buffer, FlowError> {
        if self.direction() != PadDirection::Sink {
            warn!(pad = %self.debug_name(), "pull on a src pad");
            return Err(FlowError::Error);
        }
        let peer = {
            let state = self.0.state.lock();
            if state.flushing || state.mode != PadMode::Pull {
                return Err(FlowError::Flushing);
            }
            state.peer.as_ref().and_then(WeakPad::upgrade)
        };
        let Some(peer) = peer else {
            return Err(self.flow_error(FlowError::NotLinked));
        };

        let buffer = peer
            .get_range(offset, size)
            .map_err(|e| self.flow_error(e))?;
        if buffer.is_empty() && size > 0 {
            return Err(FlowError::Eos);
        }
        match self.run_probes(ProbeData::Buffer(buffer)) {
            Some(ProbeData::Buffer(b)) => Ok(b),
            _ => Err(FlowError::Error),
        }
    }

    /// Run this src pad's getrange function.
    pub fn get_range(&self, offset: u64, size: usize) -> Result<Buffer, FlowError> {
        if self.direction() != PadDirection::Src {
            return Err(FlowError::Error);
        }
        let _stream = self.0.stream_lock.lock();
        let (func, parent) = {
            let state = self.0.state.lock();
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            (state.getrange.clone(), state.parent.as_ref().and_then(WeakElement::upgrade))
        };
        let Some(func) = func else {
            return Err(FlowError::NotSupported);
        };
        trace!(pad = %self.name(), offset, size, "getrange");
        func(self, parent.as_ref(), offset, size)
    }

    fn flow_failed(&self, error: FlowError) -> FlowResult {
        Err(self.flow_error(error))
    }

    fn flow_error(&self, error: FlowError) -> FlowError {
        record_flow_error(self.name(), error.name());
        if error.is_fatal() {
            debug!(pad = %self.debug_name(), flow = %error, "flow error");
        } else {
            trace!(pad = %self.debug_name(), flow = %error, "flow stopped");
        }
        error
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Send an event out of this pad: downstream from a src pad, upstream from a sink pad.
    ///
    /// Sticky events are stored on a src pad first; pushing one on an
    /// unlinked pad succeeds and the event reaches the peer once linked.
    pub fn push_event(&self, event: Event) -> bool {
        let valid = match self.direction() {
            PadDirection::Src => event.is_downstream(),
            PadDirection::Sink => event.is_upstream(),
        };
        if !valid {
            warn!(pad = %self.debug_name(), event = event.name(), "event pushed in wrong direction");
            return false;
        }
        let event = match self.run_probes(ProbeData::Event(event)) {
            Some(ProbeData::Event(e)) => e,
            _ => return true,
        };

        match &event {
            Event::FlushStart => self.0.state.lock().flushing = true,
            Event::FlushStop { .. } => {
                let mut state = self.0.state.lock();
                if state.mode != PadMode::None {
                    state.flushing = false;
                }
                state.clear_eos();
            }
            _ => {}
        }

        if event.is_sticky() && self.direction() == PadDirection::Src {
            let peer = {
                let mut state = self.0.state.lock();
                if state.flushing {
                    return false;
                }
                let is_stream_start = matches!(event, Event::StreamStart(_));
                if state.eos && !is_stream_start {
                    return false;
                }
                if is_stream_start {
                    state.clear_eos();
                }
                let is_eos = matches!(event, Event::Eos);
                state.store_sticky(event, false);
                if is_eos {
                    state.eos = true;
                }
                state.peer.as_ref().and_then(WeakPad::upgrade)
            };
            return match peer {
                Some(peer) => self.send_sticky_events(&peer).is_ok(),
                None => true,
            };
        }

        let Some(peer) = self.peer() else {
            trace!(pad = %self.debug_name(), event = event.name(), "event on unlinked pad");
            return false;
        };
        if event.is_serialized()
            && self.direction() == PadDirection::Src
            && self.send_sticky_events(&peer).is_err()
        {
            return false;
        }
        peer.receive_event(event).is_ok()
    }

    /// Deliver an event to this pad as if it came from its peer.
    pub fn send_event(&self, event: Event) -> bool {
        self.receive_event(event).is_ok()
    }

    fn receive_event(&self, event: Event) -> Result<(), FlowError> {
        let valid = match self.direction() {
            PadDirection::Sink => event.is_downstream(),
            PadDirection::Src => event.is_upstream(),
        };
        if !valid {
            warn!(pad = %self.debug_name(), event = event.name(), "event received in wrong direction");
            return Err(FlowError::Error);
        }

        if matches!(event, Event::FlushStart) {
            self.0.state.lock().flushing = true;
        }
        let _stream = event.is_serialized().then(|| self.0.stream_lock.lock());
        {
            let mut state = self.0.state.lock();
            match &event {
                Event::FlushStart => {}
                Event::FlushStop { .. } => {
                    if state.mode != PadMode::None {
                        state.flushing = false;
                    }
                    state.clear_eos();
                }
                _ if state.flushing => return Err(FlowError::Flushing),
                Event::StreamStart(_) => state.clear_eos(),
                _ if state.eos && event.is_serialized() => return Err(FlowError::Eos),
                _ => {}
            }
        }

        if let Event::Caps(caps) = &event
            && !self.query_accept_caps(caps)
        {
            debug!(pad = %self.debug_name(), %caps, "caps refused");
            return Err(FlowError::NotNegotiated);
        }

        let event = match self.run_probes(ProbeData::Event(event)) {
            Some(ProbeData::Event(e)) => e,
            _ => return Ok(()),
        };

        let store = (self.direction() == PadDirection::Sink && event.is_sticky()).then(|| event.clone());
        let is_caps = matches!(event, Event::Caps(_));
        if matches!(event, Event::Eos) {
            self.0.state.lock().eos = true;
        }

        let (func, parent) = {
            let state = self.0.state.lock();
            (state.event.clone(), state.parent.as_ref().and_then(WeakElement::upgrade))
        };
        trace!(pad = %self.debug_name(), event = event.name(), "event");
        let handled = match func {
            Some(func) => func(self, parent.as_ref(), event),
            None => Pad::event_default(self, parent.as_ref(), event),
        };
        if !handled {
            return Err(if is_caps {
                FlowError::NotNegotiated
            } else {
                FlowError::Error
            });
        }
        if let Some(event) = store {
            self.0.state.lock().store_sticky(event, true);
        }
        Ok(())
    }

    fn send_sticky_events(&self, peer: &Pad) -> Result<(), FlowError> {
        let pending: Vec<Event> = {
            let state = self.0.state.lock();
            state
                .sticky
                .iter()
                .filter(|s| !s.received)
                .map(|s| s.event.clone())
                .collect()
        };
        for event in pending {
            let is_caps = matches!(event, Event::Caps(_));
            if let Err(e) = peer.receive_event(event.clone()) {
                debug!(pad = %self.debug_name(), event = event.name(), flow = %e, "sticky event refused");
                return Err(if is_caps { FlowError::NotNegotiated } else { e });
            }
            let mut state = self.0.state.lock();
            if let Some(slot) = state.sticky.iter_mut().find(|s| s.event == event) {
                slot.received = true;
            }
        }
        Ok(())
    }

    /// Forward `event` through every pad of `parent` facing the other way.
    ///
    /// Returns true when every forward succeeded, or when there is nowhere to forward to.
    pub fn event_default(pad: &Pad, parent: Option<&Element>, event: Event) -> bool {
        let Some(parent) = parent else {
            return true;
        };
        let targets: Vec<Pad> = parent
            .pads()
            .into_iter()
            .filter(|p| p.direction() != pad.direction())
            .collect();
        let mut ok = true;
        for target in targets {
            ok &= target.push_event(event.clone());
        }
        ok
    }

    /// Stored sticky events, in replay order.
    pub fn sticky_events(&self) -> Vec<Event> {
        self.0
            .state
            .lock()
            .sticky
            .iter()
            .map(|s| s.event.clone())
            .collect()
    }

    /// Negotiated caps: the stored caps event.
    pub fn current_caps(&self) -> Option<Caps> {
        self.0.state.lock().sticky.iter().find_map(|s| match &s.event {
            Event::Caps(caps) => Some(caps.clone()),
            _ => None,
        })
    }

    /// Stored segment.
    pub fn segment(&self) -> Option<Segment> {
        self.0.state.lock().sticky.iter().find_map(|s| match &s.event {
            Event::Segment(segment) => Some(*segment),
            _ => None,
        })
    }

    // ------------------------------------------------------------------------
    // Queries and negotiation
    // ------------------------------------------------------------------------

    /// Ask this pad.
    pub fn query(&self, query: &mut Query) -> bool {
        let (func, parent) = {
            let state = self.0.state.lock();
            (state.query.clone(), state.parent.as_ref().and_then(WeakElement::upgrade))
        };
        match func {
            Some(func) => func(self, parent.as_ref(), query),
            None => Pad::query_default(self, parent.as_ref(), query),
        }
    }

    /// Ask the peer. False when unlinked.
    pub fn peer_query(&self, query: &mut Query) -> bool {
        self.peer().is_some_and(|peer| peer.query(query))
    }

    /// Default query handling.
    ///
    /// Caps are answered from the template, narrowed by the peers of the
    /// element's opposite pads when the pad proxies caps. Accept-caps checks
    /// the proposal against the caps query answer. Position, duration and
    /// scheduling queries are forwarded through the opposite pads.
    pub fn query_default(pad: &Pad, parent: Option<&Element>, query: &mut Query) -> bool {
        match query {
            Query::Caps { filter, result } => {
                let filter = filter.clone();
                let mut caps = pad.template_caps();
                if pad.0.state.lock().proxy_caps
                    && let Some(parent) = parent
                {
                    for other in parent.pads() {
                        if other.direction() != pad.direction() {
                            caps = caps.intersect(&other.peer_query_caps(filter.as_ref()));
                        }
                    }
                }
                if let Some(filter) = filter {
                    caps = filter.intersect(&caps);
                }
                *result = Some(caps);
                true
            }
            Query::AcceptCaps { caps, result } => {
                let allowed = pad.query_caps(None);
                *result = caps.is_subset(&allowed);
                true
            }
            Query::Position { .. } | Query::Duration { .. } | Query::Scheduling { .. } => {
                let Some(parent) = parent else {
                    return false;
                };
                parent
                    .pads()
                    .into_iter()
                    .filter(|p| p.direction() != pad.direction())
                    .any(|p| p.peer_query(query))
            }
        }
    }

    /// Formats this pad can handle, restricted to `filter`.
    pub fn query_caps(&self, filter: Option<&Caps>) -> Caps {
        let mut query = Query::new_caps(filter.cloned());
        if self.query(&mut query)
            && let Some(caps) = query.caps_result()
        {
            return caps.clone();
        }
        let template = self.template_caps();
        match filter {
            Some(filter) => filter.intersect(&template),
            None => template,
        }
    }

    /// Formats the peer can handle. `ANY` (or the filter) when unlinked.
    pub fn peer_query_caps(&self, filter: Option<&Caps>) -> Caps {
        match self.peer() {
            Some(peer) => peer.query_caps(filter),
            None => filter.cloned().unwrap_or_else(Caps::new_any),
        }
    }

    /// Whether this pad would accept exactly `caps`.
    pub fn query_accept_caps(&self, caps: &Caps) -> bool {
        let mut query = Query::new_accept_caps(caps.clone());
        self.query(&mut query) && query.accept_caps_result()
    }

    /// Pick caps with the peer and announce them downstream.
    ///
    /// Intersects what this src pad can produce with what the peer accepts,
    /// fixates the result and pushes it as a caps event. Nothing is pushed
    /// when both sides accept anything.
    pub fn negotiate(&self) -> bool {
        let ours = self.query_caps(None);
        let theirs = self.peer_query_caps(Some(&ours));
        let common = theirs.intersect(&ours);
        if common.is_any() {
            trace!(pad = %self.debug_name(), "both sides accept anything");
            return true;
        }
        let Some(fixed) = common.fixate() else {
            debug!(pad = %self.debug_name(), %ours, %theirs, "negotiation failed");
            return false;
        };
        debug!(pad = %self.debug_name(), caps = %fixed, "negotiated");
        self.push_event(Event::Caps(fixed))
    }

    // ------------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------------

    /// Start a task calling `func` under this pad's stream lock.
    ///
    /// An existing task is restarted and keeps its original function.
    pub fn start_task(&self, func: impl FnMut() + Send + 'static) -> bool {
        let task = {
            let mut state = self.0.state.lock();
            match &state.task {
                Some(task) => task.clone(),
                None => {
                    let task = Task::new(self.debug_name(), func);
                    if let Err(e) = task.set_lock(self.0.stream_lock.clone()) {
                        warn!(pad = %self.name(), error = %e, "cannot set task lock");
                        return false;
                    }
                    state.task = Some(task.clone());
                    task
                }
            }
        };
        task.start().is_ok()
    }

    /// Pause the task and wait until the current iteration has finished.
    pub fn pause_task(&self) -> bool {
        let Some(task) = self.0.state.lock().task.clone() else {
            return false;
        };
        if task.pause().is_err() {
            return false;
        }
        drop(self.0.stream_lock.lock());
        true
    }

    /// Stop and join the task. From the task's own thread the task is only stopped.
    pub fn stop_task(&self) -> bool {
        let Some(task) = self.0.state.lock().task.clone() else {
            return true;
        };
        task.stop();
        if task.is_current_thread() {
            return true;
        }
        drop(self.0.stream_lock.lock());
        if let Err(e) = task.join() {
            warn!(pad = %self.debug_name(), error = %e, "failed to join task");
            return false;
        }
        self.0.state.lock().task = None;
        true
    }

    /// State of the pad's task, if it has one.
    pub fn task_state(&self) -> Option<TaskState> {
        self.0.state.lock().task.as_ref().map(Task::state)
    }

    // ------------------------------------------------------------------------
    // Probes
    // ------------------------------------------------------------------------

    /// Call `func` for data of kind `mask` passing through this pad.
    pub fn add_probe<F>(&self, mask: ProbeMask, func: F) -> ProbeId
    where
        F: Fn(&Pad, &mut ProbeData) -> ProbeReturn + Send + Sync + 'static,
    {
        let id = ProbeId(NEXT_PROBE_ID.fetch_add(1, Ordering::Relaxed));
        self.0.state.lock().probes.push((id, mask, Arc::new(func)));
        id
    }

    /// Remove a probe. Returns false if it was not installed.
    pub fn remove_probe(&self, id: ProbeId) -> bool {
        let mut state = self.0.state.lock();
        let before = state.probes.len();
        state.probes.retain(|(probe, _, _)| *probe != id);
        state.probes.len() != before
    }

    fn run_probes(&self, mut data: ProbeData) -> Option<ProbeData> {
        let probes: Vec<(ProbeId, ProbeFunction)> = {
            let state = self.0.state.lock();
            if state.probes.is_empty() {
                return Some(data);
            }
            let kind = data.mask();
            state
                .probes
                .iter()
                .filter(|(_, mask, _)| mask.intersects(kind))
                .map(|(id, _, f)| (*id, f.clone()))
                .collect()
        };
        for (id, probe) in probes {
            match probe(self, &mut data) {
                ProbeReturn::Ok => {}
                ProbeReturn::Drop => {
                    trace!(pad = %self.debug_name(), "probe dropped data");
                    return None;
                }
                ProbeReturn::Remove => {
                    self.remove_probe(id);
                }
            }
        }
        Some(data)
    }
}

fn same_hierarchy(src: &Pad, sink: &Pad) -> bool {
    let (Some(a), Some(b)) = (src.parent(), sink.parent()) else {
        return true;
    };
    match (a.parent(), b.parent()) {
        (None, None) => true,
        (Some(x), Some(y)) => x.ptr_eq(&y),
        _ => false,
    }
}

impl PartialEq for Pad {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Pad {}

impl fmt::Debug for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pad")
            .field("name", &self.debug_name())
            .field("direction", &self.0.direction)
            .field("mode", &self.mode())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn linked_pair(src_caps: Caps, sink_caps: Caps) -> (Pad, Pad) {
        let src = Pad::from_template(&PadTemplate::src("src", src_caps), "src");
        let sink = Pad::from_template(&PadTemplate::sink("sink", sink_caps), "sink");
        src.link(&sink).unwrap();
        assert!(src.set_active(true));
        assert!(sink.set_active(true));
        (src, sink)
    }

    fn counting_sink(sink: &Pad) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        sink.set_chain_function(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(FlowSuccess::Ok)
        });
        count
    }

    #[test]
    fn test_pad_template() {
        let template = PadTemplate::request("sink_%u", PadDirection::Sink, Caps::new_any());
        assert_eq!(template.presence, PadPresence::Request);
        assert_eq!(template.expand(3), "sink_3");
        assert!(template.matches_name("sink_12"));
        assert!(!template.matches_name("sink_"));
        assert!(!template.matches_name("src_1"));
        assert!(PadTemplate::src("src", Caps::new_any()).matches_name("src"));
    }

    #[test]
    fn test_link_direction() {
        let a = Pad::new("a", PadDirection::Sink);
        let b = Pad::new("b", PadDirection::Src);
        assert_eq!(a.link(&b), Err(PadLinkError::WrongDirection));
        assert!(b.link(&a).is_ok());
        assert_eq!(b.peer(), Some(a.clone()));
        assert_eq!(a.peer(), Some(b.clone()));
    }

    #[test]
    fn test_link_twice() {
        let src = Pad::new("src", PadDirection::Src);
        let sink = Pad::new("sink", PadDirection::Sink);
        let other = Pad::new("other", PadDirection::Sink);
        src.link(&sink).unwrap();
        assert_eq!(src.link(&other), Err(PadLinkError::WasLinked));
        assert!(src.unlink(&sink));
        assert!(!src.unlink(&sink));
        assert!(src.link(&other).is_ok());
    }

    #[test]
    fn test_link_requires_common_caps() {
        let src = Pad::from_template(
            &PadTemplate::src("src", "audio/x-raw".parse().unwrap()),
            "src",
        );
        let sink = Pad::from_template(
            &PadTemplate::sink("sink", "video/x-raw".parse().unwrap()),
            "sink",
        );
        assert_eq!(src.link(&sink), Err(PadLinkError::NoFormat));

        let any = Pad::new("any", PadDirection::Sink);
        assert!(src.link(&any).is_ok());
    }

    #[test]
    fn test_push_unlinked_and_inactive() {
        let src = Pad::new("src", PadDirection::Src);
        assert_eq!(src.push(Buffer::with_size(4)), Err(FlowError::Flushing));
        src.set_active(true);
        assert_eq!(src.push(Buffer::with_size(4)), Err(FlowError::NotLinked));
    }

    #[test]
    fn test_push_reaches_chain() {
        let (src, sink) = linked_pair(Caps::new_any(), Caps::new_any());
        let count = counting_sink(&sink);
        for _ in 0..5 {
            assert_eq!(src.push(Buffer::with_size(8)), Ok(FlowSuccess::Ok));
        }
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_flushing_rejects_data() {
        let (src, sink) = linked_pair(Caps::new_any(), Caps::new_any());
        counting_sink(&sink);
        assert!(src.push_event(Event::FlushStart));
        assert!(sink.is_flushing());
        assert_eq!(src.push(Buffer::with_size(1)), Err(FlowError::Flushing));
        assert!(src.push_event(Event::flush_stop()));
        assert_eq!(src.push(Buffer::with_size(1)), Ok(FlowSuccess::Ok));
    }

    #[test]
    fn test_eos_stops_flow() {
        let (src, sink) = linked_pair(Caps::new_any(), Caps::new_any());
        counting_sink(&sink);
        assert!(src.push_event(Event::Eos));
        assert!(sink.is_eos());
        assert_eq!(src.push(Buffer::with_size(1)), Err(FlowError::Eos));
    }

    #[test]
    fn test_sticky_events_replayed_on_link() {
        let src = Pad::new("src", PadDirection::Src);
        src.set_active(true);
        assert!(src.push_event(Event::stream_start("s")));
        assert!(src.push_event(Event::Caps("audio/x-raw, rate=(int)48000".parse().unwrap())));

        let sink = Pad::new("sink", PadDirection::Sink);
        sink.set_active(true);
        counting_sink(&sink);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        sink.set_event_function(move |_, _, event| {
            log.lock().push(event.name().to_string());
            true
        });
        src.link(&sink).unwrap();
        assert!(sink.current_caps().is_none());

        assert_eq!(src.push(Buffer::with_size(1)), Ok(FlowSuccess::Ok));
        assert_eq!(*seen.lock(), vec!["stream-start", "caps"]);
        assert!(sink.current_caps().is_some());
    }

    #[test]
    fn test_buffer_before_caps_not_negotiated() {
        let (src, sink) = linked_pair(Caps::new_any(), "audio/x-raw".parse().unwrap());
        counting_sink(&sink);
        assert_eq!(src.push(Buffer::with_size(1)), Err(FlowError::NotNegotiated));
        assert!(src.negotiate());
        assert_eq!(src.push(Buffer::with_size(1)), Ok(FlowSuccess::Ok));
    }

    #[test]
    fn test_refused_caps_not_negotiated() {
        let (src, sink) = linked_pair(Caps::new_any(), "audio/x-raw".parse().unwrap());
        counting_sink(&sink);
        assert!(!src.push_event(Event::Caps("video/x-raw".parse().unwrap())));
        assert_eq!(src.push(Buffer::with_size(1)), Err(FlowError::NotNegotiated));
    }

    #[test]
    fn test_negotiate_fixates() {
        let (src, sink) = linked_pair(
            "audio/x-raw, rate=(int)[ 8000, 96000 ], channels=(int){ 2, 1 }"
                .parse()
                .unwrap(),
            "audio/x-raw, rate=(int)[ 44100, 48000 ]".parse().unwrap(),
        );
        assert!(src.negotiate());
        let caps = sink.current_caps().unwrap();
        assert!(caps.is_fixed());
        let s = caps.structure(0).unwrap();
        assert_eq!(s.get_int("rate"), Some(44100));
        assert_eq!(s.get_int("channels"), Some(2));
    }

    #[test]
    fn test_pull_range_exact() {
        let src = Pad::new("src", PadDirection::Src);
        src.set_getrange_function(|_, _, offset, size| {
            let data: Vec<u8> = (0..100u8).collect();
            let start = (offset as usize).min(data.len());
            let end = (start + size).min(data.len());
            Ok(Buffer::from_slice(&data[start..end]))
        });
        src.set_query_function(|pad, parent, query| match query {
            Query::Scheduling { pull_mode, .. } => {
                *pull_mode = true;
                true
            }
            _ => Pad::query_default(pad, parent, query),
        });
        let sink = Pad::new("sink", PadDirection::Sink);
        src.link(&sink).unwrap();

        assert_eq!(sink.pull_range(0, 10).err(), Some(FlowError::Flushing));
        assert!(sink.activate_mode(PadMode::Pull, true));
        assert_eq!(src.mode(), PadMode::Pull);

        let buffer = sink.pull_range(10, 10).unwrap();
        assert_eq!(buffer.data()[0], 10);
        assert_eq!(sink.pull_range(95, 10).err(), Some(FlowError::Eos));
        assert_eq!(sink.pull_range_partial(95, 10).unwrap().size(), 5);
        assert_eq!(sink.pull_range_partial(100, 10).err(), Some(FlowError::Eos));

        assert!(sink.set_active(false));
        assert_eq!(src.mode(), PadMode::None);
    }

    #[test]
    fn test_pull_mode_needs_scheduling_support() {
        let src = Pad::new("src", PadDirection::Src);
        let sink = Pad::new("sink", PadDirection::Sink);
        src.link(&sink).unwrap();
        assert!(!sink.activate_mode(PadMode::Pull, true));
        assert_eq!(sink.mode(), PadMode::None);
    }

    #[test]
    fn test_probe_drop_and_remove() {
        let (src, sink) = linked_pair(Caps::new_any(), Caps::new_any());
        let count = counting_sink(&sink);

        let id = src.add_probe(ProbeMask::BUFFER, |_, _| ProbeReturn::Drop);
        assert_eq!(src.push(Buffer::with_size(1)), Ok(FlowSuccess::Ok));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(src.remove_probe(id));

        let seen = Arc::new(AtomicUsize::new(0));
        let probe_seen = seen.clone();
        src.add_probe(ProbeMask::BUFFER, move |_, _| {
            probe_seen.fetch_add(1, Ordering::SeqCst);
            ProbeReturn::Remove
        });
        src.push(Buffer::with_size(1)).unwrap();
        src.push(Buffer::with_size(1)).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_probe_can_replace_buffer() {
        let (src, sink) = linked_pair(Caps::new_any(), Caps::new_any());
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let log = sizes.clone();
        sink.set_chain_function(move |_, _, buffer| {
            log.lock().push(buffer.size());
            Ok(FlowSuccess::Ok)
        });
        src.add_probe(ProbeMask::BUFFER, |_, data| {
            if let ProbeData::Buffer(buffer) = data {
                *buffer = Buffer::with_size(buffer.size() * 2);
            }
            ProbeReturn::Ok
        });
        src.push(Buffer::with_size(3)).unwrap();
        assert_eq!(*sizes.lock(), vec![6]);
    }

    #[test]
    fn test_deactivate_clears_sticky() {
        let (src, _sink) = linked_pair(Caps::new_any(), Caps::new_any());
        src.push_event(Event::stream_start("s"));
        assert_eq!(src.sticky_events().len(), 1);
        assert!(src.set_active(false));
        assert!(src.sticky_events().is_empty());
        assert!(src.is_flushing());
    }
}
