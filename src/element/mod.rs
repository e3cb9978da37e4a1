//! Elements: the processing nodes of a pipeline.
//!
//! An [`Element`] is a cheap, cloneable handle around a user implementation
//! of [`ElementImpl`]. The handle owns what every element has in common:
//!
//! - a name and an optional parent bin
//! - its pads (see [`pad`])
//! - the state machine driving it through `NULL < READY < PAUSED < PLAYING`
//!
//! The implementation supplies the behaviour: it creates pads in
//! [`ElementImpl::constructed`], installs chain/event/query functions on them
//! and reacts to state transitions in [`ElementImpl::change_state`].
//!
//! # State changes
//!
//! [`Element::set_state`] walks adjacent states one at a time, calling
//! `change_state` for every transition. A transition may complete
//! synchronously (`Success`), later (`Async`, upward transitions only) or not
//! at all (`Failure`). An async change is finished with
//! [`Element::continue_state`] or [`Element::complete_async`]; the element
//! then posts `AsyncDone` to its parent.
//!
//! # Example
//!
//! ```rust
//! use padflow::element::{Element, ElementImpl, State};
//!
//! struct Nothing;
//! impl ElementImpl for Nothing {}
//!
//! let element = Element::new("nothing0", Nothing);
//! element.set_state(State::Playing).unwrap();
//! assert_eq!(element.current_state(), State::Playing);
//! element.set_state(State::Null).unwrap();
//! ```

pub mod collect_pads;
pub mod pad;
pub mod state;

pub use collect_pads::{CollectData, CollectPads, Collected};
pub use pad::{
    Pad, PadDirection, PadLinkError, PadMode, PadPresence, PadTemplate, ProbeData, ProbeId,
    ProbeMask, ProbeReturn, WeakPad,
};
pub use state::{State, StateChange, StateChangeError, StateChangeResult, StateChangeSuccess};

use crate::clock::{Clock, ClockTime};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::observability::{record_state_change, span_element};
use crate::pipeline::bus::{Bus, Message, MessageKind};
use crate::pipeline::parser::PropertyValue;
use crate::query::Query;
use parking_lot::{Condvar, Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

// ============================================================================
// ElementImpl
// ============================================================================

/// Behaviour of an element.
///
/// Every hook receives the [`Element`] handle wrapping the implementation.
/// All hooks have defaults, so an implementation only overrides what it
/// needs.
pub trait ElementImpl: Send + Sync + 'static {
    /// Called once by [`Element::new`]; create always-present pads here.
    fn constructed(&self, element: &Element) {
        let _ = element;
    }

    /// Templates of the pads this element can have.
    fn pad_templates(&self) -> Vec<PadTemplate> {
        Vec::new()
    }

    /// React to one state transition.
    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
        element.default_change_state(transition)
    }

    /// Set a property from a launch description or the application.
    fn set_property(&self, element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        let _ = value;
        Err(Error::invalid_property(element.name(), name, "no such property"))
    }

    /// Create a request pad named `name` from `template`.
    fn request_new_pad(&self, element: &Element, template: &PadTemplate, name: &str) -> Option<Pad> {
        let _ = (element, template, name);
        None
    }

    /// A request pad is about to be removed.
    fn release_pad(&self, element: &Element, pad: &Pad) {
        let _ = (element, pad);
    }

    /// Handle a message posted by a child. Non-bins never see one.
    fn handle_message(&self, element: &Element, message: Message) {
        element.post_message(message);
    }

    /// Handle an event sent to the element by the application.
    fn send_event(&self, element: &Element, event: Event) -> bool {
        element.default_send_event(event)
    }

    /// Answer a query sent to the element.
    fn query(&self, element: &Element, query: &mut Query) -> bool {
        element.default_query(query)
    }

    /// Whether a pending async state change may complete now.
    fn async_ready(&self, element: &Element) -> bool {
        let _ = element;
        true
    }

    /// A clock was distributed to the element.
    fn set_clock(&self, element: &Element, clock: Option<&Arc<dyn Clock>>) {
        let _ = (element, clock);
    }
}

// ============================================================================
// Element
// ============================================================================

struct ElementObject {
    current: State,
    next: Option<State>,
    pending: Option<State>,
    target: State,
    last_return: StateChangeResult,
    pads: Vec<Pad>,
    parent: Option<WeakElement>,
    bus: Option<Bus>,
    clock: Option<Arc<dyn Clock>>,
    base_time: ClockTime,
    pad_serial: u32,
}

struct ElementInner {
    name: String,
    imp: Arc<dyn ElementImpl>,
    imp_any: Arc<dyn Any + Send + Sync>,
    state_lock: ReentrantMutex<()>,
    object: Mutex<ElementObject>,
    state_cond: Condvar,
}

/// Handle to an element. Clones refer to the same element.
#[derive(Clone)]
pub struct Element(Arc<ElementInner>);

/// Non-owning element reference, used for parents.
#[derive(Clone)]
pub struct WeakElement(Weak<ElementInner>);

impl WeakElement {
    /// The element, if it still exists.
    pub fn upgrade(&self) -> Option<Element> {
        self.0.upgrade().map(Element)
    }
}

impl Element {
    /// Wrap `imp` and run its `constructed` hook.
    pub fn new<T: ElementImpl>(name: impl Into<String>, imp: T) -> Self {
        let imp = Arc::new(imp);
        let element = Element(Arc::new(ElementInner {
            name: name.into(),
            imp: imp.clone(),
            imp_any: imp,
            state_lock: ReentrantMutex::new(()),
            object: Mutex::new(ElementObject {
                current: State::Null,
                next: None,
                pending: None,
                target: State::Null,
                last_return: Ok(StateChangeSuccess::Success),
                pads: Vec::new(),
                parent: None,
                bus: None,
                clock: None,
                base_time: ClockTime::ZERO,
                pad_serial: 0,
            }),
            state_cond: Condvar::new(),
        }));
        element.0.imp.constructed(&element);
        element
    }

    /// Get the element's name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The implementation, if it is a `T`.
    pub fn imp<T: ElementImpl>(&self) -> Option<&T> {
        self.0.imp_any.downcast_ref::<T>()
    }

    /// Non-owning handle.
    pub fn downgrade(&self) -> WeakElement {
        WeakElement(Arc::downgrade(&self.0))
    }

    /// Whether both handles refer to the same element.
    pub fn ptr_eq(&self, other: &Element) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// The bin containing this element.
    pub fn parent(&self) -> Option<Element> {
        self.0.object.lock().parent.as_ref().and_then(WeakElement::upgrade)
    }

    pub(crate) fn set_parent(&self, parent: Option<&Element>) {
        self.0.object.lock().parent = parent.map(Element::downgrade);
    }

    /// Hold the state lock, keeping state changes out.
    pub fn state_lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.0.state_lock.lock()
    }

    /// Set a property.
    pub fn set_property(&self, name: &str, value: impl Into<PropertyValue>) -> Result<()> {
        self.0.imp.set_property(self, name, &value.into())
    }

    // ------------------------------------------------------------------------
    // Bus, clock
    // ------------------------------------------------------------------------

    /// Bus messages end up on when the element has no parent.
    pub fn bus(&self) -> Option<Bus> {
        self.0.object.lock().bus.clone()
    }

    /// Attach a bus.
    pub fn set_bus(&self, bus: Option<Bus>) {
        self.0.object.lock().bus = bus;
    }

    /// Post a message: to the parent bin if there is one, else to the bus.
    ///
    /// Returns false when the message was dropped.
    pub fn post_message(&self, message: Message) -> bool {
        if let Some(parent) = self.parent() {
            parent.0.imp.handle_message(&parent, message);
            return true;
        }
        match self.bus() {
            Some(bus) => bus.post(message),
            None => {
                trace!(element = %self.name(), kind = message.kind.name(), "no bus, message dropped");
                false
            }
        }
    }

    /// Post an error message and log it.
    pub fn post_error(&self, domain: &str, text: impl Into<String>, debug: Option<String>) {
        let text = text.into();
        error!(element = %self.name(), domain, %text, "element error");
        self.post_message(Message::error(self.name(), domain, text, debug));
    }

    /// Clock used for synchronization.
    pub fn clock(&self) -> Option<Arc<dyn Clock>> {
        self.0.object.lock().clock.clone()
    }

    /// Set the clock.
    pub fn set_clock(&self, clock: Option<Arc<dyn Clock>>) {
        self.0.object.lock().clock = clock.clone();
        self.0.imp.set_clock(self, clock.as_ref());
    }

    /// Clock time at which running time was zero.
    pub fn base_time(&self) -> ClockTime {
        self.0.object.lock().base_time
    }

    /// Set the base time.
    pub fn set_base_time(&self, base_time: ClockTime) {
        self.0.object.lock().base_time = base_time;
    }

    /// Clock time minus base time, `NONE` without clock.
    pub fn current_running_time(&self) -> ClockTime {
        let (clock, base) = {
            let object = self.0.object.lock();
            (object.clock.clone(), object.base_time)
        };
        match clock {
            Some(clock) => clock.time().saturating_sub(base),
            None => ClockTime::NONE,
        }
    }

    // ------------------------------------------------------------------------
    // Pads
    // ------------------------------------------------------------------------

    /// Add a pad. It is activated if the element is at least PAUSED.
    pub fn add_pad(&self, pad: &Pad) -> Result<()> {
        if pad.parent().is_some() {
            return Err(Error::PadExists {
                element: self.name().to_string(),
                pad: pad.name().to_string(),
            });
        }
        let active = {
            let mut object = self.0.object.lock();
            if object.pads.iter().any(|p| p.name() == pad.name()) {
                return Err(Error::PadExists {
                    element: self.name().to_string(),
                    pad: pad.name().to_string(),
                });
            }
            object.pads.push(pad.clone());
            object.current >= State::Paused || object.next == Some(State::Paused)
        };
        pad.set_parent(Some(self));
        if active && !pad.set_active(true) {
            warn!(element = %self.name(), pad = %pad.name(), "failed to activate new pad");
        }
        debug!(element = %self.name(), pad = %pad.name(), direction = ?pad.direction(), "pad added");
        self.post_message(Message::new(
            self.name(),
            MessageKind::PadAdded {
                pad: pad.name().to_string(),
            },
        ));
        Ok(())
    }

    /// Remove a pad: deactivate, unlink and detach it.
    pub fn remove_pad(&self, pad: &Pad) -> Result<()> {
        {
            let mut object = self.0.object.lock();
            let Some(index) = object.pads.iter().position(|p| p.ptr_eq(pad)) else {
                return Err(Error::PadNotFound {
                    element: self.name().to_string(),
                    pad: pad.name().to_string(),
                });
            };
            object.pads.remove(index);
        }
        pad.set_active(false);
        if let Some(peer) = pad.peer() {
            match pad.direction() {
                PadDirection::Src => pad.unlink(&peer),
                PadDirection::Sink => peer.unlink(pad),
            };
        }
        pad.set_parent(None);
        debug!(element = %self.name(), pad = %pad.name(), "pad removed");
        self.post_message(Message::new(
            self.name(),
            MessageKind::PadRemoved {
                pad: pad.name().to_string(),
            },
        ));
        Ok(())
    }

    /// All pads, in the order they were added.
    pub fn pads(&self) -> Vec<Pad> {
        self.0.object.lock().pads.clone()
    }

    /// Src pads.
    pub fn src_pads(&self) -> Vec<Pad> {
        self.pads_by_direction(PadDirection::Src)
    }

    /// Sink pads.
    pub fn sink_pads(&self) -> Vec<Pad> {
        self.pads_by_direction(PadDirection::Sink)
    }

    fn pads_by_direction(&self, direction: PadDirection) -> Vec<Pad> {
        self.0
            .object
            .lock()
            .pads
            .iter()
            .filter(|p| p.direction() == direction)
            .cloned()
            .collect()
    }

    /// The pad named `name`.
    pub fn static_pad(&self, name: &str) -> Option<Pad> {
        self.0.object.lock().pads.iter().find(|p| p.name() == name).cloned()
    }

    /// Template named `name`.
    pub fn pad_template(&self, name: &str) -> Option<PadTemplate> {
        self.0
            .imp
            .pad_templates()
            .into_iter()
            .find(|t| t.name_template == name)
    }

    /// Create a pad from the request template `template_name`, e.g. `sink_%u`.
    ///
    /// Pass a concrete name such as `sink_3` to pick the pad name; a template
    /// name gets the next free index.
    pub fn request_pad(&self, template_name: &str) -> Option<Pad> {
        let templates = self.0.imp.pad_templates();
        let template = templates.iter().find(|t| {
            t.presence == PadPresence::Request
                && (t.name_template == template_name || t.matches_name(template_name))
        })?;
        let name = if template.name_template == template_name {
            let mut object = self.0.object.lock();
            loop {
                let candidate = template.expand(object.pad_serial);
                object.pad_serial += 1;
                if !object.pads.iter().any(|p| p.name() == candidate) {
                    break candidate;
                }
            }
        } else {
            template_name.to_string()
        };
        let pad = self.0.imp.request_new_pad(self, template, &name)?;
        if pad.parent().is_none() && self.add_pad(&pad).is_err() {
            return None;
        }
        Some(pad)
    }

    /// Release a pad obtained from [`request_pad`](Self::request_pad).
    pub fn release_request_pad(&self, pad: &Pad) -> Result<()> {
        self.0.imp.release_pad(self, pad);
        self.remove_pad(pad)
    }

    // ------------------------------------------------------------------------
    // Linking
    // ------------------------------------------------------------------------

    /// Link the first free src pad of `self` to the first compatible sink pad of `dest`.
    ///
    /// A request sink pad is created on `dest` when it has no free sink pad.
    pub fn link(&self, dest: &Element) -> Result<()> {
        let srcs: Vec<Pad> = self.src_pads().into_iter().filter(|p| !p.is_linked()).collect();
        if srcs.is_empty() {
            return Err(Error::PadNotFound {
                element: self.name().to_string(),
                pad: "src".to_string(),
            });
        }
        let mut last_error = None;
        for src in &srcs {
            for sink in dest.sink_pads().into_iter().filter(|p| !p.is_linked()) {
                match src.link(&sink) {
                    Ok(()) => return Ok(()),
                    Err(e) => last_error = Some(e),
                }
            }
        }
        let request = dest
            .0
            .imp
            .pad_templates()
            .into_iter()
            .find(|t| t.direction == PadDirection::Sink && t.presence == PadPresence::Request);
        if let Some(template) = request
            && let Some(sink) = dest.request_pad(&template.name_template)
        {
            for src in &srcs {
                match src.link(&sink) {
                    Ok(()) => return Ok(()),
                    Err(e) => last_error = Some(e),
                }
            }
            if let Err(e) = dest.release_request_pad(&sink) {
                warn!(element = %dest.name(), pad = %sink.name(), error = %e, "cannot release unlinked request pad");
            }
        }
        match last_error {
            Some(e) => Err(e.into()),
            None => Err(Error::PadNotFound {
                element: dest.name().to_string(),
                pad: "sink".to_string(),
            }),
        }
    }

    /// Link pad `src_pad` of `self` to pad `sink_pad` of `dest`.
    ///
    /// A sink pad name matching a request template creates the pad.
    pub fn link_pads(&self, src_pad: &str, dest: &Element, sink_pad: &str) -> Result<()> {
        let src = self.static_pad(src_pad).ok_or_else(|| Error::PadNotFound {
            element: self.name().to_string(),
            pad: src_pad.to_string(),
        })?;
        let sink = dest
            .static_pad(sink_pad)
            .or_else(|| dest.request_pad(sink_pad))
            .ok_or_else(|| Error::PadNotFound {
                element: dest.name().to_string(),
                pad: sink_pad.to_string(),
            })?;
        src.link(&sink)?;
        Ok(())
    }

    /// Link a chain of elements pairwise.
    pub fn link_many(elements: &[&Element]) -> Result<()> {
        for pair in elements.windows(2) {
            pair[0].link(pair[1])?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Events and queries
    // ------------------------------------------------------------------------

    /// Send an event into the element from the application.
    pub fn send_event(&self, event: Event) -> bool {
        debug!(element = %self.name(), event = event.name(), "send event");
        self.0.imp.send_event(self, event)
    }

    /// Push downstream events out of the src pads, upstream events out of the sink pads.
    pub fn default_send_event(&self, event: Event) -> bool {
        let pads = if event.is_downstream() {
            self.src_pads()
        } else {
            self.sink_pads()
        };
        let mut handled = false;
        for pad in pads {
            handled |= pad.push_event(event.clone());
        }
        handled
    }

    /// Ask the element.
    pub fn query(&self, query: &mut Query) -> bool {
        self.0.imp.query(self, query)
    }

    /// Position and duration go upstream through the sink pads, the rest
    /// downstream through the src pads.
    pub fn default_query(&self, query: &mut Query) -> bool {
        let pads = match query {
            Query::Position { .. } | Query::Duration { .. } => self.sink_pads(),
            _ => self.src_pads(),
        };
        pads.iter().any(|pad| pad.peer_query(query))
    }

    // ------------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------------

    /// Committed state.
    pub fn current_state(&self) -> State {
        self.0.object.lock().current
    }

    /// State the element is heading to, if a change is in progress.
    pub fn pending_state(&self) -> Option<State> {
        self.0.object.lock().pending
    }

    /// Last requested state.
    pub fn target_state(&self) -> State {
        self.0.object.lock().target
    }

    /// Whether an async state change is waiting for completion.
    pub fn is_async_pending(&self) -> bool {
        let object = self.0.object.lock();
        object.pending.is_some() && object.last_return == Ok(StateChangeSuccess::Async)
    }

    /// Request `target`, visiting every state in between.
    ///
    /// While an upward async change is pending, a request for the same or a
    /// higher state returns `Async` and extends the pending state. A request
    /// for a lower state starts from the state being reached.
    pub fn set_state(&self, target: State) -> StateChangeResult {
        let _state = self.0.state_lock.lock();
        let current = {
            let mut object = self.0.object.lock();
            if object.last_return.is_err() {
                object.next = None;
                object.pending = None;
                object.last_return = Ok(StateChangeSuccess::Success);
            }
            object.target = target;
            let mut current = object.current;
            if let Some(old_pending) = object.pending {
                if old_pending <= target || object.next == Some(target) {
                    debug!(element = %self.name(), %target, "busy with async state change");
                    object.pending = Some(target);
                    return Ok(StateChangeSuccess::Async);
                }
                if let Some(next) = object.next
                    && next > target
                    && object.last_return == Ok(StateChangeSuccess::Async)
                {
                    current = next;
                    object.current = next;
                }
            }
            if current == target {
                object.pending = None;
                object.next = None;
                let last = match object.last_return {
                    Ok(StateChangeSuccess::NoPreroll) => StateChangeSuccess::NoPreroll,
                    _ => StateChangeSuccess::Success,
                };
                object.last_return = Ok(last);
                self.0.state_cond.notify_all();
                return Ok(last);
            }
            object.pending = Some(target);
            current
        };
        debug!(element = %self.name(), from = %current, to = %target, "set state");
        self.run_transitions(current)
    }

    fn run_transitions(&self, mut current: State) -> StateChangeResult {
        loop {
            let transition = {
                let mut object = self.0.object.lock();
                let Some(pending) = object.pending else {
                    return object.last_return;
                };
                let next = current.step_toward(pending);
                let Some(transition) = StateChange::new(current, next) else {
                    return object.last_return;
                };
                object.next = Some(next);
                object.last_return = Ok(StateChangeSuccess::Async);
                transition
            };

            let result = {
                let _span = span_element(self.name()).entered();
                self.0.imp.change_state(self, transition)
            };
            record_state_change(self.name(), transition.name());

            match result {
                Err(e) => {
                    warn!(element = %self.name(), transition = transition.name(), "state change failed");
                    self.abort_state();
                    return Err(e);
                }
                Ok(StateChangeSuccess::Async) if transition.is_upward() => {
                    debug!(element = %self.name(), transition = transition.name(), "state change async");
                    return Ok(StateChangeSuccess::Async);
                }
                Ok(success) => {
                    let success = match success {
                        StateChangeSuccess::Async => StateChangeSuccess::Success,
                        other => other,
                    };
                    match self.commit_step(success) {
                        Some(next) => current = next,
                        None => return Ok(success),
                    }
                }
            }
        }
    }

    /// Commit `next` as the current state and post `StateChanged`.
    ///
    /// Returns the new state if the pending state is not reached yet.
    fn commit_step(&self, success: StateChangeSuccess) -> Option<State> {
        let (old, new, pending) = {
            let mut object = self.0.object.lock();
            let old = object.current;
            let new = object.next.take().unwrap_or(old);
            object.current = new;
            let pending = object.pending.filter(|p| *p != new);
            if pending.is_none() {
                object.pending = None;
                object.last_return = Ok(success);
                self.0.state_cond.notify_all();
            }
            (old, new, pending)
        };
        debug!(element = %self.name(), %old, %new, ?pending, "state committed");
        self.post_message(Message::new(
            self.name(),
            MessageKind::StateChanged { old, new, pending },
        ));
        pending.map(|_| new)
    }

    /// Finish a pending async state change with `result` and continue to the pending state.
    ///
    /// Posts `AsyncDone` once the element settled. Does nothing unless an
    /// async change is pending. Takes the state lock: streaming threads use
    /// [`complete_async`](Self::complete_async) instead.
    pub fn continue_state(&self, result: StateChangeResult) -> StateChangeResult {
        let _state = self.0.state_lock.lock();
        {
            let object = self.0.object.lock();
            if object.pending.is_none() || object.last_return != Ok(StateChangeSuccess::Async) {
                return object.last_return;
            }
        }
        let success = match result {
            Err(e) => {
                self.abort_state();
                return Err(e);
            }
            Ok(StateChangeSuccess::Async) => return Ok(StateChangeSuccess::Async),
            Ok(success) => success,
        };
        let result = match self.commit_step(success) {
            Some(current) => self.run_transitions(current),
            None => Ok(success),
        };
        if result.is_ok() && result != Ok(StateChangeSuccess::Async) {
            debug!(element = %self.name(), state = %self.current_state(), "async state change done");
            self.post_message(Message::new(self.name(), MessageKind::AsyncDone));
        }
        result
    }

    /// Finish a pending async state change from another thread.
    ///
    /// Safe to call while holding a stream lock: a helper thread waits for
    /// the state lock, asks [`ElementImpl::async_ready`] and then continues
    /// the state change.
    pub fn complete_async(&self) {
        let element = self.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("{}:async", self.name()))
            .spawn(move || {
                let _state = element.0.state_lock.lock();
                if element.is_async_pending() && element.0.imp.async_ready(&element) {
                    if let Err(e) = element.continue_state(Ok(StateChangeSuccess::Success)) {
                        warn!(element = %element.name(), error = %e, "async state change did not complete");
                    }
                }
            });
        if let Err(e) = spawned {
            error!(element = %self.name(), error = %e, "cannot spawn async completion thread");
        }
    }

    /// Mark a pending state change as failed and wake waiters.
    pub fn abort_state(&self) {
        let mut object = self.0.object.lock();
        if object.last_return.is_err() {
            return;
        }
        debug!(element = %self.name(), current = %object.current, "state change aborted");
        object.next = None;
        object.last_return = Err(StateChangeError);
        self.0.state_cond.notify_all();
    }

    /// Overwrite the committed state without running transitions.
    ///
    /// Used by bins whose state follows their children. Ignored while a
    /// state change is pending.
    pub(crate) fn force_current_state(&self, state: State) {
        let old = {
            let mut object = self.0.object.lock();
            if object.pending.is_some() || object.current == state {
                return;
            }
            let old = object.current;
            object.current = state;
            object.target = state;
            object.last_return = Ok(StateChangeSuccess::Success);
            old
        };
        debug!(element = %self.name(), %old, new = %state, "state follows children");
        self.post_message(Message::new(
            self.name(),
            MessageKind::StateChanged {
                old,
                new: state,
                pending: None,
            },
        ));
    }

    /// Drop back into an async change to the current state, e.g. a sink that
    /// lost its preroll buffer after a flush.
    pub fn lost_state(&self) {
        {
            let mut object = self.0.object.lock();
            if object.pending.is_some() || object.last_return.is_err() {
                return;
            }
            let current = object.current;
            object.next = Some(current);
            object.pending = Some(current);
            object.last_return = Ok(StateChangeSuccess::Async);
        }
        debug!(element = %self.name(), "lost state");
        self.post_message(Message::new(self.name(), MessageKind::AsyncStart));
    }

    /// Wait up to `timeout` for a pending async change; `None` waits forever.
    ///
    /// Returns the last result with the current and pending states. The
    /// result is still `Async` when the timeout expired.
    pub fn get_state(
        &self,
        timeout: Option<Duration>,
    ) -> (StateChangeResult, State, Option<State>) {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut object = self.0.object.lock();
        while object.pending.is_some() && object.last_return == Ok(StateChangeSuccess::Async) {
            match deadline {
                Some(deadline) => {
                    if self.0.state_cond.wait_until(&mut object, deadline).timed_out() {
                        break;
                    }
                }
                None => self.0.state_cond.wait(&mut object),
            }
        }
        (object.last_return, object.current, object.pending)
    }

    /// Activate pads on READY to PAUSED, deactivate them on PAUSED to READY.
    pub fn default_change_state(&self, transition: StateChange) -> StateChangeResult {
        let active = match transition {
            StateChange::ReadyToPaused => true,
            StateChange::PausedToReady => false,
            _ => return Ok(StateChangeSuccess::Success),
        };
        let mut ok = true;
        for pad in self.pads() {
            if !pad.set_active(active) {
                warn!(element = %self.name(), pad = %pad.name(), active, "pad activation failed");
                ok = false;
            }
        }
        if ok || !active {
            Ok(StateChangeSuccess::Success)
        } else {
            Err(StateChangeError)
        }
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Element {}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let object = self.0.object.lock();
        f.debug_struct("Element")
            .field("name", &self.0.name)
            .field("current", &object.current)
            .field("pending", &object.pending)
            .field("pads", &object.pads.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::Caps;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        transitions: Mutex<Vec<StateChange>>,
        fail_on: Option<StateChange>,
        async_on: Option<StateChange>,
    }

    impl ElementImpl for Recorder {
        fn constructed(&self, element: &Element) {
            element.add_pad(&Pad::new("src", PadDirection::Src)).unwrap();
        }

        fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
            self.transitions.lock().push(transition);
            if self.fail_on == Some(transition) {
                return Err(StateChangeError);
            }
            if self.async_on == Some(transition) {
                return Ok(StateChangeSuccess::Async);
            }
            element.default_change_state(transition)
        }
    }

    fn recorder(name: &str, imp: Recorder) -> (Element, Bus) {
        let element = Element::new(name, imp);
        let bus = Bus::new();
        element.set_bus(Some(bus.clone()));
        (element, bus)
    }

    #[test]
    fn test_walks_adjacent_states() {
        let (element, bus) = recorder("rec", Recorder::default());
        assert_eq!(element.set_state(State::Playing), Ok(StateChangeSuccess::Success));
        assert_eq!(element.current_state(), State::Playing);
        assert_eq!(element.pending_state(), None);
        let imp = element.imp::<Recorder>().unwrap();
        assert_eq!(
            *imp.transitions.lock(),
            vec![
                StateChange::NullToReady,
                StateChange::ReadyToPaused,
                StateChange::PausedToPlaying
            ]
        );
        let mut changes = 0;
        while let Some(msg) = bus.pop() {
            if matches!(msg.kind, MessageKind::StateChanged { .. }) {
                changes += 1;
            }
        }
        assert_eq!(changes, 3);

        element.set_state(State::Null).unwrap();
        assert_eq!(imp.transitions.lock().len(), 6);
    }

    #[test]
    fn test_pads_follow_state() {
        let (element, _bus) = recorder("rec", Recorder::default());
        let pad = element.static_pad("src").unwrap();
        assert!(!pad.is_active());
        element.set_state(State::Paused).unwrap();
        assert_eq!(pad.mode(), PadMode::Push);
        element.set_state(State::Ready).unwrap();
        assert!(!pad.is_active());
    }

    #[test]
    fn test_failure_stops_walk() {
        let imp = Recorder {
            fail_on: Some(StateChange::ReadyToPaused),
            ..Recorder::default()
        };
        let (element, _bus) = recorder("rec", imp);
        assert_eq!(element.set_state(State::Playing), Err(StateChangeError));
        assert_eq!(element.current_state(), State::Ready);
        let (result, current, _) = element.get_state(Some(Duration::ZERO));
        assert_eq!(result, Err(StateChangeError));
        assert_eq!(current, State::Ready);

        // A failure does not prevent going back down.
        assert!(element.set_state(State::Null).is_ok());
        assert_eq!(element.current_state(), State::Null);
    }

    #[test]
    fn test_async_then_continue() {
        let imp = Recorder {
            async_on: Some(StateChange::ReadyToPaused),
            ..Recorder::default()
        };
        let (element, bus) = recorder("rec", imp);
        assert_eq!(element.set_state(State::Playing), Ok(StateChangeSuccess::Async));
        assert_eq!(element.current_state(), State::Ready);
        assert_eq!(element.pending_state(), Some(State::Playing));

        let (result, _, _) = element.get_state(Some(Duration::from_millis(10)));
        assert_eq!(result, Ok(StateChangeSuccess::Async));

        assert_eq!(
            element.set_state(State::Playing),
            Ok(StateChangeSuccess::Async)
        );
        assert_eq!(
            element.continue_state(Ok(StateChangeSuccess::Success)),
            Ok(StateChangeSuccess::Success)
        );
        assert_eq!(element.current_state(), State::Playing);
        let done = std::iter::from_fn(|| bus.pop()).any(|m| m.kind == MessageKind::AsyncDone);
        assert!(done);
    }

    #[test]
    fn test_async_completed_from_other_thread() {
        let imp = Recorder {
            async_on: Some(StateChange::ReadyToPaused),
            ..Recorder::default()
        };
        let (element, _bus) = recorder("rec", imp);
        assert_eq!(element.set_state(State::Paused), Ok(StateChangeSuccess::Async));
        element.complete_async();
        let (result, current, pending) = element.get_state(Some(Duration::from_secs(5)));
        assert_eq!(result, Ok(StateChangeSuccess::Success));
        assert_eq!(current, State::Paused);
        assert_eq!(pending, None);
    }

    #[test]
    fn test_downward_request_cancels_async() {
        let imp = Recorder {
            async_on: Some(StateChange::ReadyToPaused),
            ..Recorder::default()
        };
        let (element, _bus) = recorder("rec", imp);
        element.set_state(State::Paused).unwrap();
        assert_eq!(element.set_state(State::Null), Ok(StateChangeSuccess::Success));
        assert_eq!(element.current_state(), State::Null);
        let imp = element.imp::<Recorder>().unwrap();
        assert_eq!(
            imp.transitions.lock().last(),
            Some(&StateChange::ReadyToNull)
        );
        assert!(imp.transitions.lock().contains(&StateChange::PausedToReady));
    }

    #[test]
    fn test_lost_state() {
        let (element, bus) = recorder("rec", Recorder::default());
        element.set_state(State::Paused).unwrap();
        while bus.pop().is_some() {}
        element.lost_state();
        assert!(element.is_async_pending());
        assert_eq!(bus.pop().unwrap().kind, MessageKind::AsyncStart);
        element.continue_state(Ok(StateChangeSuccess::Success)).unwrap();
        assert!(!element.is_async_pending());
        assert_eq!(element.current_state(), State::Paused);
    }

    #[test]
    fn test_add_pad_posts_and_activates() {
        let (element, bus) = recorder("rec", Recorder::default());
        element.set_state(State::Paused).unwrap();
        while bus.pop().is_some() {}
        let pad = Pad::new("extra", PadDirection::Src);
        element.add_pad(&pad).unwrap();
        assert!(pad.is_active());
        assert_eq!(pad.parent(), Some(element.clone()));
        assert!(matches!(bus.pop().unwrap().kind, MessageKind::PadAdded { .. }));
        assert!(element.add_pad(&Pad::new("extra", PadDirection::Src)).is_err());

        element.remove_pad(&pad).unwrap();
        assert!(!pad.is_active());
        assert!(pad.parent().is_none());
        assert!(element.static_pad("extra").is_none());
    }

    struct Requester {
        released: AtomicUsize,
    }

    impl ElementImpl for Requester {
        fn pad_templates(&self) -> Vec<PadTemplate> {
            vec![PadTemplate::request(
                "sink_%u",
                PadDirection::Sink,
                Caps::new_any(),
            )]
        }

        fn request_new_pad(&self, _element: &Element, template: &PadTemplate, name: &str) -> Option<Pad> {
            Some(Pad::from_template(template, name))
        }

        fn release_pad(&self, _element: &Element, _pad: &Pad) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_request_pads() {
        let element = Element::new(
            "req",
            Requester {
                released: AtomicUsize::new(0),
            },
        );
        let a = element.request_pad("sink_%u").unwrap();
        let b = element.request_pad("sink_%u").unwrap();
        assert_eq!(a.name(), "sink_0");
        assert_eq!(b.name(), "sink_1");
        let named = element.request_pad("sink_7").unwrap();
        assert_eq!(named.name(), "sink_7");
        assert!(element.request_pad("src_%u").is_none());

        element.release_request_pad(&a).unwrap();
        assert_eq!(element.sink_pads().len(), 2);
        assert_eq!(
            element.imp::<Requester>().unwrap().released.load(Ordering::SeqCst),
            1
        );
    }

    #[test]
    fn test_link_uses_request_pad() {
        let src = Element::new("rec", Recorder::default());
        let sink = Element::new(
            "req",
            Requester {
                released: AtomicUsize::new(0),
            },
        );
        src.link(&sink).unwrap();
        assert_eq!(sink.sink_pads()[0].peer(), src.static_pad("src"));
    }

    #[test]
    fn test_unknown_property() {
        let element = Element::new("rec", Recorder::default());
        let err = element.set_property("nope", 1i64).unwrap_err();
        assert!(matches!(err, Error::InvalidProperty { .. }));
    }
}
