//! Bins: elements containing other elements.
//!
//! A [`Bin`] forwards state changes to its children, sinks first, and
//! combines their results:
//!
//! - any failure fails the bin
//! - `NoPreroll` from a live child wins over `Async`
//! - `Async` from a child makes the bin async until every child posted
//!   `AsyncDone`
//!
//! An empty bin has nothing to confirm an upward change, so it answers
//! `Async` and completes on its own shortly after.
//!
//! Messages posted by children pass through the bin. The bin swallows
//! `AsyncDone` (it posts its own once complete) and aggregates EOS: only
//! when every sink child reported EOS does the bin post a single EOS.

use crate::clock::{Clock, ClockTime};
use crate::element::{
    Element, ElementImpl, State, StateChange, StateChangeError, StateChangeResult,
    StateChangeSuccess,
};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::pipeline::bus::{Message, MessageKind};
use crate::query::Query;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, warn};

// ============================================================================
// Shared state
// ============================================================================

/// Clock bookkeeping of a top-level bin.
pub(crate) struct TopLevel {
    clock: Arc<dyn Clock>,
    /// Running time reached when the bin last left PLAYING.
    start_time: Mutex<ClockTime>,
}

impl TopLevel {
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            start_time: Mutex::new(ClockTime::ZERO),
        }
    }
}

#[derive(Default)]
struct Children {
    list: Vec<Element>,
    /// Names of sink children that posted EOS.
    eos: HashSet<String>,
}

struct BinState {
    children: Mutex<Children>,
    toplevel: Option<TopLevel>,
}

/// [`ElementImpl`] of every bin. Reach the bin API through [`Bin`].
pub struct BinImpl {
    state: Arc<BinState>,
}

impl BinImpl {
    fn new(toplevel: Option<TopLevel>) -> Self {
        Self {
            state: Arc::new(BinState {
                children: Mutex::new(Children::default()),
                toplevel,
            }),
        }
    }
}

// ============================================================================
// Bin
// ============================================================================

/// Handle to a bin. Derefs to its [`Element`].
#[derive(Clone)]
pub struct Bin {
    element: Element,
    state: Arc<BinState>,
}

impl Bin {
    /// Create an empty bin.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_impl(name, BinImpl::new(None))
    }

    pub(crate) fn new_toplevel(name: impl Into<String>, toplevel: TopLevel) -> Self {
        Self::with_impl(name, BinImpl::new(Some(toplevel)))
    }

    fn with_impl(name: impl Into<String>, imp: BinImpl) -> Self {
        let state = imp.state.clone();
        Bin {
            element: Element::new(name, imp),
            state,
        }
    }

    /// The bin behind `element`, if it is one.
    pub fn from_element(element: &Element) -> Option<Bin> {
        element.imp::<BinImpl>().map(|imp| Bin {
            element: element.clone(),
            state: imp.state.clone(),
        })
    }

    /// The bin as a plain element.
    pub fn element(&self) -> &Element {
        &self.element
    }

    /// Add `child` and bring it up to the bin's state.
    ///
    /// The bin's state then follows the highest child state.
    pub fn add(&self, child: &Element) -> Result<()> {
        if child.ptr_eq(&self.element) || child.parent().is_some() {
            return Err(Error::AlreadyInBin(child.name().to_string()));
        }
        {
            let mut children = self.state.children.lock();
            if children.list.iter().any(|c| c.name() == child.name()) {
                return Err(Error::AlreadyInBin(child.name().to_string()));
            }
            children.list.push(child.clone());
        }
        child.set_parent(Some(&self.element));
        if let Some(clock) = self.element.clock() {
            distribute_clock(child, Some(clock), self.element.base_time());
        }
        debug!(bin = %self.element.name(), child = %child.name(), "child added");

        let floor = self.element.current_state();
        if child.current_state() < floor && child.set_state(floor).is_err() {
            warn!(bin = %self.element.name(), child = %child.name(), state = %floor, "child cannot reach bin state");
            let transition = StateChange::new(
                child.current_state(),
                child.current_state().step_toward(floor),
            );
            if let Err(e) = self.remove(child) {
                warn!(bin = %self.element.name(), child = %child.name(), error = %e, "cannot remove rejected child");
            }
            return Err(match transition {
                Some(transition) => Error::StateChange {
                    element: child.name().to_string(),
                    transition,
                },
                None => Error::NotInBin(child.name().to_string()),
            });
        }
        self.follow_children();
        Ok(())
    }

    /// Add several children.
    pub fn add_many(&self, children: &[&Element]) -> Result<()> {
        children.iter().try_for_each(|child| self.add(child))
    }

    /// Remove `child`. The bin's state drops to the highest remaining child
    /// state, NULL when none is left.
    pub fn remove(&self, child: &Element) -> Result<()> {
        {
            let mut children = self.state.children.lock();
            let Some(index) = children.list.iter().position(|c| c.ptr_eq(child)) else {
                return Err(Error::NotInBin(child.name().to_string()));
            };
            children.list.remove(index);
            children.eos.remove(child.name());
        }
        child.set_parent(None);
        debug!(bin = %self.element.name(), child = %child.name(), "child removed");
        if self.element.is_async_pending() {
            self.element.complete_async();
        } else {
            self.follow_children();
        }
        Ok(())
    }

    fn follow_children(&self) {
        let highest = self
            .children()
            .iter()
            .map(Element::current_state)
            .max()
            .unwrap_or(State::Null);
        self.element.force_current_state(highest);
    }

    /// Direct child named `name`, searching nested bins too.
    pub fn by_name(&self, name: &str) -> Option<Element> {
        for child in self.children() {
            if child.name() == name {
                return Some(child);
            }
            if let Some(found) = Bin::from_element(&child).and_then(|b| b.by_name(name)) {
                return Some(found);
            }
        }
        None
    }

    /// Children in the order they were added.
    pub fn children(&self) -> Vec<Element> {
        self.state.children.lock().list.clone()
    }

    /// Children ordered sinks first: every element comes before the
    /// elements feeding it. Elements in a loop keep insertion order.
    pub fn iterate_sorted(&self) -> Vec<Element> {
        sorted_sinks_first(&self.children())
    }

    /// Running time at which a top-level bin last paused.
    pub(crate) fn start_time(&self) -> Option<ClockTime> {
        self.state.toplevel.as_ref().map(|t| *t.start_time.lock())
    }

    fn sink_children(&self) -> Vec<Element> {
        self.children()
            .into_iter()
            .filter(|c| c.src_pads().is_empty())
            .collect()
    }

    fn source_children(&self) -> Vec<Element> {
        self.children()
            .into_iter()
            .filter(|c| c.sink_pads().is_empty())
            .collect()
    }

    fn any_child_async(&self) -> bool {
        self.children().iter().any(Element::is_async_pending)
    }
}

impl Deref for Bin {
    type Target = Element;

    fn deref(&self) -> &Element {
        &self.element
    }
}

impl fmt::Debug for Bin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bin")
            .field("name", &self.element.name())
            .field("state", &self.element.current_state())
            .field("children", &self.state.children.lock().list.len())
            .finish()
    }
}

/// Set base time and clock; bins pass both on to their children.
fn distribute_clock(element: &Element, clock: Option<Arc<dyn Clock>>, base_time: ClockTime) {
    element.set_base_time(base_time);
    element.set_clock(clock);
}

/// Reverse topological order of `children` over their pad links.
fn sorted_sinks_first(children: &[Element]) -> Vec<Element> {
    let index_of = |element: &Element| children.iter().position(|c| c.ptr_eq(element));
    // downstream[i]: children fed by i
    let downstream: Vec<Vec<usize>> = children
        .iter()
        .map(|child| {
            let mut targets: Vec<usize> = child
                .src_pads()
                .iter()
                .filter_map(|pad| pad.peer()?.parent())
                .filter_map(|peer| index_of(&peer))
                .collect();
            targets.sort_unstable();
            targets.dedup();
            targets
        })
        .collect();

    let mut pending: Vec<usize> = downstream.iter().map(Vec::len).collect();
    let mut done = vec![false; children.len()];
    let mut order = Vec::with_capacity(children.len());
    loop {
        let Some(next) = (0..children.len()).find(|&i| !done[i] && pending[i] == 0) else {
            break;
        };
        done[next] = true;
        order.push(children[next].clone());
        for (i, targets) in downstream.iter().enumerate() {
            if !done[i] && targets.contains(&next) {
                pending[i] -= 1;
            }
        }
    }
    order.extend(
        children
            .iter()
            .enumerate()
            .filter(|(i, _)| !done[*i])
            .map(|(_, c)| c.clone()),
    );
    order
}

// ============================================================================
// ElementImpl
// ============================================================================

impl ElementImpl for BinImpl {
    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
        let Some(bin) = Bin::from_element(element) else {
            return Err(StateChangeError);
        };

        match transition {
            StateChange::ReadyToPaused => {
                self.state.children.lock().eos.clear();
                if let Some(toplevel) = &self.state.toplevel {
                    *toplevel.start_time.lock() = ClockTime::ZERO;
                }
            }
            StateChange::PausedToPlaying => {
                if let Some(toplevel) = &self.state.toplevel {
                    let start = *toplevel.start_time.lock();
                    let base_time = toplevel.clock.time().saturating_sub(start);
                    debug!(bin = %element.name(), %base_time, "distributing clock");
                    distribute_clock(element, Some(toplevel.clock.clone()), base_time);
                }
            }
            _ => {}
        }

        let children = bin.iterate_sorted();
        if children.is_empty() {
            if transition.is_upward() {
                element.complete_async();
                return Ok(StateChangeSuccess::Async);
            }
            return Ok(StateChangeSuccess::Success);
        }

        let next = transition.next();
        let mut no_preroll = false;
        let mut is_async = false;
        let mut failed = false;
        for child in &children {
            match child.set_state(next) {
                Ok(StateChangeSuccess::Success) => {}
                Ok(StateChangeSuccess::Async) => is_async = true,
                Ok(StateChangeSuccess::NoPreroll) => no_preroll = true,
                Err(e) => {
                    warn!(bin = %element.name(), child = %child.name(), transition = transition.name(), "child failed state change");
                    if transition.is_upward() {
                        return Err(e);
                    }
                    failed = true;
                }
            }
        }

        if transition == StateChange::PlayingToPaused
            && let Some(toplevel) = &self.state.toplevel
        {
            *toplevel.start_time.lock() = toplevel.clock.time().saturating_sub(element.base_time());
        }

        if failed {
            return Err(StateChangeError);
        }
        if no_preroll {
            return Ok(StateChangeSuccess::NoPreroll);
        }
        if is_async && bin.any_child_async() {
            return Ok(StateChangeSuccess::Async);
        }
        Ok(StateChangeSuccess::Success)
    }

    fn handle_message(&self, element: &Element, message: Message) {
        match &message.kind {
            MessageKind::AsyncDone => {
                debug!(bin = %element.name(), child = %message.source, "child async done");
                if element.is_async_pending() {
                    element.complete_async();
                }
            }
            MessageKind::AsyncStart => {
                if element.current_state() >= State::Paused {
                    element.lost_state();
                }
            }
            MessageKind::Eos => {
                let complete = {
                    let mut children = self.state.children.lock();
                    children.eos.insert(message.source.clone());
                    let sinks: Vec<&Element> = children
                        .list
                        .iter()
                        .filter(|c| c.src_pads().is_empty())
                        .collect();
                    !sinks.is_empty() && sinks.iter().all(|c| children.eos.contains(c.name()))
                };
                debug!(bin = %element.name(), child = %message.source, complete, "child eos");
                if complete {
                    element.post_message(Message::new(element.name(), MessageKind::Eos));
                }
            }
            _ => {
                element.post_message(message);
            }
        }
    }

    fn send_event(&self, element: &Element, event: Event) -> bool {
        let Some(bin) = Bin::from_element(element) else {
            return false;
        };
        let targets = if event.is_upstream() {
            bin.sink_children()
        } else {
            bin.source_children()
        };
        let mut handled = false;
        for child in targets {
            handled |= child.send_event(event.clone());
        }
        handled
    }

    fn query(&self, element: &Element, query: &mut Query) -> bool {
        let Some(bin) = Bin::from_element(element) else {
            return false;
        };
        bin.sink_children().iter().any(|child| child.query(query))
    }

    fn async_ready(&self, element: &Element) -> bool {
        Bin::from_element(element).is_some_and(|bin| !bin.any_child_async())
    }

    fn set_clock(&self, element: &Element, clock: Option<&Arc<dyn Clock>>) {
        let children = self.state.children.lock().list.clone();
        for child in children {
            distribute_clock(&child, clock.cloned(), element.base_time());
        }
    }
}
