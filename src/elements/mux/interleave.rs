//! Timestamp-ordered N-to-1 merge built on [`CollectPads`].

use crate::caps::Caps;
use crate::clock::ClockTime;
use crate::element::{
    CollectPads, Collected, Element, ElementImpl, Pad, PadDirection, PadTemplate, StateChange,
    StateChangeResult, WeakElement,
};
use crate::event::{Event, Segment};
use crate::flow::{FlowError, FlowResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

/// Merges any number of request sink pads `sink_%u` into one stream.
///
/// Each round, once every pad has a buffer queued or is at EOS, the queued
/// buffer with the lowest pts goes out (buffers without pts count as zero,
/// ties go to the pad requested first). EOS is pushed once all pads are EOS.
///
/// ```rust
/// use padflow::element::Element;
/// use padflow::elements::Interleave;
///
/// let mux = Element::new("mux", Interleave::default());
/// let sink_0 = mux.request_pad("sink_%u").unwrap();
/// let sink_1 = mux.request_pad("sink_%u").unwrap();
/// assert_eq!((sink_0.name(), sink_1.name()), ("sink_0", "sink_1"));
/// ```
pub struct Interleave {
    collect: CollectPads,
    stream_started: Arc<AtomicBool>,
    element: Arc<Mutex<Option<WeakElement>>>,
}

impl Default for Interleave {
    fn default() -> Self {
        Self {
            collect: CollectPads::new("interleave"),
            stream_started: Arc::new(AtomicBool::new(false)),
            element: Arc::new(Mutex::new(None)),
        }
    }
}

impl Interleave {
    /// Number of requested sink pads.
    pub fn n_inputs(&self) -> usize {
        self.collect.n_pads()
    }
}

fn src_pad(element: &Mutex<Option<WeakElement>>) -> Option<Pad> {
    element
        .lock()
        .as_ref()
        .and_then(WeakElement::upgrade)
        .and_then(|e| e.static_pad("src"))
}

fn earliest(collected: &Collected<'_>) -> Option<Pad> {
    collected
        .pads()
        .into_iter()
        .filter_map(|data| {
            let pts = data.peek()?.pts();
            let key = if pts.is_none() { ClockTime::ZERO } else { pts };
            Some((key, data.pad().clone()))
        })
        .min_by_key(|(key, _)| *key)
        .map(|(_, pad)| pad)
}

impl ElementImpl for Interleave {
    fn constructed(&self, element: &Element) {
        *self.element.lock() = Some(element.downgrade());

        let weak = self.element.clone();
        let started = self.stream_started.clone();
        self.collect.set_function(move |collected| {
            let src = src_pad(&weak).ok_or(FlowError::NotLinked)?;
            let Some(pad) = earliest(collected) else {
                return Err(FlowError::Error);
            };
            let Some(buffer) = collected.pop(&pad) else {
                return Err(FlowError::Error);
            };
            if !started.swap(true, Ordering::AcqRel) {
                src.push_event(Event::stream_start(src.debug_name()));
                src.push_event(Event::Segment(Segment::default()));
            }
            trace!(pad = %pad.name(), pts = %buffer.pts(), "interleaving");
            src.push(buffer)
        });

        let weak = self.element.clone();
        self.collect.set_eos_function(move |_collected| {
            let Some(src) = src_pad(&weak) else {
                return false;
            };
            debug!(pad = %src.debug_name(), "all inputs at eos");
            src.push_event(Event::Eos)
        });

        let src = Pad::from_template(&PadTemplate::src("src", Caps::new_any()), "src");
        if let Err(e) = element.add_pad(&src) {
            debug!(element = %element.name(), error = %e, "cannot add pad");
        }
    }

    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![
            PadTemplate::src("src", Caps::new_any()),
            PadTemplate::request("sink_%u", PadDirection::Sink, Caps::new_any()),
        ]
    }

    fn request_new_pad(&self, element: &Element, template: &PadTemplate, name: &str) -> Option<Pad> {
        if template.direction != PadDirection::Sink {
            return None;
        }
        let pad = Pad::from_template(template, name);
        self.collect.add_pad(&pad);
        debug!(element = %element.name(), pad = %name, "input requested");
        Some(pad)
    }

    fn release_pad(&self, element: &Element, pad: &Pad) {
        debug!(element = %element.name(), pad = %pad.name(), "input released");
        if let Err(flow) = self.collect.remove_pad(pad) {
            debug!(element = %element.name(), %flow, "collect after release failed");
        }
    }

    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
        match transition {
            StateChange::ReadyToPaused => {
                self.stream_started.store(false, Ordering::Release);
                self.collect.start();
            }
            StateChange::PausedToReady => self.collect.stop(),
            _ => {}
        }
        element.default_change_state(transition)
    }
}
