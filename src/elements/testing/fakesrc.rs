//! Push-mode test source.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::clock::ClockTime;
use crate::element::{
    Element, ElementImpl, Pad, PadMode, PadTemplate, StateChange, StateChangeResult,
    StateChangeSuccess,
};
use crate::elements::{property_bool, property_caps, property_u64, property_usize};
use crate::error::{Error, Result};
use crate::event::{Event, Segment};
use crate::flow::{FlowError, FlowResult, FlowSuccess};
use crate::metadata::BufferFlags;
use crate::pipeline::parser::PropertyValue;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct Settings {
    num_buffers: Option<u64>,
    size: usize,
    is_live: bool,
    pts_step: ClockTime,
    caps: Option<Caps>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            num_buffers: None,
            size: 64,
            is_live: false,
            pts_step: ClockTime::from_millis(1),
            caps: None,
        }
    }
}

#[derive(Default)]
struct Stream {
    started: bool,
    next: u64,
}

struct Inner {
    settings: Mutex<Settings>,
    stream: Mutex<Stream>,
    produced: AtomicU64,
}

/// A source pushing buffers from its own task.
///
/// Buffer `n` carries pts `n * pts-step`, offset `n` and is filled with the
/// byte `n % 256`. After `num-buffers` buffers it pushes EOS. A live source
/// only produces in PLAYING and paces itself to the pipeline clock.
///
/// Properties: `num-buffers` (-1 for unlimited), `size`, `is-live`,
/// `pts-step` (nanoseconds), `caps`.
///
/// ```rust
/// use padflow::element::Element;
/// use padflow::elements::FakeSrc;
///
/// let src = Element::new("src", FakeSrc::default().with_num_buffers(10).with_size(16));
/// assert!(src.static_pad("src").is_some());
/// ```
pub struct FakeSrc {
    inner: Arc<Inner>,
}

impl Default for FakeSrc {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                settings: Mutex::new(Settings::default()),
                stream: Mutex::new(Stream::default()),
                produced: AtomicU64::new(0),
            }),
        }
    }
}

impl FakeSrc {
    /// Stop after `n` buffers.
    pub fn with_num_buffers(self, n: u64) -> Self {
        self.inner.settings.lock().num_buffers = Some(n);
        self
    }

    /// Buffer size in bytes.
    pub fn with_size(self, size: usize) -> Self {
        self.inner.settings.lock().size = size;
        self
    }

    /// Behave as a live source.
    pub fn with_live(self, live: bool) -> Self {
        self.inner.settings.lock().is_live = live;
        self
    }

    /// Distance between consecutive timestamps.
    pub fn with_pts_step(self, step: ClockTime) -> Self {
        self.inner.settings.lock().pts_step = step;
        self
    }

    /// Announce `caps` instead of negotiating.
    pub fn with_caps(self, caps: Caps) -> Self {
        self.inner.settings.lock().caps = Some(caps);
        self
    }

    /// Buffers pushed successfully so far.
    pub fn buffers_pushed(&self) -> u64 {
        self.inner.produced.load(Ordering::Relaxed)
    }

    fn is_live(&self) -> bool {
        self.inner.settings.lock().is_live
    }
}

impl Inner {
    fn start(self: &Arc<Self>, pad: &Pad) -> bool {
        let inner = self.clone();
        let weak = pad.downgrade();
        pad.start_task(move || {
            let Some(pad) = weak.upgrade() else {
                return;
            };
            if let Err(flow) = inner.produce(&pad) {
                inner.stop_on_flow(&pad, flow);
            }
        })
    }

    fn produce(&self, pad: &Pad) -> FlowResult {
        let settings = self.settings.lock().clone();
        let (first, n) = {
            let mut stream = self.stream.lock();
            let first = !stream.started;
            stream.started = true;
            (first, stream.next)
        };

        if first {
            pad.push_event(Event::stream_start(pad.debug_name()));
            let negotiated = match &settings.caps {
                Some(caps) => pad.push_event(Event::Caps(caps.clone())),
                None => pad.negotiate(),
            };
            if !negotiated {
                return Err(FlowError::NotNegotiated);
            }
            pad.push_event(Event::Segment(Segment::default()));
        }

        if settings.num_buffers.is_some_and(|max| n >= max) {
            debug!(pad = %pad.debug_name(), buffers = n, "all buffers produced");
            pad.push_event(Event::Eos);
            return Err(FlowError::Eos);
        }

        let pts = ClockTime::from_nanos(n.saturating_mul(settings.pts_step.nanos()));
        if settings.is_live
            && let Some(parent) = pad.parent()
        {
            let now = parent.current_running_time();
            if now.is_some() && pts > now {
                std::thread::sleep(Duration::from_nanos((pts - now).nanos()));
            }
        }

        let mut buffer = Buffer::from_vec(vec![(n % 256) as u8; settings.size]);
        buffer.set_pts(pts);
        buffer.set_duration(settings.pts_step);
        buffer.set_offset(Some(n));
        if n == 0 {
            buffer.set_flag(BufferFlags::DISCONT);
        }
        if settings.is_live {
            buffer.set_flag(BufferFlags::LIVE);
        }
        self.stream.lock().next = n + 1;
        trace!(pad = %pad.debug_name(), n, "produced");
        pad.push(buffer)?;
        self.produced.fetch_add(1, Ordering::Relaxed);
        Ok(FlowSuccess::Ok)
    }

    fn stop_on_flow(&self, pad: &Pad, flow: FlowError) {
        debug!(pad = %pad.debug_name(), %flow, "pausing task");
        pad.pause_task();
        if flow.is_fatal()
            && let Some(parent) = pad.parent()
        {
            parent.post_error(
                "stream",
                "internal data stream error",
                Some(format!("streaming stopped, reason {}", flow.name())),
            );
            pad.push_event(Event::Eos);
        }
    }
}

impl ElementImpl for FakeSrc {
    fn constructed(&self, element: &Element) {
        let pad = Pad::from_template(&PadTemplate::src("src", Caps::new_any()), "src");
        let inner = self.inner.clone();
        pad.set_activatemode_function(move |pad, _parent, mode, active| {
            match (mode, active) {
                (PadMode::Push, true) => {
                    *inner.stream.lock() = Stream::default();
                    inner.settings.lock().is_live || inner.start(pad)
                }
                (PadMode::Push, false) => pad.stop_task(),
                _ => false,
            }
        });
        if element.add_pad(&pad).is_err() {
            debug!(element = %element.name(), "src pad already present");
        }
    }

    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::src("src", Caps::new_any())]
    }

    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
        let result = element.default_change_state(transition)?;
        if !self.is_live() {
            return Ok(result);
        }
        let Some(pad) = element.static_pad("src") else {
            return Ok(result);
        };
        match transition {
            StateChange::ReadyToPaused => Ok(StateChangeSuccess::NoPreroll),
            StateChange::PausedToPlaying => {
                self.inner.start(&pad);
                Ok(result)
            }
            StateChange::PlayingToPaused => {
                pad.pause_task();
                Ok(StateChangeSuccess::NoPreroll)
            }
            _ => Ok(result),
        }
    }

    fn set_property(&self, element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        let mut settings = self.inner.settings.lock();
        match name {
            "num-buffers" => {
                settings.num_buffers = match value.as_i64() {
                    Some(n) if n < 0 => None,
                    _ => Some(property_u64(element, name, value)?),
                }
            }
            "size" => settings.size = property_usize(element, name, value)?,
            "is-live" => settings.is_live = property_bool(element, name, value)?,
            "pts-step" => {
                settings.pts_step = ClockTime::from_nanos(property_u64(element, name, value)?)
            }
            "caps" => settings.caps = Some(property_caps(element, name, value)?),
            _ => return Err(Error::invalid_property(element.name(), name, "no such property")),
        }
        Ok(())
    }
}
