//! Source serving an in-memory byte array.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{Element, ElementImpl, Pad, PadMode, PadTemplate};
use crate::elements::property_usize;
use crate::error::{Error, Result};
use crate::event::{Event, Format, Segment};
use crate::flow::{FlowError, FlowResult, FlowSuccess};
use crate::pipeline::parser::PropertyValue;
use crate::query::Query;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};

const DEFAULT_BLOCKSIZE: usize = 4096;

struct Inner {
    data: Mutex<Arc<[u8]>>,
    blocksize: Mutex<usize>,
    /// Push mode: next offset, `None` before stream start went out.
    position: Mutex<Option<u64>>,
}

impl Inner {
    fn data(&self) -> Arc<[u8]> {
        self.data.lock().clone()
    }

    fn get_range(&self, offset: u64, size: usize) -> std::result::Result<Buffer, FlowError> {
        let data = self.data();
        let start = usize::try_from(offset).map_err(|_| FlowError::Eos)?;
        if start >= data.len() {
            return Err(FlowError::Eos);
        }
        let end = start.saturating_add(size).min(data.len());
        let mut buffer = Buffer::from_slice(&data[start..end]);
        buffer.set_offset(Some(offset));
        Ok(buffer)
    }

    fn query(&self, pad: &Pad, parent: Option<&Element>, query: &mut Query) -> bool {
        match query {
            Query::Scheduling { pull_mode, seekable } => {
                *pull_mode = true;
                *seekable = true;
                true
            }
            Query::Duration {
                format: Format::Bytes,
                result,
            } => {
                *result = Some(self.data.lock().len() as u64);
                true
            }
            Query::Position {
                format: Format::Bytes,
                result,
            } => {
                *result = Some(self.position.lock().unwrap_or(0));
                true
            }
            _ => Pad::query_default(pad, parent, query),
        }
    }

    fn start(self: &Arc<Self>, pad: &Pad) -> bool {
        *self.position.lock() = None;
        let inner = self.clone();
        let weak = pad.downgrade();
        pad.start_task(move || {
            let Some(pad) = weak.upgrade() else {
                return;
            };
            if let Err(flow) = inner.push_block(&pad) {
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
        })
    }

    fn push_block(&self, pad: &Pad) -> FlowResult {
        let offset = {
            let mut position = self.position.lock();
            match *position {
                Some(offset) => offset,
                None => {
                    *position = Some(0);
                    drop(position);
                    pad.push_event(Event::stream_start(pad.debug_name()));
                    pad.push_event(Event::Segment(Segment::new(Format::Bytes)));
                    0
                }
            }
        };
        let blocksize = *self.blocksize.lock();
        let buffer = match self.get_range(offset, blocksize) {
            Ok(buffer) => buffer,
            Err(FlowError::Eos) => {
                debug!(pad = %pad.debug_name(), offset, "all data pushed");
                pad.push_event(Event::Eos);
                return Err(FlowError::Eos);
            }
            Err(e) => return Err(e),
        };
        let next = offset + buffer.size() as u64;
        trace!(pad = %pad.debug_name(), offset, size = buffer.size(), "pushing block");
        pad.push(buffer)?;
        *self.position.lock() = Some(next);
        Ok(FlowSuccess::Ok)
    }
}

/// A source over a byte array.
///
/// In pull mode downstream reads any range; a range past the end is `Eos`
/// and a range crossing the end is clipped. When nothing pulls, the source
/// pushes `blocksize` chunks from its own task and then EOS.
///
/// Properties: `data` (string bytes), `blocksize`.
///
/// ```rust
/// use padflow::element::Element;
/// use padflow::elements::MemSrc;
///
/// let src = Element::new("src", MemSrc::default().with_data(b"hello".to_vec()));
/// assert!(src.static_pad("src").is_some());
/// ```
pub struct MemSrc {
    inner: Arc<Inner>,
}

impl Default for MemSrc {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                data: Mutex::new(Arc::from(Vec::new())),
                blocksize: Mutex::new(DEFAULT_BLOCKSIZE),
                position: Mutex::new(None),
            }),
        }
    }
}

impl MemSrc {
    /// Serve `data`.
    pub fn with_data(self, data: impl Into<Vec<u8>>) -> Self {
        *self.inner.data.lock() = Arc::from(data.into());
        self
    }

    /// Size of pushed chunks.
    pub fn with_blocksize(self, blocksize: usize) -> Self {
        *self.inner.blocksize.lock() = blocksize.max(1);
        self
    }

    /// Length of the served data.
    pub fn len(&self) -> usize {
        self.inner.data.lock().len()
    }

    /// Whether there is no data.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ElementImpl for MemSrc {
    fn constructed(&self, element: &Element) {
        let pad = Pad::from_template(&PadTemplate::src("src", Caps::new_any()), "src");
        let inner = self.inner.clone();
        pad.set_getrange_function(move |_pad, _parent, offset, size| inner.get_range(offset, size));
        let inner = self.inner.clone();
        pad.set_query_function(move |pad, parent, query| inner.query(pad, parent, query));
        // A downstream pull activation happens before ours; keep it.
        pad.set_activate_function(|pad, _parent| match pad.mode() {
            PadMode::None => pad.activate_mode(PadMode::Push, true),
            _ => true,
        });
        let inner = self.inner.clone();
        pad.set_activatemode_function(move |pad, _parent, mode, active| match (mode, active) {
            (PadMode::Push, true) => inner.start(pad),
            (PadMode::Push, false) => pad.stop_task(),
            (PadMode::Pull, _) => true,
            _ => false,
        });
        if let Err(e) = element.add_pad(&pad) {
            debug!(element = %element.name(), error = %e, "cannot add pad");
        }
    }

    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::src("src", Caps::new_any())]
    }

    fn set_property(&self, element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        match name {
            "data" => *self.inner.data.lock() = Arc::from(value.as_string().into_bytes()),
            "blocksize" => {
                let blocksize = property_usize(element, name, value)?;
                if blocksize == 0 {
                    return Err(Error::invalid_property(element.name(), name, "must be positive"));
                }
                *self.inner.blocksize.lock() = blocksize;
            }
            _ => return Err(Error::invalid_property(element.name(), name, "no such property")),
        }
        Ok(())
    }
}
