//! Identity element with callbacks for debugging.
//!
//! A pass-through element that allows inspection of buffers via callbacks.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{Element, ElementImpl, Pad, PadTemplate};
use crate::elements::property_u64;
use crate::error::{Error, Result};
use crate::flow::{FlowError, FlowResult, FlowSuccess};
use crate::pipeline::parser::PropertyValue;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Callback type for buffer inspection.
pub type BufferCallback = Arc<dyn Fn(&Buffer) + Send + Sync>;

/// Statistics for Identity element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityStats {
    /// Number of buffers processed.
    pub buffer_count: u64,
    /// Total bytes processed.
    pub byte_count: u64,
    /// Buffers dropped by `drop-every`.
    pub dropped: u64,
}

#[derive(Default)]
struct Inner {
    callback: Mutex<Option<BufferCallback>>,
    drop_every: AtomicU64,
    count: AtomicU64,
    bytes: AtomicU64,
    dropped: AtomicU64,
}

impl Inner {
    fn chain(&self, pad: &Pad, parent: Option<&Element>, buffer: Buffer) -> FlowResult {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        self.bytes.fetch_add(buffer.size() as u64, Ordering::Relaxed);

        let drop_every = self.drop_every.load(Ordering::Relaxed);
        if drop_every > 0 && n % drop_every == 0 {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(pad = %pad.debug_name(), n, "dropping buffer");
            return Ok(FlowSuccess::Ok);
        }

        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(&buffer);
        }

        let src = parent
            .and_then(|p| p.static_pad("src"))
            .ok_or(FlowError::NotLinked)?;
        src.push(buffer)
    }
}

/// An identity element that passes buffers through unchanged while
/// optionally calling callbacks for inspection.
///
/// This is useful for debugging, logging, or metrics collection without
/// modifying the data flow. Caps queries are proxied, so identity is
/// invisible to negotiation. With `drop-every` set to `n`, every n-th
/// buffer is dropped.
///
/// # Example
///
/// ```rust
/// use padflow::element::Element;
/// use padflow::elements::Identity;
///
/// let identity = Element::new(
///     "debug-point",
///     Identity::default().on_buffer(|buf| {
///         println!("buffer: pts={}, len={}", buf.pts(), buf.size());
///     }),
/// );
/// assert_eq!(identity.imp::<Identity>().unwrap().buffer_count(), 0);
/// ```
#[derive(Default)]
pub struct Identity {
    inner: Arc<Inner>,
}

impl Identity {
    /// Set a callback to be called for each buffer.
    pub fn on_buffer<F>(self, callback: F) -> Self
    where
        F: Fn(&Buffer) + Send + Sync + 'static,
    {
        *self.inner.callback.lock() = Some(Arc::new(callback));
        self
    }

    /// Drop every `n`-th buffer; zero drops nothing.
    pub fn with_drop_every(self, n: u64) -> Self {
        self.inner.drop_every.store(n, Ordering::Relaxed);
        self
    }

    /// Current `drop-every` setting.
    pub fn drop_every(&self) -> u64 {
        self.inner.drop_every.load(Ordering::Relaxed)
    }

    /// Get the number of buffers processed.
    pub fn buffer_count(&self) -> u64 {
        self.inner.count.load(Ordering::Relaxed)
    }

    /// Get the total bytes processed.
    pub fn byte_count(&self) -> u64 {
        self.inner.bytes.load(Ordering::Relaxed)
    }

    /// Get statistics.
    pub fn stats(&self) -> IdentityStats {
        IdentityStats {
            buffer_count: self.buffer_count(),
            byte_count: self.byte_count(),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }

    /// Reset statistics.
    pub fn reset_stats(&self) {
        self.inner.count.store(0, Ordering::Relaxed);
        self.inner.bytes.store(0, Ordering::Relaxed);
        self.inner.dropped.store(0, Ordering::Relaxed);
    }
}

impl ElementImpl for Identity {
    fn constructed(&self, element: &Element) {
        let sink = Pad::from_template(&PadTemplate::sink("sink", Caps::new_any()), "sink");
        let src = Pad::from_template(&PadTemplate::src("src", Caps::new_any()), "src");
        sink.set_proxy_caps(true);
        src.set_proxy_caps(true);
        let inner = self.inner.clone();
        sink.set_chain_function(move |pad, parent, buffer| inner.chain(pad, parent, buffer));
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
            "drop-every" => {
                let n = property_u64(element, name, value)?;
                self.inner.drop_every.store(n, Ordering::Relaxed);
                Ok(())
            }
            _ => Err(Error::invalid_property(element.name(), name, "no such property")),
        }
    }
}
