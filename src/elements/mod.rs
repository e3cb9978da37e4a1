//! Built-in pipeline elements.
//!
//! ## Sources
//! - [`FakeSrc`]: pushes numbered, timestamped buffers from its own task
//! - [`MemSrc`]: serves an in-memory byte array in pull or push mode
//!
//! ## Sinks
//! - [`FakeSink`]: counts buffers and prerolls asynchronously
//!
//! ## Transforms
//! - [`Identity`]: passes buffers through, optionally dropping some
//! - [`CapsFilter`]: restricts the formats negotiated across it
//! - [`Queue`]: decouples upstream and downstream with its own thread
//!
//! ## Muxers
//! - [`Interleave`]: merges request pads in timestamp order

pub mod flow;
pub mod identity;
pub mod mux;
pub mod testing;
pub mod util;

pub use flow::{LeakyMode, Queue, QueueStats};
pub use identity::Identity;
pub use mux::Interleave;
pub use testing::{FakeSink, FakeSrc, MemSrc};
pub use util::CapsFilter;

use crate::caps::{Caps, CapsParseError};
use crate::element::Element;
use crate::error::{Error, Result};
use crate::pipeline::parser::PropertyValue;

pub(crate) fn property_u64(element: &Element, name: &str, value: &PropertyValue) -> Result<u64> {
    value.as_u64().ok_or_else(|| {
        Error::invalid_property(
            element.name(),
            name,
            format!("expected a non-negative integer, got {}", value.as_string()),
        )
    })
}

/// Like [`property_u64`], rejecting values the target cannot address.
pub(crate) fn property_usize(element: &Element, name: &str, value: &PropertyValue) -> Result<usize> {
    let raw = property_u64(element, name, value)?;
    usize::try_from(raw).map_err(|_| {
        Error::invalid_property(
            element.name(),
            name,
            format!("{raw} does not fit in {} bits", usize::BITS),
        )
    })
}

pub(crate) fn property_bool(element: &Element, name: &str, value: &PropertyValue) -> Result<bool> {
    value.as_bool().ok_or_else(|| {
        Error::invalid_property(
            element.name(),
            name,
            format!("expected a boolean, got {}", value.as_string()),
        )
    })
}

pub(crate) fn property_caps(element: &Element, name: &str, value: &PropertyValue) -> Result<Caps> {
    value
        .as_string()
        .parse()
        .map_err(|e: CapsParseError| Error::invalid_property(element.name(), name, e.to_string()))
}
