//! Utility elements.
//!
//! - [`CapsFilter`]: restrict negotiated formats

mod capsfilter;

pub use capsfilter::CapsFilter;
