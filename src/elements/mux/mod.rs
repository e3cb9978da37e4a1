//! Multiplexing elements.
//!
//! - [`Interleave`]: merge request pads in timestamp order

mod interleave;

pub use interleave::Interleave;
