//! Flow control elements.
//!
//! - [`Queue`]: thread boundary with a bounded, optionally leaky buffer

mod queue;

pub use queue::{LeakyMode, Queue, QueueStats};
