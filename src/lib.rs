//! # Padflow
//!
//! A pad-based streaming core: elements with typed pads, caps negotiation,
//! streaming tasks, collect pads and the element/bin state machine.
//!
//! Data moves through linked pads. A src pad pushes [`Buffer`]s into its
//! peer's chain function, or a sink pad pulls ranges from its peer's
//! getrange function. Events travel alongside the data; caps, segment and
//! stream-start events are sticky and replayed to new peers. Queries walk
//! the graph synchronously to find out what formats the other side accepts.
//!
//! ## Features
//!
//! - **Caps**: parse, intersect, fixate and negotiate media formats
//! - **Tasks**: one streaming thread per task, guarded by the pad's stream lock
//! - **State machine**: NULL, READY, PAUSED, PLAYING with async preroll
//! - **Bins and pipelines**: child states, bus forwarding, shared clock
//! - **CollectPads**: wait for a buffer on every input before producing
//!
//! ## Quick Start
//!
//! ```rust
//! use padflow::prelude::*;
//!
//! let pipeline = Pipeline::parse_launch("fakesrc num-buffers=10 ! identity ! fakesink").unwrap();
//! pipeline.set_state_blocking(State::Playing).unwrap();
//! let message = pipeline
//!     .bus()
//!     .timed_pop_filtered(Some(std::time::Duration::from_secs(5)), |kind| {
//!         matches!(kind, MessageKind::Eos | MessageKind::Error { .. })
//!     });
//! assert_eq!(message.map(|m| m.kind), Some(MessageKind::Eos));
//! pipeline.set_state(State::Null).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod buffer;
pub mod caps;
pub mod check;
pub mod clock;
pub mod config;
pub mod element;
pub mod elements;
pub mod error;
pub mod event;
pub mod flow;
pub mod metadata;
pub mod observability;
pub mod pipeline;
pub mod query;
pub mod task;
pub mod typefind;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer::Buffer;
    pub use crate::caps::{Caps, Structure};
    pub use crate::clock::ClockTime;
    pub use crate::element::{
        Element, ElementImpl, Pad, PadDirection, PadMode, PadTemplate, State, StateChange,
        StateChangeResult, StateChangeSuccess,
    };
    pub use crate::error::{Error, Result};
    pub use crate::event::{Event, Segment};
    pub use crate::flow::{FlowError, FlowResult, FlowSuccess};
    pub use crate::pipeline::{Bin, Bus, Message, MessageKind, Pipeline};
    pub use crate::query::Query;
}

pub use error::{Error, Result};
