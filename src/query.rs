//! Queries: synchronous questions sent to a pad and answered in place.
//!
//! A query is passed by `&mut` to the pad's query function, which fills in
//! the result fields and returns `true` when it answered.

use crate::caps::Caps;
use crate::event::Format;

/// A question asked of a pad.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Which formats can the pad handle, optionally restricted to `filter`.
    Caps {
        /// Only formats intersecting this set are of interest.
        filter: Option<Caps>,
        /// Answer.
        result: Option<Caps>,
    },
    /// Would the pad accept exactly these caps.
    AcceptCaps {
        /// Proposed fixed caps.
        caps: Caps,
        /// Answer.
        result: bool,
    },
    /// Current position.
    Position {
        /// Requested unit.
        format: Format,
        /// Answer.
        result: Option<u64>,
    },
    /// Total duration.
    Duration {
        /// Requested unit.
        format: Format,
        /// Answer.
        result: Option<u64>,
    },
    /// Can the pad be driven in pull mode.
    Scheduling {
        /// Answer: random access through `pull_range` is supported.
        pull_mode: bool,
        /// Answer: the source is seekable.
        seekable: bool,
    },
}

impl Query {
    /// New caps query.
    pub fn new_caps(filter: Option<Caps>) -> Self {
        Query::Caps {
            filter,
            result: None,
        }
    }

    /// New accept-caps query.
    pub fn new_accept_caps(caps: Caps) -> Self {
        Query::AcceptCaps {
            caps,
            result: false,
        }
    }

    /// New position query.
    pub fn new_position(format: Format) -> Self {
        Query::Position {
            format,
            result: None,
        }
    }

    /// New duration query.
    pub fn new_duration(format: Format) -> Self {
        Query::Duration {
            format,
            result: None,
        }
    }

    /// New scheduling query.
    pub fn new_scheduling() -> Self {
        Query::Scheduling {
            pull_mode: false,
            seekable: false,
        }
    }

    /// Lowercase query name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Query::Caps { .. } => "caps",
            Query::AcceptCaps { .. } => "accept-caps",
            Query::Position { .. } => "position",
            Query::Duration { .. } => "duration",
            Query::Scheduling { .. } => "scheduling",
        }
    }

    /// Answer of a caps query.
    pub fn caps_result(&self) -> Option<&Caps> {
        match self {
            Query::Caps { result, .. } => result.as_ref(),
            _ => None,
        }
    }

    /// Answer of an accept-caps query.
    pub fn accept_caps_result(&self) -> bool {
        matches!(self, Query::AcceptCaps { result: true, .. })
    }
}
