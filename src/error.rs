//! Error types for padflow.
//!
//! Flow returns are not errors in this sense: pushing and pulling report
//! [`FlowError`](crate::flow::FlowError) values that the streaming code
//! handles or turns into bus messages. [`Error`] covers API misuse and
//! setup failures returned to the application.

use crate::caps::CapsParseError;
use crate::element::pad::PadLinkError;
use crate::element::state::StateChange;
use crate::flow::FlowError;
use crate::task::TaskError;
use thiserror::Error;

/// Result type alias using padflow's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for padflow operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A caps string could not be parsed.
    #[error("caps: {0}")]
    Caps(#[from] CapsParseError),

    /// Two pads could not be linked.
    #[error("link failed: {0}")]
    Link(#[from] PadLinkError),

    /// An element refused a state transition.
    #[error("element '{element}' failed state change {transition:?}")]
    StateChange {
        /// Element name.
        element: String,
        /// The transition that failed.
        transition: StateChange,
    },

    /// Task usage error.
    #[error("task: {0}")]
    Task(#[from] TaskError),

    /// A launch description could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// No element or element factory with that name.
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// The element has no pad with that name.
    #[error("element '{element}' has no pad '{pad}'")]
    PadNotFound {
        /// Element name.
        element: String,
        /// Pad name.
        pad: String,
    },

    /// The element already has a pad with that name, or the pad has a parent.
    #[error("element '{element}' already has pad '{pad}'")]
    PadExists {
        /// Element name.
        element: String,
        /// Pad name.
        pad: String,
    },

    /// A property name or value was rejected.
    #[error("element '{element}': invalid property '{property}': {reason}")]
    InvalidProperty {
        /// Element name.
        element: String,
        /// Property name.
        property: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A flow error surfaced through a synchronous API.
    #[error("flow error: {0}")]
    Flow(#[from] FlowError),

    /// The element already has a parent, or the bin has a child of that name.
    #[error("element '{0}' is already in a bin")]
    AlreadyInBin(String),

    /// The element is not a child of this bin.
    #[error("element '{0}' is not in this bin")]
    NotInBin(String),

    /// A blocking operation did not complete in time.
    #[error("operation timed out")]
    Timeout,
}

impl Error {
    /// Shorthand for [`Error::InvalidProperty`].
    pub fn invalid_property(
        element: impl Into<String>,
        property: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::InvalidProperty {
            element: element.into(),
            property: property.into(),
            reason: reason.into(),
        }
    }
}
