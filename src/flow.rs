//! Flow returns of push and pull operations.
//!
//! Data flow never panics or unwinds to report a problem. Every `push`,
//! `chain` and `pull_range` returns a [`FlowResult`]; anything other than
//! `Ok` tells the caller to stop producing and hand the condition upstream.

use std::fmt;

/// Successful flow outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowSuccess {
    /// Data was accepted.
    Ok,
}

/// Unsuccessful flow outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum FlowError {
    /// The pad has no peer.
    #[error("not-linked")]
    NotLinked,
    /// The pad is flushing or inactive.
    #[error("flushing")]
    Flushing,
    /// The pad reached end of stream.
    #[error("eos")]
    Eos,
    /// Caps were not negotiated or were refused.
    #[error("not-negotiated")]
    NotNegotiated,
    /// A fatal error occurred; the element should have posted an error message.
    #[error("error")]
    Error,
    /// The operation is not supported by this pad.
    #[error("not-supported")]
    NotSupported,
}

impl FlowError {
    /// Whether this condition must be reported as a pipeline error.
    ///
    /// `Eos` and `Flushing` are expected during normal shutdown and seeking.
    pub fn is_fatal(self) -> bool {
        !matches!(self, FlowError::Eos | FlowError::Flushing)
    }

    /// Short lowercase name used in logs and metrics labels.
    pub fn name(self) -> &'static str {
        match self {
            FlowError::NotLinked => "not-linked",
            FlowError::Flushing => "flushing",
            FlowError::Eos => "eos",
            FlowError::NotNegotiated => "not-negotiated",
            FlowError::Error => "error",
            FlowError::NotSupported => "not-supported",
        }
    }
}

impl fmt::Display for FlowSuccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ok")
    }
}

/// Result of pushing or pulling data.
pub type FlowResult = Result<FlowSuccess, FlowError>;

/// Combines the flow returns of several src pads into one upstream answer.
///
/// Used by elements with more than one output: `NotLinked` is only returned
/// when every pad is unlinked, and any other error wins immediately.
#[derive(Debug, Default)]
pub struct FlowCombiner {
    last: Vec<Option<FlowResult>>,
}

impl FlowCombiner {
    /// Combiner for `pads` outputs.
    pub fn new(pads: usize) -> Self {
        Self {
            last: vec![None; pads],
        }
    }

    /// Record the result for output `index` and return the combined result.
    pub fn update(&mut self, index: usize, result: FlowResult) -> FlowResult {
        if index >= self.last.len() {
            self.last.resize(index + 1, None);
        }
        self.last[index] = Some(result);

        match result {
            Ok(_) => return Ok(FlowSuccess::Ok),
            Err(FlowError::NotLinked) => {}
            Err(err) => return Err(err),
        }

        let all_unlinked = self
            .last
            .iter()
            .all(|r| matches!(r, Some(Err(FlowError::NotLinked))));
        if all_unlinked {
            Err(FlowError::NotLinked)
        } else {
            Ok(FlowSuccess::Ok)
        }
    }

    /// Forget every recorded result.
    pub fn reset(&mut self) {
        self.last.iter_mut().for_each(|r| *r = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(!FlowError::Eos.is_fatal());
        assert!(!FlowError::Flushing.is_fatal());
        assert!(FlowError::NotLinked.is_fatal());
        assert!(FlowError::NotNegotiated.is_fatal());
        assert!(FlowError::Error.is_fatal());
    }

    #[test]
    fn test_display_matches_name() {
        for err in [
            FlowError::NotLinked,
            FlowError::Flushing,
            FlowError::Eos,
            FlowError::NotNegotiated,
            FlowError::Error,
            FlowError::NotSupported,
        ] {
            assert_eq!(err.to_string(), err.name());
        }
    }

    #[test]
    fn test_combiner_not_linked_only_when_all_unlinked() {
        let mut combiner = FlowCombiner::new(2);
        assert_eq!(combiner.update(0, Err(FlowError::NotLinked)), Ok(FlowSuccess::Ok));
        assert_eq!(
            combiner.update(1, Err(FlowError::NotLinked)),
            Err(FlowError::NotLinked)
        );
        assert_eq!(combiner.update(1, Ok(FlowSuccess::Ok)), Ok(FlowSuccess::Ok));
        assert_eq!(combiner.update(0, Err(FlowError::Eos)), Err(FlowError::Eos));

        combiner.reset();
        assert_eq!(combiner.update(0, Err(FlowError::NotLinked)), Ok(FlowSuccess::Ok));
    }
}
