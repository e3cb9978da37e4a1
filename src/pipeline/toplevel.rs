//! The top-level pipeline: a bin with a bus and a clock.

use crate::clock::{Clock, ClockTime, SystemClock};
use crate::config::PipelineConfig;
use crate::element::{Element, State, StateChange, StateChangeResult, StateChangeSuccess};
use crate::error::{Error, Result};
use crate::pipeline::bin::{Bin, TopLevel};
use crate::pipeline::bus::Bus;
use crate::pipeline::factory::ElementFactory;
use crate::pipeline::parser::{ParsedSegment, parse_pipeline};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, info};

/// A bin that owns the bus messages end up on and the clock its children
/// synchronize to.
///
/// On PAUSED to PLAYING the pipeline records the base time (clock time at
/// which running time is zero) and hands clock and base time to every
/// child. Pausing remembers the running time reached so that resuming
/// continues from there.
///
/// # Example
///
/// ```rust
/// use padflow::element::State;
/// use padflow::pipeline::{MessageKind, Pipeline};
/// use std::time::Duration;
///
/// let pipeline = Pipeline::parse_launch("fakesrc num-buffers=5 ! fakesink").unwrap();
/// pipeline.set_state_blocking(State::Playing).unwrap();
/// let msg = pipeline
///     .bus()
///     .timed_pop_filtered(Some(Duration::from_secs(5)), |k| matches!(k, MessageKind::Eos))
///     .unwrap();
/// assert_eq!(msg.source, "pipeline");
/// pipeline.set_state(State::Null).unwrap();
/// ```
#[derive(Clone)]
pub struct Pipeline {
    bin: Bin,
    bus: Bus,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a pipeline with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(PipelineConfig::default().with_name(name))
    }

    /// Create a pipeline from `config`.
    pub fn with_config(config: PipelineConfig) -> Self {
        let clock: Arc<dyn Clock> = if config.use_system_clock {
            SystemClock::obtain()
        } else {
            Arc::new(SystemClock::new())
        };
        let bin = Bin::new_toplevel(config.name.clone(), TopLevel::new(clock.clone()));
        let bus = Bus::new();
        bin.set_bus(Some(bus.clone()));
        debug!(pipeline = %config.name, clock = clock.name(), "pipeline created");
        Self {
            bin,
            bus,
            clock,
            config,
        }
    }

    /// Build a pipeline from a launch description with the built-in elements.
    pub fn parse_launch(description: &str) -> Result<Self> {
        Self::parse_launch_with(description, &ElementFactory::default())
    }

    /// Build a pipeline from a launch description with elements of `factory`.
    ///
    /// Consecutive segments are linked; a caps segment becomes a capsfilter.
    pub fn parse_launch_with(description: &str, factory: &ElementFactory) -> Result<Self> {
        let parsed = parse_pipeline(description)?;
        let pipeline = Pipeline::new("pipeline");
        let mut previous: Option<Element> = None;
        for segment in &parsed.segments {
            let element = match segment {
                ParsedSegment::Element(parsed) => factory.create(parsed)?,
                ParsedSegment::Caps(caps) => {
                    let filter = factory.make("capsfilter", None)?;
                    filter.set_property("caps", caps.to_string())?;
                    filter
                }
            };
            pipeline.add(&element)?;
            if let Some(previous) = &previous {
                previous.link(&element)?;
            }
            previous = Some(element);
        }
        info!(pipeline = %pipeline.name(), elements = parsed.segments.len(), "launch description built");
        Ok(pipeline)
    }

    /// The bus carrying messages of every child.
    pub fn bus(&self) -> Bus {
        self.bus.clone()
    }

    /// The pipeline clock.
    pub fn pipeline_clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Settings.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The pipeline as a bin.
    pub fn bin(&self) -> &Bin {
        &self.bin
    }

    /// Request `state`. See [`Element::set_state`].
    ///
    /// With `auto_flush_bus`, reaching NULL drops pending messages.
    pub fn set_state(&self, state: State) -> StateChangeResult {
        if self.config.auto_flush_bus && state > State::Null {
            self.bus.set_flushing(false);
        }
        let result = self.bin.set_state(state);
        if self.config.auto_flush_bus && state == State::Null && result.is_ok() {
            self.bus.set_flushing(true);
        }
        result
    }

    /// Request `state` and wait up to the configured timeout for an async
    /// change to finish.
    pub fn set_state_blocking(&self, state: State) -> Result<StateChangeSuccess> {
        let result = match self.set_state(state) {
            Ok(StateChangeSuccess::Async) => {
                let (result, _, pending) = self.bin.get_state(Some(self.config.state_timeout));
                if result == Ok(StateChangeSuccess::Async) && pending.is_some() {
                    return Err(Error::Timeout);
                }
                result
            }
            other => other,
        };
        result.map_err(|_| self.state_error(state))
    }

    fn state_error(&self, target: State) -> Error {
        let current = self.bin.current_state();
        match StateChange::new(current, current.step_toward(target)) {
            Some(transition) => Error::StateChange {
                element: self.name().to_string(),
                transition,
            },
            None => Error::Timeout,
        }
    }

    /// Running time: clock time minus base time while PLAYING, the time
    /// reached when pausing otherwise.
    pub fn running_time(&self) -> ClockTime {
        if self.bin.current_state() == State::Playing {
            self.clock.time().saturating_sub(self.bin.base_time())
        } else {
            self.bin.start_time().unwrap_or(ClockTime::ZERO)
        }
    }
}

impl Deref for Pipeline {
    type Target = Bin;

    fn deref(&self) -> &Bin {
        &self.bin
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.bin.name())
            .field("state", &self.bin.current_state())
            .field("bus", &self.bus)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementImpl;
    use crate::pipeline::bus::MessageKind;
    use std::time::Duration;

    struct Plain;

    impl ElementImpl for Plain {}

    #[test]
    fn test_state_messages_reach_bus() {
        let pipeline = Pipeline::new("p");
        pipeline.add(&Element::new("child", Plain)).unwrap();
        assert_eq!(
            pipeline.set_state_blocking(State::Paused).unwrap(),
            StateChangeSuccess::Success
        );
        let changes: Vec<String> = std::iter::from_fn(|| pipeline.bus().pop())
            .filter(|m| matches!(m.kind, MessageKind::StateChanged { .. }))
            .map(|m| m.source)
            .collect();
        assert!(changes.contains(&"child".to_string()));
        assert!(changes.contains(&"p".to_string()));
        pipeline.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_auto_flush_bus() {
        let pipeline = Pipeline::new("p");
        pipeline.add(&Element::new("child", Plain)).unwrap();
        pipeline.set_state(State::Ready).unwrap();
        assert!(!pipeline.bus().is_empty());
        pipeline.set_state(State::Null).unwrap();
        assert!(pipeline.bus().is_empty());
        pipeline.set_state(State::Ready).unwrap();
        assert!(!pipeline.bus().is_empty());
        pipeline.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_running_time_advances_only_while_playing() {
        let pipeline = Pipeline::with_config(
            PipelineConfig::default()
                .with_name("p")
                .with_system_clock(false),
        );
        let child = Element::new("child", Plain);
        pipeline.add(&child).unwrap();
        assert_eq!(pipeline.running_time(), ClockTime::ZERO);
        pipeline.set_state_blocking(State::Playing).unwrap();
        assert!(child.clock().is_some());
        std::thread::sleep(Duration::from_millis(20));
        pipeline.set_state_blocking(State::Paused).unwrap();
        let paused_at = pipeline.running_time();
        assert!(paused_at >= ClockTime::from_millis(20));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(pipeline.running_time(), paused_at);
        pipeline.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_parse_launch_unknown_element() {
        assert!(matches!(
            Pipeline::parse_launch("nosuchelement ! fakesink"),
            Err(Error::ElementNotFound(_))
        ));
    }
}
