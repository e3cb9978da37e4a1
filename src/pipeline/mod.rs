//! Bins, pipelines and the application-facing surface.
//!
//! - [`Bin`]: an element containing elements, aggregating their states
//! - [`Pipeline`]: the top-level bin owning a [`Bus`] and a clock
//! - [`Bus`]: messages from streaming threads to the application
//! - [`parse_pipeline`] and [`ElementFactory`]: build pipelines from text
//!
//! # Example
//!
//! ```rust
//! use padflow::element::{Element, State};
//! use padflow::elements::{FakeSink, FakeSrc};
//! use padflow::pipeline::Pipeline;
//!
//! let pipeline = Pipeline::new("example");
//! let src = Element::new("src", FakeSrc::default().with_num_buffers(3));
//! let sink = Element::new("sink", FakeSink::default());
//! pipeline.add_many(&[&src, &sink]).unwrap();
//! src.link(&sink).unwrap();
//!
//! pipeline.set_state_blocking(State::Playing).unwrap();
//! pipeline.set_state(State::Null).unwrap();
//! ```

pub mod bin;
pub mod bus;
pub mod factory;
pub mod parser;
pub mod toplevel;

pub use bin::Bin;
pub use bus::{Bus, Message, MessageKind};
pub use factory::ElementFactory;
pub use parser::{ParsedElement, ParsedPipeline, ParsedSegment, PropertyValue, parse_pipeline};
pub use toplevel::Pipeline;

/// Build a pipeline from a launch description. See [`Pipeline::parse_launch`].
pub fn parse_launch(description: &str) -> crate::error::Result<Pipeline> {
    Pipeline::parse_launch(description)
}
