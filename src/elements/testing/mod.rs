//! Sources and sinks for tests and examples.
//!
//! - [`FakeSrc`]: numbered, timestamped buffers pushed from a task
//! - [`FakeSink`]: counts and drops buffers, prerolls asynchronously
//! - [`MemSrc`]: an in-memory byte array served in pull or push mode

mod fakesink;
mod fakesrc;
mod memsrc;

pub use fakesink::{BufferCallback, FakeSink};
pub use fakesrc::FakeSrc;
pub use memsrc::MemSrc;
