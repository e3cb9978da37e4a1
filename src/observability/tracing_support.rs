//! Tracing integration for structured logging and spans.

use std::sync::Once;
use tracing::{Level, Span, span};
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Subscriber setup for tests, benches and small applications.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Filter directives used when `RUST_LOG` is not set.
    pub default_filter: String,
    /// Include the emitting thread's name. Task threads are named after their pad.
    pub thread_names: bool,
    /// Write through the test output capture.
    pub test_writer: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_filter: "padflow=info".to_string(),
            thread_names: true,
            test_writer: false,
        }
    }
}

impl TracingConfig {
    /// Quiet setup for unit and integration tests.
    pub fn for_tests() -> Self {
        Self {
            default_filter: "padflow=warn".to_string(),
            thread_names: true,
            test_writer: true,
        }
    }

    /// Set the fallback filter directives.
    pub fn with_filter(mut self, directives: impl Into<String>) -> Self {
        self.default_filter = directives.into();
        self
    }

    /// Install a global `fmt` subscriber.
    ///
    /// Only the first call in a process installs anything; later calls, and
    /// calls made after another subscriber was set, are ignored.
    pub fn init(&self) {
        INIT.call_once(|| {
            let filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&self.default_filter));
            let builder = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_thread_names(self.thread_names);
            let result = if self.test_writer {
                builder.with_test_writer().try_init()
            } else {
                builder.try_init()
            };
            if result.is_err() {
                tracing::debug!("global subscriber already installed");
            }
        });
    }

    /// `TracingConfig::for_tests().init()`.
    pub fn init_for_tests() {
        Self::for_tests().init();
    }
}

/// Create a span for work done on behalf of an element.
///
/// # Example
///
/// ```rust
/// use padflow::observability::span_element;
///
/// let span = span_element("fakesrc0");
/// let _guard = span.enter();
/// ```
#[inline]
pub fn span_element(element: &str) -> Span {
    span!(Level::DEBUG, "element", element = %element)
}

/// Create a span for a pad operation.
#[inline]
pub fn span_pad(element: &str, pad: &str) -> Span {
    span!(Level::TRACE, "pad", element = %element, pad = %pad)
}

/// Create the span entered by a task thread for its whole lifetime.
#[inline]
pub fn span_task(task: &str) -> Span {
    span!(Level::DEBUG, "task", task = %task)
}
