//! Configuration for pipelines and streaming threads.
//!
//! Both structs follow the same pattern: `Default` gives working values and
//! `with_*` methods override single fields.
//!
//! ```rust
//! use padflow::config::PipelineConfig;
//! use std::time::Duration;
//!
//! let config = PipelineConfig::default()
//!     .with_name("playback")
//!     .with_state_timeout(Duration::from_secs(2));
//! assert!(config.auto_flush_bus);
//! ```

use std::time::Duration;

/// Default timeout for blocking state changes.
pub const DEFAULT_STATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default prefix of task thread names.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "padflow-task";

// ============================================================================
// PipelineConfig
// ============================================================================

/// Settings of a top-level [`Pipeline`](crate::pipeline::Pipeline).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Pipeline name.
    pub name: String,
    /// Drop pending bus messages when the pipeline returns to NULL.
    pub auto_flush_bus: bool,
    /// How long [`Pipeline::set_state_blocking`](crate::pipeline::Pipeline::set_state_blocking)
    /// waits for an async state change to complete.
    pub state_timeout: Duration,
    /// Use the process-wide system clock. When false the pipeline gets a private clock.
    pub use_system_clock: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "pipeline".to_string(),
            auto_flush_bus: true,
            state_timeout: DEFAULT_STATE_TIMEOUT,
            use_system_clock: true,
        }
    }
}

impl PipelineConfig {
    /// Set the pipeline name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Keep or drop pending bus messages on the transition to NULL.
    pub fn with_auto_flush_bus(mut self, enabled: bool) -> Self {
        self.auto_flush_bus = enabled;
        self
    }

    /// Set the blocking state change timeout.
    pub fn with_state_timeout(mut self, timeout: Duration) -> Self {
        self.state_timeout = timeout;
        self
    }

    /// Choose between the shared system clock and a private clock.
    pub fn with_system_clock(mut self, enabled: bool) -> Self {
        self.use_system_clock = enabled;
        self
    }
}

// ============================================================================
// TaskConfig
// ============================================================================

/// Settings of the thread backing a [`Task`](crate::task::Task).
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Prefix of the worker thread name; the task name is appended.
    pub thread_name_prefix: String,
    /// Stack size of the worker thread, platform default when `None`.
    pub stack_size: Option<usize>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            stack_size: None,
        }
    }
}

impl TaskConfig {
    /// Set the thread name prefix.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the worker stack size.
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Full thread name for a task called `task_name`.
    pub fn thread_name(&self, task_name: &str) -> String {
        format!("{}:{}", self.thread_name_prefix, task_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.name, "pipeline");
        assert!(config.auto_flush_bus);
        assert!(config.use_system_clock);
        assert_eq!(config.state_timeout, DEFAULT_STATE_TIMEOUT);
    }

    #[test]
    fn test_pipeline_builder() {
        let config = PipelineConfig::default()
            .with_name("p")
            .with_auto_flush_bus(false)
            .with_system_clock(false);
        assert_eq!(config.name, "p");
        assert!(!config.auto_flush_bus);
        assert!(!config.use_system_clock);
    }

    #[test]
    fn test_task_thread_name() {
        let config = TaskConfig::default().with_thread_name_prefix("worker").with_stack_size(1 << 20);
        assert_eq!(config.thread_name("src"), "worker:src");
        assert_eq!(config.stack_size, Some(1 << 20));
    }
}
