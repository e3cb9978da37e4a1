//! Observability features: metrics and tracing.
//!
//! - **Metrics**: Counters and gauges via `metrics-rs`
//! - **Tracing**: Structured logging and spans via `tracing`
//!
//! ## Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `padflow_buffers_pushed` | Counter | `pad` | Buffers pushed through a src pad |
//! | `padflow_flow_errors` | Counter | `pad`, `flow` | Push/pull calls returning a flow error |
//! | `padflow_state_changes` | Counter | `element`, `transition` | Executed state transitions |
//! | `padflow_collect_rounds` | Counter | `element` | Collect pads callback invocations |
//! | `padflow_bus_messages` | Counter | `kind` | Messages posted on a bus |
//! | `padflow_queue_level` | Gauge | `element` | Buffers held by a queue |
//!
//! The crate never installs a recorder; the application picks one.
//!
//! ## Example
//!
//! ```rust
//! use padflow::observability::{TracingConfig, init_metrics};
//!
//! init_metrics();
//! TracingConfig::default().with_filter("padflow=debug").init();
//! ```

mod metrics;
mod tracing_support;

pub use metrics::{
    buffers_pushed_counter, init_metrics, record_bus_message, record_collect_round,
    record_flow_error, record_queue_level, record_state_change,
};
pub use tracing_support::{TracingConfig, span_element, span_pad, span_task};
