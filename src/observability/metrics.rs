//! Metrics collection using metrics-rs.

use metrics::{Counter, Unit, counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const BUFFERS_PUSHED: &str = "padflow_buffers_pushed";
const FLOW_ERRORS: &str = "padflow_flow_errors";
const STATE_CHANGES: &str = "padflow_state_changes";
const COLLECT_ROUNDS: &str = "padflow_collect_rounds";
const BUS_MESSAGES: &str = "padflow_bus_messages";
const QUEUE_LEVEL: &str = "padflow_queue_level";

/// Initialize metrics descriptions.
///
/// Call this once at application startup before using any metrics.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        BUFFERS_PUSHED,
        Unit::Count,
        "Buffers successfully pushed through a src pad"
    );
    metrics::describe_counter!(
        FLOW_ERRORS,
        Unit::Count,
        "Push or pull calls that returned a flow error"
    );
    metrics::describe_counter!(
        STATE_CHANGES,
        Unit::Count,
        "State transitions executed by elements"
    );
    metrics::describe_counter!(
        COLLECT_ROUNDS,
        Unit::Count,
        "Collect pads callback invocations"
    );
    metrics::describe_counter!(BUS_MESSAGES, Unit::Count, "Messages posted on a bus");
    metrics::describe_gauge!(QUEUE_LEVEL, Unit::Count, "Buffers held by a queue element");
}

/// Counter of buffers pushed through `pad`.
///
/// Pads look this up once and keep the handle.
pub fn buffers_pushed_counter(pad: &str) -> Counter {
    counter!(BUFFERS_PUSHED, "pad" => pad.to_string())
}

/// Record a flow error returned on `pad`.
#[inline]
pub fn record_flow_error(pad: &str, flow: &'static str) {
    counter!(FLOW_ERRORS, "pad" => pad.to_string(), "flow" => flow).increment(1);
}

/// Record a state transition executed by `element`.
#[inline]
pub fn record_state_change(element: &str, transition: &'static str) {
    counter!(STATE_CHANGES, "element" => element.to_string(), "transition" => transition)
        .increment(1);
}

/// Record one collect pads round.
#[inline]
pub fn record_collect_round(element: &str) {
    counter!(COLLECT_ROUNDS, "element" => element.to_string()).increment(1);
}

/// Record a message posted on a bus.
#[inline]
pub fn record_bus_message(kind: &'static str) {
    counter!(BUS_MESSAGES, "kind" => kind).increment(1);
}

/// Record the fill level of a queue element.
#[inline]
pub fn record_queue_level(element: &str, level: usize) {
    gauge!(QUEUE_LEVEL, "element" => element.to_string()).set(level as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        // Should not panic
        init_metrics();
        // Should be idempotent
        init_metrics();
    }

    #[test]
    fn test_recording_without_recorder() {
        buffers_pushed_counter("src").increment(1);
        record_flow_error("src", "not-linked");
        record_state_change("sink", "ReadyToPaused");
        record_collect_round("mux");
        record_bus_message("eos");
        record_queue_level("queue0", 3);
    }
}
