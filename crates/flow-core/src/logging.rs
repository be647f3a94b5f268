//! Structured tracing macros for the flow runtime.
//!
//! Each subsystem logs under its own target so subscribers can filter
//! graph topology changes, node compute, edge propagation, and scheduler
//! activity independently. The macros resolve `tracing` through this
//! crate, so callers do not need their own dependency on it.

#[doc(hidden)]
pub use tracing;

/// Trace graph-level events (topology changes, save/restore, traversal).
#[macro_export]
macro_rules! flow_graph {
    ($level:ident, $($arg:tt)*) => {
        $crate::logging::tracing::$level!(target: "flow::graph", $($arg)*)
    }
}

/// Trace node-level events (compute, port writes, registration).
#[macro_export]
macro_rules! flow_node {
    ($level:ident, $($arg:tt)*) => {
        $crate::logging::tracing::$level!(target: "flow::node", $($arg)*)
    }
}

/// Trace connection-level events (edge creation, per-edge propagation).
#[macro_export]
macro_rules! flow_conn {
    ($level:ident, $($arg:tt)*) => {
        $crate::logging::tracing::$level!(target: "flow::conn", $($arg)*)
    }
}

/// Trace scheduler-level events (worker lifecycle, task queueing).
#[macro_export]
macro_rules! flow_sched {
    ($level:ident, $($arg:tt)*) => {
        $crate::logging::tracing::$level!(target: "flow::sched", $($arg)*)
    }
}
