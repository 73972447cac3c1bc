//! Ambient observability stack (§6a "Observability"): in-process counters,
//! carried regardless of the Non-goals around external metrics exporters.

pub mod metrics;

pub use metrics::ServiceMetrics;
