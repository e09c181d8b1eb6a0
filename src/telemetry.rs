use std::sync::Arc;

/// Receives one [`AggEvent`] per map run, per reduce run and per rejected call.
///
/// Set on [`RegistryConfig::event_listener`](crate::RegistryConfig). Events fire on the thread that
/// ran the function, so map calls fanned out over a pool report concurrently.
pub trait AggEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: AggEvent);
}

/// Structured events emitted by resolved map/reduce functions and the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum AggEvent {
    /// A map function drained one shard. `emitted` is false when the shard produced no partial.
    MapCompleted {
        function: String,
        points: u64,
        emitted: bool,
    },
    /// A reduce function merged `partials` inputs, `absent` of which were empty shards.
    ReduceCompleted {
        function: String,
        partials: usize,
        absent: usize,
        emitted: bool,
    },
    CallRejected {
        function: String,
        error: String,
    },
}

#[derive(Debug)]
pub struct NoopEventListener;

impl AggEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: AggEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn AggEventListener> {
    Arc::new(NoopEventListener)
}

/// Metrics instrumentation via the `metrics` facade.
///
/// Library-safe: every call is a no-op until the embedding process installs a recorder.
/// Counters carry a `function` label with the resolved function name.
pub mod agg_metrics {
    use ::metrics::{describe_counter, Unit};

    // Counters are exposed as `<name>_total` by the Prometheus exporter.
    pub const MAP_INVOCATIONS: &str = "ugnos_agg_map_invocations";
    pub const MAP_POINTS: &str = "ugnos_agg_map_points";
    pub const REDUCE_INVOCATIONS: &str = "ugnos_agg_reduce_invocations";
    pub const REDUCE_PARTIALS: &str = "ugnos_agg_reduce_partials";
    pub const CALLS_REJECTED: &str = "ugnos_agg_calls_rejected";

    #[inline]
    pub fn record_map(function: &str, points: u64) {
        ::metrics::counter!(MAP_INVOCATIONS, "function" => function.to_string()).increment(1);
        if points > 0 {
            ::metrics::counter!(MAP_POINTS, "function" => function.to_string()).increment(points);
        }
    }

    #[inline]
    pub fn record_reduce(function: &str, partials: u64) {
        ::metrics::counter!(REDUCE_INVOCATIONS, "function" => function.to_string()).increment(1);
        if partials > 0 {
            ::metrics::counter!(REDUCE_PARTIALS, "function" => function.to_string())
                .increment(partials);
        }
    }

    #[inline]
    pub fn record_rejected(function: &str) {
        ::metrics::counter!(CALLS_REJECTED, "function" => function.to_string()).increment(1);
    }

    /// Registers units and help text for every metric. Call once after installing a recorder.
    pub fn describe_all() {
        describe_counter!(
            MAP_INVOCATIONS,
            Unit::Count,
            "Number of map function invocations (one per shard)."
        );
        describe_counter!(
            MAP_POINTS,
            Unit::Count,
            "Number of points drained by map functions."
        );
        describe_counter!(
            REDUCE_INVOCATIONS,
            Unit::Count,
            "Number of reduce function invocations (one per aggregate expression)."
        );
        describe_counter!(
            REDUCE_PARTIALS,
            Unit::Count,
            "Number of per-shard partials handed to reduce functions, absent ones included."
        );
        describe_counter!(
            CALLS_REJECTED,
            Unit::Count,
            "Number of calls the dispatcher rejected as unsupported or malformed."
        );
    }
}
