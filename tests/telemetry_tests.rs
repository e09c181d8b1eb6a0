//! Structured events and `metrics` counters emitted by resolved functions and the dispatcher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use metrics::{
    Counter, CounterFn, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
};
use ugnos_mapreduce::telemetry::agg_metrics;
use ugnos_mapreduce::{
    AggEvent, AggEventListener, Call, Expr, FunctionRegistry, MemoryIterator, Point,
    RegistryConfig, TagSet,
};

#[derive(Debug, Default)]
struct RecordingListener {
    events: Mutex<Vec<AggEvent>>,
}

impl AggEventListener for RecordingListener {
    fn on_event(&self, event: AggEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn registry_with(listener: Arc<RecordingListener>) -> FunctionRegistry {
    FunctionRegistry::with_config(RegistryConfig {
        event_listener: listener,
        ..RegistryConfig::default()
    })
    .unwrap()
}

fn points(n: usize) -> Vec<Point> {
    (0..n)
        .map(|i| Point::new(i as i64, i as f64, TagSet::new()))
        .collect()
}

#[test]
fn map_and_reduce_emit_completion_events() {
    let listener = Arc::new(RecordingListener::default());
    let registry = registry_with(Arc::clone(&listener));
    let call = Call::new("mean", vec![Expr::var("value")]);

    let map = registry.initialize_map_func(&call).unwrap();
    let reduce = registry.initialize_reduce_func(&call).unwrap();
    let partials = vec![
        map.run(&mut MemoryIterator::new(points(3))),
        map.run(&mut MemoryIterator::default()),
    ];
    reduce.run(&partials).unwrap();

    let events = listener.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            AggEvent::MapCompleted {
                function: "mean".to_string(),
                points: 3,
                emitted: true,
            },
            AggEvent::MapCompleted {
                function: "mean".to_string(),
                points: 0,
                emitted: false,
            },
            AggEvent::ReduceCompleted {
                function: "mean".to_string(),
                partials: 2,
                absent: 1,
                emitted: true,
            },
        ]
    );
}

#[test]
fn rejected_calls_emit_one_event_each() {
    let listener = Arc::new(RecordingListener::default());
    let registry = registry_with(Arc::clone(&listener));

    let nested_unknown = Call::new("derivative", vec![Expr::Call(Call::new("foo", vec![]))]);
    assert!(registry.initialize_map_func(&nested_unknown).is_err());
    assert!(registry
        .initialize_reduce_func(&Call::new("top", vec![Expr::var("f")]))
        .is_err());

    let events = listener.events.lock().unwrap().clone();
    assert_eq!(events.len(), 2, "events: {:?}", events);
    match &events[0] {
        AggEvent::CallRejected { function, error } => {
            assert_eq!(function, "derivative");
            assert!(error.contains("foo"), "error: {}", error);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(matches!(&events[1], AggEvent::CallRejected { function, .. } if function == "top"));
}

// ---------- metrics ----------

#[derive(Debug, Default)]
struct Cell(AtomicU64);

impl CounterFn for Cell {
    fn increment(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn absolute(&self, value: u64) {
        self.0.fetch_max(value, Ordering::Relaxed);
    }
}

/// Minimal in-process recorder keyed by metric name (labels folded together).
#[derive(Debug, Default)]
struct CountingRecorder {
    counters: Mutex<HashMap<String, Arc<Cell>>>,
    described: Mutex<Vec<String>>,
}

impl CountingRecorder {
    fn value(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .unwrap()
            .get(name)
            .map(|c| c.0.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl Recorder for CountingRecorder {
    fn describe_counter(&self, key: KeyName, _unit: Option<Unit>, _description: SharedString) {
        self.described.lock().unwrap().push(key.as_str().to_string());
    }

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        let cell = Arc::clone(
            self.counters
                .lock()
                .unwrap()
                .entry(key.name().to_string())
                .or_default(),
        );
        Counter::from_arc(cell)
    }

    fn register_gauge(&self, _key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, _key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}

#[test]
fn counters_track_invocations_points_and_rejections() {
    let recorder = CountingRecorder::default();
    metrics::with_local_recorder(&recorder, || {
        agg_metrics::describe_all();

        let registry = FunctionRegistry::new();
        let call = Call::new("sum", vec![Expr::var("value")]);
        let map = registry.initialize_map_func(&call).unwrap();
        let reduce = registry.initialize_reduce_func(&call).unwrap();
        let partials = vec![
            map.run(&mut MemoryIterator::new(points(4))),
            map.run(&mut MemoryIterator::new(points(2))),
            map.run(&mut MemoryIterator::default()),
        ];
        reduce.run(&partials).unwrap();
        assert!(registry
            .initialize_map_func(&Call::new("nope", vec![]))
            .is_err());
    });

    assert_eq!(recorder.value(agg_metrics::MAP_INVOCATIONS), 3);
    assert_eq!(recorder.value(agg_metrics::MAP_POINTS), 6);
    assert_eq!(recorder.value(agg_metrics::REDUCE_INVOCATIONS), 1);
    assert_eq!(recorder.value(agg_metrics::REDUCE_PARTIALS), 3);
    assert_eq!(recorder.value(agg_metrics::CALLS_REJECTED), 1);

    let described = recorder.described.lock().unwrap();
    for name in [
        agg_metrics::MAP_INVOCATIONS,
        agg_metrics::MAP_POINTS,
        agg_metrics::REDUCE_INVOCATIONS,
        agg_metrics::REDUCE_PARTIALS,
        agg_metrics::CALLS_REJECTED,
    ] {
        assert!(described.iter().any(|d| d == name), "missing description for {}", name);
    }
}
