//! Call dispatch: resolves a call description to the map and reduce functions that evaluate it.
//!
//! Each registered name maps to a [`FunctionSpec`]: an argument validator plus descriptors saying
//! how to build the map and reduce side. Window functions (`derivative`, `non_negative_derivative`)
//! resolve a nested aggregate by asking the registry again for the nested call, so shard-local
//! pre-aggregation happens before the outer function runs downstream.

use crate::call::{Call, Expr};
use crate::error::AggError;
use crate::iterator::{CountingIterator, PointIterator};
use crate::map::{self, MapOutput, SimpleMapFn};
use crate::reduce::{self, ReduceFn, ReduceOutput};
use crate::telemetry::{agg_metrics, noop_event_listener, AggEvent, AggEventListener};
use crate::top::{Direction, SelectorArgs};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Default cap on the `N` argument of `top`/`bottom`.
pub const DEFAULT_MAX_TOP_LIMIT: usize = 10_000;

/// Configuration options for the function registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Largest `N` accepted by `top`/`bottom`; larger limits are rejected as invalid arguments.
    pub max_top_limit: usize,
    /// Structured event hook for observability (no-op by default).
    pub event_listener: Arc<dyn AggEventListener>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            max_top_limit: DEFAULT_MAX_TOP_LIMIT,
            event_listener: noop_event_listener(),
        }
    }
}

/// Validates a call's argument shapes before anything is built.
pub type Validator = fn(&FunctionRegistry, &Call) -> Result<(), AggError>;

/// How the map side of a function is built.
#[derive(Debug, Clone, Copy)]
pub enum MapResolver {
    Simple(SimpleMapFn),
    /// `top`/`bottom`: arguments are parsed once at dispatch time.
    Selector(Direction),
    /// `count(field)` or, with a nested `distinct(field)`, count-distinct.
    Count,
    /// Echo for a plain field; the nested aggregate's own map for a nested call.
    Window,
}

/// How the reduce side of a function is built.
#[derive(Debug, Clone, Copy)]
pub enum ReduceResolver {
    Simple(ReduceFn),
    Count,
    Window,
}

/// Registry entry for one function name.
#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub validate: Validator,
    pub map: MapResolver,
    pub reduce: ReduceResolver,
}

#[derive(Debug, Clone)]
enum MapImpl {
    Simple(SimpleMapFn),
    Selector(Arc<SelectorArgs>),
}

/// A resolved map function, ready to run once per shard. Safe to share across threads.
#[derive(Debug, Clone)]
pub struct MapFunc {
    name: &'static str,
    imp: MapImpl,
    events: Arc<dyn AggEventListener>,
}

impl MapFunc {
    /// Name of the function whose partial this produces (the nested aggregate for compositions).
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Drains `itr` and returns the shard's partial.
    pub fn run(&self, itr: &mut dyn PointIterator) -> Option<MapOutput> {
        let mut counting = CountingIterator::new(itr);
        let out = match &self.imp {
            MapImpl::Simple(f) => f(&mut counting),
            MapImpl::Selector(args) => map::map_selector(&mut counting, args),
        };
        let points = counting.drained();
        agg_metrics::record_map(self.name, points);
        self.events.on_event(AggEvent::MapCompleted {
            function: self.name.to_string(),
            points,
            emitted: out.is_some(),
        });
        out
    }
}

/// A resolved reduce function bound to the call it was resolved from.
#[derive(Debug, Clone)]
pub struct ReduceFunc {
    name: &'static str,
    func: ReduceFn,
    call: Call,
    events: Arc<dyn AggEventListener>,
}

impl ReduceFunc {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Merges the partials collected from every shard.
    pub fn run(&self, partials: &[Option<MapOutput>]) -> Result<Option<ReduceOutput>, AggError> {
        let out = (self.func)(partials, &self.call)?;
        agg_metrics::record_reduce(self.name, partials.len() as u64);
        self.events.on_event(AggEvent::ReduceCompleted {
            function: self.name.to_string(),
            partials: partials.len(),
            absent: partials.iter().filter(|p| p.is_none()).count(),
            emitted: out.is_some(),
        });
        Ok(out)
    }
}

/// Maps function names to their specs and resolves calls against them.
#[derive(Debug)]
pub struct FunctionRegistry {
    specs: HashMap<&'static str, FunctionSpec>,
    config: RegistryConfig,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::build(RegistryConfig::default())
    }
}

impl FunctionRegistry {
    /// Creates a registry with every built-in function and the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every built-in function.
    ///
    /// # Errors
    /// Returns `AggError::Config` if `max_top_limit` is zero.
    pub fn with_config(config: RegistryConfig) -> Result<Self, AggError> {
        if config.max_top_limit == 0 {
            return Err(AggError::Config("max_top_limit must be at least 1".to_string()));
        }
        Ok(Self::build(config))
    }

    fn build(config: RegistryConfig) -> Self {
        let mut registry = FunctionRegistry {
            specs: HashMap::new(),
            config,
        };
        for spec in builtin_specs() {
            registry.register(spec);
        }
        registry
    }

    /// Adds (or replaces) a function.
    pub fn register(&mut self, spec: FunctionSpec) {
        self.specs.insert(spec.name, spec);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    /// Registered function names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.specs.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn lookup(&self, name: &str) -> Result<&FunctionSpec, AggError> {
        self.specs
            .get(name)
            .ok_or_else(|| AggError::UnsupportedFunction(name.to_string()))
    }

    /// Checks that `call` names a known function with well-formed arguments, recursing into
    /// nested calls.
    pub fn validate(&self, call: &Call) -> Result<(), AggError> {
        let spec = self.lookup(&call.name)?;
        (spec.validate)(self, call)
    }

    /// Resolves the map function for `call`.
    pub fn initialize_map_func(&self, call: &Call) -> Result<MapFunc, AggError> {
        self.resolve_map(call).inspect_err(|e| self.reject(call, e))
    }

    /// Resolves the reduce function for `call`.
    pub fn initialize_reduce_func(&self, call: &Call) -> Result<ReduceFunc, AggError> {
        self.resolve_reduce(call).inspect_err(|e| self.reject(call, e))
    }

    fn reject(&self, call: &Call, error: &AggError) {
        agg_metrics::record_rejected(&call.name);
        self.config.event_listener.on_event(AggEvent::CallRejected {
            function: call.name.clone(),
            error: error.to_string(),
        });
    }

    fn map_func(&self, name: &'static str, imp: MapImpl) -> MapFunc {
        MapFunc {
            name,
            imp,
            events: Arc::clone(&self.config.event_listener),
        }
    }

    fn reduce_func(&self, name: &'static str, func: ReduceFn, call: &Call) -> ReduceFunc {
        ReduceFunc {
            name,
            func,
            call: call.clone(),
            events: Arc::clone(&self.config.event_listener),
        }
    }

    fn resolve_map(&self, call: &Call) -> Result<MapFunc, AggError> {
        let spec = self.lookup(&call.name)?;
        (spec.validate)(self, call)?;
        match spec.map {
            MapResolver::Simple(f) => Ok(self.map_func(spec.name, MapImpl::Simple(f))),
            MapResolver::Selector(direction) => {
                let args = SelectorArgs::from_call(call, direction)?;
                Ok(self.map_func(spec.name, MapImpl::Selector(Arc::new(args))))
            }
            MapResolver::Count => Ok(if nested_distinct(call).is_some() {
                self.map_func("count_distinct", MapImpl::Simple(map::map_count_distinct))
            } else {
                self.map_func(spec.name, MapImpl::Simple(map::map_count))
            }),
            MapResolver::Window => match call.args.first().and_then(Expr::as_call) {
                Some(inner) => self.resolve_map(inner),
                None => Ok(self.map_func(spec.name, MapImpl::Simple(map::map_echo))),
            },
        }
    }

    fn resolve_reduce(&self, call: &Call) -> Result<ReduceFunc, AggError> {
        let spec = self.lookup(&call.name)?;
        (spec.validate)(self, call)?;
        match spec.reduce {
            ReduceResolver::Simple(f) => Ok(self.reduce_func(spec.name, f, call)),
            ReduceResolver::Count => Ok(if nested_distinct(call).is_some() {
                self.reduce_func("count_distinct", reduce::reduce_count_distinct, call)
            } else {
                self.reduce_func(spec.name, reduce::reduce_count, call)
            }),
            ReduceResolver::Window => match call.args.first().and_then(Expr::as_call) {
                Some(inner) => self.resolve_reduce(inner),
                None => Ok(self.reduce_func(spec.name, reduce::reduce_echo, call)),
            },
        }
    }
}

fn nested_distinct(call: &Call) -> Option<&Call> {
    call.args
        .first()
        .and_then(Expr::as_call)
        .filter(|inner| inner.name == "distinct")
}

// --- validators --- //

fn expect_arity(call: &Call, min: usize, max: usize) -> Result<(), AggError> {
    let n = call.args.len();
    if n < min || n > max {
        let expected = if min == max {
            format!("{}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(AggError::invalid_args(
            &call.name,
            format!("expected {} argument(s), got {}", expected, n),
        ));
    }
    Ok(())
}

fn expect_field(call: &Call, idx: usize) -> Result<(), AggError> {
    match &call.args[idx] {
        Expr::VarRef(_) => Ok(()),
        other => Err(AggError::invalid_args(
            &call.name,
            format!("argument {} must be a field reference, got {}", idx + 1, other.kind()),
        )),
    }
}

fn validate_field(_: &FunctionRegistry, call: &Call) -> Result<(), AggError> {
    expect_arity(call, 1, 1)?;
    expect_field(call, 0)
}

fn validate_count(registry: &FunctionRegistry, call: &Call) -> Result<(), AggError> {
    expect_arity(call, 1, 1)?;
    match &call.args[0] {
        Expr::Call(inner) if inner.name == "distinct" => validate_field(registry, inner),
        Expr::Call(inner) => Err(AggError::invalid_args(
            &call.name,
            format!("only distinct() may be nested, got {}()", inner.name),
        )),
        _ => expect_field(call, 0),
    }
}

fn validate_percentile(_: &FunctionRegistry, call: &Call) -> Result<(), AggError> {
    expect_arity(call, 2, 2)?;
    expect_field(call, 0)?;
    reduce::percentile_arg(call).map(|_| ())
}

fn validate_selector(registry: &FunctionRegistry, call: &Call, direction: Direction) -> Result<(), AggError> {
    let args = SelectorArgs::from_call(call, direction)?;
    if args.limit > registry.config.max_top_limit {
        return Err(AggError::invalid_args(
            &call.name,
            format!(
                "limit {} exceeds the maximum of {}",
                args.limit, registry.config.max_top_limit
            ),
        ));
    }
    Ok(())
}

fn validate_top(registry: &FunctionRegistry, call: &Call) -> Result<(), AggError> {
    validate_selector(registry, call, Direction::Top)
}

fn validate_bottom(registry: &FunctionRegistry, call: &Call) -> Result<(), AggError> {
    validate_selector(registry, call, Direction::Bottom)
}

fn validate_window(registry: &FunctionRegistry, call: &Call) -> Result<(), AggError> {
    expect_arity(call, 1, 2)?;
    match &call.args[0] {
        Expr::VarRef(_) => {}
        Expr::Call(inner) => {
            let nested = registry.lookup(&inner.name)?;
            if matches!(nested.map, MapResolver::Window) {
                return Err(AggError::invalid_args(
                    &call.name,
                    format!("{}() cannot wrap another window function", call.name),
                ));
            }
            (nested.validate)(registry, inner)?;
        }
        other => {
            return Err(AggError::invalid_args(
                &call.name,
                format!(
                    "argument 1 must be a field reference or an aggregate call, got {}",
                    other.kind()
                ),
            ))
        }
    }
    match call.args.get(1) {
        None => Ok(()),
        Some(Expr::Duration(d)) if !d.is_zero() => Ok(()),
        Some(Expr::Duration(_)) => Err(AggError::invalid_args(&call.name, "interval must be positive")),
        Some(other) => Err(AggError::invalid_args(
            &call.name,
            format!("argument 2 must be a duration literal, got {}", other.kind()),
        )),
    }
}

fn simple(
    name: &'static str,
    validate: Validator,
    map: SimpleMapFn,
    reduce: ReduceFn,
) -> FunctionSpec {
    FunctionSpec {
        name,
        validate,
        map: MapResolver::Simple(map),
        reduce: ReduceResolver::Simple(reduce),
    }
}

fn builtin_specs() -> Vec<FunctionSpec> {
    vec![
        FunctionSpec {
            name: "count",
            validate: validate_count,
            map: MapResolver::Count,
            reduce: ReduceResolver::Count,
        },
        simple("sum", validate_field, map::map_sum, reduce::reduce_sum),
        simple("mean", validate_field, map::map_mean, reduce::reduce_mean),
        simple("min", validate_field, map::map_min, reduce::reduce_min),
        simple("max", validate_field, map::map_max, reduce::reduce_max),
        simple("spread", validate_field, map::map_spread, reduce::reduce_spread),
        simple("stddev", validate_field, map::map_stddev, reduce::reduce_stddev),
        simple("first", validate_field, map::map_first, reduce::reduce_first),
        simple("last", validate_field, map::map_last, reduce::reduce_last),
        simple("median", validate_field, map::map_echo, reduce::reduce_median),
        simple("percentile", validate_percentile, map::map_echo, reduce::reduce_percentile),
        simple("distinct", validate_field, map::map_distinct, reduce::reduce_distinct),
        FunctionSpec {
            name: "top",
            validate: validate_top,
            map: MapResolver::Selector(Direction::Top),
            reduce: ReduceResolver::Simple(reduce::reduce_top),
        },
        FunctionSpec {
            name: "bottom",
            validate: validate_bottom,
            map: MapResolver::Selector(Direction::Bottom),
            reduce: ReduceResolver::Simple(reduce::reduce_bottom),
        },
        FunctionSpec {
            name: "derivative",
            validate: validate_window,
            map: MapResolver::Window,
            reduce: ReduceResolver::Window,
        },
        FunctionSpec {
            name: "non_negative_derivative",
            validate: validate_window,
            map: MapResolver::Window,
            reduce: ReduceResolver::Window,
        },
    ]
}

/// Process-wide registry with the default configuration.
pub fn default_registry() -> &'static FunctionRegistry {
    static REGISTRY: OnceLock<FunctionRegistry> = OnceLock::new();
    REGISTRY.get_or_init(FunctionRegistry::new)
}

/// Resolves the map function for `call` against the default registry.
pub fn initialize_map_func(call: &Call) -> Result<MapFunc, AggError> {
    default_registry().initialize_map_func(call)
}

/// Resolves the reduce function for `call` against the default registry.
pub fn initialize_reduce_func(call: &Call) -> Result<ReduceFunc, AggError> {
    default_registry().initialize_reduce_func(call)
}
