//! Cross-shard ("reduce") functions.
//!
//! Every reduce function takes the collected per-shard partials plus the original call. `None`
//! entries are shards that produced nothing and are skipped without affecting the result. When no
//! data survives, the result is `Ok(None)`, with one deliberate exception: count-distinct reports
//! an integer zero.

use crate::call::Call;
use crate::error::AggError;
use crate::map::{MapOutput, MeanPartial, SpreadPartial, StddevPartial};
use crate::select::get_sorted_range;
use crate::top::{select_points, Direction, SelectorArgs};
use crate::types::PositionPoint;
use crate::value::{compare_for_selection, Variant};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

/// Final (merged) result of an aggregate expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceOutput {
    Value(Variant),
    Values(Vec<Variant>),
    Points(Vec<PositionPoint>),
}

impl ReduceOutput {
    pub fn as_value(&self) -> Option<&Variant> {
        match self {
            ReduceOutput::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_values(&self) -> Option<&[Variant]> {
        match self {
            ReduceOutput::Values(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_points(&self) -> Option<&[PositionPoint]> {
        match self {
            ReduceOutput::Points(p) => Some(p),
            _ => None,
        }
    }
}

/// Signature shared by every reduce function.
pub type ReduceFn = fn(&[Option<MapOutput>], &Call) -> Result<Option<ReduceOutput>, AggError>;

/// Extracts the payload of every present partial, failing on a partial of the wrong kind.
fn partials<'a, T>(
    values: &'a [Option<MapOutput>],
    function: &'static str,
    extract: impl Fn(&'a MapOutput) -> Option<T>,
) -> Result<Vec<T>, AggError> {
    values
        .iter()
        .flatten()
        .map(|p| {
            extract(p).ok_or(AggError::UnexpectedPartial {
                function,
                found: p.kind(),
            })
        })
        .collect()
}

fn count_to_variant(n: u64) -> Variant {
    Variant::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

pub fn reduce_count(values: &[Option<MapOutput>], _call: &Call) -> Result<Option<ReduceOutput>, AggError> {
    let counts = partials(values, "count", |p| match p {
        MapOutput::Count(n) => Some(*n),
        _ => None,
    })?;
    if counts.is_empty() {
        return Ok(None);
    }
    let total = counts.into_iter().fold(0u64, u64::saturating_add);
    Ok(Some(ReduceOutput::Value(count_to_variant(total))))
}

pub fn reduce_sum(values: &[Option<MapOutput>], _call: &Call) -> Result<Option<ReduceOutput>, AggError> {
    let sums = partials(values, "sum", |p| match p {
        MapOutput::Sum(s) => Some(*s),
        _ => None,
    })?;
    if sums.is_empty() {
        return Ok(None);
    }
    Ok(Some(ReduceOutput::Value(Variant::Float(sums.into_iter().sum()))))
}

/// Count-weighted merge of mean partials: `Σ(count_i · mean_i) / Σcount_i`.
pub fn merge_mean(values: &[Option<MapOutput>]) -> Result<Option<MeanPartial>, AggError> {
    let means = partials(values, "mean", |p| match p {
        MapOutput::Mean(m) => Some(*m),
        _ => None,
    })?;
    let mut count = 0u64;
    let mut weighted = 0.0;
    for m in means {
        count += m.count;
        weighted += m.count as f64 * m.mean;
    }
    if count == 0 {
        return Ok(None);
    }
    Ok(Some(MeanPartial {
        count,
        mean: weighted / count as f64,
    }))
}

pub fn reduce_mean(values: &[Option<MapOutput>], _call: &Call) -> Result<Option<ReduceOutput>, AggError> {
    Ok(merge_mean(values)?.map(|m| ReduceOutput::Value(Variant::Float(m.mean))))
}

fn reduce_extreme(
    values: &[Option<MapOutput>],
    function: &'static str,
    keep: Ordering,
) -> Result<Option<ReduceOutput>, AggError> {
    let extremes = partials(values, function, |p| match p {
        MapOutput::Extreme(v) => Some(v),
        _ => None,
    })?;
    let mut best: Option<&Variant> = None;
    for v in extremes {
        let replace = match best {
            Some(b) => compare_for_selection(v, b) == keep,
            None => true,
        };
        if replace {
            best = Some(v);
        }
    }
    Ok(best.cloned().map(ReduceOutput::Value))
}

pub fn reduce_min(values: &[Option<MapOutput>], _call: &Call) -> Result<Option<ReduceOutput>, AggError> {
    reduce_extreme(values, "min", Ordering::Less)
}

pub fn reduce_max(values: &[Option<MapOutput>], _call: &Call) -> Result<Option<ReduceOutput>, AggError> {
    reduce_extreme(values, "max", Ordering::Greater)
}

pub fn reduce_spread(values: &[Option<MapOutput>], _call: &Call) -> Result<Option<ReduceOutput>, AggError> {
    let spreads = partials(values, "spread", |p| match p {
        MapOutput::Spread(s) => Some(*s),
        _ => None,
    })?;
    let merged = spreads.into_iter().reduce(|a, b| SpreadPartial {
        min: a.min.min(b.min),
        max: a.max.max(b.max),
    });
    Ok(merged.map(|s| ReduceOutput::Value(Variant::Float(s.max - s.min))))
}

/// Sample standard deviation; undefined (None) below two values.
pub fn reduce_stddev(values: &[Option<MapOutput>], _call: &Call) -> Result<Option<ReduceOutput>, AggError> {
    let parts = partials(values, "stddev", |p| match p {
        MapOutput::Stddev(s) => Some(*s),
        _ => None,
    })?;
    let mut merged = StddevPartial {
        count: 0,
        mean: 0.0,
        m2: 0.0,
    };
    for p in &parts {
        merged.merge(p);
    }
    if merged.count < 2 {
        return Ok(None);
    }
    let variance = merged.m2 / (merged.count - 1) as f64;
    Ok(Some(ReduceOutput::Value(Variant::Float(variance.sqrt()))))
}

fn reduce_edge(
    values: &[Option<MapOutput>],
    function: &'static str,
    keep: Ordering,
) -> Result<Option<ReduceOutput>, AggError> {
    let points = partials(values, function, |p| match p {
        MapOutput::Point(pt) => Some(pt),
        _ => None,
    })?;
    let mut best: Option<&PositionPoint> = None;
    for p in points {
        let replace = match best {
            None => true,
            Some(b) => match p.time.cmp(&b.time) {
                Ordering::Equal => compare_for_selection(&p.value, &b.value) == Ordering::Greater,
                o => o == keep,
            },
        };
        if replace {
            best = Some(p);
        }
    }
    Ok(best.map(|p| ReduceOutput::Value(p.value.clone())))
}

pub fn reduce_first(values: &[Option<MapOutput>], _call: &Call) -> Result<Option<ReduceOutput>, AggError> {
    reduce_edge(values, "first", Ordering::Less)
}

pub fn reduce_last(values: &[Option<MapOutput>], _call: &Call) -> Result<Option<ReduceOutput>, AggError> {
    reduce_edge(values, "last", Ordering::Greater)
}

/// Union of every shard's distinct values, sorted by the total order.
pub fn reduce_distinct(values: &[Option<MapOutput>], _call: &Call) -> Result<Option<ReduceOutput>, AggError> {
    let sets = partials(values, "distinct", |p| match p {
        MapOutput::Distinct(s) => Some(s),
        _ => None,
    })?;
    let mut union: BTreeSet<Variant> = BTreeSet::new();
    for s in sets {
        union.extend(s.iter().cloned());
    }
    if union.is_empty() {
        return Ok(None);
    }
    Ok(Some(ReduceOutput::Values(union.into_iter().collect())))
}

/// Cardinality of the union of every shard's distinct values. Absent input counts as zero.
pub fn reduce_count_distinct(
    values: &[Option<MapOutput>],
    _call: &Call,
) -> Result<Option<ReduceOutput>, AggError> {
    let sets = partials(values, "count_distinct", |p| match p {
        MapOutput::CountDistinct(s) => Some(s),
        _ => None,
    })?;
    let mut union: HashSet<&Variant> = HashSet::new();
    for s in sets {
        union.extend(s.iter());
    }
    Ok(Some(ReduceOutput::Value(count_to_variant(union.len() as u64))))
}

fn reduce_selector(
    values: &[Option<MapOutput>],
    call: &Call,
    direction: Direction,
) -> Result<Option<ReduceOutput>, AggError> {
    let args = SelectorArgs::from_call(call, direction)?;
    let lists = partials(values, direction.function_name(), |p| match p {
        MapOutput::Points(pts) => Some(pts),
        _ => None,
    })?;
    let candidates: Vec<PositionPoint> = lists.into_iter().flatten().cloned().collect();
    if candidates.is_empty() {
        return Ok(None);
    }
    Ok(Some(ReduceOutput::Points(select_points(candidates, &args))))
}

pub fn reduce_top(values: &[Option<MapOutput>], call: &Call) -> Result<Option<ReduceOutput>, AggError> {
    reduce_selector(values, call, Direction::Top)
}

pub fn reduce_bottom(values: &[Option<MapOutput>], call: &Call) -> Result<Option<ReduceOutput>, AggError> {
    reduce_selector(values, call, Direction::Bottom)
}

/// Merges echoed value lists into one numeric population, dropping nulls and non-numeric values.
/// NaN is kept and ranks above every number, as it does for `min` and `max`.
fn numeric_population(values: &[Option<MapOutput>], function: &'static str) -> Result<Vec<f64>, AggError> {
    let lists = partials(values, function, |p| match p {
        MapOutput::Values(v) => Some(v),
        _ => None,
    })?;
    Ok(lists
        .into_iter()
        .flatten()
        .filter_map(Variant::as_f64)
        .collect())
}

/// Reads the percentile from the call's last argument.
pub(crate) fn percentile_arg(call: &Call) -> Result<f64, AggError> {
    match call.args.last().and_then(|e| e.as_number()) {
        Some(p) if (0.0..=100.0).contains(&p) => Ok(p),
        Some(p) => Err(AggError::invalid_args(
            &call.name,
            format!("percentile must be within [0, 100], got {}", p),
        )),
        None => Err(AggError::invalid_args(
            &call.name,
            "last argument must be a number literal",
        )),
    }
}

/// Nearest-rank percentile: `rank = ceil(p · n / 100) - 1`, clamped to `[0, n - 1]`.
pub fn reduce_percentile(values: &[Option<MapOutput>], call: &Call) -> Result<Option<ReduceOutput>, AggError> {
    let percentile = percentile_arg(call)?;
    let mut data = numeric_population(values, "percentile")?;
    if data.is_empty() {
        return Ok(None);
    }
    let n = data.len();
    // Multiply before dividing so integral `p · n` stays exact.
    let rank = ((percentile * n as f64 / 100.0).ceil() as usize)
        .saturating_sub(1)
        .min(n - 1);
    Ok(get_sorted_range(&mut data, rank, 1)
        .first()
        .map(|v| ReduceOutput::Value(Variant::Float(*v))))
}

/// Middle value; the midpoint of the two middle values for an even population.
pub fn reduce_median(values: &[Option<MapOutput>], _call: &Call) -> Result<Option<ReduceOutput>, AggError> {
    let mut data = numeric_population(values, "median")?;
    let n = data.len();
    let median = match n {
        0 => return Ok(None),
        1 => data[0],
        _ if n % 2 == 0 => match get_sorted_range(&mut data, n / 2 - 1, 2) {
            [low, high] => *low + (*high - *low) / 2.0,
            _ => return Ok(None),
        },
        _ => data_at(&mut data, n / 2),
    };
    Ok(Some(ReduceOutput::Value(Variant::Float(median))))
}

fn data_at(data: &mut [f64], rank: usize) -> f64 {
    get_sorted_range(data, rank, 1).first().copied().unwrap_or(f64::NAN)
}

/// Pass-through reduce for echoed values: concatenates every shard's values in shard order.
pub fn reduce_echo(values: &[Option<MapOutput>], _call: &Call) -> Result<Option<ReduceOutput>, AggError> {
    let lists = partials(values, "echo", |p| match p {
        MapOutput::Values(v) => Some(v),
        _ => None,
    })?;
    let merged: Vec<Variant> = lists.into_iter().flatten().cloned().collect();
    if merged.is_empty() {
        return Ok(None);
    }
    Ok(Some(ReduceOutput::Values(merged)))
}
