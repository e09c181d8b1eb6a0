//! Per-shard ("map") functions.
//!
//! Each function drains one [`PointIterator`] exactly once and returns an opaque partial
//! ([`MapOutput`]) for the matching reduce function. A shard that contributes nothing returns
//! `None`; absence is never encoded as a zero.

use crate::call::Call;
use crate::error::AggError;
use crate::iterator::PointIterator;
use crate::top::{Direction, Selector, SelectorArgs};
use crate::types::PositionPoint;
use crate::value::{compare_for_selection, Variant};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

/// Count and running mean of one shard's numeric values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeanPartial {
    pub count: u64,
    pub mean: f64,
}

/// Extremes of one shard's numeric values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpreadPartial {
    pub min: f64,
    pub max: f64,
}

/// Welford accumulator: count, mean and sum of squared deviations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StddevPartial {
    pub count: u64,
    pub mean: f64,
    pub m2: f64,
}

impl StddevPartial {
    fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    /// Chan et al. parallel merge.
    pub(crate) fn merge(&mut self, other: &StddevPartial) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let total = self.count + other.count;
        let delta = other.mean - self.mean;
        self.m2 += other.m2 + delta * delta * (self.count as f64 * other.count as f64) / total as f64;
        self.mean += delta * other.count as f64 / total as f64;
        self.count = total;
    }
}

/// Partial aggregate produced by one map invocation over one shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapOutput {
    Count(u64),
    Sum(f64),
    Mean(MeanPartial),
    /// Minimum or maximum under the selection order.
    Extreme(Variant),
    Spread(SpreadPartial),
    Stddev(StddevPartial),
    /// Earliest or latest point.
    Point(PositionPoint),
    Distinct(BTreeSet<Variant>),
    CountDistinct(HashSet<Variant>),
    /// Ranked winners of a `top` or `bottom` selector.
    Points(Vec<PositionPoint>),
    /// Raw drained values, for reducers that need the full population.
    Values(Vec<Variant>),
}

impl MapOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            MapOutput::Count(_) => "count",
            MapOutput::Sum(_) => "sum",
            MapOutput::Mean(_) => "mean",
            MapOutput::Extreme(_) => "extreme",
            MapOutput::Spread(_) => "spread",
            MapOutput::Stddev(_) => "stddev",
            MapOutput::Point(_) => "point",
            MapOutput::Distinct(_) => "distinct",
            MapOutput::CountDistinct(_) => "count_distinct",
            MapOutput::Points(_) => "points",
            MapOutput::Values(_) => "values",
        }
    }
}

/// Signature shared by every map function that needs nothing but the iterator.
pub type SimpleMapFn = fn(&mut dyn PointIterator) -> Option<MapOutput>;

pub fn map_count(itr: &mut dyn PointIterator) -> Option<MapOutput> {
    let mut n = 0u64;
    while itr.advance().is_some() {
        n += 1;
    }
    (n > 0).then_some(MapOutput::Count(n))
}

pub fn map_sum(itr: &mut dyn PointIterator) -> Option<MapOutput> {
    let mut sum = 0.0;
    let mut seen = false;
    while let Some((_, v)) = itr.advance() {
        if let Some(x) = v.as_f64() {
            sum += x;
            seen = true;
        }
    }
    seen.then_some(MapOutput::Sum(sum))
}

pub fn map_mean(itr: &mut dyn PointIterator) -> Option<MapOutput> {
    let mut out = MeanPartial { count: 0, mean: 0.0 };
    while let Some((_, v)) = itr.advance() {
        if let Some(x) = v.as_f64() {
            out.count += 1;
            out.mean += (x - out.mean) / out.count as f64;
        }
    }
    (out.count > 0).then_some(MapOutput::Mean(out))
}

fn map_extreme(itr: &mut dyn PointIterator, keep: Ordering) -> Option<MapOutput> {
    let mut best: Option<Variant> = None;
    while let Some((_, v)) = itr.advance() {
        if !v.is_numeric() {
            continue;
        }
        let replace = match &best {
            Some(b) => compare_for_selection(&v, b) == keep,
            None => true,
        };
        if replace {
            best = Some(v);
        }
    }
    best.map(MapOutput::Extreme)
}

pub fn map_min(itr: &mut dyn PointIterator) -> Option<MapOutput> {
    map_extreme(itr, Ordering::Less)
}

pub fn map_max(itr: &mut dyn PointIterator) -> Option<MapOutput> {
    map_extreme(itr, Ordering::Greater)
}

pub fn map_spread(itr: &mut dyn PointIterator) -> Option<MapOutput> {
    let mut out: Option<SpreadPartial> = None;
    while let Some((_, v)) = itr.advance() {
        let Some(x) = v.as_f64() else { continue };
        out = Some(match out {
            None => SpreadPartial { min: x, max: x },
            Some(s) => SpreadPartial {
                min: s.min.min(x),
                max: s.max.max(x),
            },
        });
    }
    out.map(MapOutput::Spread)
}

pub fn map_stddev(itr: &mut dyn PointIterator) -> Option<MapOutput> {
    let mut out = StddevPartial {
        count: 0,
        mean: 0.0,
        m2: 0.0,
    };
    while let Some((_, v)) = itr.advance() {
        if let Some(x) = v.as_f64() {
            out.push(x);
        }
    }
    (out.count > 0).then_some(MapOutput::Stddev(out))
}

/// Keeps the point whose time compares as `keep` against every other; equal times go to the
/// higher value.
fn map_edge(itr: &mut dyn PointIterator, keep: Ordering) -> Option<MapOutput> {
    let mut best: Option<PositionPoint> = None;
    while let Some((t, v)) = itr.advance() {
        let replace = match &best {
            None => true,
            Some(b) => match t.cmp(&b.time) {
                Ordering::Equal => compare_for_selection(&v, &b.value) == Ordering::Greater,
                o => o == keep,
            },
        };
        if replace {
            best = Some(PositionPoint::new(t, v, itr.current_tags().clone()));
        }
    }
    best.map(MapOutput::Point)
}

pub fn map_first(itr: &mut dyn PointIterator) -> Option<MapOutput> {
    map_edge(itr, Ordering::Less)
}

pub fn map_last(itr: &mut dyn PointIterator) -> Option<MapOutput> {
    map_edge(itr, Ordering::Greater)
}

/// Deduplicates values by identity, ignoring series and time.
pub fn map_distinct(itr: &mut dyn PointIterator) -> Option<MapOutput> {
    let mut values = BTreeSet::new();
    while let Some((_, v)) = itr.advance() {
        values.insert(v);
    }
    (!values.is_empty()).then_some(MapOutput::Distinct(values))
}

pub fn map_count_distinct(itr: &mut dyn PointIterator) -> Option<MapOutput> {
    let mut values = HashSet::new();
    while let Some((_, v)) = itr.advance() {
        values.insert(v);
    }
    (!values.is_empty()).then_some(MapOutput::CountDistinct(values))
}

/// Pass-through: returns the drained values in iteration order, unaggregated.
pub fn map_echo(itr: &mut dyn PointIterator) -> Option<MapOutput> {
    let mut values = Vec::new();
    while let Some((_, v)) = itr.advance() {
        values.push(v);
    }
    (!values.is_empty()).then_some(MapOutput::Values(values))
}

/// Runs a selector with already-validated arguments. A point is stamped with the shard's window
/// floor when the query is windowed.
pub fn map_selector(itr: &mut dyn PointIterator, args: &SelectorArgs) -> Option<MapOutput> {
    let mut selector = Selector::new(args);
    let mut drained = false;
    while let Some((t, v)) = itr.advance() {
        drained = true;
        let time = itr.window_floor().unwrap_or(t);
        selector.push(PositionPoint::new(time, v, itr.current_tags().clone()));
    }
    drained.then(|| MapOutput::Points(selector.finish()))
}

pub fn map_top(itr: &mut dyn PointIterator, call: &Call) -> Result<Option<MapOutput>, AggError> {
    let args = SelectorArgs::from_call(call, Direction::Top)?;
    Ok(map_selector(itr, &args))
}

pub fn map_bottom(itr: &mut dyn PointIterator, call: &Call) -> Result<Option<MapOutput>, AggError> {
    let args = SelectorArgs::from_call(call, Direction::Bottom)?;
    Ok(map_selector(itr, &args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::Expr;
    use crate::iterator::MemoryIterator;
    use crate::types::{Point, TagSet};

    fn series(values: Vec<(i64, Variant)>) -> MemoryIterator {
        MemoryIterator::new(
            values
                .into_iter()
                .map(|(t, v)| Point::new(t, v, TagSet::new()))
                .collect(),
        )
    }

    #[test]
    fn test_map_mean_no_values() {
        let mut itr = MemoryIterator::default();
        assert_eq!(map_mean(&mut itr), None);
    }

    #[test]
    fn test_map_mean() {
        let mut itr = series(vec![(1, 1.0.into())]);
        assert_eq!(
            map_mean(&mut itr),
            Some(MapOutput::Mean(MeanPartial { count: 1, mean: 1.0 }))
        );

        let mut itr = series(vec![(1, 2.0.into()), (2, 8.0.into())]);
        assert_eq!(
            map_mean(&mut itr),
            Some(MapOutput::Mean(MeanPartial { count: 2, mean: 5.0 }))
        );
    }

    #[test]
    fn test_map_mean_coerces_numeric_subtypes_and_skips_others() {
        let mut itr = series(vec![
            (1, Variant::Int(2)),
            (2, Variant::UInt(4)),
            (3, Variant::String("x".into())),
            (4, Variant::Null),
            (5, Variant::Float(6.0)),
        ]);
        assert_eq!(
            map_mean(&mut itr),
            Some(MapOutput::Mean(MeanPartial { count: 3, mean: 4.0 }))
        );

        let mut only_strings = series(vec![(1, "a".into())]);
        assert_eq!(map_mean(&mut only_strings), None);
    }

    #[test]
    fn test_map_count_and_sum() {
        let mut itr = series(vec![(1, 1i64.into()), (2, "x".into()), (3, 2.5.into())]);
        assert_eq!(map_count(&mut itr), Some(MapOutput::Count(3)));

        let mut itr = series(vec![(1, 1i64.into()), (2, "x".into()), (3, 2.5.into())]);
        assert_eq!(map_sum(&mut itr), Some(MapOutput::Sum(3.5)));

        assert_eq!(map_count(&mut MemoryIterator::default()), None);
        assert_eq!(map_sum(&mut MemoryIterator::default()), None);
    }

    #[test]
    fn test_map_min_max_preserve_subtype() {
        let values = vec![(1, Variant::Float(3.5)), (2, Variant::UInt(7)), (3, Variant::Int(-2))];
        assert_eq!(
            map_min(&mut series(values.clone())),
            Some(MapOutput::Extreme(Variant::Int(-2)))
        );
        assert_eq!(
            map_max(&mut series(values)),
            Some(MapOutput::Extreme(Variant::UInt(7)))
        );
        assert_eq!(map_max(&mut series(vec![(1, "z".into())])), None);
    }

    #[test]
    fn test_map_spread_and_stddev() {
        let values = vec![(1, Variant::Float(3.0)), (2, Variant::Int(-1)), (3, Variant::UInt(10))];
        assert_eq!(
            map_spread(&mut series(values.clone())),
            Some(MapOutput::Spread(SpreadPartial { min: -1.0, max: 10.0 }))
        );
        match map_stddev(&mut series(values)) {
            Some(MapOutput::Stddev(p)) => {
                assert_eq!(p.count, 3);
                assert!((p.mean - 4.0).abs() < 1e-12);
                // Deviations: -1, -5, 6.
                assert!((p.m2 - 62.0).abs() < 1e-9);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_stddev_partial_merge_matches_single_pass() {
        let xs = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut whole = StddevPartial { count: 0, mean: 0.0, m2: 0.0 };
        xs.iter().for_each(|x| whole.push(*x));

        let mut left = StddevPartial { count: 0, mean: 0.0, m2: 0.0 };
        let mut right = left;
        xs[..3].iter().for_each(|x| left.push(*x));
        xs[3..].iter().for_each(|x| right.push(*x));
        left.merge(&right);

        assert_eq!(left.count, whole.count);
        assert!((left.mean - whole.mean).abs() < 1e-12);
        assert!((left.m2 - whole.m2).abs() < 1e-9);
    }

    #[test]
    fn test_map_first_last() {
        let mut tags_a = TagSet::new();
        tags_a.insert("host".into(), "a".into());
        let points = vec![
            Point::new(20, 5i64, tags_a.clone()),
            Point::new(10, 1i64, TagSet::new()),
            Point::new(10, 3i64, tags_a.clone()),
            Point::new(30, 2i64, TagSet::new()),
        ];
        assert_eq!(
            map_first(&mut MemoryIterator::new(points.clone())),
            Some(MapOutput::Point(PositionPoint::new(10, 3i64, tags_a)))
        );
        assert_eq!(
            map_last(&mut MemoryIterator::new(points)),
            Some(MapOutput::Point(PositionPoint::new(30, 2i64, TagSet::new())))
        );
        assert_eq!(map_first(&mut MemoryIterator::default()), None);
    }

    #[test]
    fn test_map_echo_keeps_order_and_nulls() {
        let mut itr = series(vec![(1, 3.0.into()), (2, Variant::Null), (3, 1.0.into())]);
        assert_eq!(
            map_echo(&mut itr),
            Some(MapOutput::Values(vec![
                Variant::Float(3.0),
                Variant::Null,
                Variant::Float(1.0)
            ]))
        );
        assert_eq!(map_echo(&mut MemoryIterator::default()), None);
    }

    #[test]
    fn test_map_top_uses_window_floor() {
        let mut itr = MemoryIterator::new(vec![
            Point::new(15, 1i64, TagSet::new()),
            Point::new(17, 9i64, TagSet::new()),
        ])
        .with_window_floor(10);
        let call = Call::new("top", vec![Expr::var("f"), Expr::Number(1.0)]);
        assert_eq!(
            map_top(&mut itr, &call).unwrap(),
            Some(MapOutput::Points(vec![PositionPoint::new(10, 9i64, TagSet::new())]))
        );
    }

    #[test]
    fn test_map_top_empty_and_invalid() {
        let call = Call::new("top", vec![Expr::var("f"), Expr::Number(3.0)]);
        assert_eq!(map_top(&mut MemoryIterator::default(), &call).unwrap(), None);

        let bad = Call::new("top", vec![Expr::var("f")]);
        assert!(matches!(
            map_top(&mut MemoryIterator::default(), &bad),
            Err(AggError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn test_map_bottom() {
        let mut itr = series(vec![(1, 5i64.into()), (2, 1.5.into()), (3, 3u64.into())]);
        let call = Call::new("bottom", vec![Expr::var("f"), Expr::Number(2.0)]);
        assert_eq!(
            map_bottom(&mut itr, &call).unwrap(),
            Some(MapOutput::Points(vec![
                PositionPoint::new(2, 1.5, TagSet::new()),
                PositionPoint::new(3, 3u64, TagSet::new()),
            ]))
        );
    }
}
