//! Ranking and selection shared by `top` and `bottom`, on both the map and the reduce side.
//!
//! Points are ranked by value (selection order), then earlier time, then the sorted tag pairs.
//! When the call names grouping tags, selection runs in rounds: each round takes the best remaining
//! point of every tag group, ranks the round, and keeps as many as still fit. Two-phase execution
//! stays exact because a point outside a shard's local winners can never be a global winner.

use crate::call::{Call, Expr};
use crate::error::AggError;
use crate::types::{compare_tags, PositionPoint, TagSet};
use crate::value::compare_for_selection;
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};

/// Which end of the value range a selector keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Top,
    Bottom,
}

impl Direction {
    pub fn function_name(self) -> &'static str {
        match self {
            Direction::Top => "top",
            Direction::Bottom => "bottom",
        }
    }
}

/// Parsed arguments of `top(field, [tag, ...], N)` / `bottom(...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorArgs {
    pub direction: Direction,
    pub group_by: Vec<String>,
    pub limit: usize,
}

impl SelectorArgs {
    /// Validates and extracts selector arguments from a call.
    pub fn from_call(call: &Call, direction: Direction) -> Result<Self, AggError> {
        let name = direction.function_name();
        if call.args.len() < 2 {
            return Err(AggError::invalid_args(
                name,
                format!("expected at least 2 arguments, got {}", call.args.len()),
            ));
        }

        if !matches!(call.args[0], Expr::VarRef(_)) {
            return Err(AggError::invalid_args(
                name,
                format!("first argument must be a field reference, got {}", call.args[0].kind()),
            ));
        }

        let last = &call.args[call.args.len() - 1];
        let limit = match last.as_number() {
            Some(n) if n >= 1.0 && n.fract() == 0.0 && n <= usize::MAX as f64 => n as usize,
            Some(n) => {
                return Err(AggError::invalid_args(
                    name,
                    format!("limit must be a positive integer, got {}", n),
                ))
            }
            None => {
                return Err(AggError::invalid_args(
                    name,
                    format!("last argument must be a number literal, got {}", last.kind()),
                ))
            }
        };

        let mut group_by = Vec::with_capacity(call.args.len() - 2);
        for arg in &call.args[1..call.args.len() - 1] {
            match arg.as_ref_name() {
                Some(tag) => group_by.push(tag.to_string()),
                None => {
                    return Err(AggError::invalid_args(
                        name,
                        format!("grouping arguments must be tag names, got {}", arg.kind()),
                    ))
                }
            }
        }

        Ok(SelectorArgs {
            direction,
            group_by,
            limit,
        })
    }
}

/// Full ranking comparator: `Less` means `a` ranks ahead of `b`.
///
/// Numeric values rank ahead of non-numeric ones in both directions.
pub fn rank_cmp(a: &PositionPoint, b: &PositionPoint, direction: Direction) -> Ordering {
    let by_value = match direction {
        Direction::Top => compare_for_selection(&b.value, &a.value),
        Direction::Bottom => match (a.value.is_numeric(), b.value.is_numeric()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => compare_for_selection(&a.value, &b.value),
        },
    };
    by_value
        .then_with(|| a.time.cmp(&b.time))
        .then_with(|| compare_tags(&a.tags, &b.tags))
}

/// Key identifying a point's tag group: one slot per grouping tag, `None` where the tag is missing.
type GroupKey = Vec<Option<String>>;

fn group_key(group_by: &[String], tags: &TagSet) -> GroupKey {
    group_by.iter().map(|name| tags.get(name).cloned()).collect()
}

/// Running working set for a selector. Each tag group keeps at most `limit` members once
/// pruned, since no round can draw more than that from a single group.
#[derive(Debug)]
pub struct Selector<'a> {
    args: &'a SelectorArgs,
    groups: BTreeMap<GroupKey, Vec<PositionPoint>>,
}

impl<'a> Selector<'a> {
    pub fn new(args: &'a SelectorArgs) -> Self {
        Selector {
            args,
            groups: BTreeMap::new(),
        }
    }

    /// Offers a candidate to the working set.
    pub fn push(&mut self, point: PositionPoint) {
        let key = group_key(&self.args.group_by, &point.tags);
        let direction = self.args.direction;
        let limit = self.args.limit;
        let members = self.groups.entry(key).or_default();
        members.push(point);
        if members.len() >= limit.saturating_mul(2).max(64) {
            members.sort_by(|a, b| rank_cmp(a, b, direction));
            members.truncate(limit);
        }
    }

    /// Ranks the working set and returns the winners.
    pub fn finish(self) -> Vec<PositionPoint> {
        let direction = self.args.direction;
        let limit = self.args.limit;

        if self.args.group_by.is_empty() {
            let mut all: Vec<PositionPoint> = self.groups.into_values().flatten().collect();
            all.sort_by(|a, b| rank_cmp(a, b, direction));
            all.truncate(limit);
            return all;
        }

        let mut groups: Vec<VecDeque<PositionPoint>> = self
            .groups
            .into_values()
            .map(|mut members| {
                members.sort_by(|a, b| rank_cmp(a, b, direction));
                members.truncate(limit);
                VecDeque::from(members)
            })
            .collect();

        let mut out = Vec::new();
        while out.len() < limit {
            let mut round: Vec<PositionPoint> =
                groups.iter_mut().filter_map(VecDeque::pop_front).collect();
            if round.is_empty() {
                break;
            }
            round.sort_by(|a, b| rank_cmp(a, b, direction));
            round.truncate(limit - out.len());
            out.extend(round);
        }
        out
    }
}

/// Selects the ranked winners among `candidates` according to `args`.
pub fn select_points<I>(candidates: I, args: &SelectorArgs) -> Vec<PositionPoint>
where
    I: IntoIterator<Item = PositionPoint>,
{
    let mut selector = Selector::new(args);
    for p in candidates {
        selector.push(p);
    }
    selector.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Variant;

    fn create_tags(pairs: &[(&str, &str)]) -> TagSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn pp(time: i64, value: impl Into<Variant>, host: &str) -> PositionPoint {
        PositionPoint::new(time, value, create_tags(&[("host", host)]))
    }

    fn top_call(args: Vec<Expr>) -> Call {
        Call::new("top", args)
    }

    #[test]
    fn test_parse_args_plain_and_grouped() {
        let call = top_call(vec![Expr::var("f"), Expr::Number(2.0)]);
        let args = SelectorArgs::from_call(&call, Direction::Top).unwrap();
        assert!(args.group_by.is_empty());
        assert_eq!(args.limit, 2);

        let call = top_call(vec![
            Expr::var("f"),
            Expr::var("host"),
            Expr::tag("region"),
            Expr::Number(5.0),
        ]);
        let args = SelectorArgs::from_call(&call, Direction::Top).unwrap();
        assert_eq!(args.group_by, vec!["host".to_string(), "region".to_string()]);
        assert_eq!(args.limit, 5);
    }

    #[test]
    fn test_parse_args_rejects_bad_shapes() {
        let cases = vec![
            vec![Expr::var("f")],
            vec![Expr::var("f"), Expr::var("host")],
            vec![Expr::Number(1.0), Expr::Number(2.0)],
            vec![Expr::var("f"), Expr::Number(0.0)],
            vec![Expr::var("f"), Expr::Number(2.5)],
            vec![Expr::var("f"), Expr::Number(-3.0)],
            vec![Expr::var("f"), Expr::Number(1.0), Expr::Number(2.0)],
        ];
        for args in cases {
            let call = top_call(args);
            match SelectorArgs::from_call(&call, Direction::Top) {
                Err(AggError::InvalidArguments { function, .. }) => assert_eq!(function, "top"),
                other => panic!("expected InvalidArguments for {}, got {:?}", call, other),
            }
        }
    }

    #[test]
    fn test_rank_cmp_levels() {
        let a = pp(10, 99i64, "a");
        let b = pp(10, 53i64, "a");
        assert_eq!(rank_cmp(&a, &b, Direction::Top), Ordering::Less);
        assert_eq!(rank_cmp(&a, &b, Direction::Bottom), Ordering::Greater);

        let early = pp(10, 99i64, "b");
        let late = pp(20, 99i64, "a");
        assert_eq!(rank_cmp(&early, &late, Direction::Top), Ordering::Less);
        assert_eq!(rank_cmp(&early, &late, Direction::Bottom), Ordering::Less);

        let host_a = pp(10, 99i64, "a");
        let host_b = pp(10, 99.0, "b");
        assert_eq!(rank_cmp(&host_a, &host_b, Direction::Top), Ordering::Less);
    }

    #[test]
    fn test_grouped_rounds_prefer_one_per_group() {
        let args = SelectorArgs {
            direction: Direction::Top,
            group_by: vec!["host".into()],
            limit: 2,
        };
        let points = vec![pp(10, 99i64, "a"), pp(20, 53i64, "b"), pp(30, 88i64, "a")];
        assert_eq!(
            select_points(points, &args),
            vec![pp(10, 99i64, "a"), pp(20, 53i64, "b")]
        );
    }

    #[test]
    fn test_grouped_rounds_fill_from_single_group() {
        let args = SelectorArgs {
            direction: Direction::Top,
            group_by: vec!["host".into()],
            limit: 2,
        };
        let points = vec![pp(20, 99i64, "a"), pp(10, 53i64, "a"), pp(10, 99i64, "a")];
        assert_eq!(
            select_points(points, &args),
            vec![pp(10, 99i64, "a"), pp(20, 99i64, "a")]
        );
    }

    #[test]
    fn test_group_key_keeps_slots_apart() {
        let group_by = vec!["host".to_string(), "dc".to_string()];
        let packed = create_tags(&[("host", "x,dc:y")]);
        let split = create_tags(&[("host", "x"), ("dc", "y")]);
        assert_ne!(group_key(&group_by, &packed), group_key(&group_by, &split));
        assert_eq!(group_key(&group_by, &packed), vec![Some("x,dc:y".to_string()), None]);

        let other_tags = create_tags(&[("host", "x"), ("dc", "y"), ("rack", "r1")]);
        assert_eq!(group_key(&group_by, &split), group_key(&group_by, &other_tags));
    }

    #[test]
    fn test_bottom_selection() {
        let args = SelectorArgs {
            direction: Direction::Bottom,
            group_by: Vec::new(),
            limit: 2,
        };
        let points = vec![pp(10, 99i64, "a"), pp(10, 53i64, "b"), pp(20, 53u64, "a")];
        assert_eq!(
            select_points(points, &args),
            vec![pp(10, 53i64, "b"), pp(20, 53u64, "a")]
        );
    }
}
