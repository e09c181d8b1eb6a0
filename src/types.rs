use crate::value::Variant;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Timestamp type (nanoseconds since epoch). Signed so that window bounds before the epoch
/// remain representable.
pub type Timestamp = i64;

/// TagSet type (using a HashMap for flexibility).
pub type TagSet = HashMap<String, String>;

/// Represents a single sample of one series as handed out by a shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub time: Timestamp,
    pub value: Variant,
    #[serde(default)]
    pub tags: TagSet,
}

impl Point {
    pub fn new(time: Timestamp, value: impl Into<Variant>, tags: TagSet) -> Self {
        Point {
            time,
            value: value.into(),
            tags,
        }
    }
}

/// A point retained by a selector (top, bottom, first, last), keeping the time and tags it
/// was observed with so the final result can still be attributed to a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionPoint {
    pub time: Timestamp,
    pub value: Variant,
    #[serde(default)]
    pub tags: TagSet,
}

impl PositionPoint {
    pub fn new(time: Timestamp, value: impl Into<Variant>, tags: TagSet) -> Self {
        PositionPoint {
            time,
            value: value.into(),
            tags,
        }
    }
}

impl From<Point> for PositionPoint {
    fn from(p: Point) -> Self {
        PositionPoint {
            time: p.time,
            value: p.value,
            tags: p.tags,
        }
    }
}

/// Orders tag sets by their key-sorted `(key, value)` pairs, compared lexicographically.
/// Equal only when both sets hold exactly the same pairs.
pub fn compare_tags(a: &TagSet, b: &TagSet) -> Ordering {
    if a.len() <= 1 && b.len() <= 1 {
        return a.iter().next().cmp(&b.iter().next());
    }
    sorted_pairs(a).cmp(&sorted_pairs(b))
}

fn sorted_pairs(tags: &TagSet) -> Vec<(&String, &String)> {
    let mut pairs: Vec<(&String, &String)> = tags.iter().collect();
    pairs.sort_unstable();
    pairs
}
