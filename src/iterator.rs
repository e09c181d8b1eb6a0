//! The point iteration contract every map function consumes, plus an in-memory implementation.

use crate::types::{Point, TagSet, Timestamp};
use crate::value::Variant;

/// A per-shard source of points.
///
/// Implemented by the storage layer. Map functions drain it exactly once and make no assumption
/// about how many points it yields.
pub trait PointIterator {
    /// Pulls the next point in time order, or `None` once the shard is exhausted.
    fn advance(&mut self) -> Option<(Timestamp, Variant)>;

    /// Tags of the point most recently returned by [`advance`](Self::advance).
    fn current_tags(&self) -> &TagSet;

    /// Lower time bound of the shard's evaluation window, if the query is windowed.
    fn window_floor(&self) -> Option<Timestamp> {
        None
    }
}

/// A [`PointIterator`] over an owned vector of points, yielded in the order given.
#[derive(Debug, Clone, Default)]
pub struct MemoryIterator {
    points: std::vec::IntoIter<Point>,
    last_tags: TagSet,
    window_floor: Option<Timestamp>,
}

impl MemoryIterator {
    pub fn new(points: Vec<Point>) -> Self {
        MemoryIterator {
            points: points.into_iter(),
            last_tags: TagSet::new(),
            window_floor: None,
        }
    }

    /// Sets the window floor reported to map functions.
    pub fn with_window_floor(mut self, floor: Timestamp) -> Self {
        self.window_floor = Some(floor);
        self
    }

    /// Number of points not yet advanced over.
    pub fn remaining(&self) -> usize {
        self.points.len()
    }
}

impl PointIterator for MemoryIterator {
    fn advance(&mut self) -> Option<(Timestamp, Variant)> {
        let point = self.points.next()?;
        self.last_tags = point.tags;
        Some((point.time, point.value))
    }

    fn current_tags(&self) -> &TagSet {
        &self.last_tags
    }

    fn window_floor(&self) -> Option<Timestamp> {
        self.window_floor
    }
}

/// Wraps an iterator and counts the points drained through it.
pub(crate) struct CountingIterator<'a> {
    inner: &'a mut dyn PointIterator,
    drained: u64,
}

impl<'a> CountingIterator<'a> {
    pub(crate) fn new(inner: &'a mut dyn PointIterator) -> Self {
        CountingIterator { inner, drained: 0 }
    }

    pub(crate) fn drained(&self) -> u64 {
        self.drained
    }
}

impl PointIterator for CountingIterator<'_> {
    fn advance(&mut self) -> Option<(Timestamp, Variant)> {
        let next = self.inner.advance();
        if next.is_some() {
            self.drained += 1;
        }
        next
    }

    fn current_tags(&self) -> &TagSet {
        self.inner.current_tags()
    }

    fn window_floor(&self) -> Option<Timestamp> {
        self.inner.window_floor()
    }
}
