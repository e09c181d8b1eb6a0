//! Order-statistics selection over `f64` buffers.

use std::cmp::Ordering;

/// Partitions at or below this size are sorted directly.
const SORT_THRESHOLD: usize = 16;

/// Returns the ascending window `[start, start + count)` of `data` as if the whole slice were
/// sorted, without sorting more than it has to.
///
/// The buffer is reordered in place and the returned slice borrows from it; callers that need the
/// original order must copy before calling. Numbers are ordered by [`f64::total_cmp`] and every
/// NaN, whatever its sign, ranks above every number.
///
/// # Edge cases
/// * `start >= data.len()` or `count == 0` yields an empty slice.
/// * A window running past the end is truncated to the available tail.
///
/// # Complexity
/// Average `O(n + k log k)` for a window of `k` elements. Each level of recursion counts against a
/// depth bound of twice the bit length of `n`; a partition that exhausts it is sorted outright, so
/// adversarial inputs cost at most `O(n log n)`.
pub fn get_sorted_range(data: &mut [f64], start: usize, count: usize) -> &[f64] {
    let n = data.len();
    if start >= n || count == 0 {
        return &[];
    }
    let end = start.saturating_add(count).min(n);
    let depth_limit = 2 * (usize::BITS - n.leading_zeros()) as usize;
    select_range(data, start, end, depth_limit);
    &data[start..end]
}

/// Ascending order with NaN last, matching how value selection ranks NaN.
#[inline]
fn ascending(a: &f64, b: &f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.total_cmp(b),
    }
}

/// Places the elements of sorted positions `[start, end)` there, in order.
/// Requires `start < end <= data.len()`.
fn select_range(data: &mut [f64], start: usize, end: usize, depth: usize) {
    if data.len() <= SORT_THRESHOLD || depth == 0 {
        data.sort_unstable_by(ascending);
        return;
    }

    let (lt, gt) = partition3(data);
    // data[..lt] < pivot, data[lt..gt] == pivot, data[gt..] > pivot.
    if start < lt {
        select_range(&mut data[..lt], start, end.min(lt), depth - 1);
    }
    if end > gt {
        let from = start.max(gt);
        select_range(&mut data[gt..], from - gt, end - gt, depth - 1);
    }
}

/// Three-way partition around a median-of-three pivot. Returns `(lt, gt)` bounding the run of
/// elements equal to the pivot; the run is never empty.
fn partition3(data: &mut [f64]) -> (usize, usize) {
    let last = data.len() - 1;
    let pivot = median_of_three(data[0], data[last / 2], data[last]);

    let (mut lt, mut i, mut gt) = (0, 0, data.len());
    while i < gt {
        match ascending(&data[i], &pivot) {
            Ordering::Less => {
                data.swap(lt, i);
                lt += 1;
                i += 1;
            }
            Ordering::Greater => {
                gt -= 1;
                data.swap(i, gt);
            }
            Ordering::Equal => i += 1,
        }
    }
    (lt, gt)
}

#[inline]
fn median_of_three(a: f64, b: f64, c: f64) -> f64 {
    let (lo, hi) = if ascending(&a, &b) == Ordering::Greater {
        (b, a)
    } else {
        (a, b)
    };
    if ascending(&c, &lo) == Ordering::Less {
        lo
    } else if ascending(&c, &hi) == Ordering::Greater {
        hi
    } else {
        c
    }
}
