//! Heterogeneous value domain and its two orderings.
//!
//! Two comparisons are defined over [`Variant`]:
//!
//! - [`compare_for_ordering`]: the identity-preserving total order used by `distinct`. Strings sort
//!   first, then booleans, then every numeric subtype interleaved by magnitude. Values of different
//!   subtypes are never equal, even when numerically equal; at equal magnitude the subtype decides
//!   (`Int < UInt < Float`). `Null` sorts before everything. This order backs `Ord for Variant`.
//! - [`compare_for_selection`]: the order used by selectors (`top`, `bottom`, `min`, `max`). Numeric
//!   subtypes compare by exact magnitude, so `Int(1)`, `UInt(1)` and `Float(1.0)` tie, and any
//!   numeric value outranks any non-numeric one.
//!
//! Mixed integer/float comparisons are exact. Nothing is promoted through a lossy `as f64`, which
//! keeps both orders transitive for integers beyond 2^53.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single field value flowing through map and reduce functions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Float(f64),
    Int(i64),
    UInt(u64),
    String(String),
    Bool(bool),
    Null,
}

impl Variant {
    /// Returns true for `Float`, `Int` and `UInt`.
    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Variant::Float(_) | Variant::Int(_) | Variant::UInt(_))
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Variant::Null)
    }

    /// Numeric coercion: the value's magnitude as f64, or `None` for non-numeric values.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variant::Float(f) => Some(*f),
            Variant::Int(i) => Some(*i as f64),
            Variant::UInt(u) => Some(*u as f64),
            Variant::String(_) | Variant::Bool(_) | Variant::Null => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Variant::Float(_) => "float",
            Variant::Int(_) => "int",
            Variant::UInt(_) => "uint",
            Variant::String(_) => "string",
            Variant::Bool(_) => "bool",
            Variant::Null => "null",
        }
    }

    #[inline]
    fn as_i128(&self) -> Option<i128> {
        match self {
            Variant::Int(i) => Some(*i as i128),
            Variant::UInt(u) => Some(*u as i128),
            _ => None,
        }
    }

    /// Category rank shared by both orders for non-numeric values.
    #[inline]
    fn category_rank(&self) -> u8 {
        match self {
            Variant::Null => 0,
            Variant::String(_) => 1,
            Variant::Bool(_) => 2,
            Variant::Float(_) | Variant::Int(_) | Variant::UInt(_) => 3,
        }
    }

    /// Tie-break between numeric subtypes of equal magnitude in the identity order.
    #[inline]
    fn subtype_rank(&self) -> u8 {
        match self {
            Variant::Int(_) => 0,
            Variant::UInt(_) => 1,
            Variant::Float(_) => 2,
            _ => 3,
        }
    }
}

/// 2^64; every `i64` and `u64` lies strictly below it and at or above its negation.
const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

/// Compares two floats by value, treating `-0.0 == 0.0` and ranking every NaN above every
/// number (all NaNs tie).
#[inline]
fn cmp_float_magnitude(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Exact comparison of an integer against a float.
fn cmp_int_float(i: i128, f: f64) -> Ordering {
    if f.is_nan() || f >= TWO_POW_64 {
        return Ordering::Less;
    }
    if f < -TWO_POW_64 {
        return Ordering::Greater;
    }
    let t = f.trunc();
    match i.cmp(&(t as i128)) {
        Ordering::Equal if f > t => Ordering::Less,
        Ordering::Equal if f < t => Ordering::Greater,
        other => other,
    }
}

/// Magnitude comparison of two numeric variants. Non-numeric input compares equal; callers
/// check `is_numeric` first.
fn compare_magnitude(a: &Variant, b: &Variant) -> Ordering {
    match (a, b) {
        (Variant::Float(x), Variant::Float(y)) => cmp_float_magnitude(*x, *y),
        (Variant::Float(x), _) => match b.as_i128() {
            Some(i) => cmp_int_float(i, *x).reverse(),
            None => Ordering::Equal,
        },
        (_, Variant::Float(y)) => match a.as_i128() {
            Some(i) => cmp_int_float(i, *y),
            None => Ordering::Equal,
        },
        _ => match (a.as_i128(), b.as_i128()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => Ordering::Equal,
        },
    }
}

/// Identity-preserving total order used by `distinct`.
pub fn compare_for_ordering(a: &Variant, b: &Variant) -> Ordering {
    match (a, b) {
        (Variant::String(x), Variant::String(y)) => x.cmp(y),
        (Variant::Bool(x), Variant::Bool(y)) => x.cmp(y),
        (Variant::Null, Variant::Null) => Ordering::Equal,
        _ if a.is_numeric() && b.is_numeric() => compare_magnitude(a, b)
            .then_with(|| a.subtype_rank().cmp(&b.subtype_rank()))
            .then_with(|| match (a, b) {
                // Separates -0.0 from 0.0 and distinct NaN payloads, matching bitwise identity.
                (Variant::Float(x), Variant::Float(y)) => x.total_cmp(y),
                _ => Ordering::Equal,
            }),
        _ => a.category_rank().cmp(&b.category_rank()),
    }
}

/// Order used by selectors; numeric subtypes are unified by magnitude.
pub fn compare_for_selection(a: &Variant, b: &Variant) -> Ordering {
    match (a, b) {
        _ if a.is_numeric() && b.is_numeric() => compare_magnitude(a, b),
        (Variant::String(x), Variant::String(y)) => x.cmp(y),
        (Variant::Bool(x), Variant::Bool(y)) => x.cmp(y),
        (Variant::Null, Variant::Null) => Ordering::Equal,
        _ => a.category_rank().cmp(&b.category_rank()),
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Variant::Float(a), Variant::Float(b)) => a.to_bits() == b.to_bits(),
            (Variant::Int(a), Variant::Int(b)) => a == b,
            (Variant::UInt(a), Variant::UInt(b)) => a == b,
            (Variant::String(a), Variant::String(b)) => a == b,
            (Variant::Bool(a), Variant::Bool(b)) => a == b,
            (Variant::Null, Variant::Null) => true,
            _ => false,
        }
    }
}

impl Eq for Variant {}

impl Hash for Variant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Variant::Float(f) => f.to_bits().hash(state),
            Variant::Int(i) => i.hash(state),
            Variant::UInt(u) => u.hash(state),
            Variant::String(s) => s.hash(state),
            Variant::Bool(b) => b.hash(state),
            Variant::Null => {}
        }
    }
}

impl PartialOrd for Variant {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Variant {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_for_ordering(self, other)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Float(v) => write!(f, "{}", v),
            Variant::Int(v) => write!(f, "{}", v),
            Variant::UInt(v) => write!(f, "{}", v),
            Variant::String(v) => write!(f, "{}", v),
            Variant::Bool(v) => write!(f, "{}", v),
            Variant::Null => write!(f, "null"),
        }
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Float(v)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Variant::Int(v)
    }
}

impl From<u64> for Variant {
    fn from(v: u64) -> Self {
        Variant::UInt(v)
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Bool(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.to_string())
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Variant::String(v)
    }
}
