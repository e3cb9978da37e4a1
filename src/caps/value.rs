//! Typed field values of caps structures.
//!
//! A [`Value`] is either fixed (one concrete value) or unfixed (a range or a
//! list of alternatives). Intersection narrows two values to what both
//! accept, collapsing to a fixed value when only one candidate is left.

use std::cmp::Ordering;
use std::fmt;

// ============================================================================
// Fraction
// ============================================================================

/// A reduced fraction with a positive denominator, e.g. a framerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fraction {
    numer: i32,
    denom: i32,
}

impl Fraction {
    /// Build and reduce `numer/denom`. A zero denominator yields `0/1`.
    pub fn new(numer: i32, denom: i32) -> Self {
        Self::try_new(numer, denom).unwrap_or(Self { numer: 0, denom: 1 })
    }

    /// Build and reduce `numer/denom`, or `None` if `denom` is zero.
    pub fn try_new(numer: i32, denom: i32) -> Option<Self> {
        if denom == 0 {
            return None;
        }
        let (mut n, mut d) = (i64::from(numer), i64::from(denom));
        if d < 0 {
            n = -n;
            d = -d;
        }
        let g = gcd(n.abs(), d).max(1);
        Some(Self {
            numer: i32::try_from(n / g).ok()?,
            denom: i32::try_from(d / g).ok()?,
        })
    }

    /// Numerator.
    pub fn numer(self) -> i32 {
        self.numer
    }

    /// Denominator, always positive.
    pub fn denom(self) -> i32 {
        self.denom
    }
}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = i64::from(self.numer) * i64::from(other.denom);
        let rhs = i64::from(other.numer) * i64::from(self.denom);
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numer, self.denom)
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

// ============================================================================
// Value
// ============================================================================

/// Type tag of a value, as written in caps strings (`(int)`, `(double)` ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    Int64,
    /// Double precision float.
    Double,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    Str,
    /// Fraction.
    Fraction,
}

impl ValueType {
    /// Canonical name used when serializing.
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Int => "int",
            ValueType::Int64 => "int64",
            ValueType::Double => "double",
            ValueType::Bool => "boolean",
            ValueType::Str => "string",
            ValueType::Fraction => "fraction",
        }
    }

    /// Resolve a type name or one of its abbreviations.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "int" | "i" | "gint" => ValueType::Int,
            "int64" | "gint64" => ValueType::Int64,
            "double" | "d" | "float" | "f" | "gdouble" => ValueType::Double,
            "boolean" | "bool" | "b" | "gboolean" => ValueType::Bool,
            "string" | "str" | "s" | "gchararray" => ValueType::Str,
            "fraction" | "GstFraction" => ValueType::Fraction,
            _ => return None,
        })
    }
}

/// A caps field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Fixed 32-bit integer.
    Int(i32),
    /// Fixed 64-bit integer.
    Int64(i64),
    /// Fixed double.
    Double(f64),
    /// Fixed boolean.
    Bool(bool),
    /// Fixed string.
    Str(String),
    /// Fixed fraction.
    Fraction(Fraction),
    /// Inclusive integer range; values are `min + k * step`.
    IntRange {
        /// Lower bound.
        min: i32,
        /// Upper bound.
        max: i32,
        /// Step between accepted values, at least 1.
        step: i32,
    },
    /// Inclusive 64-bit integer range.
    Int64Range {
        /// Lower bound.
        min: i64,
        /// Upper bound.
        max: i64,
        /// Step between accepted values, at least 1.
        step: i64,
    },
    /// Inclusive double range.
    DoubleRange {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
    /// Inclusive fraction range.
    FractionRange {
        /// Lower bound.
        min: Fraction,
        /// Upper bound.
        max: Fraction,
    },
    /// Unordered set of alternatives.
    List(Vec<Value>),
}

impl Value {
    /// Integer range with step 1.
    pub fn int_range(min: i32, max: i32) -> Self {
        Value::IntRange { min, max, step: 1 }
    }

    /// Fraction range.
    pub fn fraction_range(min: Fraction, max: Fraction) -> Self {
        Value::FractionRange { min, max }
    }

    /// Type of the value, or of the list elements when they all agree.
    pub fn value_type(&self) -> Option<ValueType> {
        Some(match self {
            Value::Int(_) | Value::IntRange { .. } => ValueType::Int,
            Value::Int64(_) | Value::Int64Range { .. } => ValueType::Int64,
            Value::Double(_) | Value::DoubleRange { .. } => ValueType::Double,
            Value::Bool(_) => ValueType::Bool,
            Value::Str(_) => ValueType::Str,
            Value::Fraction(_) | Value::FractionRange { .. } => ValueType::Fraction,
            Value::List(items) => {
                let first = items.first()?.value_type()?;
                if items.iter().all(|v| v.value_type() == Some(first)) {
                    first
                } else {
                    return None;
                }
            }
        })
    }

    /// Whether this is a single concrete value.
    pub fn is_fixed(&self) -> bool {
        !matches!(
            self,
            Value::IntRange { .. }
                | Value::Int64Range { .. }
                | Value::DoubleRange { .. }
                | Value::FractionRange { .. }
                | Value::List(_)
        )
    }

    /// Fixed `i32` content.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Fixed `i64` content, widening `Int`.
    pub fn as_int64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            Value::Int(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Fixed double content.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Fixed boolean content.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Fixed string content.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Fixed fraction content.
    pub fn as_fraction(&self) -> Option<Fraction> {
        match self {
            Value::Fraction(v) => Some(*v),
            _ => None,
        }
    }

    /// Values accepted by both `self` and `other`, or `None` if there are none.
    pub fn intersect(&self, other: &Value) -> Option<Value> {
        use Value::{Double, DoubleRange, FractionRange, Int, Int64, Int64Range, IntRange, List};

        match (self, other) {
            (List(items), _) => intersect_list(items, other),
            (_, List(items)) => intersect_list(items, self),

            (
                IntRange { min, max, step },
                IntRange {
                    min: min2,
                    max: max2,
                    step: step2,
                },
            ) => {
                let (lo, hi, step) = intersect_stepped(
                    (i128::from(*min), i128::from(*max), i128::from(*step)),
                    (i128::from(*min2), i128::from(*max2), i128::from(*step2)),
                )?;
                let (lo, hi, step) = (
                    i32::try_from(lo).ok()?,
                    i32::try_from(hi).ok()?,
                    i32::try_from(step).ok()?,
                );
                Some(if lo == hi {
                    Int(lo)
                } else {
                    IntRange {
                        min: lo,
                        max: hi,
                        step,
                    }
                })
            }
            (
                Int64Range { min, max, step },
                Int64Range {
                    min: min2,
                    max: max2,
                    step: step2,
                },
            ) => {
                let (lo, hi, step) = intersect_stepped(
                    (i128::from(*min), i128::from(*max), i128::from(*step)),
                    (i128::from(*min2), i128::from(*max2), i128::from(*step2)),
                )?;
                let (lo, hi, step) = (
                    i64::try_from(lo).ok()?,
                    i64::try_from(hi).ok()?,
                    i64::try_from(step).ok()?,
                );
                Some(if lo == hi {
                    Int64(lo)
                } else {
                    Int64Range {
                        min: lo,
                        max: hi,
                        step,
                    }
                })
            }
            (DoubleRange { min, max }, DoubleRange { min: min2, max: max2 }) => {
                let lo = min.max(*min2);
                let hi = max.min(*max2);
                match lo.partial_cmp(&hi)? {
                    Ordering::Greater => None,
                    Ordering::Equal => Some(Double(lo)),
                    Ordering::Less => Some(DoubleRange { min: lo, max: hi }),
                }
            }
            (FractionRange { min, max }, FractionRange { min: min2, max: max2 }) => {
                let lo = (*min).max(*min2);
                let hi = (*max).min(*max2);
                match lo.cmp(&hi) {
                    Ordering::Greater => None,
                    Ordering::Equal => Some(Value::Fraction(lo)),
                    Ordering::Less => Some(FractionRange { min: lo, max: hi }),
                }
            }

            (Int(v), IntRange { min, max, step }) | (IntRange { min, max, step }, Int(v)) => {
                in_stepped(i128::from(*v), i128::from(*min), i128::from(*max), i128::from(*step))
                    .then_some(Int(*v))
            }
            (Int64(v), Int64Range { min, max, step })
            | (Int64Range { min, max, step }, Int64(v)) => {
                in_stepped(i128::from(*v), i128::from(*min), i128::from(*max), i128::from(*step))
                    .then_some(Int64(*v))
            }
            (Double(v), DoubleRange { min, max }) | (DoubleRange { min, max }, Double(v)) => {
                (v >= min && v <= max).then_some(Double(*v))
            }
            (Value::Fraction(v), FractionRange { min, max })
            | (FractionRange { min, max }, Value::Fraction(v)) => {
                (v >= min && v <= max).then_some(Value::Fraction(*v))
            }

            (a, b) if a.is_fixed() && a == b => Some(a.clone()),
            _ => None,
        }
    }

    /// Whether every value `self` accepts is also accepted by `other`.
    pub fn is_subset(&self, other: &Value) -> bool {
        match self {
            Value::List(items) if !items.is_empty() => {
                items.iter().all(|item| item.is_subset(other))
            }
            _ => self
                .intersect(other)
                .is_some_and(|common| common.is_equal(self)),
        }
    }

    /// Semantic equality: lists compare as sets.
    pub fn is_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => {
                a.iter().all(|x| b.iter().any(|y| x.is_equal(y)))
                    && b.iter().all(|y| a.iter().any(|x| x.is_equal(y)))
            }
            _ => self == other,
        }
    }

    /// Pick one concrete value: ranges give their minimum, lists their first entry.
    pub fn fixate(&self) -> Value {
        match self {
            Value::IntRange { min, .. } => Value::Int(*min),
            Value::Int64Range { min, .. } => Value::Int64(*min),
            Value::DoubleRange { min, .. } => Value::Double(*min),
            Value::FractionRange { min, .. } => Value::Fraction(*min),
            Value::List(items) => items.first().map(Value::fixate).unwrap_or_else(|| self.clone()),
            fixed => fixed.clone(),
        }
    }

    /// Pick the accepted integer closest to `target`.
    ///
    /// Returns `None` if the value holds no 32-bit integers.
    pub fn fixate_nearest_int(&self, target: i32) -> Option<Value> {
        match self {
            Value::Int(v) => Some(Value::Int(*v)),
            Value::IntRange { min, max, step } => {
                let clamped = i64::from(target.clamp(*min, *max));
                let step = i64::from((*step).max(1));
                let base = i64::from(*min);
                let below = base + ((clamped - base) / step) * step;
                let above = below + step;
                let pick = if above <= i64::from(*max) && above - clamped < clamped - below {
                    above
                } else {
                    below
                };
                i32::try_from(pick).ok().map(Value::Int)
            }
            Value::List(items) => items
                .iter()
                .filter_map(|item| item.fixate_nearest_int(target))
                .filter_map(|v| v.as_int())
                .min_by_key(|v| (i64::from(*v) - i64::from(target)).abs())
                .map(Value::Int),
            _ => None,
        }
    }
}

fn intersect_list(items: &[Value], other: &Value) -> Option<Value> {
    let mut out: Vec<Value> = Vec::new();
    let mut push_unique = |v: Value| {
        if !out.iter().any(|existing| existing.is_equal(&v)) {
            out.push(v);
        }
    };

    for item in items {
        match item.intersect(other) {
            Some(Value::List(found)) => found.into_iter().for_each(&mut push_unique),
            Some(found) => push_unique(found),
            None => {}
        }
    }

    match out.len() {
        0 => None,
        1 => out.pop(),
        _ => Some(Value::List(out)),
    }
}

fn in_stepped(v: i128, min: i128, max: i128, step: i128) -> bool {
    v >= min && v <= max && (v - min) % step.max(1) == 0
}

/// Overlap of two stepped ranges as `(first, last, step)`.
///
/// The common values are the solutions of `v = a.0 (mod a.2)` and
/// `v = b.0 (mod b.2)`, found with the Chinese remainder theorem.
fn intersect_stepped(a: (i128, i128, i128), b: (i128, i128, i128)) -> Option<(i128, i128, i128)> {
    let (step_a, step_b) = (a.2.max(1), b.2.max(1));
    let lo = a.0.max(b.0);
    let hi = a.1.min(b.1);
    if lo > hi {
        return None;
    }

    let (g, x, _) = extended_gcd(step_a, step_b);
    let diff = b.0 - a.0;
    if diff % g != 0 {
        return None;
    }
    let modulus = step_b / g;
    let t = ((diff / g).rem_euclid(modulus) * x.rem_euclid(modulus)).rem_euclid(modulus);
    let step = step_a * modulus;
    let anchor = a.0 + step_a * t;

    let first = lo + (anchor - lo).rem_euclid(step);
    if first > hi {
        return None;
    }
    let last = first + ((hi - first) / step) * step;
    Some((first, last, if first == last { 1 } else { step }))
}

/// `(g, x, y)` with `a * x + b * y == g == gcd(a, b)`, for positive inputs.
fn extended_gcd(a: i128, b: i128) -> (i128, i128, i128) {
    let (mut old_r, mut r) = (a, b);
    let (mut old_x, mut x) = (1i128, 0i128);
    let (mut old_y, mut y) = (0i128, 1i128);
    while r != 0 {
        let q = old_r / r;
        (old_r, r) = (r, old_r - q * r);
        (old_x, x) = (x, old_x - q * x);
        (old_y, y) = (y, old_y - q * y);
    }
    (old_r, old_x, old_y)
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Fraction> for Value {
    fn from(v: Fraction) -> Self {
        Value::Fraction(v)
    }
}

impl From<std::ops::RangeInclusive<i32>> for Value {
    fn from(range: std::ops::RangeInclusive<i32>) -> Self {
        let (min, max) = range.into_inner();
        Value::int_range(min, max)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        let mut values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if values.len() == 1 {
            if let Some(single) = values.pop() {
                return single;
            }
        }
        Value::List(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_reduces() {
        let f = Fraction::new(60, -2);
        assert_eq!((f.numer(), f.denom()), (-30, 1));
        assert_eq!(Fraction::new(2, 4), Fraction::new(1, 2));
        assert!(Fraction::try_new(1, 0).is_none());
        assert!(Fraction::new(1, 3) < Fraction::new(1, 2));
    }

    #[test]
    fn test_fixed_intersection() {
        assert_eq!(Value::Int(5).intersect(&Value::Int(5)), Some(Value::Int(5)));
        assert_eq!(Value::Int(5).intersect(&Value::Int(6)), None);
        assert_eq!(Value::Int(5).intersect(&Value::Int64(5)), None);
        assert_eq!(
            Value::from("I420").intersect(&Value::from("I420")),
            Some(Value::from("I420"))
        );
    }

    #[test]
    fn test_range_intersection_collapses() {
        let a = Value::int_range(1, 10);
        let b = Value::int_range(10, 20);
        assert_eq!(a.intersect(&b), Some(Value::Int(10)));
        assert_eq!(b.intersect(&a), Some(Value::Int(10)));

        let c = Value::int_range(5, 15);
        assert_eq!(a.intersect(&c), Some(Value::int_range(5, 10)));
        assert_eq!(a.intersect(&Value::int_range(11, 12)), None);
    }

    #[test]
    fn test_stepped_range_intersection() {
        let evens = Value::IntRange { min: 0, max: 20, step: 2 };
        let threes = Value::IntRange { min: 0, max: 20, step: 3 };
        assert_eq!(
            evens.intersect(&threes),
            Some(Value::IntRange { min: 0, max: 18, step: 6 })
        );
        assert_eq!(Value::Int(4).intersect(&evens), Some(Value::Int(4)));
        assert_eq!(Value::Int(5).intersect(&evens), None);

        let a = Value::IntRange { min: 2, max: 100, step: 4 };
        let b = Value::IntRange { min: 8, max: 100, step: 6 };
        assert_eq!(a.intersect(&b), Some(Value::IntRange { min: 14, max: 98, step: 12 }));
        let odd = Value::IntRange { min: 1, max: 100, step: 6 };
        assert_eq!(Value::IntRange { min: 0, max: 100, step: 4 }.intersect(&odd), None);
    }

    #[test]
    fn test_stepped_range_large_coprime_steps() {
        let a = Value::IntRange { min: 0, max: i32::MAX, step: 65536 };
        let b = Value::IntRange { min: 1, max: i32::MAX, step: 65537 };
        // The first common value is 2^32.
        assert_eq!(a.intersect(&b), None);
        let c = Value::IntRange { min: 5 * 65536, max: i32::MAX, step: 65537 };
        assert_eq!(a.intersect(&c), Some(Value::Int(5 * 65536)));

        let step = 1i64 << 40;
        let a = Value::Int64Range { min: 0, max: i64::MAX, step };
        let b = Value::Int64Range { min: 1, max: i64::MAX, step: step + 1 };
        assert_eq!(a.intersect(&b), None);
        let c = Value::Int64Range { min: 7 * step, max: i64::MAX, step: step + 1 };
        assert_eq!(a.intersect(&c), Some(Value::Int64(7 * step)));
    }

    #[test]
    fn test_list_intersection() {
        let a = Value::from(vec![1, 2, 3]);
        let b = Value::from(vec![3, 4]);
        assert_eq!(a.intersect(&b), Some(Value::Int(3)));

        let range = Value::int_range(2, 10);
        let common = a.intersect(&range);
        assert!(common.unwrap().is_equal(&Value::from(vec![2, 3])));
        assert_eq!(a.intersect(&Value::Int(9)), None);
    }

    #[test]
    fn test_fraction_range() {
        let rates = Value::fraction_range(Fraction::new(0, 1), Fraction::new(60, 1));
        assert_eq!(
            Value::Fraction(Fraction::new(30, 1)).intersect(&rates),
            Some(Value::Fraction(Fraction::new(30, 1)))
        );
        assert_eq!(Value::Fraction(Fraction::new(120, 1)).intersect(&rates), None);
    }

    #[test]
    fn test_subset() {
        assert!(Value::Int(3).is_subset(&Value::int_range(1, 5)));
        assert!(!Value::int_range(1, 5).is_subset(&Value::Int(3)));
        assert!(Value::from(vec![1, 2]).is_subset(&Value::int_range(1, 5)));
        assert!(Value::int_range(2, 3).is_subset(&Value::int_range(1, 5)));
    }

    #[test]
    fn test_list_equality_ignores_order() {
        let a = Value::from(vec!["a", "b"]);
        let b = Value::from(vec!["b", "a"]);
        assert_ne!(a, b);
        assert!(a.is_equal(&b));
    }

    #[test]
    fn test_fixate() {
        assert_eq!(Value::int_range(16, 4096).fixate(), Value::Int(16));
        assert_eq!(Value::from(vec!["x", "y"]).fixate(), Value::from("x"));
        assert!(Value::int_range(1, 2).fixate().is_fixed());
    }

    #[test]
    fn test_fixate_nearest_int() {
        let range = Value::IntRange { min: 0, max: 100, step: 10 };
        assert_eq!(range.fixate_nearest_int(44), Some(Value::Int(40)));
        assert_eq!(range.fixate_nearest_int(46), Some(Value::Int(50)));
        assert_eq!(range.fixate_nearest_int(1000), Some(Value::Int(100)));
        assert_eq!(
            Value::from(vec![320, 640, 1280]).fixate_nearest_int(700),
            Some(Value::Int(640))
        );
        assert_eq!(Value::from("x").fixate_nearest_int(1), None);
    }
}
