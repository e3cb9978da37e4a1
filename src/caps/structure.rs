//! Named sets of typed fields.

use super::value::{Fraction, Value};
use std::fmt;

/// A media type name plus typed fields, e.g. `video/x-raw, width=(int)320`.
///
/// Field order is preserved for serialization but ignored by
/// [`Structure::is_equal`].
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    name: String,
    fields: Vec<(String, Value)>,
}

impl Structure {
    /// Empty structure named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style [`set`](Self::set).
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Media type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the structure.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Whether the structure is named `name`.
    pub fn has_name(&self, name: &str) -> bool {
        self.name == name
    }

    /// Set a field, replacing any previous value in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Value of field `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Fixed `i32` field.
    pub fn get_int(&self, name: &str) -> Option<i32> {
        self.get(name).and_then(Value::as_int)
    }

    /// Fixed `i64` field.
    pub fn get_int64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_int64)
    }

    /// Fixed double field.
    pub fn get_double(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_double)
    }

    /// Fixed boolean field.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    /// Fixed string field.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Fixed fraction field.
    pub fn get_fraction(&self, name: &str) -> Option<Fraction> {
        self.get(name).and_then(Value::as_fraction)
    }

    /// Whether field `name` exists.
    pub fn has_field(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove field `name`, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(index).1)
    }

    /// Number of fields.
    pub fn n_fields(&self) -> usize {
        self.fields.len()
    }

    /// Iterate over `(name, value)` pairs in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Whether every field is fixed.
    pub fn is_fixed(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.is_fixed())
    }

    /// Field-by-field intersection.
    ///
    /// Names must match. A field present on one side only is copied as is;
    /// a field present on both sides must intersect.
    pub fn intersect(&self, other: &Structure) -> Option<Structure> {
        if self.name != other.name {
            return None;
        }

        let mut out = Structure::new(self.name.clone());
        for (name, value) in &self.fields {
            let merged = match other.get(name) {
                Some(theirs) => value.intersect(theirs)?,
                None => value.clone(),
            };
            out.fields.push((name.clone(), merged));
        }
        for (name, value) in &other.fields {
            if self.get(name).is_none() {
                out.fields.push((name.clone(), value.clone()));
            }
        }
        Some(out)
    }

    /// Whether the two structures have a non-empty intersection.
    pub fn can_intersect(&self, other: &Structure) -> bool {
        self.name == other.name
            && self
                .fields
                .iter()
                .all(|(name, value)| other.get(name).is_none_or(|v| value.intersect(v).is_some()))
    }

    /// Whether `self` is at least as specific as `superset`.
    ///
    /// Every field of `superset` must exist here with a value that is a
    /// subset; extra fields here are allowed.
    pub fn is_subset(&self, superset: &Structure) -> bool {
        self.name == superset.name
            && superset
                .fields
                .iter()
                .all(|(name, value)| self.get(name).is_some_and(|mine| mine.is_subset(value)))
    }

    /// Same name and the same fields with equal values, in any order.
    pub fn is_equal(&self, other: &Structure) -> bool {
        self.name == other.name
            && self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .all(|(name, value)| other.get(name).is_some_and(|v| v.is_equal(value)))
    }

    /// Replace every unfixed field with one concrete choice.
    pub fn fixate(&mut self) {
        for (_, value) in &mut self.fields {
            if !value.is_fixed() {
                *value = value.fixate();
            }
        }
    }

    /// Fix integer field `name` to the accepted value closest to `target`.
    ///
    /// Returns `false` if the field is missing or holds no integers.
    pub fn fixate_field_nearest_int(&mut self, name: &str, target: i32) -> bool {
        let Some(fixed) = self.get(name).and_then(|v| v.fixate_nearest_int(target)) else {
            return false;
        };
        self.set(name, fixed);
        true
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&super::parse::serialize_structure(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_video() -> Structure {
        Structure::new("video/x-raw")
            .with_field("format", vec!["I420", "NV12"])
            .with_field("width", 16..=4096)
            .with_field("height", 16..=4096)
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut s = Structure::new("audio/x-raw").with_field("rate", 44100).with_field("channels", 2);
        s.set("rate", 48000);
        assert_eq!(s.get_int("rate"), Some(48000));
        assert_eq!(s.fields().next().map(|(n, _)| n), Some("rate"));
        assert_eq!(s.n_fields(), 2);
    }

    #[test]
    fn test_intersect_copies_one_sided_fields() {
        let fixed = Structure::new("video/x-raw")
            .with_field("width", 320)
            .with_field("framerate", Fraction::new(30, 1));
        let out = raw_video().intersect(&fixed).unwrap();
        assert_eq!(out.get_int("width"), Some(320));
        assert_eq!(out.get_fraction("framerate"), Some(Fraction::new(30, 1)));
        assert!(out.get("format").is_some());
        assert!(!out.is_fixed());
    }

    #[test]
    fn test_intersect_name_mismatch() {
        let audio = Structure::new("audio/x-raw");
        assert!(raw_video().intersect(&audio).is_none());
        assert!(!raw_video().can_intersect(&audio));
    }

    #[test]
    fn test_intersect_conflicting_field() {
        let a = Structure::new("x").with_field("width", 100);
        let b = Structure::new("x").with_field("width", 200);
        assert!(a.intersect(&b).is_none());
        assert!(!a.can_intersect(&b));
    }

    #[test]
    fn test_subset_and_equal() {
        let specific = Structure::new("video/x-raw")
            .with_field("format", "I420")
            .with_field("width", 320)
            .with_field("height", 240)
            .with_field("pixel-aspect-ratio", Fraction::new(1, 1));
        assert!(specific.is_subset(&raw_video()));
        assert!(!raw_video().is_subset(&specific));

        let reordered = Structure::new("video/x-raw")
            .with_field("height", 16..=4096)
            .with_field("width", 16..=4096)
            .with_field("format", vec!["NV12", "I420"]);
        assert!(reordered.is_equal(&raw_video()));
    }

    #[test]
    fn test_fixate() {
        let mut s = raw_video();
        assert!(s.fixate_field_nearest_int("width", 640));
        assert_eq!(s.get_int("width"), Some(640));
        assert!(!s.fixate_field_nearest_int("format", 1));

        s.fixate();
        assert!(s.is_fixed());
        assert_eq!(s.get_str("format"), Some("I420"));
        assert_eq!(s.get_int("height"), Some(16));
    }
}
