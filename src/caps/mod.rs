//! Stream format descriptors and the negotiation algebra.
//!
//! [`Caps`] is an ordered set of alternative [`Structure`]s, or one of the two
//! special values `ANY` (accepts everything) and `EMPTY` (accepts nothing).
//!
//! Negotiation between two pads is:
//! 1. each side advertises its caps (possibly with ranges and lists),
//! 2. the two sets are intersected,
//! 3. one side fixates the intersection and announces it with a caps event.
//!
//! ```rust
//! use padflow::caps::Caps;
//!
//! let src: Caps = "video/x-raw, width=(int)[ 16, 4096 ], format=(string){ I420, NV12 }"
//!     .parse()
//!     .unwrap();
//! let sink: Caps = "video/x-raw, width=(int)320".parse().unwrap();
//!
//! let common = src.intersect(&sink);
//! let fixed = common.fixate().unwrap();
//! assert!(fixed.is_fixed());
//! assert_eq!(fixed.to_string(), "video/x-raw, width=(int)320, format=(string)I420");
//! ```

mod parse;
mod structure;
mod value;

pub use parse::CapsParseError;
pub use structure::Structure;
pub use value::{Fraction, Value, ValueType};

use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

/// A set of alternative stream formats.
#[derive(Debug, Clone, PartialEq)]
pub struct Caps {
    any: bool,
    structures: SmallVec<[Structure; 2]>,
}

impl Caps {
    /// Caps accepting every format.
    pub fn new_any() -> Self {
        Self {
            any: true,
            structures: SmallVec::new(),
        }
    }

    /// Caps accepting no format.
    pub fn new_empty() -> Self {
        Self {
            any: false,
            structures: SmallVec::new(),
        }
    }

    /// Caps with a single structure.
    pub fn from_structure(structure: Structure) -> Self {
        let mut caps = Self::new_empty();
        caps.structures.push(structure);
        caps
    }

    /// Caps with a single field-less structure named `name`.
    pub fn new_simple(name: &str) -> Self {
        Self::from_structure(Structure::new(name))
    }

    /// Append a structure, skipping it if an equal one is already present.
    ///
    /// Appending to `ANY` has no effect.
    pub fn append_structure(&mut self, structure: Structure) {
        if self.any {
            return;
        }
        if !self.structures.iter().any(|s| s.is_equal(&structure)) {
            self.structures.push(structure);
        }
    }

    /// Whether these are the `ANY` caps.
    pub fn is_any(&self) -> bool {
        self.any
    }

    /// Whether these are the `EMPTY` caps.
    pub fn is_empty(&self) -> bool {
        !self.any && self.structures.is_empty()
    }

    /// Exactly one structure with only fixed fields.
    pub fn is_fixed(&self) -> bool {
        !self.any && self.structures.len() == 1 && self.structures[0].is_fixed()
    }

    /// Number of structures (`0` for `ANY` and `EMPTY`).
    pub fn size(&self) -> usize {
        self.structures.len()
    }

    /// Structure at `index`.
    pub fn structure(&self, index: usize) -> Option<&Structure> {
        self.structures.get(index)
    }

    /// Mutable structure at `index`.
    pub fn structure_mut(&mut self, index: usize) -> Option<&mut Structure> {
        self.structures.get_mut(index)
    }

    /// Iterate over the structures.
    pub fn iter(&self) -> impl Iterator<Item = &Structure> {
        self.structures.iter()
    }

    /// Formats accepted by both `self` and `other`.
    ///
    /// The result holds every non-empty pairwise structure intersection, in
    /// the preference order of `self`. Commutative as a set of structures.
    pub fn intersect(&self, other: &Caps) -> Caps {
        if self.any {
            return other.clone();
        }
        if other.any {
            return self.clone();
        }

        let mut out = Caps::new_empty();
        for mine in &self.structures {
            for theirs in &other.structures {
                if let Some(common) = mine.intersect(theirs) {
                    out.append_structure(common);
                }
            }
        }
        out
    }

    /// Whether the intersection with `other` is non-empty.
    pub fn can_intersect(&self, other: &Caps) -> bool {
        if self.any || other.any {
            return !self.is_empty() && !other.is_empty();
        }
        self.structures
            .iter()
            .any(|a| other.structures.iter().any(|b| a.can_intersect(b)))
    }

    /// Whether every format in `self` is also in `superset`.
    pub fn is_subset(&self, superset: &Caps) -> bool {
        if superset.any || self.is_empty() {
            return true;
        }
        if self.any {
            return false;
        }
        self.structures
            .iter()
            .all(|s| superset.structures.iter().any(|sup| s.is_subset(sup)))
    }

    /// Whether both describe the same set of formats.
    pub fn is_equal(&self, other: &Caps) -> bool {
        self.is_subset(other) && other.is_subset(self)
    }

    /// Union of both sets. `ANY` absorbs, `EMPTY` is the identity.
    ///
    /// Structures of `other` already covered by `self` are dropped.
    pub fn merge(mut self, other: Caps) -> Caps {
        if self.any || other.any {
            return Caps::new_any();
        }
        for structure in other.structures {
            if !self.structures.iter().any(|s| structure.is_subset(s)) {
                self.structures.push(structure);
            }
        }
        self
    }

    /// Pick one fixed format: the first structure with every field fixated.
    ///
    /// Returns `None` for `ANY` and `EMPTY`, which have nothing to pick from.
    pub fn fixate(&self) -> Option<Caps> {
        if self.any {
            return None;
        }
        let mut first = self.structures.first()?.clone();
        first.fixate();
        Some(Caps::from_structure(first))
    }
}

impl Default for Caps {
    fn default() -> Self {
        Self::new_empty()
    }
}

impl From<Structure> for Caps {
    fn from(structure: Structure) -> Self {
        Self::from_structure(structure)
    }
}

impl FromStr for Caps {
    type Err = CapsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse::parse_caps(s)
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.any {
            return f.write_str("ANY");
        }
        if self.structures.is_empty() {
            return f.write_str("EMPTY");
        }
        // A lone bare structure named like a special value needs the separator
        // to read back as a structure.
        if let [only] = self.structures.as_slice() {
            if only.n_fields() == 0 && matches!(only.name(), "ANY" | "EMPTY" | "NONE") {
                return write!(f, "{};", parse::serialize_structure(only));
            }
        }
        for (i, structure) in self.structures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            f.write_str(&parse::serialize_structure(structure))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(s: &str) -> Caps {
        s.parse().unwrap()
    }

    #[test]
    fn test_any_and_empty() {
        let x = caps("audio/x-raw, rate=(int)44100");
        assert!(Caps::new_any().intersect(&x).is_equal(&x));
        assert!(x.intersect(&Caps::new_any()).is_equal(&x));
        assert!(Caps::new_empty().intersect(&x).is_empty());
        assert!(x.intersect(&Caps::new_empty()).is_empty());
        assert!(Caps::new_any().intersect(&Caps::new_empty()).is_empty());
    }

    #[test]
    fn test_intersect_multiple_structures() {
        let a = caps("audio/x-raw, rate=(int)[ 8000, 48000 ]; video/x-raw, width=(int)320");
        let b = caps("video/x-raw; audio/x-raw, rate=(int){ 44100, 96000 }");
        let out = a.intersect(&b);
        assert_eq!(out.size(), 2);
        assert_eq!(out.structure(0).unwrap().get_int("rate"), Some(44100));
        assert_eq!(out.structure(1).unwrap().get_int("width"), Some(320));
        assert!(out.is_equal(&b.intersect(&a)));
    }

    #[test]
    fn test_intersect_deduplicates() {
        let a = caps("x, v=(int){ 1, 2 }; x, v=(int)[ 1, 2 ]");
        let b = caps("x, v=(int)1");
        assert_eq!(a.intersect(&b).size(), 1);
    }

    #[test]
    fn test_can_intersect() {
        assert!(caps("x, a=(int)[ 1, 5 ]").can_intersect(&caps("x, a=(int)3")));
        assert!(!caps("x, a=(int)[ 1, 5 ]").can_intersect(&caps("x, a=(int)9")));
        assert!(Caps::new_any().can_intersect(&caps("y")));
        assert!(!Caps::new_any().can_intersect(&Caps::new_empty()));
    }

    #[test]
    fn test_is_fixed() {
        assert!(caps("x, a=(int)1").is_fixed());
        assert!(!caps("x, a=(int)[ 1, 2 ]").is_fixed());
        assert!(!caps("x; y").is_fixed());
        assert!(!Caps::new_any().is_fixed());
        assert!(!Caps::new_empty().is_fixed());
    }

    #[test]
    fn test_subset() {
        let any = Caps::new_any();
        let empty = Caps::new_empty();
        let narrow = caps("x, a=(int)2");
        let wide = caps("x, a=(int)[ 1, 5 ]; y");
        assert!(narrow.is_subset(&wide));
        assert!(!wide.is_subset(&narrow));
        assert!(wide.is_subset(&any));
        assert!(!any.is_subset(&wide));
        assert!(empty.is_subset(&narrow));
    }

    #[test]
    fn test_merge() {
        let a = caps("x, a=(int)[ 1, 5 ]");
        let merged = a.clone().merge(caps("x, a=(int)3; y"));
        assert_eq!(merged.size(), 2);
        assert!(merged.structure(1).unwrap().has_name("y"));

        assert!(a.clone().merge(Caps::new_any()).is_any());
        assert!(a.clone().merge(Caps::new_empty()).is_equal(&a));
        assert!(Caps::new_empty().merge(a.clone()).is_equal(&a));
    }

    #[test]
    fn test_fixate() {
        let fixed = caps("audio/x-raw, rate=(int)[ 8000, 96000 ], channels=(int){ 2, 1 }; video/x-raw")
            .fixate()
            .unwrap();
        assert!(fixed.is_fixed());
        assert_eq!(fixed.to_string(), "audio/x-raw, rate=(int)8000, channels=(int)2");
        assert!(Caps::new_any().fixate().is_none());
        assert!(Caps::new_empty().fixate().is_none());
    }
}
