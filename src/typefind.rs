//! Stream type detection over pull-mode pads.
//!
//! A typefinder inspects the first bytes of a stream and suggests caps with
//! a probability. [`get_range`] pulls the head of a stream from the peer of
//! a sink pad and returns the most probable suggestion.
//!
//! ```rust
//! use padflow::typefind::{TypeFindRegistry, probability};
//!
//! let registry = TypeFindRegistry::default();
//! let (caps, prob) = registry.type_find(b"OggS\0\x02rest of the page").unwrap();
//! assert_eq!(caps.to_string(), "application/ogg");
//! assert_eq!(prob, probability::MAXIMUM);
//! ```

use crate::caps::{Caps, Structure};
use crate::element::Pad;
use crate::flow::FlowError;
use tracing::{debug, trace};

/// Well-known probability levels.
pub mod probability {
    /// Unrecognized.
    pub const NONE: u32 = 0;
    /// Could be, nothing contradicts it.
    pub const MINIMUM: u32 = 1;
    /// Plausible.
    pub const POSSIBLE: u32 = 50;
    /// Probably.
    pub const LIKELY: u32 = 80;
    /// Almost surely.
    pub const NEARLY_CERTAIN: u32 = 99;
    /// Certain; stops the search.
    pub const MAXIMUM: u32 = 100;
}

/// Inspect `data` and suggest caps with a probability.
pub type TypeFindFunction = fn(&[u8]) -> Option<(Caps, u32)>;

/// A named typefinder.
#[derive(Debug, Clone)]
pub struct TypeFinder {
    /// Name used in logs.
    pub name: String,
    /// The detection function.
    pub func: TypeFindFunction,
}

/// Ordered set of typefinders.
///
/// [`Default`] registers detectors for Ogg, RIFF/WAVE, FLAC, ID3-tagged
/// audio, Matroska, ISO-BMFF, PNG, JPEG and plain text.
#[derive(Debug, Clone)]
pub struct TypeFindRegistry {
    finders: Vec<TypeFinder>,
}

impl Default for TypeFindRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("ogg", find_ogg);
        registry.register("wav", find_wav);
        registry.register("flac", find_flac);
        registry.register("id3", find_id3);
        registry.register("matroska", find_matroska);
        registry.register("iso-bmff", find_iso_bmff);
        registry.register("png", find_png);
        registry.register("jpeg", find_jpeg);
        registry.register("text", find_text);
        registry
    }
}

impl TypeFindRegistry {
    /// A registry without typefinders.
    pub fn empty() -> Self {
        Self {
            finders: Vec::new(),
        }
    }

    /// Add a typefinder; earlier ones win ties.
    pub fn register(&mut self, name: impl Into<String>, func: TypeFindFunction) {
        self.finders.push(TypeFinder {
            name: name.into(),
            func,
        });
    }

    /// Registered typefinders in order.
    pub fn finders(&self) -> &[TypeFinder] {
        &self.finders
    }

    /// Run every typefinder on `data` and return the most probable caps.
    pub fn type_find(&self, data: &[u8]) -> Option<(Caps, u32)> {
        let mut best: Option<(Caps, u32)> = None;
        for finder in &self.finders {
            let Some((caps, prob)) = (finder.func)(data) else {
                continue;
            };
            trace!(finder = %finder.name, %caps, prob, "suggestion");
            if prob > best.as_ref().map_or(probability::NONE, |(_, p)| *p) {
                let certain = prob >= probability::MAXIMUM;
                best = Some((caps, prob));
                if certain {
                    break;
                }
            }
        }
        best
    }
}

/// Pull up to `size` bytes from offset 0 through `pad` and find their type
/// with the default typefinders.
///
/// `pad` must be a sink pad activated in pull mode. Returns `None` when
/// nothing could be read or no typefinder recognized the data.
pub fn get_range(pad: &Pad, size: usize) -> Option<(Caps, u32)> {
    get_range_with(pad, size, &TypeFindRegistry::default())
}

/// [`get_range`] with a custom registry.
pub fn get_range_with(pad: &Pad, size: usize, registry: &TypeFindRegistry) -> Option<(Caps, u32)> {
    let buffer = match pad.pull_range_partial(0, size) {
        Ok(buffer) => buffer,
        Err(FlowError::Eos) => {
            debug!(pad = %pad.debug_name(), "empty stream");
            return None;
        }
        Err(flow) => {
            debug!(pad = %pad.debug_name(), %flow, "cannot pull stream head");
            return None;
        }
    };
    let found = registry.type_find(buffer.data());
    match &found {
        Some((caps, prob)) => debug!(pad = %pad.debug_name(), %caps, prob, "type found"),
        None => debug!(pad = %pad.debug_name(), bytes = buffer.size(), "type not found"),
    }
    found
}

// ============================================================================
// Built-in typefinders
// ============================================================================

fn simple(name: &str, prob: u32) -> Option<(Caps, u32)> {
    Some((Caps::new_simple(name), prob))
}

fn magic(data: &[u8], prefix: &[u8], name: &str, prob: u32) -> Option<(Caps, u32)> {
    if data.starts_with(prefix) {
        simple(name, prob)
    } else {
        None
    }
}

fn find_ogg(data: &[u8]) -> Option<(Caps, u32)> {
    magic(data, b"OggS", "application/ogg", probability::MAXIMUM)
}

fn find_wav(data: &[u8]) -> Option<(Caps, u32)> {
    if data.len() < 12 || &data[0..4] != b"RIFF" {
        return None;
    }
    match &data[8..12] {
        b"WAVE" => simple("audio/x-wav", probability::MAXIMUM),
        _ => simple("application/x-riff", probability::POSSIBLE),
    }
}

fn find_flac(data: &[u8]) -> Option<(Caps, u32)> {
    magic(data, b"fLaC", "audio/x-flac", probability::MAXIMUM)
}

fn find_id3(data: &[u8]) -> Option<(Caps, u32)> {
    // "ID3", two version bytes below 0xff, a flags byte, four syncsafe size bytes.
    if data.len() < 10 || &data[0..3] != b"ID3" || data[3] == 0xff || data[4] == 0xff {
        return None;
    }
    if data[6..10].iter().any(|b| b & 0x80 != 0) {
        return None;
    }
    simple("application/x-id3", probability::MAXIMUM)
}

fn find_matroska(data: &[u8]) -> Option<(Caps, u32)> {
    if !data.starts_with(&[0x1a, 0x45, 0xdf, 0xa3]) {
        return None;
    }
    let head = &data[..data.len().min(64)];
    if head.windows(4).any(|w| w == b"webm") {
        simple("video/webm", probability::MAXIMUM)
    } else {
        simple("video/x-matroska", probability::LIKELY)
    }
}

fn find_iso_bmff(data: &[u8]) -> Option<(Caps, u32)> {
    if data.len() < 12 || &data[4..8] != b"ftyp" {
        return None;
    }
    let variant = match &data[8..12] {
        b"qt  " => "apple",
        b"M4A " | b"M4B " => "iso-m4a",
        _ => "iso",
    };
    let mut structure = Structure::new("video/quicktime");
    structure.set("variant", variant);
    Some((Caps::from_structure(structure), probability::NEARLY_CERTAIN))
}

fn find_png(data: &[u8]) -> Option<(Caps, u32)> {
    magic(data, b"\x89PNG\r\n\x1a\n", "image/png", probability::MAXIMUM)
}

fn find_jpeg(data: &[u8]) -> Option<(Caps, u32)> {
    magic(data, &[0xff, 0xd8, 0xff], "image/jpeg", probability::LIKELY)
}

fn find_text(data: &[u8]) -> Option<(Caps, u32)> {
    if data.is_empty() {
        return None;
    }
    let text = match std::str::from_utf8(data) {
        Ok(text) => text,
        // The head may end inside a multi-byte character.
        Err(e) if e.error_len().is_none() && e.valid_up_to() + 4 > data.len() => {
            std::str::from_utf8(&data[..e.valid_up_to()]).ok()?
        }
        Err(_) => return None,
    };
    let printable = text
        .chars()
        .all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t' | '\x0c'));
    if !printable {
        return None;
    }
    let prob = if text.len() >= 32 {
        probability::POSSIBLE
    } else {
        probability::MINIMUM
    };
    simple("text/plain", prob)
}
