//! Buffer metadata: timestamps, offsets and flags.

use crate::clock::ClockTime;

/// Flags describing a buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BufferFlags(u32);

impl BufferFlags {
    /// No flags set.
    pub const EMPTY: Self = Self(0);
    /// Data is discontinuous with the previous buffer (after a seek or drop).
    pub const DISCONT: Self = Self(1 << 0);
    /// Buffer cannot be decoded on its own (not a keyframe).
    pub const DELTA_UNIT: Self = Self(1 << 1);
    /// Buffer carries no meaningful payload and only marks elapsed time.
    pub const GAP: Self = Self(1 << 2);
    /// Stream header data.
    pub const HEADER: Self = Self(1 << 3);
    /// May be dropped without corrupting the stream.
    pub const DROPPABLE: Self = Self(1 << 4);
    /// Produced by a live source.
    pub const LIVE: Self = Self(1 << 5);
    /// Media-specific boundary marker (end of frame, end of packet).
    pub const MARKER: Self = Self(1 << 6);

    /// Whether every bit of `flag` is set.
    #[inline]
    pub const fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) == flag.0
    }

    /// Set `flag`.
    #[inline]
    pub fn insert(&mut self, flag: Self) {
        self.0 |= flag.0;
    }

    /// Clear `flag`.
    #[inline]
    pub fn remove(&mut self, flag: Self) {
        self.0 &= !flag.0;
    }

    /// Raw bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether no flag is set.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for BufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Timing and position information attached to a buffer.
///
/// Unset timestamps are [`ClockTime::NONE`]; unset offsets are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// Presentation timestamp.
    pub pts: ClockTime,
    /// Decode timestamp.
    pub dts: ClockTime,
    /// Duration of the content.
    pub duration: ClockTime,
    /// Media-specific offset (byte offset for pull-mode sources).
    pub offset: Option<u64>,
    /// Media-specific end offset.
    pub offset_end: Option<u64>,
    /// Buffer flags.
    pub flags: BufferFlags,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            pts: ClockTime::NONE,
            dts: ClockTime::NONE,
            duration: ClockTime::NONE,
            offset: None,
            offset_end: None,
            flags: BufferFlags::EMPTY,
        }
    }
}

impl Metadata {
    /// Metadata with every field unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the presentation timestamp.
    pub fn with_pts(mut self, pts: ClockTime) -> Self {
        self.pts = pts;
        self
    }

    /// Set the decode timestamp.
    pub fn with_dts(mut self, dts: ClockTime) -> Self {
        self.dts = dts;
        self
    }

    /// Set the duration.
    pub fn with_duration(mut self, duration: ClockTime) -> Self {
        self.duration = duration;
        self
    }

    /// Set the byte range this buffer covers.
    pub fn with_offsets(mut self, offset: u64, offset_end: u64) -> Self {
        self.offset = Some(offset);
        self.offset_end = Some(offset_end);
        self
    }

    /// Add flags.
    pub fn with_flags(mut self, flags: BufferFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// The decode timestamp if set, the presentation timestamp otherwise.
    pub fn dts_or_pts(&self) -> ClockTime {
        if self.dts.is_some() { self.dts } else { self.pts }
    }
}
