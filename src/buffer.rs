//! Reference-counted, copy-on-write media buffers.
//!
//! Cloning a [`Buffer`] shares its payload. Mutable access through
//! [`Buffer::make_mut`] copies the payload first if any other handle still
//! refers to it, so a holder can never change bytes another holder observes.

use crate::clock::ClockTime;
use crate::metadata::{BufferFlags, Metadata};
use std::fmt;
use std::sync::Arc;

/// A unit of media payload plus its timing metadata.
///
/// ```rust
/// use padflow::buffer::Buffer;
///
/// let a = Buffer::from_slice(b"abcd");
/// let mut b = a.clone();
/// b.make_mut()[0] = b'X';
///
/// assert_eq!(a.data(), b"abcd");
/// assert_eq!(b.data(), b"Xbcd");
/// ```
#[derive(Clone)]
pub struct Buffer {
    data: Arc<Vec<u8>>,
    metadata: Metadata,
}

impl Buffer {
    /// Take ownership of `data`.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            metadata: Metadata::default(),
        }
    }

    /// Copy `data` into a new buffer.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// A zero-filled buffer of `size` bytes.
    pub fn with_size(size: usize) -> Self {
        Self::from_vec(vec![0; size])
    }

    /// Payload size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read-only view of the payload.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Writable view of the payload, copying it first if it is shared.
    pub fn make_mut(&mut self) -> &mut Vec<u8> {
        Arc::make_mut(&mut self.data)
    }

    /// Whether this handle is the only one referring to the payload.
    #[inline]
    pub fn is_writable(&self) -> bool {
        Arc::strong_count(&self.data) == 1
    }

    /// Number of handles sharing the payload.
    #[inline]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }

    /// Whether two handles share the same payload allocation.
    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// A new buffer holding a copy of `size` bytes starting at `offset`.
    ///
    /// The range is clamped to the payload. Timestamps are kept only when
    /// the copy starts at the beginning of this buffer.
    pub fn copy_region(&self, offset: usize, size: usize) -> Buffer {
        let start = offset.min(self.size());
        let end = start.saturating_add(size).min(self.size());
        let mut region = Buffer::from_slice(&self.data[start..end]);
        if start == 0 {
            region.metadata.pts = self.metadata.pts;
            region.metadata.dts = self.metadata.dts;
        }
        region.metadata.flags = self.metadata.flags;
        region
    }

    /// Take the payload, copying only if it is shared.
    pub fn into_vec(self) -> Vec<u8> {
        Arc::try_unwrap(self.data).unwrap_or_else(|shared| shared.as_ref().clone())
    }

    /// Metadata of this buffer.
    #[inline]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutable metadata. Metadata is per handle, so this never copies the payload.
    #[inline]
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Presentation timestamp.
    #[inline]
    pub fn pts(&self) -> ClockTime {
        self.metadata.pts
    }

    /// Set the presentation timestamp.
    #[inline]
    pub fn set_pts(&mut self, pts: ClockTime) {
        self.metadata.pts = pts;
    }

    /// Decode timestamp.
    #[inline]
    pub fn dts(&self) -> ClockTime {
        self.metadata.dts
    }

    /// Set the decode timestamp.
    #[inline]
    pub fn set_dts(&mut self, dts: ClockTime) {
        self.metadata.dts = dts;
    }

    /// Duration.
    #[inline]
    pub fn duration(&self) -> ClockTime {
        self.metadata.duration
    }

    /// Set the duration.
    #[inline]
    pub fn set_duration(&mut self, duration: ClockTime) {
        self.metadata.duration = duration;
    }

    /// Media offset.
    #[inline]
    pub fn offset(&self) -> Option<u64> {
        self.metadata.offset
    }

    /// Set the media offset.
    #[inline]
    pub fn set_offset(&mut self, offset: Option<u64>) {
        self.metadata.offset = offset;
    }

    /// Flags.
    #[inline]
    pub fn flags(&self) -> BufferFlags {
        self.metadata.flags
    }

    /// Set a flag.
    #[inline]
    pub fn set_flag(&mut self, flag: BufferFlags) {
        self.metadata.flags.insert(flag);
    }

    /// Clear a flag.
    #[inline]
    pub fn unset_flag(&mut self, flag: BufferFlags) {
        self.metadata.flags.remove(flag);
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.size())
            .field("pts", &self.metadata.pts)
            .field("duration", &self.metadata.duration)
            .field("flags", &self.metadata.flags)
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Equal payload bytes and metadata.
impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.metadata == other.metadata && self.data() == other.data()
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_payload() {
        let a = Buffer::from_slice(&[1, 2, 3]);
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.ref_count(), 2);
        assert!(!a.is_writable());
        drop(b);
        assert!(a.is_writable());
    }

    #[test]
    fn test_make_mut_copies_shared_payload() {
        let a = Buffer::from_slice(&[1, 2, 3]);
        let mut b = a.clone();
        b.make_mut().push(4);

        assert_eq!(a.data(), &[1, 2, 3]);
        assert_eq!(b.data(), &[1, 2, 3, 4]);
        assert!(!a.ptr_eq(&b));
        assert!(a.is_writable());
        assert!(b.is_writable());
    }

    #[test]
    fn test_make_mut_in_place_when_unique() {
        let mut a = Buffer::with_size(4);
        let before = a.data().as_ptr();
        a.make_mut()[0] = 7;
        assert_eq!(a.data().as_ptr(), before);
        assert_eq!(a.data(), &[7, 0, 0, 0]);
    }

    #[test]
    fn test_metadata_is_per_handle() {
        let mut a = Buffer::from_slice(b"x");
        a.set_pts(ClockTime::from_secs(1));
        let mut b = a.clone();
        b.set_pts(ClockTime::from_secs(2));
        b.set_flag(BufferFlags::DISCONT);

        assert_eq!(a.pts(), ClockTime::from_secs(1));
        assert!(!a.flags().contains(BufferFlags::DISCONT));
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn test_copy_region_clamps() {
        let mut a = Buffer::from_slice(b"0123456789");
        a.set_pts(ClockTime::from_secs(5));
        let head = a.copy_region(0, 4);
        assert_eq!(head.data(), b"0123");
        assert_eq!(head.pts(), ClockTime::from_secs(5));

        let tail = a.copy_region(8, 100);
        assert_eq!(tail.data(), b"89");
        assert!(tail.pts().is_none());

        assert!(a.copy_region(20, 3).is_empty());
    }

    #[test]
    fn test_into_vec() {
        let a = Buffer::from_slice(b"ab");
        let b = a.clone();
        assert_eq!(a.into_vec(), b"ab".to_vec());
        assert_eq!(b.into_vec(), b"ab".to_vec());
    }
}
