//! Packet buffer with headroom
//!
//! Frames are staged behind a headroom region so push actions (VLAN, MPLS,
//! PBB, encap) prepend without copying the whole frame. Layout:
//!
//! ```text
//! [ headroom ............ | frame data ........... ]
//! 0                       headroom                 buf.len()
//! ```

use bytes::BytesMut;

/// Headroom reserved in front of a received frame. Enough for the deepest
/// push chain the action engine produces.
pub const DEFAULT_HEADROOM: usize = 128;

/// Largest frame accepted from an interface.
pub const MAX_FRAME_SIZE: usize = 9216;

/// A frame plus prepend room.
#[derive(Debug, Clone)]
pub struct PacketBuffer {
    buf: BytesMut,
    headroom: usize,
}

impl PacketBuffer {
    /// Stage a received frame behind the default headroom.
    pub fn from_frame(frame: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(DEFAULT_HEADROOM + frame.len());
        buf.resize(DEFAULT_HEADROOM, 0);
        buf.extend_from_slice(frame);
        PacketBuffer {
            buf,
            headroom: DEFAULT_HEADROOM,
        }
    }

    /// Frame bytes.
    #[inline(always)]
    pub fn data(&self) -> &[u8] {
        &self.buf[self.headroom..]
    }

    /// Mutable frame bytes.
    #[inline(always)]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.headroom..]
    }

    /// Frame length.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.buf.len() - self.headroom
    }

    /// `true` when no frame bytes remain.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining prepend room.
    #[inline(always)]
    pub fn headroom(&self) -> usize {
        self.headroom
    }

    /// Grow the frame head by `len` bytes (consumes headroom). The new bytes
    /// are whatever the headroom held; callers overwrite them.
    #[inline]
    pub fn prepend(&mut self, len: usize) -> bool {
        if self.headroom < len {
            return false;
        }
        self.headroom -= len;
        true
    }

    /// Strip `len` bytes from the frame head (returns them to headroom).
    #[inline]
    pub fn pull(&mut self, len: usize) -> bool {
        if self.len() < len {
            return false;
        }
        self.headroom += len;
        true
    }

    /// Extend the frame tail by `len` zero bytes.
    #[inline]
    pub fn append(&mut self, len: usize) {
        let new_len = self.buf.len() + len;
        self.buf.resize(new_len, 0);
    }

    /// Drop `len` bytes from the frame tail.
    #[inline]
    pub fn trim(&mut self, len: usize) -> bool {
        if self.len() < len {
            return false;
        }
        let new_len = self.buf.len() - len;
        self.buf.truncate(new_len);
        true
    }

    /// Open a `len`-byte gap at frame offset `at`; bytes below `at` slide
    /// toward the head. The gap contents are unspecified until written.
    pub fn insert_gap(&mut self, at: usize, len: usize) -> bool {
        debug_assert!(at <= self.len());
        if !self.prepend(len) {
            return false;
        }
        // Old head now sits at `len`; slide the first `at` bytes down.
        let data = self.data_mut();
        data.copy_within(len..len + at, 0);
        true
    }

    /// Remove `len` bytes at frame offset `at`; bytes below `at` slide
    /// toward the tail.
    pub fn remove_range(&mut self, at: usize, len: usize) -> bool {
        if at + len > self.len() {
            return false;
        }
        let data = self.data_mut();
        data.copy_within(0..at, len);
        self.pull(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_frame() {
        let b = PacketBuffer::from_frame(&[1, 2, 3]);
        assert_eq!(b.data(), &[1, 2, 3]);
        assert_eq!(b.len(), 3);
        assert_eq!(b.headroom(), DEFAULT_HEADROOM);
    }

    #[test]
    fn test_prepend_pull() {
        let mut b = PacketBuffer::from_frame(&[9, 9]);
        assert!(b.prepend(4));
        assert_eq!(b.len(), 6);
        b.data_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(b.data(), &[1, 2, 3, 4, 9, 9]);
        assert!(b.pull(4));
        assert_eq!(b.data(), &[9, 9]);
    }

    #[test]
    fn test_insert_gap_mid_frame() {
        let mut b = PacketBuffer::from_frame(&[1, 2, 3, 4, 5, 6]);
        assert!(b.insert_gap(2, 3));
        assert_eq!(b.len(), 9);
        // First two bytes preserved, tail preserved, gap in between.
        assert_eq!(&b.data()[..2], &[1, 2]);
        assert_eq!(&b.data()[5..], &[3, 4, 5, 6]);
    }

    #[test]
    fn test_remove_range_mid_frame() {
        let mut b = PacketBuffer::from_frame(&[1, 2, 3, 4, 5, 6]);
        assert!(b.remove_range(2, 2));
        assert_eq!(b.data(), &[1, 2, 5, 6]);
    }

    #[test]
    fn test_headroom_exhaustion() {
        let mut b = PacketBuffer::from_frame(&[0]);
        assert!(!b.prepend(DEFAULT_HEADROOM + 1));
        assert!(b.prepend(DEFAULT_HEADROOM));
        assert!(!b.prepend(1));
    }

    #[test]
    fn test_append_trim() {
        let mut b = PacketBuffer::from_frame(&[1, 2]);
        b.append(2);
        assert_eq!(b.data(), &[1, 2, 0, 0]);
        assert!(b.trim(3));
        assert_eq!(b.data(), &[1]);
        assert!(!b.trim(2));
    }
}
