//! Power-of-two ring of interleaved `f32` samples.
//!
//! `read` and `write` are free-running counters that wrap at `usize::MAX`;
//! the slot for a counter is `counter & mask`.  Occupancy is
//! `(write - read) & mask`, which is only meaningful while the real distance
//! between the counters stays below `capacity`.  [`SampleRing::free_space`]
//! therefore reserves one slot, and every push is refused unless it fits in
//! the free space, so the counters can never alias.
//!
//! # Example
//!
//! ```rust
//! use spdif_router::sink::SampleRing;
//!
//! let mut ring = SampleRing::new(8);
//! assert_eq!(ring.free_space(), 7);
//!
//! let left = [1.0_f32, 3.0];
//! let right = [2.0_f32, 4.0];
//! assert!(ring.push_frames(&[&left[..], &right[..]], &[0, 1]));
//! assert_eq!(ring.occupancy(), 4);
//!
//! let mut out = [0.0_f32; 4];
//! assert!(ring.pop_into(&mut out));
//! assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
//! ```

// ---------------------------------------------------------------------------
// SampleRing
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SampleRing {
    buf: Vec<f32>,
    mask: usize,
    read: usize,
    write: usize,
}

impl SampleRing {
    /// Create an empty ring of `capacity` samples.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "SampleRing capacity must be a power of two"
        );
        Self {
            buf: vec![0.0; capacity],
            mask: capacity - 1,
            read: 0,
            write: 0,
        }
    }

    /// Create a ring that already holds `samples` samples of silence.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two or `samples` does not fit.
    pub fn with_silence(capacity: usize, samples: usize) -> Self {
        let mut ring = Self::new(capacity);
        assert!(samples <= ring.free_space(), "silence seed exceeds capacity");
        ring.write = samples;
        ring
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Samples currently queued.
    pub fn occupancy(&self) -> usize {
        self.check_distance();
        self.write.wrapping_sub(self.read) & self.mask
    }

    /// Samples that may be pushed without the counters aliasing.
    pub fn free_space(&self) -> usize {
        self.mask - self.occupancy()
    }

    /// Write `frames` interleaved, taking device slot `k` of every frame from
    /// source channel `channel_map[k]`.
    ///
    /// All-or-nothing: returns `false` and leaves the ring untouched when the
    /// whole chunk does not fit.
    pub fn push_frames<C: AsRef<[f32]>>(&mut self, frames: &[C], channel_map: &[usize]) -> bool {
        let frame_count = frames.iter().map(|ch| ch.as_ref().len()).min().unwrap_or(0);
        let needed = frame_count * channel_map.len();
        if needed > self.free_space() {
            return false;
        }

        for i in 0..frame_count {
            for &src in channel_map {
                self.buf[self.write & self.mask] = frames[src].as_ref()[i];
                self.write = self.write.wrapping_add(1);
            }
        }

        self.check_distance();
        true
    }

    /// Fill `out` with the oldest `out.len()` samples.
    ///
    /// Returns `false` and reads nothing when fewer samples are queued.
    pub fn pop_into(&mut self, out: &mut [f32]) -> bool {
        if out.len() > self.occupancy() {
            return false;
        }
        for slot in out.iter_mut() {
            *slot = self.buf[self.read & self.mask];
            self.read = self.read.wrapping_add(1);
        }
        true
    }

    #[inline]
    fn check_distance(&self) {
        debug_assert!(
            self.write.wrapping_sub(self.read) < self.capacity(),
            "ring counters drifted a full capacity apart"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ring_is_empty() {
        let ring = SampleRing::new(16);
        assert_eq!(ring.capacity(), 16);
        assert_eq!(ring.occupancy(), 0);
        assert_eq!(ring.free_space(), 15);
    }

    #[test]
    fn silence_seed_sets_occupancy() {
        let mut ring = SampleRing::with_silence(2048, 128);
        assert_eq!(ring.occupancy(), 128);

        let mut out = vec![1.0_f32; 128];
        assert!(ring.pop_into(&mut out));
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn push_increases_occupancy_by_frames_times_channels() {
        let mut ring = SampleRing::new(64);
        let ch = vec![vec![0.5_f32; 5]; 3];
        assert!(ring.push_frames(&ch, &[0, 1, 2]));
        assert_eq!(ring.occupancy(), 15);
    }

    #[test]
    fn push_that_does_not_fit_is_refused_whole() {
        let mut ring = SampleRing::new(8);
        let ch = vec![vec![0.1_f32; 2]; 2];
        assert!(ring.push_frames(&ch, &[0, 1]));
        assert_eq!(ring.occupancy(), 4);

        // 4 more would reach capacity (only 3 free).
        assert!(!ring.push_frames(&ch, &[0, 1]));
        assert_eq!(ring.occupancy(), 4);
    }

    #[test]
    fn channel_map_permutes_slots() {
        let mut ring = SampleRing::new(16);
        let ch = [vec![10.0_f32], vec![11.0], vec![12.0]];
        assert!(ring.push_frames(&ch, &[2, 0, 1]));

        let mut out = [0.0_f32; 3];
        assert!(ring.pop_into(&mut out));
        assert_eq!(out, [12.0, 10.0, 11.0]);
    }

    #[test]
    fn pop_underflow_reads_nothing() {
        let mut ring = SampleRing::new(8);
        let ch = [vec![1.0_f32], vec![2.0]];
        ring.push_frames(&ch, &[0, 1]);

        let mut out = [0.0_f32; 4];
        assert!(!ring.pop_into(&mut out));
        assert_eq!(ring.occupancy(), 2);
    }

    #[test]
    fn fifo_order_survives_wraparound() {
        let mut ring = SampleRing::new(8);
        let mut next = 0.0_f32;
        let mut expected = 0.0_f32;

        for _ in 0..50 {
            let l = [next, next + 2.0];
            let r = [next + 1.0, next + 3.0];
            next += 4.0;
            assert!(ring.push_frames(&[&l[..], &r[..]], &[0, 1]));

            let mut out = [0.0_f32; 4];
            assert!(ring.pop_into(&mut out));
            for s in out {
                assert_eq!(s, expected);
                expected += 1.0;
            }
        }
    }

    #[test]
    fn counters_wrap_at_word_size() {
        let mut ring = SampleRing::new(8);
        ring.read = usize::MAX - 1;
        ring.write = usize::MAX - 1;

        let ch = [vec![1.0_f32, 3.0], vec![2.0, 4.0]];
        assert!(ring.push_frames(&ch, &[0, 1]));
        assert_eq!(ring.occupancy(), 4);

        let mut out = [0.0_f32; 4];
        assert!(ring.pop_into(&mut out));
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(ring.occupancy(), 0);
    }

    #[test]
    #[should_panic(expected = "SampleRing capacity must be a power of two")]
    fn non_power_of_two_panics() {
        let _ = SampleRing::new(100);
    }
}
