//! Fixed-capacity particle ring.
//!
//! Storage is allocated once, zeroed, and never resized. Every accepted
//! particle advances a monotonically increasing write counter; the write
//! cursor is that counter modulo capacity, so the oldest slot is overwritten
//! once the ring is full.
//!
//! Two write paths exist:
//! - [`PointRingBuffer::append`] for sequential producers, and
//! - [`RingWriter`], which lets many threads claim slot blocks through an
//!   atomic fetch-and-add on the shared counter and then copy into them.
//!
//! Reads go through [`RingSnapshot`], which borrows the ring immutably and so
//! cannot outlive the next write.

use crate::error::{FusionError, Result};
use crate::particle::Particle;
use parking_lot::Mutex;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct PointRingBuffer {
    storage: Box<[Particle]>,
    /// Total accepted writes this session.
    written: AtomicU64,
}

impl PointRingBuffer {
    /// Allocates `capacity` zeroed slots.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(FusionError::InvalidCapacity);
        }

        Ok(Self {
            storage: bytemuck::zeroed_slice_box(capacity),
            written: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    pub fn total_writes(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }

    /// Next slot to be written.
    #[inline]
    pub fn cursor(&self) -> usize {
        (self.total_writes() % self.capacity() as u64) as usize
    }

    /// Number of slots holding a written particle: `min(total_writes, capacity)`.
    #[inline]
    pub fn live_count(&self) -> usize {
        self.total_writes().min(self.capacity() as u64) as usize
    }

    /// True once every slot has been written at least once.
    #[inline]
    pub fn is_saturated(&self) -> bool {
        self.total_writes() >= self.capacity() as u64
    }

    /// Writes `particle` at the cursor and advances it by one.
    pub fn append(&mut self, particle: Particle) {
        let capacity = self.storage.len() as u64;
        let written = self.written.get_mut();
        self.storage[(*written % capacity) as usize] = particle;
        *written += 1;
    }

    pub fn extend<I: IntoIterator<Item = Particle>>(&mut self, particles: I) {
        for particle in particles {
            self.append(particle);
        }
    }

    pub fn get(&self, slot: usize) -> Option<&Particle> {
        self.storage.get(slot)
    }

    /// Read-only view of the storage as of now.
    pub fn snapshot(&self) -> RingSnapshot<'_> {
        let total_writes = self.total_writes();
        let capacity = self.storage.len() as u64;
        RingSnapshot {
            particles: &self.storage,
            cursor: (total_writes % capacity) as usize,
            live_count: total_writes.min(capacity) as usize,
            total_writes,
        }
    }

    /// Opens a concurrent write batch.
    ///
    /// A batch accepts at most `capacity` particles, so no two claims within
    /// it can map to the same slot. Further appends are refused.
    pub fn writer(&mut self) -> RingWriter<'_> {
        let start = *self.written.get_mut();
        let capacity = self.storage.len() as u64;
        RingWriter {
            slots: Mutex::new(&mut self.storage[..]),
            capacity,
            written: &self.written,
            start,
            limit: start + capacity,
        }
    }

    /// Slots written since the counter read `since`, as at most two
    /// contiguous ranges (split where the cursor wrapped).
    pub fn dirty_ranges(&self, since: u64) -> DirtyRanges {
        DirtyRanges::between(since, self.total_writes(), self.capacity())
    }
}

/// Claims ring slots from several threads at once.
///
/// Created by [`PointRingBuffer::writer`]; holds the ring's unique borrow for
/// its whole lifetime. Slot indices come from the atomic counter; the lock
/// only guards the copy into already-claimed slots.
pub struct RingWriter<'a> {
    slots: Mutex<&'a mut [Particle]>,
    capacity: u64,
    written: &'a AtomicU64,
    start: u64,
    limit: u64,
}

impl RingWriter<'_> {
    /// Claims up to `want` consecutive write counts. Returns the first one and
    /// how many were granted.
    fn claim(&self, want: u64) -> Option<(u64, u64)> {
        let limit = self.limit;
        let first = self
            .written
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then(|| (n + want).min(limit))
            })
            .ok()?;
        Some((first, want.min(limit - first)))
    }

    /// Claims the next slot and writes `particle` into it.
    ///
    /// Returns the slot index, or `None` once this batch has claimed
    /// `capacity` slots.
    pub fn try_append(&self, particle: Particle) -> Option<usize> {
        let (n, _) = self.claim(1)?;
        let slot = (n % self.capacity) as usize;
        self.slots.lock()[slot] = particle;
        Some(slot)
    }

    /// Claims a contiguous run of slots for `particles` and copies them in,
    /// split where the run wraps. Returns how many were written; the rest
    /// did not fit in this batch.
    pub fn append_batch(&self, particles: &[Particle]) -> usize {
        if particles.is_empty() {
            return 0;
        }
        let Some((first, granted)) = self.claim(particles.len() as u64) else {
            return 0;
        };

        let count = granted as usize;
        let start = (first % self.capacity) as usize;
        let head = count.min(self.capacity as usize - start);

        let mut slots = self.slots.lock();
        slots[start..start + head].copy_from_slice(&particles[..head]);
        slots[..count - head].copy_from_slice(&particles[head..count]);
        count
    }

    /// Particles accepted by this batch so far.
    pub fn accepted(&self) -> u64 {
        self.written.load(Ordering::Acquire) - self.start
    }

    /// Slots this batch may still claim.
    pub fn remaining(&self) -> u64 {
        self.limit - self.written.load(Ordering::Acquire)
    }
}

/// Borrowed, consistent view of the ring for the render stage.
#[derive(Debug, Clone, Copy)]
pub struct RingSnapshot<'a> {
    particles: &'a [Particle],
    cursor: usize,
    live_count: usize,
    total_writes: u64,
}

impl<'a> RingSnapshot<'a> {
    /// All slots, including never-written (zeroed) ones.
    pub fn particles(&self) -> &'a [Particle] {
        self.particles
    }

    /// Slots holding written particles. Slots fill from zero, so before
    /// saturation these are the leading `live_count` slots.
    pub fn live(&self) -> &'a [Particle] {
        &self.particles[..self.live_count]
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }

    pub fn capacity(&self) -> usize {
        self.particles.len()
    }

    pub fn total_writes(&self) -> u64 {
        self.total_writes
    }

    /// Raw storage bytes for a GPU upload.
    pub fn as_bytes(&self) -> &'a [u8] {
        bytemuck::cast_slice(self.particles)
    }

    /// Live particles from oldest to newest.
    pub fn iter_oldest_first(&self) -> impl Iterator<Item = &'a Particle> + 'a {
        let (newer, older) = if self.live_count == self.particles.len() {
            self.particles.split_at(self.cursor)
        } else {
            (&self.particles[..self.live_count], &self.particles[..0])
        };
        older.iter().chain(newer.iter())
    }
}

/// Up to two slot ranges touched between two write counts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirtyRanges {
    pub first: Range<usize>,
    pub second: Range<usize>,
}

impl DirtyRanges {
    pub fn between(since: u64, now: u64, capacity: usize) -> Self {
        let cap = capacity as u64;
        let count = now.saturating_sub(since);
        if count == 0 || cap == 0 {
            return Self::default();
        }
        if count >= cap {
            return Self {
                first: 0..capacity,
                second: 0..0,
            };
        }

        let start = (since % cap) as usize;
        let end = (now % cap) as usize;
        if start < end {
            Self {
                first: start..end,
                second: 0..0,
            }
        } else {
            Self {
                first: start..capacity,
                second: 0..end,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_empty() && self.second.is_empty()
    }

    pub fn len(&self) -> usize {
        self.first.len() + self.second.len()
    }

    /// Non-empty ranges only.
    pub fn iter(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        [self.first.clone(), self.second.clone()]
            .into_iter()
            .filter(|r| !r.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use proptest::prelude::*;
    use rayon::prelude::*;

    fn p(i: u32) -> Particle {
        Particle::new(Vec3::splat(i as f32), Vec3::ONE, 1.0)
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            PointRingBuffer::new(0),
            Err(FusionError::InvalidCapacity)
        ));
    }

    #[test]
    fn fresh_ring_is_empty_and_zeroed() {
        let ring = PointRingBuffer::new(3).unwrap();
        assert_eq!(ring.cursor(), 0);
        assert_eq!(ring.live_count(), 0);
        assert!(ring.snapshot().live().is_empty());
        assert!(ring
            .snapshot()
            .particles()
            .iter()
            .all(|s| *s == Particle::default()));
    }

    #[test]
    fn five_into_four_overwrites_first_slot() {
        let mut ring = PointRingBuffer::new(4).unwrap();
        ring.extend((1..=5).map(p));

        let snap = ring.snapshot();
        assert_eq!(snap.particles(), &[p(5), p(2), p(3), p(4)]);
        assert_eq!(snap.cursor(), 1);
        assert_eq!(snap.live_count(), 4);
        assert_eq!(
            snap.iter_oldest_first().copied().collect::<Vec<_>>(),
            vec![p(2), p(3), p(4), p(5)]
        );
    }

    #[test]
    fn oldest_first_before_saturation() {
        let mut ring = PointRingBuffer::new(4).unwrap();
        ring.extend((1..=2).map(p));
        let snap = ring.snapshot();
        assert_eq!(
            snap.iter_oldest_first().copied().collect::<Vec<_>>(),
            vec![p(1), p(2)]
        );
    }

    #[test]
    fn parallel_writer_claims_distinct_slots() {
        let mut ring = PointRingBuffer::new(1024).unwrap();
        {
            let writer = ring.writer();
            (0..1000u32).into_par_iter().for_each(|i| {
                writer.try_append(p(i + 1));
            });
            assert_eq!(writer.accepted(), 1000);
            assert_eq!(writer.remaining(), 24);
        }
        assert_eq!(ring.cursor(), 1000);
        assert_eq!(ring.live_count(), 1000);

        let mut seen: Vec<u32> = ring
            .snapshot()
            .live()
            .iter()
            .map(|s| s.position[0] as u32)
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (1..=1000).collect::<Vec<_>>());
    }

    #[test]
    fn writer_batch_is_bounded_by_capacity() {
        let mut ring = PointRingBuffer::new(8).unwrap();
        ring.extend((0..5).map(p));

        let writer = ring.writer();
        let accepted = (0..100u32)
            .into_par_iter()
            .filter(|&i| writer.try_append(p(i)).is_some())
            .count();
        assert_eq!(accepted, 8);
        assert_eq!(writer.try_append(p(0)), None);
        drop(writer);

        assert_eq!(ring.total_writes(), 13);
        assert_eq!(ring.cursor(), 5);
    }

    #[test]
    fn batch_append_wraps_and_stops_at_capacity() {
        let mut ring = PointRingBuffer::new(8).unwrap();
        ring.extend((1..=6).map(p));

        let writer = ring.writer();
        assert_eq!(writer.append_batch(&(10..15).map(p).collect::<Vec<_>>()), 5);
        // Only three more slots remain in this batch.
        assert_eq!(writer.append_batch(&(20..30).map(p).collect::<Vec<_>>()), 3);
        assert_eq!(writer.append_batch(&[p(99)]), 0);
        assert_eq!(writer.append_batch(&[]), 0);
        drop(writer);

        let snap = ring.snapshot();
        assert_eq!(
            snap.particles(),
            &[p(12), p(13), p(14), p(20), p(21), p(22), p(10), p(11)]
        );
        assert_eq!(snap.cursor(), 6);
        assert_eq!(ring.total_writes(), 14);
    }

    #[test]
    fn parallel_batches_fill_distinct_slots() {
        let mut ring = PointRingBuffer::new(4096).unwrap();
        let particles: Vec<_> = (1..=3000).map(p).collect();
        {
            let writer = ring.writer();
            let written: usize = particles
                .par_chunks(97)
                .map(|chunk| writer.append_batch(chunk))
                .sum();
            assert_eq!(written, 3000);
        }

        let mut seen: Vec<u32> = ring
            .snapshot()
            .live()
            .iter()
            .map(|s| s.position[0] as u32)
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (1..=3000).collect::<Vec<_>>());
    }

    #[test]
    fn writer_continues_from_sequential_cursor() {
        let mut ring = PointRingBuffer::new(4).unwrap();
        ring.extend((1..=3).map(p));
        let slot = ring.writer().try_append(p(9));
        assert_eq!(slot, Some(3));
        let slot = ring.writer().try_append(p(10));
        assert_eq!(slot, Some(0));
        assert_eq!(ring.get(0), Some(&p(10)));
    }

    #[test]
    fn dirty_ranges_split_at_wrap() {
        assert!(DirtyRanges::between(5, 5, 8).is_empty());
        assert_eq!(
            DirtyRanges::between(1, 4, 8),
            DirtyRanges {
                first: 1..4,
                second: 0..0
            }
        );
        let wrapped = DirtyRanges::between(6, 10, 8);
        assert_eq!(wrapped.iter().collect::<Vec<_>>(), vec![6..8, 0..2]);
        assert_eq!(wrapped.len(), 4);
        // Writing to exactly the end leaves an empty second range.
        assert_eq!(
            DirtyRanges::between(6, 8, 8).iter().collect::<Vec<_>>(),
            vec![6..8]
        );
        assert_eq!(DirtyRanges::between(3, 30, 8).first, 0..8);
    }

    #[test]
    fn snapshot_bytes_cover_all_slots() {
        let ring = PointRingBuffer::new(10).unwrap();
        assert_eq!(ring.snapshot().as_bytes().len(), 10 * 32);
    }

    proptest! {
        #[test]
        fn live_count_and_cursor_follow_write_count(cap in 1usize..64, n in 0usize..256) {
            let mut ring = PointRingBuffer::new(cap).unwrap();
            ring.extend((0..n as u32).map(p));
            prop_assert_eq!(ring.live_count(), n.min(cap));
            prop_assert_eq!(ring.cursor(), n % cap);
            prop_assert_eq!(ring.is_saturated(), n >= cap);
        }

        #[test]
        fn last_capacity_writes_survive(cap in 1usize..32, extra in 0usize..64) {
            let n = cap + extra;
            let mut ring = PointRingBuffer::new(cap).unwrap();
            ring.extend((0..n as u32).map(p));
            let newest: Vec<_> = ring.snapshot().iter_oldest_first().copied().collect();
            let expected: Vec<_> = ((n - cap) as u32..n as u32).map(p).collect();
            prop_assert_eq!(newest, expected);
        }

        #[test]
        fn dirty_ranges_count_matches_writes(cap in 1usize..32, since in 0u64..100, delta in 0u64..100) {
            let ranges = DirtyRanges::between(since, since + delta, cap);
            prop_assert_eq!(ranges.len() as u64, delta.min(cap as u64));
        }
    }
}
