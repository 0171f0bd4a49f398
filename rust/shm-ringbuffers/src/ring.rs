//! Ring channels and the publish/consume protocol.
//!
//! A ring is a fixed set of `slot_count` equal-size slots plus one shared
//! counter, `write_position`. The writer fills the slot at
//! `write_position % slot_count` and publishes it by incrementing the counter
//! with release ordering; readers load the counter with acquire ordering and
//! only ever look at slots behind it.
//!
//! Positions start at `slot_count`, so `write_position - 1 < slot_count`
//! means nothing has been published, without a separate flag.
//!
//! The writer never touches a published slot again until `slot_count`
//! further publications have happened. A reader that falls `slot_count - 1`
//! or more publications behind skips its backlog and resumes at the newest
//! slot instead of reading one the writer may be overwriting.

use core::ptr::NonNull;

use crate::layout::RingDescriptor;
use crate::sync::Ordering;

/// Writer-side view of one ring.
///
/// Only the process that created the region holds these.
pub struct WriteRing {
    index: usize,
    name: String,
    descriptor: NonNull<RingDescriptor>,
    slots: NonNull<u8>,
}

// SAFETY: the descriptor is only mutated through atomics, and slot access goes
// through `&mut self` on the single writer.
unsafe impl Send for WriteRing {}
unsafe impl Sync for WriteRing {}

impl WriteRing {
    /// Build a writer view from raw pointers.
    ///
    /// # Safety
    ///
    /// `descriptor` must point to an initialized descriptor and `slots` to
    /// `slot_count * slot_size` writable bytes, both valid for as long as the
    /// returned value lives. At most one `WriteRing` may exist per ring.
    pub unsafe fn from_raw(
        index: usize,
        name: String,
        descriptor: NonNull<RingDescriptor>,
        slots: NonNull<u8>,
    ) -> Self {
        Self {
            index,
            name,
            descriptor,
            slots,
        }
    }

    #[inline]
    fn descriptor(&self) -> &RingDescriptor {
        unsafe { self.descriptor.as_ref() }
    }

    #[inline]
    fn slot_mut(&mut self, position: u32) -> &mut [u8] {
        let desc = self.descriptor();
        let size = desc.slot_size as usize;
        let index = (position % desc.slot_count) as usize;
        // SAFETY: index < slot_count, so the slot lies inside the ring's data.
        unsafe { core::slice::from_raw_parts_mut(self.slots.as_ptr().add(index * size), size) }
    }

    /// The slot to fill before anything has been published.
    ///
    /// Does not advance the counter.
    pub fn first_slot(&mut self) -> &mut [u8] {
        let position = self.descriptor().write_position.load(Ordering::Relaxed);
        self.slot_mut(position)
    }

    /// Publish the slot filled so far and return the next one to fill.
    ///
    /// The release increment makes every byte written into the previous slot
    /// visible to a reader that acquires the new position.
    pub fn advance(&mut self) -> &mut [u8] {
        let position = self
            .descriptor()
            .write_position
            .fetch_add(1, Ordering::Release)
            .wrapping_add(1);
        self.slot_mut(position)
    }

    /// Copy `data` into the current slot and publish it.
    ///
    /// `data` is truncated to the slot size; the rest of the slot is left as is.
    /// Returns the number of bytes copied.
    pub fn publish(&mut self, data: &[u8]) -> usize {
        let position = self.descriptor().write_position.load(Ordering::Relaxed);
        let slot = self.slot_mut(position);
        let len = data.len().min(slot.len());
        slot[..len].copy_from_slice(&data[..len]);
        self.advance();
        len
    }

    /// Current shared counter.
    pub fn write_position(&self) -> u32 {
        self.descriptor().write_position.load(Ordering::Relaxed)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slot_size(&self) -> u32 {
        self.descriptor().slot_size
    }

    pub fn slot_count(&self) -> u32 {
        self.descriptor().slot_count
    }
}

impl std::fmt::Debug for WriteRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteRing")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("slot_size", &self.slot_size())
            .field("slot_count", &self.slot_count())
            .field("write_position", &self.write_position())
            .finish()
    }
}

/// Reader-side view of one ring.
///
/// Carries the reader's own progress, which is never shared.
pub struct ReadRing {
    index: usize,
    name: String,
    descriptor: NonNull<RingDescriptor>,
    slots: NonNull<u8>,
    /// Last position handed out by `next_unread`. Starts one below the first
    /// publishable position (`slot_count - 1`), i.e. nothing delivered.
    last_delivered: u32,
}

// SAFETY: readers only load the descriptor atomically and never write.
unsafe impl Send for ReadRing {}
unsafe impl Sync for ReadRing {}

impl ReadRing {
    /// Build a reader view from raw pointers.
    ///
    /// # Safety
    ///
    /// `descriptor` must point to an initialized descriptor and `slots` to
    /// `slot_count * slot_size` readable bytes, both valid for as long as the
    /// returned value lives.
    pub unsafe fn from_raw(
        index: usize,
        name: String,
        descriptor: NonNull<RingDescriptor>,
        slots: NonNull<u8>,
    ) -> Self {
        let slot_count = unsafe { descriptor.as_ref() }.slot_count;
        Self {
            index,
            name,
            descriptor,
            slots,
            last_delivered: slot_count.wrapping_sub(1),
        }
    }

    #[inline]
    fn descriptor(&self) -> &RingDescriptor {
        unsafe { self.descriptor.as_ref() }
    }

    #[inline]
    fn latest(&self) -> u32 {
        self.descriptor()
            .write_position
            .load(Ordering::Acquire)
            .wrapping_sub(1)
    }

    #[inline]
    fn slot(&self, position: u32) -> &[u8] {
        let desc = self.descriptor();
        let size = desc.slot_size as usize;
        let index = (position % desc.slot_count) as usize;
        // SAFETY: index < slot_count, so the slot lies inside the ring's data.
        unsafe { core::slice::from_raw_parts(self.slots.as_ptr().add(index * size), size) }
    }

    /// Publications so far: `write_position - slot_count`.
    ///
    /// Cheap change detector; compare against the last value seen and only
    /// call [`most_recent`](Self::most_recent) when it moved.
    pub fn most_recent_id(&self) -> u32 {
        let desc = self.descriptor();
        desc.write_position
            .load(Ordering::Acquire)
            .wrapping_sub(desc.slot_count)
    }

    /// The newest published slot, or `None` if nothing has been published.
    ///
    /// Does not touch this reader's progress.
    pub fn most_recent(&self) -> Option<&[u8]> {
        let latest = self.latest();
        if latest < self.descriptor().slot_count {
            return None;
        }
        Some(self.slot(latest))
    }

    /// The next slot this reader has not seen yet, or `None` when caught up.
    ///
    /// Readers that keep pace see every publication in order. A reader that
    /// has fallen `slot_count - 1` or more publications behind jumps to the
    /// newest slot.
    pub fn next_unread(&mut self) -> Option<&[u8]> {
        let latest = self.latest();
        let slot_count = self.descriptor().slot_count;
        if latest < slot_count || self.last_delivered >= latest {
            return None;
        }

        self.last_delivered = self.last_delivered.wrapping_add(1);
        let backlog = latest - self.last_delivered;
        if backlog >= slot_count - 1 {
            tracing::trace!(ring = %self.name, skipped = backlog, "reader caught up to newest slot");
            self.last_delivered = latest;
        }

        Some(self.slot(self.last_delivered))
    }

    /// Position of the slot last returned by `next_unread`.
    pub fn last_delivered_position(&self) -> u32 {
        self.last_delivered
    }

    /// Current shared counter.
    pub fn write_position(&self) -> u32 {
        self.descriptor().write_position.load(Ordering::Acquire)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slot_size(&self) -> u32 {
        self.descriptor().slot_size
    }

    pub fn slot_count(&self) -> u32 {
        self.descriptor().slot_count
    }
}

impl std::fmt::Debug for ReadRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadRing")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("slot_size", &self.slot_size())
            .field("slot_count", &self.slot_count())
            .field("last_delivered", &self.last_delivered)
            .finish()
    }
}
