//! Heap-backed ring checked against a plain reference model.
//!
//! Every slot is stamped with the sequence number of the publication that
//! filled it, so a delivered slot can be compared with the sequence the
//! model expects.

use std::ptr::NonNull;

use shm_ringbuffers::layout::RingDescriptor;
use shm_ringbuffers::{MIN_SLOT_COUNT, ReadRing, WriteRing};

/// Slots hold at least one stamp.
pub const SLOT_SIZE: u32 = 8;
/// Keep rings small so catch-up paths are hit often.
pub const MAX_SLOT_COUNT: u32 = 16;
pub const MAX_READERS: usize = 4;

/// Descriptor and slot storage for one ring, outliving the views into it.
pub struct HeapRing {
    descriptor: NonNull<RingDescriptor>,
    slots: NonNull<[u8]>,
}

impl HeapRing {
    pub fn new(slot_count: u32) -> Self {
        let descriptor = Box::new(RingDescriptor::new(SLOT_SIZE, slot_count));
        let slots = vec![0u8; (SLOT_SIZE * slot_count) as usize].into_boxed_slice();
        Self {
            descriptor: NonNull::from(Box::leak(descriptor)),
            slots: NonNull::from(Box::leak(slots)),
        }
    }

    pub fn writer(&self) -> WriteRing {
        // SAFETY: both allocations live as long as `self`, and the harness
        // creates one writer per ring.
        unsafe { WriteRing::from_raw(0, "fuzz".into(), self.descriptor, self.slots.cast()) }
    }

    pub fn reader(&self) -> ReadRing {
        // SAFETY: both allocations live as long as `self`.
        unsafe { ReadRing::from_raw(0, "fuzz".into(), self.descriptor, self.slots.cast()) }
    }
}

impl Drop for HeapRing {
    fn drop(&mut self) {
        // SAFETY: both pointers came from `Box::leak` in `new`.
        unsafe {
            drop(Box::from_raw(self.descriptor.as_ptr()));
            drop(Box::from_raw(self.slots.as_ptr()));
        }
    }
}

fn stamp(slot: &mut [u8], seq: u64) {
    slot[..8].copy_from_slice(&seq.to_ne_bytes());
}

fn read_stamp(slot: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&slot[..8]);
    u64::from_ne_bytes(buf)
}

/// Operations that can be performed on the ring.
#[derive(Clone, Copy, Debug)]
pub enum RingOp {
    Publish,
    NextUnread(u8),
    MostRecent(u8),
}

/// Expected reader behaviour, counted in publications (1 = first published).
struct ModelReader {
    last_seen: u64,
}

impl ModelReader {
    fn next_unread(&mut self, published: u64, slot_count: u64) -> Option<u64> {
        if published == 0 || self.last_seen >= published {
            return None;
        }
        let next = self.last_seen + 1;
        self.last_seen = if published - next >= slot_count - 1 {
            published
        } else {
            next
        };
        Some(self.last_seen)
    }
}

/// Run `ops` against a ring of `slot_count` slots and check every result.
pub fn execute_and_verify(slot_count: u32, ops: &[RingOp]) -> Result<(), String> {
    let slot_count = slot_count.clamp(MIN_SLOT_COUNT, MAX_SLOT_COUNT);
    let heap = HeapRing::new(slot_count);
    let mut writer = heap.writer();
    let mut readers: Vec<ReadRing> = (0..MAX_READERS).map(|_| heap.reader()).collect();
    let mut models: Vec<ModelReader> = (0..MAX_READERS)
        .map(|_| ModelReader { last_seen: 0 })
        .collect();

    // The slot being filled always carries the next sequence number.
    let mut published = 0u64;
    stamp(writer.first_slot(), 1);

    for (i, op) in ops.iter().enumerate() {
        match *op {
            RingOp::Publish => {
                published += 1;
                stamp(writer.advance(), published + 1);

                let expected_position = slot_count as u64 + published;
                if u64::from(writer.write_position()) != expected_position {
                    return Err(format!(
                        "op {}: write_position {} after {} publications (expected {})",
                        i,
                        writer.write_position(),
                        published,
                        expected_position
                    ));
                }
            }
            RingOp::NextUnread(r) => {
                let r = r as usize % MAX_READERS;
                let before = readers[r].last_delivered_position();
                let got = readers[r].next_unread().map(read_stamp);
                let expected = models[r].next_unread(published, slot_count as u64);
                if got != expected {
                    return Err(format!(
                        "op {}: reader {} got {:?}, expected {:?} ({} published)",
                        i, r, got, expected, published
                    ));
                }
                if got.is_some() && readers[r].last_delivered_position() <= before {
                    return Err(format!("op {}: reader {} went backwards", i, r));
                }
            }
            RingOp::MostRecent(r) => {
                let r = r as usize % MAX_READERS;
                let got = readers[r].most_recent().map(read_stamp);
                let expected = (published > 0).then_some(published);
                if got != expected {
                    return Err(format!(
                        "op {}: most_recent got {:?}, expected {:?}",
                        i, got, expected
                    ));
                }
                if u64::from(readers[r].most_recent_id()) != published {
                    return Err(format!(
                        "op {}: most_recent_id {} after {} publications",
                        i,
                        readers[r].most_recent_id(),
                        published
                    ));
                }
            }
        }
    }

    Ok(())
}
