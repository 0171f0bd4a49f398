#![cfg(all(test, feature = "loom"))]

use core::ptr::NonNull;

use loom::sync::Arc;

use crate::layout::{RegionHeader, RingDescriptor};
use crate::ring::{ReadRing, WriteRing};
use crate::state::RunState;
use crate::sync::thread;

/// One ring on the heap, shared between model threads.
struct HeapRing {
    descriptor: RingDescriptor,
    data: NonNull<u8>,
    len: usize,
}

unsafe impl Send for HeapRing {}
unsafe impl Sync for HeapRing {}

impl HeapRing {
    fn new(slot_size: u32, slot_count: u32) -> Self {
        let len = slot_size as usize * slot_count as usize;
        let data = Box::into_raw(vec![0u8; len].into_boxed_slice()) as *mut u8;
        Self {
            descriptor: RingDescriptor::new(slot_size, slot_count),
            data: NonNull::new(data).unwrap(),
            len,
        }
    }

    fn writer(&self) -> WriteRing {
        unsafe { WriteRing::from_raw(0, "ring".into(), NonNull::from(&self.descriptor), self.data) }
    }

    fn reader(&self) -> ReadRing {
        unsafe { ReadRing::from_raw(0, "ring".into(), NonNull::from(&self.descriptor), self.data) }
    }
}

impl Drop for HeapRing {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(core::ptr::slice_from_raw_parts_mut(
                self.data.as_ptr(),
                self.len,
            )));
        }
    }
}

#[test]
fn publish_consume_positions_are_monotonic() {
    loom::model(|| {
        let ring = Arc::new(HeapRing::new(8, 3));

        let writer_ring = ring.clone();
        let writer = thread::spawn(move || {
            let mut writer = writer_ring.writer();
            writer.first_slot();
            for _ in 0..3 {
                writer.advance();
            }
        });

        let reader_ring = ring.clone();
        let reader = thread::spawn(move || {
            let mut reader = reader_ring.reader();
            let mut last_id = reader.most_recent_id();
            let mut delivered = Vec::with_capacity(3);
            for _ in 0..3 {
                let id = reader.most_recent_id();
                assert!(id >= last_id, "most_recent_id went backwards");
                last_id = id;
                if reader.next_unread().is_some() {
                    delivered.push(reader.last_delivered_position());
                }
            }
            delivered
        });

        writer.join().unwrap();
        let delivered = reader.join().unwrap();

        for pair in delivered.windows(2) {
            assert!(pair[0] < pair[1], "positions delivered out of order");
        }
        // Positions 3..=5 are the only ones ever published.
        assert!(delivered.iter().all(|&p| (3..=5).contains(&p)));

        // A fresh reader after the writer is done lands on the newest slot.
        let mut late = ring.reader();
        assert!(late.next_unread().is_some());
        assert_eq!(late.last_delivered_position(), 5);
        assert!(late.next_unread().is_none());
    });
}

#[test]
fn stopping_never_reverts_to_running() {
    loom::model(|| {
        let header = Arc::new(RegionHeader::new(1));
        header.set_run_state(RunState::Running);

        let writer_header = header.clone();
        let writer = thread::spawn(move || {
            writer_header.begin_stopping();
            writer_header.set_run_state(RunState::Stopped);
        });

        let reader_header = header.clone();
        let reader = thread::spawn(move || {
            let mut seen_non_running = false;
            for _ in 0..3 {
                let state = reader_header.run_state();
                if seen_non_running {
                    assert_ne!(state, RunState::Running);
                }
                seen_non_running |= !state.is_running();
            }
        });

        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(header.run_state(), RunState::Stopped);
    });
}
