//! Bolero fuzzer for region layout computation.
//!
//! Properties tested:
//! - descriptors and names follow the header in table order
//! - the slot area is 4096-aligned and starts on the first boundary after the names
//! - ring data is packed without gaps or overlap
//! - undersized rings are rejected

use bolero::check;
use shm_ringbuffers::RingShape;
use srb_fuzz::layout_model::verify_layout;

fn main() {
    check!()
        .with_type::<Vec<(u8, u16, u8)>>()
        .for_each(|rings| {
            let shapes: Vec<RingShape> = rings
                .iter()
                .map(|(name_len, slot_size, slot_count)| RingShape {
                    slot_size: u32::from(*slot_size),
                    slot_count: u32::from(*slot_count),
                    name_len: usize::from(*name_len) * 37,
                })
                .collect();

            if let Err(e) = verify_layout(&shapes) {
                panic!("Invariant violated: {}", e);
            }
        });
}

#[cfg(test)]
mod tests {
    use shm_ringbuffers::RingShape;
    use srb_fuzz::layout_model::verify_layout;

    fn shape(slot_size: u32, slot_count: u32, name_len: usize) -> RingShape {
        RingShape {
            slot_size,
            slot_count,
            name_len,
        }
    }

    #[test]
    fn fuzz_layout_single_ring() {
        verify_layout(&[shape(64, 3, 2)]).unwrap();
    }

    #[test]
    fn fuzz_layout_names_cross_page() {
        verify_layout(&[shape(1, 3, 4000), shape(7, 9, 200), shape(8294400, 10, 0)]).unwrap();
    }

    #[test]
    fn fuzz_layout_rejections() {
        verify_layout(&[]).unwrap();
        verify_layout(&[shape(0, 3, 1)]).unwrap();
        verify_layout(&[shape(8, 2, 1)]).unwrap();
    }
}
