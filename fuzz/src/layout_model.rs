//! Structural checks on computed region layouts.

use shm_ringbuffers::layout::{DESCRIPTOR_SIZE, HEADER_SIZE};
use shm_ringbuffers::{MIN_SLOT_COUNT, MIN_SLOT_SIZE, RegionLayout, RingShape, SLOT_AREA_ALIGN};

/// Compute the layout of `shapes` and verify it, or verify the rejection.
pub fn verify_layout(shapes: &[RingShape]) -> Result<(), String> {
    let layout = match RegionLayout::compute(shapes) {
        Ok(layout) => layout,
        Err(e) => {
            let invalid = shapes.is_empty()
                || shapes
                    .iter()
                    .any(|s| s.slot_count < MIN_SLOT_COUNT || s.slot_size < MIN_SLOT_SIZE);
            return if invalid {
                Ok(())
            } else {
                Err(format!("valid shapes rejected: {}", e))
            };
        }
    };

    match RegionLayout::compute(shapes) {
        Ok(again) if again == layout => {}
        _ => return Err("layout is not deterministic".into()),
    }
    if layout.descriptors_offset != HEADER_SIZE {
        return Err(format!("descriptors at {}", layout.descriptors_offset));
    }
    if layout.names_offset != HEADER_SIZE + shapes.len() * DESCRIPTOR_SIZE {
        return Err(format!("names at {}", layout.names_offset));
    }
    if layout.slot_area_offset % SLOT_AREA_ALIGN != 0 {
        return Err(format!("slot area at {} is not aligned", layout.slot_area_offset));
    }

    let names_end = layout.names_offset + shapes.iter().map(|s| s.name_len + 1).sum::<usize>();
    if layout.slot_area_offset < names_end || layout.slot_area_offset - names_end >= SLOT_AREA_ALIGN {
        return Err(format!(
            "slot area at {} does not follow names ending at {}",
            layout.slot_area_offset, names_end
        ));
    }

    let mut expected_name = layout.names_offset;
    let mut expected_slots = layout.slot_area_offset;
    for (i, (ring, shape)) in layout.rings.iter().zip(shapes).enumerate() {
        if ring.descriptor != HEADER_SIZE + i * DESCRIPTOR_SIZE {
            return Err(format!("ring {} descriptor at {}", i, ring.descriptor));
        }
        if ring.name != expected_name {
            return Err(format!("ring {} name at {}, expected {}", i, ring.name, expected_name));
        }
        if ring.slots != expected_slots {
            return Err(format!("ring {} slots at {}, expected {}", i, ring.slots, expected_slots));
        }
        if ring.slots_len != shape.slot_size as usize * shape.slot_count as usize {
            return Err(format!("ring {} has {} slot bytes", i, ring.slots_len));
        }
        expected_name += shape.name_len + 1;
        expected_slots += ring.slots_len;
    }

    if layout.rings.len() != shapes.len() || layout.total_len != expected_slots {
        return Err(format!(
            "total_len {} with {} rings, expected {} with {}",
            layout.total_len,
            layout.rings.len(),
            expected_slots,
            shapes.len()
        ));
    }

    Ok(())
}
