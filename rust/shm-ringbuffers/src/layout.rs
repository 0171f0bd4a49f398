//! Region memory layout.
//!
//! This module defines the `repr(C)` structures at the front of the region
//! and the one function every process uses to derive byte offsets from them.
//! Offsets are never stored in shared memory; the writer and each reader
//! recompute them from the immutable header, descriptor and name tables.
//!
//! # Memory Layout
//!
//! ```text
//! +-------------------------------------------------------------------+
//! | REGION HEADER (8 bytes)                                           |
//! |   state: u32 (0=STOPPED, 1=RUNNING, 2=STOPPING), ring_count: u32  |
//! +-------------------------------------------------------------------+
//! | DESCRIPTOR TABLE (ring_count entries, 12 bytes each)              |
//! |   slot_size: u32, slot_count: u32, write_position: u32            |
//! +-------------------------------------------------------------------+
//! | NAME TABLE (ring_count NUL-terminated strings, no padding)        |
//! +-------------------------------------------------------------------+
//! | padding up to the next 4096-byte boundary                         |
//! +-------------------------------------------------------------------+
//! | SLOT AREA                                                         |
//! |   ring 0: slot_count * slot_size bytes                            |
//! |   ring 1: slot_count * slot_size bytes                            |
//! |   ...                                                             |
//! +-------------------------------------------------------------------+
//! ```

use crate::error::SrbError;
use crate::sync::AtomicU32;

// =============================================================================
// Constants
// =============================================================================

/// Alignment of the slot area, independent of the OS page size.
pub const SLOT_AREA_ALIGN: usize = 4096;

/// Minimum slots per ring: one being filled, one just published, one margin.
pub const MIN_SLOT_COUNT: u32 = 3;

/// Minimum slot size in bytes.
pub const MIN_SLOT_SIZE: u32 = 1;

/// Size of [`RegionHeader`] in the binary contract.
pub const HEADER_SIZE: usize = 8;

/// Size of one [`RingDescriptor`] in the binary contract.
pub const DESCRIPTOR_SIZE: usize = 12;

// =============================================================================
// Shared structures
// =============================================================================

/// Header at offset 0 of the region.
#[repr(C)]
pub struct RegionHeader {
    /// Raw [`RunState`](crate::RunState); written only by the writer.
    pub state: AtomicU32,
    /// Number of rings; immutable after creation.
    pub ring_count: u32,
}

#[cfg(not(feature = "loom"))]
const _: () = assert!(core::mem::size_of::<RegionHeader>() == HEADER_SIZE);

impl RegionHeader {
    /// A header in the `STOPPED` state.
    pub fn new(ring_count: u32) -> Self {
        Self {
            state: AtomicU32::new(crate::RunState::Stopped as u32),
            ring_count,
        }
    }
}

/// Entry in the descriptor table.
#[repr(C)]
pub struct RingDescriptor {
    /// Bytes per slot.
    pub slot_size: u32,
    /// Slots in the ring (at least [`MIN_SLOT_COUNT`]).
    pub slot_count: u32,
    /// Monotonic publish counter. Starts at `slot_count` so that
    /// `write_position - 1 < slot_count` means nothing has been published.
    pub write_position: AtomicU32,
}

#[cfg(not(feature = "loom"))]
const _: () = assert!(core::mem::size_of::<RingDescriptor>() == DESCRIPTOR_SIZE);

impl RingDescriptor {
    /// A descriptor with nothing published yet.
    pub fn new(slot_size: u32, slot_count: u32) -> Self {
        Self {
            slot_size,
            slot_count,
            write_position: AtomicU32::new(slot_count),
        }
    }

    /// Bytes occupied by this ring in the slot area.
    #[inline]
    pub fn ring_len(&self) -> usize {
        self.slot_size as usize * self.slot_count as usize
    }
}

// =============================================================================
// Ring specification
// =============================================================================

/// What the writer asks for when creating a region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingSpec {
    /// Ring name; `None` stores an empty string.
    pub name: Option<String>,
    /// Bytes per slot.
    pub slot_size: u32,
    /// Number of slots.
    pub slot_count: u32,
}

impl RingSpec {
    pub fn new(name: impl Into<String>, slot_size: u32, slot_count: u32) -> Self {
        Self {
            name: Some(name.into()),
            slot_size,
            slot_count,
        }
    }

    pub fn unnamed(slot_size: u32, slot_count: u32) -> Self {
        Self {
            name: None,
            slot_size,
            slot_count,
        }
    }

    /// Name as stored in the name table.
    pub fn name_bytes(&self) -> &[u8] {
        self.name.as_deref().map(str::as_bytes).unwrap_or_default()
    }

    /// Reject names that cannot survive the NUL-terminated name table.
    pub fn validate(&self) -> Result<(), SrbError> {
        if self.name_bytes().contains(&0) {
            return Err(SrbError::InvalidSpec(format!(
                "ring name {:?} contains a NUL byte",
                self.name.as_deref().unwrap_or_default()
            )));
        }
        self.shape().validate()
    }

    pub fn shape(&self) -> RingShape {
        RingShape {
            slot_size: self.slot_size,
            slot_count: self.slot_count,
            name_len: self.name_bytes().len(),
        }
    }
}

/// The inputs of the layout formula for one ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingShape {
    pub slot_size: u32,
    pub slot_count: u32,
    /// Name length without the terminator.
    pub name_len: usize,
}

impl RingShape {
    pub fn validate(&self) -> Result<(), SrbError> {
        if self.slot_count < MIN_SLOT_COUNT {
            return Err(SrbError::InvalidSpec(format!(
                "slot_count {} is below the minimum of {}",
                self.slot_count, MIN_SLOT_COUNT
            )));
        }
        if self.slot_size < MIN_SLOT_SIZE {
            return Err(SrbError::InvalidSpec(format!(
                "slot_size {} is below the minimum of {}",
                self.slot_size, MIN_SLOT_SIZE
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Layout calculation
// =============================================================================

/// Byte offsets of one ring, relative to the region base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingOffsets {
    pub descriptor: usize,
    pub name: usize,
    pub slots: usize,
    pub slots_len: usize,
}

/// Computed layout of a whole region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionLayout {
    pub descriptors_offset: usize,
    pub names_offset: usize,
    pub slot_area_offset: usize,
    pub total_len: usize,
    pub rings: Vec<RingOffsets>,
}

impl RegionLayout {
    /// Compute the layout for `shapes`, in table order.
    ///
    /// This is the only offset formula in the crate; create and attach both
    /// go through it.
    pub fn compute(shapes: &[RingShape]) -> Result<Self, SrbError> {
        if shapes.is_empty() {
            return Err(SrbError::InvalidSpec("at least one ring is required".into()));
        }
        if u32::try_from(shapes.len()).is_err() {
            return Err(SrbError::InvalidSpec(format!(
                "{} rings do not fit the ring_count field",
                shapes.len()
            )));
        }
        for shape in shapes {
            shape.validate()?;
        }

        let overflow = |what: &str| SrbError::InvalidSpec(format!("region size overflow ({})", what));

        let descriptors_offset = HEADER_SIZE;
        let names_offset = shapes
            .len()
            .checked_mul(DESCRIPTOR_SIZE)
            .and_then(|v| v.checked_add(descriptors_offset))
            .ok_or_else(|| overflow("descriptors"))?;

        let mut name = names_offset;
        let mut name_offsets = Vec::with_capacity(shapes.len());
        for shape in shapes {
            name_offsets.push(name);
            name = name
                .checked_add(shape.name_len)
                .and_then(|v| v.checked_add(1))
                .ok_or_else(|| overflow("names"))?;
        }

        let slot_area_offset = align_up(name, SLOT_AREA_ALIGN).ok_or_else(|| overflow("align"))?;

        let mut slots = slot_area_offset;
        let mut rings = Vec::with_capacity(shapes.len());
        for (i, shape) in shapes.iter().enumerate() {
            let slots_len = (shape.slot_size as usize)
                .checked_mul(shape.slot_count as usize)
                .ok_or_else(|| overflow("ring"))?;
            rings.push(RingOffsets {
                descriptor: descriptors_offset + i * DESCRIPTOR_SIZE,
                name: name_offsets[i],
                slots,
                slots_len,
            });
            slots = slots
                .checked_add(slots_len)
                .ok_or_else(|| overflow("slot area"))?;
        }

        Ok(Self {
            descriptors_offset,
            names_offset,
            slot_area_offset,
            total_len: slots,
            rings,
        })
    }

    /// Validate `specs` and compute their layout.
    pub fn for_specs(specs: &[RingSpec]) -> Result<Self, SrbError> {
        let shapes = specs
            .iter()
            .map(|spec| spec.validate().map(|()| spec.shape()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::compute(&shapes)
    }

    pub fn ring_count(&self) -> usize {
        self.rings.len()
    }
}

/// Smallest region an attaching reader will accept: one header and one
/// descriptor, page aligned.
pub const fn min_region_len() -> usize {
    (HEADER_SIZE + DESCRIPTOR_SIZE).div_ceil(SLOT_AREA_ALIGN) * SLOT_AREA_ALIGN
}

#[inline]
fn align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    value.checked_add(align - 1).map(|v| v & !(align - 1))
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn test_struct_sizes() {
        assert_eq!(core::mem::size_of::<RegionHeader>(), 8);
        assert_eq!(core::mem::size_of::<RingDescriptor>(), 12);
        assert_eq!(core::mem::align_of::<RingDescriptor>(), 4);
    }

    #[test]
    fn test_single_ring_layout() {
        let layout = RegionLayout::for_specs(&[RingSpec::new("ch", 64, 3)]).unwrap();

        assert_eq!(layout.descriptors_offset, 8);
        assert_eq!(layout.names_offset, 8 + 12);
        assert_eq!(layout.rings[0].name, 20);
        assert_eq!(layout.slot_area_offset, 4096);
        assert_eq!(layout.rings[0].slots, 4096);
        assert_eq!(layout.rings[0].slots_len, 192);
        assert_eq!(layout.total_len, 4096 + 192);
    }

    #[test]
    fn test_rings_are_packed_in_order() {
        let layout = RegionLayout::for_specs(&[
            RingSpec::new("video", 100, 4),
            RingSpec::unnamed(7, 3),
            RingSpec::new("telemetry", 32, 5),
        ])
        .unwrap();

        // "video\0" + "\0" + "telemetry\0"
        assert_eq!(layout.rings[0].name, 8 + 3 * 12);
        assert_eq!(layout.rings[1].name, layout.rings[0].name + 6);
        assert_eq!(layout.rings[2].name, layout.rings[1].name + 1);

        assert_eq!(layout.rings[0].slots, 4096);
        assert_eq!(layout.rings[1].slots, 4096 + 400);
        assert_eq!(layout.rings[2].slots, 4096 + 400 + 21);
        assert_eq!(layout.total_len, 4096 + 400 + 21 + 160);

        for pair in layout.rings.windows(2) {
            assert!(pair[0].slots + pair[0].slots_len <= pair[1].slots);
        }
    }

    #[test]
    fn test_exact_boundary_is_not_padded() {
        // 8 + 12 + (4075 + 1) == 4096
        let name = "n".repeat(4075);
        let layout = RegionLayout::for_specs(&[RingSpec::new(name, 1, 3)]).unwrap();
        assert_eq!(layout.slot_area_offset, 4096);

        let name = "n".repeat(4076);
        let layout = RegionLayout::for_specs(&[RingSpec::new(name, 1, 3)]).unwrap();
        assert_eq!(layout.slot_area_offset, 8192);
    }

    #[test]
    fn test_invalid_specs() {
        assert!(matches!(
            RegionLayout::for_specs(&[]),
            Err(SrbError::InvalidSpec(_))
        ));
        assert!(matches!(
            RegionLayout::for_specs(&[RingSpec::new("a", 64, 2)]),
            Err(SrbError::InvalidSpec(_))
        ));
        assert!(matches!(
            RegionLayout::for_specs(&[RingSpec::new("a", 0, 3)]),
            Err(SrbError::InvalidSpec(_))
        ));
        assert!(matches!(
            RegionLayout::for_specs(&[RingSpec::new("a\0b", 1, 3)]),
            Err(SrbError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_same_inputs_same_layout() {
        let specs = [RingSpec::new("a", 10, 3), RingSpec::new("bb", 20, 4)];
        let shapes: Vec<RingShape> = specs.iter().map(RingSpec::shape).collect();
        assert_eq!(
            RegionLayout::for_specs(&specs).unwrap(),
            RegionLayout::compute(&shapes).unwrap()
        );
    }

    #[test]
    fn test_min_region_len() {
        assert_eq!(min_region_len(), 4096);
    }

    #[test]
    fn test_new_descriptor_has_nothing_published() {
        let desc = RingDescriptor::new(64, 3);
        assert_eq!(
            desc.write_position.load(core::sync::atomic::Ordering::Relaxed),
            3
        );
        assert_eq!(desc.ring_len(), 192);
    }
}
