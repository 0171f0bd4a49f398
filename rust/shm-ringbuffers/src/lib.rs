//! Broadcast ring buffers over one POSIX shared memory region.
//!
//! One writer process creates a region holding any number of named rings.
//! Each ring is a fixed set of equal-size slots that the writer fills and
//! publishes in rotation; any number of reader processes attach and pick
//! either the most recent slot or the next one they have not seen. There are
//! no locks, no sockets and no kernel rendezvous after the initial mapping:
//! the only cross-process signals are one atomic counter per ring and one
//! run-state word.
//!
//! # Protocol
//!
//! - Publishing is a release increment of the ring's `write_position`; readers
//!   acquire it before touching slot data.
//! - Readers never write to the region. Readers that fall behind by
//!   `slot_count - 1` publications or more skip ahead to the newest slot.
//! - The run state goes `STOPPED → RUNNING → STOPPING → STOPPED`, driven by
//!   the writer only. Readers stop polling once it leaves `RUNNING`.
//!
//! # Example
//!
//! ```no_run
//! use shm_ringbuffers::{RingSpec, SrbReader, SrbWriter};
//!
//! let mut writer = SrbWriter::create("/srb_example", &[RingSpec::new("frames", 64, 3)])?;
//! let ring = writer.ring_named_mut("frames")?;
//! ring.first_slot()[..5].copy_from_slice(b"hello");
//! ring.advance();
//!
//! let mut reader = SrbReader::attach("/srb_example")?;
//! let frames = reader.ring_named_mut("frames")?;
//! assert_eq!(&frames.next_unread().unwrap()[..5], b"hello");
//!
//! reader.close();
//! writer.close()?;
//! # Ok::<(), shm_ringbuffers::SrbError>(())
//! ```
//!
//! # Loom Testing
//!
//! ```text
//! cargo test -p shm-ringbuffers --features loom --lib
//! ```

pub mod error;
pub mod layout;
#[cfg(not(feature = "loom"))]
pub mod region;
pub mod ring;
pub mod state;
mod sync;

#[cfg(all(test, feature = "loom"))]
mod loom_tests;

pub use error::SrbError;
pub use layout::{
    MIN_SLOT_COUNT, MIN_SLOT_SIZE, RegionLayout, RingOffsets, RingShape, RingSpec,
    SLOT_AREA_ALIGN,
};
#[cfg(not(feature = "loom"))]
pub use region::{SrbReader, SrbWriter, remove};
pub use ring::{ReadRing, WriteRing};
pub use state::RunState;
