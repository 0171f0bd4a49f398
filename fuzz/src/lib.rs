//! Fuzzing harnesses for shared memory ring buffers.
//!
//! The ring harness drives the real `WriteRing`/`ReadRing` over heap memory
//! instead of a mapped region; the layout harness checks the offset formula.

pub mod layout_model;
pub mod ring_model;
