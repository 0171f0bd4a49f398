#[cfg(not(feature = "loom"))]
pub use core::sync::atomic::{AtomicU32, Ordering};
#[cfg(feature = "loom")]
pub use loom::sync::atomic::{AtomicU32, Ordering};

#[cfg(all(test, feature = "loom"))]
pub use loom::thread;
