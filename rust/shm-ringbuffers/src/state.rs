//! Run-state machine shared by the writer and all readers.
//!
//! `STOPPED → RUNNING → STOPPING → STOPPED`, writer-driven only. There is no
//! way back to `RUNNING` within one region.

use crate::layout::RegionHeader;
use crate::sync::Ordering;

/// Run state of the writer, as stored in the region header.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// Not yet initialized, or closed.
    Stopped = 0,
    /// Tables are written and the writer is publishing.
    Running = 1,
    /// The writer is shutting down; readers should disengage.
    Stopping = 2,
}

impl RunState {
    /// Convert from the raw header value.
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(RunState::Stopped),
            1 => Some(RunState::Running),
            2 => Some(RunState::Stopping),
            _ => None,
        }
    }

    /// Readers keep polling only while this is true.
    #[inline]
    pub fn is_running(self) -> bool {
        self == RunState::Running
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "STOPPED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Stopping => write!(f, "STOPPING"),
        }
    }
}

impl RegionHeader {
    /// Raw state word (acquire).
    #[inline]
    pub(crate) fn raw_state(&self) -> u32 {
        self.state.load(Ordering::Acquire)
    }

    /// Current state; unknown values read as `Stopped`.
    #[inline]
    pub(crate) fn run_state(&self) -> RunState {
        RunState::from_u32(self.raw_state()).unwrap_or(RunState::Stopped)
    }

    /// Publish a new state. Release pairs with the readers' acquire so every
    /// table write made before `Running` is visible once `Running` is seen.
    #[inline]
    pub(crate) fn set_run_state(&self, state: RunState) {
        self.state.store(state as u32, Ordering::Release);
    }

    /// `RUNNING → STOPPING`; any other state is left untouched.
    ///
    /// Returns true if the transition happened.
    pub(crate) fn begin_stopping(&self) -> bool {
        self.state
            .compare_exchange(
                RunState::Running as u32,
                RunState::Stopping as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn test_run_state_roundtrip() {
        for s in [RunState::Stopped, RunState::Running, RunState::Stopping] {
            assert_eq!(RunState::from_u32(s as u32), Some(s));
        }
        assert_eq!(RunState::from_u32(3), None);
    }

    #[test]
    fn test_state_machine_transitions() {
        let header = RegionHeader::new(1);
        assert_eq!(header.run_state(), RunState::Stopped);

        // Stopping is only reachable from Running.
        assert!(!header.begin_stopping());
        assert_eq!(header.run_state(), RunState::Stopped);

        header.set_run_state(RunState::Running);
        assert!(header.run_state().is_running());

        assert!(header.begin_stopping());
        assert_eq!(header.run_state(), RunState::Stopping);

        // A second request does not revert or re-enter.
        assert!(!header.begin_stopping());
        assert_eq!(header.run_state(), RunState::Stopping);

        header.set_run_state(RunState::Stopped);
        assert!(!header.begin_stopping());
        assert_eq!(header.run_state(), RunState::Stopped);
    }

    #[test]
    fn test_unknown_state_reads_as_stopped() {
        let header = RegionHeader::new(1);
        header.state.store(7, Ordering::Release);
        assert_eq!(header.raw_state(), 7);
        assert_eq!(header.run_state(), RunState::Stopped);
    }

    #[test]
    fn test_display() {
        assert_eq!(RunState::Stopping.to_string(), "STOPPING");
    }
}
