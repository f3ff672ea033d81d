//! Capture session lifecycle shared between the loop and its host

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Running = 0,
    Stopping = 1,
    Closed = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Running,
            1 => SessionState::Stopping,
            _ => SessionState::Closed,
        }
    }
}

/// Cloneable handle to one session's state. Transitions only move forward.
#[derive(Debug, Clone)]
pub struct Session {
    state: Arc<AtomicU8>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(SessionState::Running as u8)),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// RUNNING -> STOPPING. Returns `false` if the session already left RUNNING.
    pub fn request_stop(&self) -> bool {
        let moved = self
            .state
            .compare_exchange(
                SessionState::Running as u8,
                SessionState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if moved {
            info!("Session stop requested");
        }
        moved
    }

    /// Final state, reached once the frame source is released
    pub(crate) fn mark_closed(&self) {
        self.state
            .store(SessionState::Closed as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_only_forward() {
        let session = Session::new();
        assert_eq!(session.state(), SessionState::Running);

        assert!(session.request_stop());
        assert!(!session.request_stop());
        assert_eq!(session.state(), SessionState::Stopping);

        session.mark_closed();
        assert!(!session.request_stop());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn clones_share_state() {
        let session = Session::new();
        let host = session.clone();
        host.request_stop();
        assert!(!session.is_running());
    }
}
