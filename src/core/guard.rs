use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaptureKind {
    Face,
    Phrase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Capturing(CaptureKind),
    Succeeded(CaptureKind),
    Failed(CaptureKind),
}

/// Re-entrancy lock for the session's shared camera and microphone.
///
/// `try_begin` hands out at most one [`CapturePermit`] at a time. The busy
/// flag is cleared when the permit is dropped, so an early return, an error
/// or a panic in the capture path cannot leave the guard stuck.
#[derive(Debug)]
pub struct CaptureGuard {
    busy: AtomicBool,
    state: Mutex<SessionState>,
}

impl Default for CaptureGuard {
    fn default() -> Self {
        Self {
            busy: AtomicBool::new(false),
            state: Mutex::new(SessionState::Idle),
        }
    }
}

impl CaptureGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn try_begin(&self, kind: CaptureKind) -> Option<CapturePermit<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        self.set_state(SessionState::Capturing(kind));
        Some(CapturePermit { guard: self, kind, outcome: None })
    }

    /// Return a finished session to `Idle`. No effect while capturing.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !matches!(*state, SessionState::Capturing(_)) {
            *state = SessionState::Idle;
        }
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }
}

/// Proof that the holder owns the sensors until it is dropped.
#[derive(Debug)]
pub struct CapturePermit<'a> {
    guard: &'a CaptureGuard,
    kind: CaptureKind,
    outcome: Option<bool>,
}

impl CapturePermit<'_> {
    pub fn kind(&self) -> CaptureKind {
        self.kind
    }

    /// Record the attempt's outcome; applied when the permit is dropped.
    pub fn finish(mut self, succeeded: bool) {
        self.outcome = Some(succeeded);
    }
}

impl Drop for CapturePermit<'_> {
    fn drop(&mut self) {
        let next = match self.outcome {
            Some(true) => SessionState::Succeeded(self.kind),
            _ => SessionState::Failed(self.kind),
        };
        self.guard.set_state(next);
        self.guard.busy.store(false, Ordering::Release);
    }
}
