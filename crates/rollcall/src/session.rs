//! Per-user session state.
//!
//! A [`Session`] lives from login to logout and carries the logged-in user
//! plus the reference template every capture is compared against. It is an
//! explicit value handed to the controller, so several sessions can coexist.

use rollcall_core::Template;
use rollcall_store::User;

/// Where a session is in the login → capture → mark cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    LoggedIn,
    /// Waiting for a capture that yields a face.
    AttendanceInProgress,
    AttendanceMarked,
    /// Last capture did not match; the user stays logged in and may retry.
    AttendanceRejected,
    AttendanceAlreadyMarked,
}

pub(crate) struct ActiveUser {
    pub(crate) user: User,
    pub(crate) reference: Template,
}

pub struct Session {
    state: SessionState,
    active: Option<ActiveUser>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::LoggedOut,
            active: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_logged_in(&self) -> bool {
        self.active.is_some()
    }

    /// The logged-in user, if any.
    pub fn user(&self) -> Option<&User> {
        self.active.as_ref().map(|a| &a.user)
    }

    /// Canonical reference template loaded at login.
    pub fn reference(&self) -> Option<&Template> {
        self.active.as_ref().map(|a| &a.reference)
    }

    pub(crate) fn active(&self) -> Option<&ActiveUser> {
        self.active.as_ref()
    }

    pub(crate) fn log_in(&mut self, user: User, reference: Template) {
        self.active = Some(ActiveUser { user, reference });
        self.state = SessionState::LoggedIn;
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// Drop the user and reference template and return to `LoggedOut`.
    pub fn log_out(&mut self) {
        self.active = None;
        self.state = SessionState::LoggedOut;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("user_id", &self.user().map(|u| u.id))
            .finish()
    }
}
