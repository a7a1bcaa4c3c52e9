//! Registry of active sessions for cancel-request routing.
//!
//! The pid → session table is the only process-wide state in the server.
//! A `CancelRequest` arrives on its own connection carrying the pid and
//! secret key announced in `BackendKeyData`; a match cancels the token the
//! owning session is currently watching.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

pub struct Registry {
    // pid -> SessionHandle
    sessions: Mutex<HashMap<i32, SessionHandle>>,
}

struct SessionHandle {
    secret_key: i32,
    cancel_token: CancellationToken,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a new session and returns a cancellation token for it.
    pub fn register(&self, pid: i32, secret_key: i32) -> CancellationToken {
        let token = CancellationToken::new();
        self.sessions.lock().insert(
            pid,
            SessionHandle {
                secret_key,
                cancel_token: token.clone(),
            },
        );
        token
    }

    /// Installs a fresh token for a session after a delivered cancellation
    /// has been consumed. Returns the new token; the session is untouched
    /// if it already unregistered.
    pub fn refresh(&self, pid: i32) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(handle) = self.sessions.lock().get_mut(&pid) {
            handle.cancel_token = token.clone();
        }
        token
    }

    /// Unregisters a session when it terminates. The entry is invalidated
    /// before the pid becomes reusable.
    pub fn unregister(&self, pid: i32) {
        self.sessions.lock().remove(&pid);
    }

    /// Attempts to cancel the session identified by pid and secret key.
    /// Returns whether a matching session was found.
    pub fn cancel(&self, pid: i32, secret_key: i32) -> bool {
        let sessions = self.sessions.lock();
        match sessions.get(&pid) {
            Some(handle) if handle.secret_key == secret_key => {
                handle.cancel_token.cancel();
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_requires_matching_secret() {
        let registry = Registry::new();
        let token = registry.register(1, 42);

        assert!(!registry.cancel(1, 99));
        assert!(!token.is_cancelled());

        assert!(registry.cancel(1, 42));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_unknown_pid() {
        let registry = Registry::new();
        assert!(!registry.cancel(7, 7));
    }

    #[test]
    fn test_refresh_replaces_token() {
        let registry = Registry::new();
        let first = registry.register(1, 42);
        registry.cancel(1, 42);
        assert!(first.is_cancelled());

        let second = registry.refresh(1);
        assert!(!second.is_cancelled());

        registry.cancel(1, 42);
        assert!(second.is_cancelled());
    }

    #[test]
    fn test_unregister() {
        let registry = Registry::new();
        let token = registry.register(1, 42);
        registry.unregister(1);
        assert!(!registry.cancel(1, 42));
        assert!(!token.is_cancelled());
    }
}
