//! Cross-session registry for cancel routing and administrative shutdown.
//!
//! Cancel requests arrive on a fresh connection carrying the target's
//! process id and secret key; the listener resolves them here. The mutex is
//! taken on session insert/remove and on cancel delivery only, never during
//! normal traffic: sessions poll their own atomic flag at safe points.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::Rng;

/// Cancellation flag shared between a session and the registry.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Read and clear; a cancel applies to one in-flight operation.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Key material identifying one session for out-of-band cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub process_id: i32,
    pub secret_key: i32,
}

impl SessionKey {
    /// Fresh key with a random secret. Process ids are handed out by the
    /// listener; uniqueness matters, realness does not.
    pub fn generate(process_id: i32) -> SessionKey {
        SessionKey {
            process_id,
            secret_key: rand::thread_rng().gen(),
        }
    }
}

static SESSIONS: Lazy<Mutex<HashMap<SessionKey, CancelFlag>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Register a session; returns the flag the session polls.
pub fn register(key: SessionKey) -> CancelFlag {
    let flag = CancelFlag::default();
    SESSIONS.lock().insert(key, flag.clone());
    flag
}

pub fn unregister(key: &SessionKey) {
    SESSIONS.lock().remove(key);
}

/// Deliver a cancel request. Unknown keys are ignored for the same reason
/// the server ignores them: the requester learns nothing either way.
pub fn cancel(process_id: i32, secret_key: i32) {
    let key = SessionKey {
        process_id,
        secret_key,
    };
    if let Some(flag) = SESSIONS.lock().get(&key) {
        flag.trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_reaches_registered_session() {
        let key = SessionKey {
            process_id: 71,
            secret_key: 1234,
        };
        let flag = register(key);
        assert!(!flag.is_set());

        cancel(71, 1234);
        assert!(flag.is_set());
        assert!(flag.take());
        assert!(!flag.is_set());

        unregister(&key);
    }

    #[test]
    fn cancel_with_wrong_secret_is_ignored() {
        let key = SessionKey {
            process_id: 72,
            secret_key: 1,
        };
        let flag = register(key);
        cancel(72, 2);
        assert!(!flag.is_set());
        unregister(&key);
    }
}
