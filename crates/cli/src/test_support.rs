//! Serialized access to process environment for tests that read
//! `AGENTDESK_*` and `HOME`.

use std::sync::{Mutex, OnceLock, PoisonError};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Runs `run` while holding the process-wide environment lock.
///
/// A test that panicked while holding the lock does not block the others.
pub(crate) fn with_locked_env<R>(run: impl FnOnce() -> R) -> R {
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    run()
}

/// Sets `key` for the current process. Call inside [`with_locked_env`].
pub(crate) fn set_env_var(key: &str, value: &str) {
    // SAFETY: every caller holds ENV_LOCK, so no other test thread touches
    // the environment concurrently.
    unsafe {
        std::env::set_var(key, value);
    }
}

/// Removes `key` from the current process. Call inside [`with_locked_env`].
pub(crate) fn remove_env_var(key: &str) {
    // SAFETY: see `set_env_var`.
    unsafe {
        std::env::remove_var(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_survives_a_panicking_holder() {
        let crashed = std::thread::spawn(|| {
            with_locked_env(|| panic!("test body failed"));
        })
        .join();
        assert!(crashed.is_err());

        let value = with_locked_env(|| {
            set_env_var("AGENTDESK_TEST_SUPPORT_VAR", "1");
            let value = std::env::var("AGENTDESK_TEST_SUPPORT_VAR").ok();
            remove_env_var("AGENTDESK_TEST_SUPPORT_VAR");
            value
        });
        assert_eq!(value.as_deref(), Some("1"));
    }
}
