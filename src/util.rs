use std::sync::{Mutex, MutexGuard};

use log::warn;

/// Acquire a mutex, recovering from poisoning instead of propagating
/// the panic of another thread.
pub(crate) fn lock_recover<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("{what} lock was poisoned; recovering");
            poisoned.into_inner()
        }
    }
}
