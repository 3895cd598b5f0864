// SPDX-License-Identifier: MIT

//! Poison-tolerant locking.
//!
//! Every lock in this crate guards data that stays consistent when a holder
//! panics (job callbacks run outside any lock), so a poisoned lock is simply
//! taken over.

use std::sync::{LockResult, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Unwraps a lock or condvar result, taking over a poisoned guard.
pub(crate) fn recover<G>(result: LockResult<G>) -> G {
    result.unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    recover(mutex.lock())
}

pub(crate) fn read<T>(rwlock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    recover(rwlock.read())
}

pub(crate) fn write<T>(rwlock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    recover(rwlock.write())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_poisoned_mutex_is_taken_over() {
        let shared = Arc::new(Mutex::new(41));
        let poisoner = shared.clone();
        let result = thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert!(result.is_err());
        assert!(shared.is_poisoned());

        *lock(&shared) += 1;
        assert_eq!(*lock(&shared), 42);
    }

    #[test]
    fn test_poisoned_rwlock_is_taken_over() {
        let shared = Arc::new(RwLock::new(Vec::<u32>::new()));
        let poisoner = shared.clone();
        let _ = thread::spawn(move || {
            let _guard = poisoner.write().unwrap();
            panic!("poison the lock");
        })
        .join();

        write(&shared).push(7);
        assert_eq!(read(&shared).as_slice(), &[7]);
    }
}
