use std::fmt::{Display, Formatter};
use std::sync::atomic::{Ordering, fence};

use crate::utils::PhantomUnsend;
use crate::utils::sync::AtomicU64;

#[derive(Debug, Eq, PartialEq)]
pub enum LockError {
    /// The lock was held by a writer when the version was read.
    Locked,

    /// The version moved on since it was read.
    Retry,
}

impl Display for LockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Locked => write!(f, "Locked"),
            LockError::Retry => write!(f, "Retry"),
        }
    }
}

impl std::error::Error for LockError {}

// Optimistic lock.
// Encodes a version and a lock into the same atomic.
// Readers never block: they take a version, read whatever they need through atomics, and then
// check the version again. Any write in between bumps the version and the reader must restart.
// The protected data lives beside the lock, not inside it, so one node can guard several fields.
pub struct OptimisticLock {
    // 63 bits for the version, 1 bit for the lock
    version_and_lock: AtomicU64,
}

impl Default for OptimisticLock {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimisticLock {
    pub fn new() -> Self {
        Self {
            version_and_lock: AtomicU64::new(2),
        }
    }

    pub fn version(&self) -> u64 {
        self.version_and_lock.load(Ordering::Relaxed)
    }

    pub fn is_locked(&self) -> bool {
        self.version() & 0b1 == 1
    }

    /// Start an optimistic read. Fails with `Locked` while a writer holds the lock.
    pub fn read(&self) -> Result<u64, LockError> {
        let version_lock = self.version_and_lock.load(Ordering::Acquire);
        if version_lock & 0b1 == 1 {
            return Err(LockError::Locked);
        }
        Ok(version_lock)
    }

    /// Validate everything read since `read` returned `version`.
    pub fn check_version(&self, version: u64) -> Result<(), LockError> {
        // Orders the relaxed data loads before the second version load.
        fence(Ordering::Acquire);
        if self.version_and_lock.load(Ordering::Relaxed) == version {
            Ok(())
        } else {
            Err(LockError::Retry)
        }
    }

    pub fn write(&self) -> Result<WriteGuard<'_>, LockError> {
        let version = self.read()?;
        self.write_with(version)
    }

    /// Upgrade an optimistic read to exclusive access, only if nothing changed since `version`.
    pub fn write_with(&self, version: u64) -> Result<WriteGuard<'_>, LockError> {
        match self.version_and_lock.compare_exchange(
            version,
            version + 0b1,
            Ordering::Acquire,
            Ordering::Relaxed,
        ) {
            Ok(_) => {
                // Readers that see any of our stores must also see the lock bit.
                fence(Ordering::Release);
                Ok(WriteGuard::new(self))
            }
            Err(_) => Err(LockError::Retry),
        }
    }
}

/// Exclusive access to whatever an `OptimisticLock` guards. Dropping it clears the lock bit and
/// advances the version in one step.
pub struct WriteGuard<'a> {
    lock: &'a OptimisticLock,
    _unsend_marker: PhantomUnsend,
}

impl<'a> WriteGuard<'a> {
    fn new(lock: &'a OptimisticLock) -> Self {
        Self {
            lock,
            _unsend_marker: Default::default(),
        }
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.version_and_lock.fetch_add(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use crate::utils::optimistic_lock::{LockError, OptimisticLock};

    #[test]
    fn test_read() {
        let lock = OptimisticLock::new();
        let version = lock.read().unwrap();
        assert!(lock.check_version(version).is_ok());
    }

    #[test]
    fn test_write_read() {
        let lock = OptimisticLock::new();
        let before = lock.read().unwrap();
        {
            let _w = lock.write().unwrap();
            assert!(lock.is_locked());
            assert_eq!(lock.read(), Err(LockError::Locked));
        }
        assert!(!lock.is_locked());
        let after = lock.read().unwrap();
        assert!(after > before);
        assert!(lock.check_version(after).is_ok());
    }

    #[test]
    fn test_out_of_sync() {
        let lock = OptimisticLock::new();
        let version = lock.read().unwrap();
        {
            let _w = lock.write().unwrap();
            assert_eq!(lock.check_version(version), Err(LockError::Retry));
        }
        assert_eq!(lock.check_version(version), Err(LockError::Retry));
    }

    #[test]
    fn test_stale_upgrade() {
        let lock = OptimisticLock::new();
        let version = lock.read().unwrap();
        drop(lock.write().unwrap());
        assert!(matches!(lock.write_with(version), Err(LockError::Retry)));
        let fresh = lock.read().unwrap();
        assert!(lock.write_with(fresh).is_ok());
    }

    #[test]
    fn test_concurrent_write_with_retry() {
        let lock = OptimisticLock::new();
        // Non-atomic read-modify-write; only correct if the lock excludes other writers.
        let counter = AtomicU64::new(0);
        let per_thread_increments = 10000;
        let num_threads = 10;
        std::thread::scope(|s| {
            for _ in 0..num_threads {
                s.spawn(|| {
                    for _ in 0..per_thread_increments {
                        loop {
                            match lock.write() {
                                Ok(_guard) => {
                                    let v = counter.load(Ordering::Relaxed);
                                    counter.store(v + 1, Ordering::Relaxed);
                                    break;
                                }
                                Err(LockError::Retry) | Err(LockError::Locked) => {
                                    std::hint::spin_loop();
                                }
                            }
                        }
                    }
                });
            }
        });
        let version = lock.read().unwrap();
        assert_eq!(
            counter.load(Ordering::Relaxed),
            per_thread_increments * num_threads
        );
        lock.check_version(version).unwrap();
        // Each write advanced the version by exactly two.
        assert_eq!(version, 2 + 2 * per_thread_increments * num_threads);
    }
}
