//! # Bus Arbiter
//!
//! This module provides the mutual-exclusion lock that serializes every
//! transaction addressed to a device on a shared bus.
//!
//! The arbiter wraps the bus transport itself, so the transport can only be
//! reached through a held [`ArbiterGuard`]. Dropping the guard releases the
//! lock, which means the lock is released exactly once on every exit path of
//! a transaction, including early returns caused by bus failures.
//!
//! Acquisition is bounded: a caller waits at most for the given timeout and
//! then receives an [`AcquireTimeout`] error. There is no internal retry and
//! no recursive acquisition.

use core::fmt;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};

use embassy_time::{Duration, with_timeout};

/// Default maximum wait for the arbiter lock, in milliseconds.
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 1000;

/// The arbiter lock could not be acquired within the requested timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireTimeout;

impl fmt::Display for AcquireTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("timed out waiting for the bus arbiter")
    }
}

impl core::error::Error for AcquireTimeout {}

/// Exclusive access to the arbitrated value.
///
/// The lock is released when the guard is dropped.
pub type ArbiterGuard<'a, M, T> = MutexGuard<'a, M, T>;

/// Mutual-exclusion lock guarding a bus transport.
///
/// `M` selects the raw mutex: `NoopRawMutex` when all callers run on the same
/// executor, `CriticalSectionRawMutex` when they run on different threads or
/// interrupt priorities.
pub struct Arbiter<M, T>
where
    M: RawMutex,
{
    inner: Mutex<M, T>,
}

impl<M, T> Arbiter<M, T>
where
    M: RawMutex,
{
    /// Creates an [`Arbiter`] guarding the given value.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Waits until the lock is free or the timeout elapses.
    ///
    /// Only the calling task is suspended.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireTimeout`] if the lock is still held by another caller
    /// when the timeout elapses.
    pub async fn acquire(
        &self,
        timeout: Duration,
    ) -> Result<ArbiterGuard<'_, M, T>, AcquireTimeout> {
        with_timeout(timeout, self.inner.lock())
            .await
            .map_err(|_| AcquireTimeout)
    }

    /// Acquires the lock only if it is free right now.
    #[must_use]
    pub fn try_acquire(&self) -> Option<ArbiterGuard<'_, M, T>> {
        self.inner.try_lock().ok()
    }

    /// Returns the guarded value without locking.
    ///
    /// Exclusive access to the arbiter already rules out any in-flight
    /// transaction.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Consumes the arbiter and returns the guarded value.
    #[inline]
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}
