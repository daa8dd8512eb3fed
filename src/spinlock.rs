//! Busy-wait locks with exponential backoff.
//!
//! Three variants, each a direct port of the original `SpinLocks.c`
//! benchmark suite's algorithm, wrapped in an RAII guard the Rust way
//! instead of explicit `_acquire`/`_release` calls:
//!
//! - [`TasLock`] - plain test-and-set, spins on the atomic swap itself.
//!   Cheapest under low contention, but every failed attempt hammers the
//!   cache line with a write.
//! - [`TtasLock`] - test, then test-and-set: spins on a plain load first
//!   and only attempts the swap once the lock looks free, which keeps
//!   failed attempts read-only and cache-friendly.
//! - [`TicketLock`] - strict FIFO ordering via a ticket counter, immune
//!   to starvation but pays for a fetch-add on every acquire.
//!
//! All three spin locally for a short, fixed number of cycles before
//! falling back to an exponentially-growing `nanosleep`-style backoff,
//! exactly as the original benchmarked them.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::backoff::{backoff_sleep, pause_spin, sched_yield};

/// Local spin cycles before a [`TasLock`] falls back to sleeping.
const TAS_CYCLES_TO_SPIN: u32 = 10;
/// Initial backoff sleep for [`TasLock`], in nanoseconds.
const TAS_MIN_BACKOFF_NS: u64 = 1_000;

/// Local spin cycles before a [`TtasLock`] falls back to sleeping.
const TTAS_CYCLES_TO_SPIN: u32 = 10;
/// Initial backoff sleep for [`TtasLock`], in nanoseconds.
const TTAS_MIN_BACKOFF_NS: u64 = 1_000;

/// Local spin cycles before a [`TicketLock`] falls back to yielding.
const TICKET_CYCLES_TO_SPIN: u32 = 100;

/// A test-and-set spinlock.
///
/// Simplest and, under very light contention, fastest of the three: every
/// failed acquire attempt is itself a write to the lock's cache line, so
/// it degrades the worst of the three as contention rises.
#[repr(C)]
pub struct TasLock<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

impl<T> TasLock<T> {
    /// Create a new unlocked lock.
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Try to acquire the lock without spinning.
    #[inline]
    pub fn try_lock(&self) -> Option<TasLockGuard<'_, T>> {
        if self.locked.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(TasLockGuard { lock: self })
        }
    }

    /// Acquire the lock, spinning (and eventually sleeping) as necessary.
    pub fn lock(&self) -> TasLockGuard<'_, T> {
        let mut cycle = 0u32;
        let mut backoff = TAS_MIN_BACKOFF_NS;

        while self.locked.swap(true, Ordering::Acquire) {
            pause_spin();
            cycle += 1;

            if cycle == TAS_CYCLES_TO_SPIN {
                backoff = backoff_sleep(backoff);
                cycle = 0;
            }
        }

        TasLockGuard { lock: self }
    }

    /// `true` if the lock is currently held. A snapshot, racy under
    /// concurrency.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

unsafe impl<T: Send> Send for TasLock<T> {}
unsafe impl<T: Send> Sync for TasLock<T> {}

/// RAII guard for [`TasLock`].
pub struct TasLockGuard<'a, T: ?Sized> {
    lock: &'a TasLock<T>,
}

impl<T: ?Sized> Deref for TasLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for TasLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for TasLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// A test-test-and-set spinlock.
///
/// Waits on a read-only load until the lock looks free before attempting
/// the swap, so contending threads don't invalidate each other's caches
/// while the lock is held. Still unfair: a thread that happens to read
/// "free" first can jump ahead of one that has been waiting longer.
#[repr(C)]
pub struct TtasLock<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

impl<T> TtasLock<T> {
    /// Create a new unlocked lock.
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Try to acquire the lock without spinning.
    #[inline]
    pub fn try_lock(&self) -> Option<TtasLockGuard<'_, T>> {
        if self.locked.load(Ordering::Relaxed) {
            return None;
        }
        if self.locked.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(TtasLockGuard { lock: self })
        }
    }

    /// Acquire the lock, spinning (and eventually sleeping) as necessary.
    pub fn lock(&self) -> TtasLockGuard<'_, T> {
        let mut backoff = TTAS_MIN_BACKOFF_NS;

        for _ in 0..TTAS_CYCLES_TO_SPIN {
            if !self.locked.load(Ordering::SeqCst) {
                break;
            }
            pause_spin();
        }

        loop {
            if self.locked.load(Ordering::SeqCst) {
                backoff = backoff_sleep(backoff);
                continue;
            }
            if !self.locked.swap(true, Ordering::Acquire) {
                return TtasLockGuard { lock: self };
            }
        }
    }

    /// `true` if the lock is currently held. A snapshot, racy under
    /// concurrency.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

unsafe impl<T: Send> Send for TtasLock<T> {}
unsafe impl<T: Send> Sync for TtasLock<T> {}

/// RAII guard for [`TtasLock`].
pub struct TtasLockGuard<'a, T: ?Sized> {
    lock: &'a TtasLock<T>,
}

impl<T: ?Sized> Deref for TtasLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for TtasLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for TtasLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// A ticket lock with strict FIFO fairness.
///
/// Every acquirer draws a ticket with a relaxed fetch-add and waits for
/// `now_serving` to reach it, so threads are served in request order. No
/// thread can be starved, at the cost of a shared counter every acquire
/// contends on.
#[repr(C)]
pub struct TicketLock<T: ?Sized> {
    next_ticket: AtomicUsize,
    now_serving: AtomicUsize,
    data: UnsafeCell<T>,
}

impl<T> TicketLock<T> {
    /// Create a new unlocked lock.
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            next_ticket: AtomicUsize::new(0),
            now_serving: AtomicUsize::new(0),
            data: UnsafeCell::new(data),
        }
    }

    /// Try to acquire the lock without waiting for a ticket to be drawn
    /// ahead of us; only succeeds if the lock is immediately free.
    #[inline]
    pub fn try_lock(&self) -> Option<TicketLockGuard<'_, T>> {
        let ticket = self.next_ticket.load(Ordering::Relaxed);
        let serving = self.now_serving.load(Ordering::Acquire);

        if ticket == serving
            && self
                .next_ticket
                .compare_exchange(ticket, ticket + 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
        {
            Some(TicketLockGuard { lock: self })
        } else {
            None
        }
    }

    /// Acquire the lock, spinning and then yielding until our ticket is
    /// served.
    pub fn lock(&self) -> TicketLockGuard<'_, T> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        for _ in 0..TICKET_CYCLES_TO_SPIN {
            if self.now_serving.load(Ordering::Relaxed) == ticket {
                break;
            }
            pause_spin();
        }

        while self.now_serving.load(Ordering::Acquire) != ticket {
            sched_yield();
        }

        TicketLockGuard { lock: self }
    }

    /// `true` if the lock is currently held by anyone. A snapshot, racy
    /// under concurrency.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.next_ticket.load(Ordering::Relaxed) != self.now_serving.load(Ordering::Relaxed)
    }
}

unsafe impl<T: Send> Send for TicketLock<T> {}
unsafe impl<T: Send> Sync for TicketLock<T> {}

/// RAII guard for [`TicketLock`].
pub struct TicketLockGuard<'a, T: ?Sized> {
    lock: &'a TicketLock<T>,
}

impl<T: ?Sized> Deref for TicketLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for TicketLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for TicketLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.now_serving.fetch_add(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn tas_lock_unlock_roundtrip() {
        let lock = TasLock::new(42);
        assert!(!lock.is_locked());
        {
            let guard = lock.lock();
            assert!(lock.is_locked());
            assert_eq!(*guard, 42);
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn tas_try_lock_fails_while_held() {
        let lock = TasLock::new(0);
        let guard = lock.try_lock().unwrap();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn ttas_lock_unlock_roundtrip() {
        let lock = TtasLock::new(42);
        assert!(!lock.is_locked());
        {
            let guard = lock.lock();
            assert!(lock.is_locked());
            assert_eq!(*guard, 42);
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn ttas_try_lock_fails_while_held() {
        let lock = TtasLock::new(0);
        let guard = lock.try_lock().unwrap();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn ticket_lock_unlock_roundtrip() {
        let lock = TicketLock::new(42);
        assert!(!lock.is_locked());
        {
            let guard = lock.lock();
            assert!(lock.is_locked());
            assert_eq!(*guard, 42);
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn ticket_try_lock_fails_while_held() {
        let lock = TicketLock::new(0);
        let guard = lock.try_lock().unwrap();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    const THREADS: usize = 8;
    const INCREMENTS: usize = 5_000;

    #[test]
    fn tas_lock_serializes_a_shared_counter() {
        let lock = Arc::new(TasLock::new(0usize));
        let mut handles = Vec::new();
        for _ in 0..THREADS {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..INCREMENTS {
                    *lock.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), THREADS * INCREMENTS);
    }

    #[test]
    fn ttas_lock_serializes_a_shared_counter() {
        let lock = Arc::new(TtasLock::new(0usize));
        let mut handles = Vec::new();
        for _ in 0..THREADS {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..INCREMENTS {
                    *lock.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), THREADS * INCREMENTS);
    }

    #[test]
    fn ticket_lock_serializes_a_shared_counter() {
        let lock = Arc::new(TicketLock::new(0usize));
        let mut handles = Vec::new();
        for _ in 0..THREADS {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..INCREMENTS {
                    *lock.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), THREADS * INCREMENTS);
    }

    #[test]
    fn ticket_lock_admits_every_thread() {
        let lock = Arc::new(TicketLock::new(Vec::<usize>::new()));
        let mut handles = Vec::new();
        for t in 0..THREADS {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                lock.lock().push(t);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(lock.lock().len(), THREADS);
    }
}
