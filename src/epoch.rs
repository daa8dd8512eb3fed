//! Epoch registry for the skip list's multi-epoch reclamation scheme.
//!
//! Ported from the original `SkipList.c`'s `epoch_init` / `enter_epoch` /
//! `leave_epoch`: a global epoch counter cycling through `NUM_EPOCHS`
//! values, and up to `MAX_THREADS` per-thread local-epoch cells. A thread
//! that has entered the structure always advertises an epoch no older than
//! one behind the global epoch; reclamation (in [`crate::skiplist`]) may
//! only free garbage from an epoch once every claimed cell has caught up to
//! the current global epoch.

use crate::error::ErrorKind;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Number of distinct epochs in the ring.
pub const NUM_EPOCHS: u64 = 4;

/// Maximum number of threads that may simultaneously hold a local-epoch
/// cell.
pub const MAX_THREADS: usize = 256;

/// Sentinel meaning "this cell has not been claimed yet".
const UNCLAIMED: i64 = -1;

/// A global epoch counter plus a table of per-thread local-epoch cells.
pub(crate) struct EpochRegistry {
    global: AtomicU64,
    local_epochs: Box<[AtomicI64]>,
}

impl EpochRegistry {
    pub(crate) fn new() -> Self {
        Self {
            global: AtomicU64::new(0),
            local_epochs: (0..MAX_THREADS).map(|_| AtomicI64::new(UNCLAIMED)).collect(),
        }
    }

    /// Current global epoch, in `0..NUM_EPOCHS`.
    pub(crate) fn global_epoch(&self) -> u64 {
        self.global.load(Ordering::Relaxed)
    }

    fn claim_cell(&self) -> Result<usize, ErrorKind> {
        let global = self.global_epoch() as i64;
        for (idx, cell) in self.local_epochs.iter().enumerate() {
            if cell
                .compare_exchange(UNCLAIMED, global, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(idx);
            }
        }
        log::trace!("epoch registry exhausted ({MAX_THREADS} cells)");
        Err(ErrorKind::NoThreads)
    }

    /// Enter a critical section for the calling thread, returning the local
    /// epoch it is now advertising.
    pub(crate) fn enter(&self) -> Result<u64, ErrorKind> {
        let cell = self.cell_for_this_thread()?;
        Ok(self.local_epochs[cell].load(Ordering::Relaxed) as u64)
    }

    /// Leave the critical section entered by [`Self::enter`]. If this
    /// thread's local epoch has fallen behind the global epoch, advance it
    /// by one (mod `NUM_EPOCHS`) so it keeps pace.
    pub(crate) fn leave(&self) {
        let Ok(cell) = self.cell_for_this_thread() else {
            return;
        };
        let global = self.global_epoch() as i64;
        let local = self.local_epochs[cell].load(Ordering::Relaxed);
        if local != global {
            let next = (local + 1).rem_euclid(NUM_EPOCHS as i64);
            self.local_epochs[cell].store(next, Ordering::Relaxed);
        }
    }

    /// `true` if every claimed cell currently equals the global epoch.
    /// This is the precondition for advancing the global epoch and
    /// reclaiming the oldest garbage list.
    pub(crate) fn all_caught_up_with(&self, global: u64) -> bool {
        self.local_epochs
            .iter()
            .map(|cell| cell.load(Ordering::Relaxed))
            .filter(|&e| e != UNCLAIMED)
            .all(|e| e as u64 == global)
    }

    /// Advance the global epoch by one (mod `NUM_EPOCHS`).
    pub(crate) fn advance_global(&self) {
        let global = self.global_epoch();
        let next = (global + 1) % NUM_EPOCHS;
        self.global.store(next, Ordering::Relaxed);
    }

    /// Look up (claiming on first use) this thread's cell index.
    ///
    /// Unlike the hazard registry's slots, a claimed epoch cell is *not*
    /// released when the thread exits. This matches the original, which
    /// registers its `pthread_key_t` with a `NULL` destructor. A process
    /// that spawns more than `MAX_THREADS` distinct threads against one
    /// skip list over its lifetime will eventually see `NoThreads`, the
    /// same limitation the original carries.
    fn cell_for_this_thread(&self) -> Result<usize, ErrorKind> {
        let key = self as *const EpochRegistry as usize;

        EPOCH_CELL_CACHE.with(|cache| {
            if let Some(&cell) = cache.borrow().get(&key) {
                return Ok(cell);
            }
            let cell = self.claim_cell()?;
            cache.borrow_mut().insert(key, cell);
            Ok(cell)
        })
    }
}

thread_local! {
    static EPOCH_CELL_CACHE: RefCell<HashMap<usize, usize>> = RefCell::new(HashMap::new());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_leave_advances_when_behind() {
        let reg = EpochRegistry::new();
        let e = reg.enter().unwrap();
        assert_eq!(e, 0);
        reg.advance_global();
        reg.leave();
        let e2 = reg.enter().unwrap();
        assert_eq!(e2, 1);
    }

    #[test]
    fn all_caught_up_true_when_nobody_has_entered() {
        let reg = EpochRegistry::new();
        assert!(reg.all_caught_up_with(0));
    }

    #[test]
    fn cell_exhaustion_reports_no_threads() {
        use std::thread;

        let reg = std::sync::Arc::new(EpochRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..MAX_THREADS {
            let reg = std::sync::Arc::clone(&reg);
            handles.push(thread::spawn(move || {
                reg.enter().unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.enter(), Err(ErrorKind::NoThreads));
    }
}
