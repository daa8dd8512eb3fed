//! Hazard-pointer registry.
//!
//! Each [`crate::stack::Stack`] owns one `HazardRegistry`: a fixed array of
//! `MAX_HAZARD_POINTERS` slots, each either free (`owner == 0`) or claimed by
//! exactly one thread. A thread publishes the node it is about to
//! dereference into its claimed slot's `protected` pointer; any other thread
//! popping must treat that node as unsafe to free for as long as it appears
//! in any slot. This is a direct translation of the original's
//! `struct HazardPointer { volatile pid_t id; volatile struct StackNode*
//! pointer; }` array, type-erased to `*mut ()` so the registry itself need
//! not be generic over the stack's element type.

use crate::error::ErrorKind;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Maximum number of threads that may simultaneously hold a hazard slot.
pub const MAX_HAZARD_POINTERS: usize = 64;

struct HazardSlot {
    owner: AtomicUsize,
    protected: AtomicPtr<()>,
}

impl HazardSlot {
    const fn new() -> Self {
        Self {
            owner: AtomicUsize::new(0),
            protected: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

/// A fixed-size table of hazard-pointer slots, owned by a single data
/// structure instance (never shared process-wide, per the design notes).
pub(crate) struct HazardRegistry {
    slots: Box<[HazardSlot]>,
}

impl HazardRegistry {
    pub(crate) fn new() -> Self {
        Self {
            slots: (0..MAX_HAZARD_POINTERS)
                .map(|_| HazardSlot::new())
                .collect(),
        }
    }

    /// Claim the first free slot for `thread_id` (nonzero). Returns the slot
    /// index, or `ErrorKind::NoThreads` if the table is exhausted.
    fn claim_slot(&self, thread_id: usize) -> Result<usize, ErrorKind> {
        for (idx, slot) in self.slots.iter().enumerate() {
            if slot
                .owner
                .compare_exchange(0, thread_id, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(idx);
            }
        }
        log::trace!("hazard registry exhausted ({MAX_HAZARD_POINTERS} slots)");
        Err(ErrorKind::NoThreads)
    }

    /// Release a previously-claimed slot, making it reusable. Installed as
    /// the thread-exit cleanup for the calling thread's cached slot.
    fn release_slot(&self, slot: usize) {
        self.slots[slot].protected.store(ptr::null_mut(), Ordering::Relaxed);
        self.slots[slot].owner.store(0, Ordering::Relaxed);
    }

    /// Publish `ptr` into `slot`.
    pub(crate) fn protect(&self, slot: usize, ptr: *mut ()) {
        self.slots[slot].protected.store(ptr, Ordering::Relaxed);
    }

    /// Clear the protected pointer in `slot` without releasing ownership.
    pub(crate) fn clear(&self, slot: usize) {
        self.slots[slot].protected.store(ptr::null_mut(), Ordering::Relaxed);
    }

    /// Read back whatever `slot` currently protects (used to re-verify a
    /// publish in the pop protection loop).
    pub(crate) fn protected(&self, slot: usize) -> *mut () {
        self.slots[slot].protected.load(Ordering::Relaxed)
    }

    /// Linear scan: does any slot currently protect `node`?
    ///
    /// Safe to call with a node already detached from the stack and sitting
    /// only on the reclaim list, never while it might still be reachable
    /// through `head`.
    pub(crate) fn any_slot_protects(&self, node: *mut ()) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.protected.load(Ordering::Relaxed) == node)
    }
}

thread_local! {
    static THREAD_ID: usize = next_thread_id();
    static SLOT_CACHE: RefCell<HashMap<usize, CachedSlot>> = RefCell::new(HashMap::new());
}

static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(1);

fn next_thread_id() -> usize {
    NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed)
}

/// A cached slot index plus enough information to release it when this
/// thread exits. Holds a raw pointer to the owning registry.
///
/// # Safety precondition
///
/// The registry this points at must outlive every thread that has ever
/// cached a slot for it. This is the same precondition the original C
/// implementation relies on via `pthread_key_t` destructors writing through
/// a raw pointer into the (still-alive) `struct Stack`: callers must join
/// every worker thread before dropping the owning `Stack`, exactly as
/// `stack_free`'s "exclusive access" contract already requires.
struct CachedSlot {
    registry: *const HazardRegistry,
    slot: usize,
}

impl Drop for CachedSlot {
    fn drop(&mut self) {
        // SAFETY: see the precondition documented on `CachedSlot`.
        unsafe { (*self.registry).release_slot(self.slot) };
    }
}

/// Look up (allocating on first use) the calling thread's hazard slot index
/// for `registry`, identified by its stable address.
pub(crate) fn get_slot_for_this_thread(registry: &HazardRegistry) -> Result<usize, ErrorKind> {
    let key = registry as *const HazardRegistry as usize;
    let thread_id = THREAD_ID.with(|id| *id);

    SLOT_CACHE.with(|cache| {
        if let Some(cached) = cache.borrow().get(&key) {
            return Ok(cached.slot);
        }

        let slot = registry.claim_slot(thread_id)?;
        cache.borrow_mut().insert(
            key,
            CachedSlot {
                registry: registry as *const HazardRegistry,
                slot,
            },
        );
        Ok(slot)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_and_release_roundtrip() {
        let reg = HazardRegistry::new();
        let slot = get_slot_for_this_thread(&reg).unwrap();
        reg.protect(slot, 0x1 as *mut ());
        assert!(reg.any_slot_protects(0x1 as *mut ()));
        reg.clear(slot);
        assert!(!reg.any_slot_protects(0x1 as *mut ()));
    }

    #[test]
    fn exhaustion_reports_no_threads() {
        let reg = HazardRegistry::new();
        for i in 1..=MAX_HAZARD_POINTERS {
            assert!(reg.claim_slot(i).is_ok());
        }
        assert_eq!(reg.claim_slot(999), Err(ErrorKind::NoThreads));
    }
}
