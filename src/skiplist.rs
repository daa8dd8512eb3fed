//! Lock-free ordered map: a skip list with multi-epoch reclamation.
//!
//! Ported from the original `SkipList.c` (Harris/Michael-style marked-link
//! deletion). Forward links are tagged pointers: the low bit of each packed
//! `usize` marks "the tower this link originates from is logically deleted
//! at this level", following the original's `MARKED`/`POINTER`/`IS_MARKED`
//! macros. Deleted towers are handed to one of [`NUM_EPOCHS`] reclaim lists
//! and freed only once every thread's locally-advertised epoch has caught up
//! two epochs behind the current one.

use crate::epoch::EpochRegistry;
use crate::error::{ErrorKind, LastError};
use rand::Rng;
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

/// Number of forward-pointer levels a tower may span.
pub const NUM_LEVELS: usize = 16;

/// Number of reclaim-list epochs.
const NUM_EPOCHS: usize = crate::epoch::NUM_EPOCHS as usize;

const MARK: usize = 1;

#[inline]
fn pack<K, V>(ptr: *mut Tower<K, V>, marked: bool) -> usize {
    ptr as usize | (marked as usize)
}

#[inline]
fn unpack<K, V>(value: usize) -> (*mut Tower<K, V>, bool) {
    ((value & !MARK) as *mut Tower<K, V>, value & MARK == MARK)
}

struct Tower<K, V> {
    key: K,
    value: UnsafeCell<V>,
    level: usize,
    forward: Box<[AtomicUsize]>,
    reclaim_next: AtomicPtr<Tower<K, V>>,
}

impl<K, V> Tower<K, V> {
    fn new(key: K, value: V, level: usize, succs: &[*mut Tower<K, V>]) -> *mut Self {
        let forward: Box<[AtomicUsize]> = (0..=level)
            .map(|lvl| AtomicUsize::new(pack(succs[lvl], false)))
            .collect();
        Box::into_raw(Box::new(Self {
            key,
            value: UnsafeCell::new(value),
            level,
            forward,
            reclaim_next: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

// SAFETY: access to `value` is only ever unsynchronized-racy on concurrent
// updates to the *same* key, and that race is a plain relaxed store where
// the last writer wins. Reads always happen under epoch protection that
// keeps the tower alive.
unsafe impl<K: Send, V: Send> Send for Tower<K, V> {}
unsafe impl<K: Send, V: Send> Sync for Tower<K, V> {}

/// A lock-free ordered map. Construction is `skiplist_init`; dropping the
/// map is `skiplist_free` and, like the stack, requires exclusive access
/// (no concurrent thread still operating on it).
pub struct SkipList<K, V> {
    header: [AtomicUsize; NUM_LEVELS],
    max_level: AtomicUsize,
    epochs: EpochRegistry,
    reclaim_lists: [AtomicPtr<Tower<K, V>>; NUM_EPOCHS],
    reclaim_lock: AtomicBool,
    last_error: LastError,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> Default for SkipList<K, V>
where
    K: Ord + Send + Sync,
    V: Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SkipList<K, V>
where
    K: Ord + Send + Sync,
    V: Clone + Send + Sync,
{
    /// Create a new, empty skip list.
    pub fn new() -> Self {
        Self {
            header: std::array::from_fn(|_| AtomicUsize::new(pack::<K, V>(ptr::null_mut(), false))),
            max_level: AtomicUsize::new(0),
            epochs: EpochRegistry::new(),
            reclaim_lists: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            reclaim_lock: AtomicBool::new(false),
            last_error: LastError::new(),
            _marker: PhantomData,
        }
    }

    /// The most recent error recorded on this handle. Best-effort.
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error.get()
    }

    #[inline]
    fn forward_slot(&self, node: *mut Tower<K, V>, lvl: usize) -> &AtomicUsize {
        if node.is_null() {
            &self.header[lvl]
        } else {
            unsafe { &(*node).forward[lvl] }
        }
    }

    /// Navigate from the header down from `from_lvl` to `to_lvl`,
    /// physically unlinking any marked towers encountered, and record the
    /// predecessor/successor at each level.
    fn fill(
        &self,
        key: &K,
        from_lvl: usize,
        to_lvl: usize,
    ) -> ([*mut Tower<K, V>; NUM_LEVELS], [*mut Tower<K, V>; NUM_LEVELS]) {
        'restart: loop {
            let mut cur: *mut Tower<K, V> = ptr::null_mut();
            let mut preds = [ptr::null_mut(); NUM_LEVELS];
            let mut succs = [ptr::null_mut(); NUM_LEVELS];

            for lvl in (to_lvl..=from_lvl).rev() {
                let mut next_raw = self.forward_slot(cur, lvl).load(Ordering::Acquire);
                let (mut next, _) = unpack::<K, V>(next_raw);

                loop {
                    if next.is_null() {
                        break;
                    }

                    let next_next_raw = unsafe { (*next).forward[lvl].load(Ordering::Relaxed) };
                    let (next_next, next_next_marked) = unpack::<K, V>(next_next_raw);

                    if next_next_marked {
                        let spliced = pack(next_next, false);
                        if self.forward_slot(cur, lvl)
                            .compare_exchange(
                                next_raw,
                                spliced,
                                Ordering::Release,
                                Ordering::Relaxed,
                            )
                            .is_err()
                        {
                            log::trace!("skiplist fill restart: splice race at level {lvl}");
                            continue 'restart;
                        }
                        next_raw = self.forward_slot(cur, lvl).load(Ordering::Acquire);
                        next = unpack::<K, V>(next_raw).0;
                    } else if unsafe { &(*next).key } < key {
                        cur = next;
                        next_raw = next_next_raw;
                        next = next_next;
                    } else {
                        break;
                    }
                }

                preds[lvl] = cur;
                succs[lvl] = next;
            }

            return (preds, succs);
        }
    }

    fn random_level() -> usize {
        let mut rng = rand::thread_rng();
        let mut level = 0;
        while level < NUM_LEVELS - 1 && rng.gen_bool(0.5) {
            level += 1;
        }
        level
    }

    /// Insert `key` with `value`, or update the value if `key` is already
    /// present.
    pub fn insert(&self, key: K, value: V) -> Result<(), ErrorKind> {
        let Ok(_epoch) = self.epochs.enter() else {
            let err = ErrorKind::NoThreads;
            self.last_error.set(err);
            return Err(err);
        };

        let (mut preds, mut succs) = self.fill(&key, NUM_LEVELS - 1, 0);

        if !succs[0].is_null() && unsafe { &(*succs[0]).key } == &key {
            unsafe { *(*succs[0]).value.get() = value };
            self.epochs.leave();
            return Ok(());
        }

        let new_level = Self::random_level();
        let new_tower = Tower::new(key, value, new_level, &succs);

        let observed_max = self.max_level.load(Ordering::Relaxed);
        if new_level > observed_max {
            self.max_level.store(new_level, Ordering::Relaxed);
        }

        let tower_key: *const K = unsafe { &(*new_tower).key };

        for lvl in 0..=new_level {
            loop {
                let expected = pack(succs[lvl], false);
                let desired = pack(new_tower, false);
                if self.forward_slot(preds[lvl], lvl)
                    .compare_exchange(expected, desired, Ordering::Release, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }

                log::trace!("skiplist insert retry at level {lvl}");
                let key_ref = unsafe { &*tower_key };
                let (p, s) = self.fill(key_ref, NUM_LEVELS - 1, lvl);
                preds = p;
                succs = s;
                unsafe { (*new_tower).forward[lvl].store(pack(succs[lvl], false), Ordering::Relaxed) };
            }
        }

        self.epochs.leave();
        Ok(())
    }

    /// Remove `key`. Idempotent: removing an absent key is not an error.
    pub fn remove(&self, key: &K) -> Result<(), ErrorKind> {
        let epoch = match self.epochs.enter() {
            Ok(epoch) => epoch,
            Err(e) => {
                self.last_error.set(e);
                return Err(e);
            }
        };

        let (_preds, succs) = self.fill(key, NUM_LEVELS - 1, 0);
        let tower = succs[0];

        if tower.is_null() || unsafe { &(*tower).key } != key {
            self.epochs.leave();
            return Ok(());
        }

        let level = unsafe { (*tower).level };
        for lvl in (1..=level).rev() {
            loop {
                let current = unsafe { (*tower).forward[lvl].load(Ordering::Acquire) };
                let (target, marked) = unpack::<K, V>(current);
                if marked {
                    break;
                }
                let desired = pack(target, true);
                if unsafe { &(*tower).forward[lvl] }
                    .compare_exchange(current, desired, Ordering::Release, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
            }
        }

        let mut i_marked_it = false;
        loop {
            let current = unsafe { (*tower).forward[0].load(Ordering::Acquire) };
            let (target, marked) = unpack::<K, V>(current);
            if marked {
                break;
            }
            let desired = pack(target, true);
            if unsafe { &(*tower).forward[0] }
                .compare_exchange(current, desired, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                i_marked_it = true;
                break;
            }
        }

        if i_marked_it {
            let _ = self.fill(key, NUM_LEVELS - 1, 0);
            self.add_to_reclaim_list(tower, epoch as usize);
        }

        self.epochs.leave();

        if i_marked_it {
            self.try_reclaim();
        }

        Ok(())
    }

    /// Look up `key`, returning a clone of its value.
    pub fn search(&self, key: &K) -> Result<V, ErrorKind> {
        let Ok(_epoch) = self.epochs.enter() else {
            let err = ErrorKind::NoThreads;
            self.last_error.set(err);
            return Err(err);
        };

        let start_level = self.max_level.load(Ordering::Relaxed);
        let (_preds, succs) = self.fill(key, start_level, 0);

        let result = if !succs[0].is_null() && unsafe { &(*succs[0]).key } == key {
            Ok(unsafe { (*(*succs[0]).value.get()).clone() })
        } else {
            Err(ErrorKind::NoElement)
        };

        self.epochs.leave();

        if let Err(e) = result {
            self.last_error.set(e);
        }
        result
    }

    fn add_to_reclaim_list(&self, tower: *mut Tower<K, V>, epoch: usize) {
        loop {
            let head = self.reclaim_lists[epoch].load(Ordering::Acquire);
            unsafe { (*tower).reclaim_next.store(head, Ordering::Relaxed) };
            if self.reclaim_lists[epoch]
                .compare_exchange(head, tower, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Attempt to advance the global epoch and free the oldest reclaim
    /// list. A no-op if reclamation is already in progress on another
    /// thread, or if some thread hasn't yet caught up.
    fn try_reclaim(&self) {
        if self
            .reclaim_lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let global = self.epochs.global_epoch();
        if self.epochs.all_caught_up_with(global) {
            let reclaim_epoch = ((global + crate::epoch::NUM_EPOCHS - 2) % crate::epoch::NUM_EPOCHS) as usize;
            let mut head = self.reclaim_lists[reclaim_epoch].swap(ptr::null_mut(), Ordering::Relaxed);
            let mut freed = 0usize;

            while !head.is_null() {
                let next = unsafe { (*head).reclaim_next.load(Ordering::Relaxed) };
                unsafe { drop(Box::from_raw(head)) };
                head = next;
                freed += 1;
            }

            self.epochs.advance_global();
            log::trace!("skiplist reclaimed {freed} tower(s) from epoch {reclaim_epoch}");
        }

        self.reclaim_lock.store(false, Ordering::Release);
    }
}

impl<K, V> Drop for SkipList<K, V> {
    fn drop(&mut self) {
        let mut current = unpack::<K, V>(self.header[0].load(Ordering::Relaxed)).0;
        while !current.is_null() {
            let next = unsafe { unpack::<K, V>((*current).forward[0].load(Ordering::Relaxed)).0 };
            unsafe { drop(Box::from_raw(current)) };
            current = next;
        }

        for epoch in 0..NUM_EPOCHS {
            let mut to_delete = self.reclaim_lists[epoch].load(Ordering::Relaxed);
            while !to_delete.is_null() {
                let next = unsafe { (*to_delete).reclaim_next.load(Ordering::Relaxed) };
                unsafe { drop(Box::from_raw(to_delete)) };
                to_delete = next;
            }
        }
    }
}

unsafe impl<K: Send + Sync, V: Send + Sync> Send for SkipList<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for SkipList<K, V> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_thread_crud() {
        let list: SkipList<i64, i64> = SkipList::new();
        list.insert(1, 100).unwrap();
        list.insert(2, 200).unwrap();
        list.insert(3, 300).unwrap();

        assert_eq!(list.search(&2), Ok(200));

        list.remove(&2).unwrap();
        assert_eq!(list.search(&2), Err(ErrorKind::NoElement));

        list.insert(2, 201).unwrap();
        assert_eq!(list.search(&2), Ok(201));
    }

    #[test]
    fn remove_missing_key_is_not_an_error() {
        let list: SkipList<i64, i64> = SkipList::new();
        assert_eq!(list.remove(&42), Ok(()));
    }

    #[test]
    fn level0_stays_sorted() {
        let list: SkipList<i64, i64> = SkipList::new();
        for k in [5, 1, 4, 2, 3] {
            list.insert(k, k).unwrap();
        }

        let mut current = unpack::<i64, i64>(list.header[0].load(Ordering::Relaxed)).0;
        let mut seen = Vec::new();
        while !current.is_null() {
            let (_, marked) = unpack::<i64, i64>(unsafe { (*current).forward[0].load(Ordering::Relaxed) });
            if !marked {
                seen.push(unsafe { (*current).key });
            }
            current = unsafe { unpack::<i64, i64>((*current).forward[0].load(Ordering::Relaxed)).0 };
        }
        let mut sorted = seen.clone();
        sorted.sort_unstable();
        assert_eq!(seen, sorted);
    }

    #[test]
    fn concurrent_disjoint_keys() {
        const THREADS: i64 = 16;
        const PER_THREAD: i64 = 200;

        let list = Arc::new(SkipList::new());
        let mut handles = Vec::new();

        for t in 0..THREADS {
            let list = Arc::clone(&list);
            handles.push(thread::spawn(move || {
                let keys: Vec<i64> = (0..PER_THREAD).map(|i| t + i * THREADS).collect();
                for &k in &keys {
                    list.insert(k, k).unwrap();
                }
                for &k in &keys {
                    assert_eq!(list.search(&k), Ok(k));
                }
                for &k in &keys {
                    list.remove(&k).unwrap();
                }
                for &k in &keys {
                    assert_eq!(list.search(&k), Err(ErrorKind::NoElement));
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn concurrent_churn_keeps_live_entries_consistent() {
        const THREADS: i64 = 8;
        const CYCLES: i64 = 50;

        let list = Arc::new(SkipList::new());
        let mut handles = Vec::new();

        for t in 0..THREADS {
            let list = Arc::clone(&list);
            handles.push(thread::spawn(move || {
                for cycle in 0..CYCLES {
                    let base = t * 1000 + cycle * 10;
                    let mut inserted = HashSet::new();
                    for k in base..base + 9 {
                        list.insert(k, k).unwrap();
                        inserted.insert(k);
                    }
                    for &k in &inserted {
                        let _ = list.search(&k);
                    }
                    if let Some(&first) = inserted.iter().next() {
                        list.remove(&first).unwrap();
                    }
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }
    }
}
