use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use lockkit::{SkipList, Stack, TasLock, TicketLock, TtasLock};
use std::sync::Arc;
use std::thread;

fn bench_locks(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_uncontended_acquire");

    group.bench_function("tas", |b| {
        let lock = TasLock::new(0u64);
        b.iter(|| *lock.lock() += 1);
    });

    group.bench_function("ttas", |b| {
        let lock = TtasLock::new(0u64);
        b.iter(|| *lock.lock() += 1);
    });

    group.bench_function("ticket", |b| {
        let lock = TicketLock::new(0u64);
        b.iter(|| *lock.lock() += 1);
    });

    group.finish();
}

fn bench_locks_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_contended_counter");

    for threads in [2usize, 4, 8] {
        group.bench_with_input(BenchmarkId::new("tas", threads), &threads, |b, &threads| {
            b.iter(|| run_contended(threads, || TasLock::new(0u64)));
        });
        group.bench_with_input(BenchmarkId::new("ttas", threads), &threads, |b, &threads| {
            b.iter(|| run_contended(threads, || TtasLock::new(0u64)));
        });
        group.bench_with_input(BenchmarkId::new("ticket", threads), &threads, |b, &threads| {
            b.iter(|| run_contended(threads, || TicketLock::new(0u64)));
        });
    }

    group.finish();
}

trait Bump {
    fn bump(&self);
}

impl Bump for TasLock<u64> {
    fn bump(&self) {
        *self.lock() += 1;
    }
}
impl Bump for TtasLock<u64> {
    fn bump(&self) {
        *self.lock() += 1;
    }
}
impl Bump for TicketLock<u64> {
    fn bump(&self) {
        *self.lock() += 1;
    }
}

fn run_contended<L: Bump + Send + Sync + 'static>(threads: usize, make: impl FnOnce() -> L) {
    const PER_THREAD: usize = 1_000;
    let lock = Arc::new(make());
    let mut handles = Vec::with_capacity(threads);
    for _ in 0..threads {
        let lock = Arc::clone(&lock);
        handles.push(thread::spawn(move || {
            for _ in 0..PER_THREAD {
                lock.bump();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
}

fn bench_stack(c: &mut Criterion) {
    c.bench_function("stack_push_pop_single_thread", |b| {
        let stack = Stack::new();
        b.iter(|| {
            stack.push(1u64).unwrap();
            stack.pop().unwrap();
        });
    });
}

fn bench_skiplist(c: &mut Criterion) {
    c.bench_function("skiplist_insert_search_remove_single_thread", |b| {
        let list: SkipList<u64, u64> = SkipList::new();
        let mut key = 0u64;
        b.iter(|| {
            list.insert(key, key).unwrap();
            let _ = list.search(&key);
            list.remove(&key).unwrap();
            key += 1;
        });
    });
}

criterion_group!(
    benches,
    bench_locks,
    bench_locks_contended,
    bench_stack,
    bench_skiplist
);
criterion_main!(benches);
