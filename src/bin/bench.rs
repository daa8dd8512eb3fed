//! Contention benchmark CLI.
//!
//! Drives a shared counter through each of the three busy-wait locks, and
//! a shared stack/skip list through concurrent push-pop and insert-remove
//! cycles, reporting wall-clock throughput for each so the lock and
//! reclamation strategies can be compared side by side.

use clap::Parser;
use colored::*;
use lockkit::{SkipList, Stack, TasLock, TicketLock, TtasLock};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Command-line arguments for the contention benchmark.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of worker threads.
    #[arg(short, long, default_value_t = 8)]
    threads: usize,

    /// Number of operations each worker performs per structure.
    #[arg(short, long, default_value_t = 200_000)]
    ops: usize,

    /// Only run the lock benchmarks (skip stack/skip list).
    #[arg(long)]
    locks_only: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    println!("{}", "lockkit contention benchmark".green().bold());
    println!("threads={} ops-per-thread={}\n", args.threads, args.ops);

    bench_lock("TasLock", args.threads, args.ops, || TasLock::new(0usize));
    bench_lock("TtasLock", args.threads, args.ops, || TtasLock::new(0usize));
    bench_lock("TicketLock", args.threads, args.ops, || TicketLock::new(0usize));

    if !args.locks_only {
        bench_stack(args.threads, args.ops);
        bench_skiplist(args.threads, args.ops);
    }

    println!("\n{}", "done".green().bold());
}

fn report(name: &str, elapsed: Duration, ops: usize) {
    let per_sec = ops as f64 / elapsed.as_secs_f64();
    println!(
        "{:<12} {:>10.3}ms total, {:>12.0} ops/sec",
        name.cyan(),
        elapsed.as_secs_f64() * 1000.0,
        per_sec
    );
}

fn bench_lock<L>(name: &str, threads: usize, ops: usize, make: impl FnOnce() -> L)
where
    L: LockLike + Send + Sync + 'static,
{
    let lock = Arc::new(make());
    let start = Instant::now();

    let mut handles = Vec::with_capacity(threads);
    for _ in 0..threads {
        let lock = Arc::clone(&lock);
        handles.push(thread::spawn(move || {
            for _ in 0..ops {
                lock.bump();
            }
        }));
    }
    for h in handles {
        h.join().expect("worker thread panicked");
    }

    report(name, start.elapsed(), threads * ops);
}

trait LockLike {
    fn bump(&self);
}

impl LockLike for TasLock<usize> {
    fn bump(&self) {
        *self.lock() += 1;
    }
}

impl LockLike for TtasLock<usize> {
    fn bump(&self) {
        *self.lock() += 1;
    }
}

impl LockLike for TicketLock<usize> {
    fn bump(&self) {
        *self.lock() += 1;
    }
}

fn bench_stack(threads: usize, ops: usize) {
    let stack = Arc::new(Stack::new());
    let start = Instant::now();

    let mut handles = Vec::with_capacity(threads);
    for t in 0..threads {
        let stack = Arc::clone(&stack);
        handles.push(thread::spawn(move || {
            let base = t * ops;
            for v in base..base + ops {
                stack.push(v).expect("push should not fail");
            }
            for _ in 0..ops {
                let _ = stack.pop();
            }
        }));
    }
    for h in handles {
        h.join().expect("worker thread panicked");
    }

    report("Stack", start.elapsed(), threads * ops * 2);
}

fn bench_skiplist(threads: usize, ops: usize) {
    let per_thread = ops.min(20_000);
    let list = Arc::new(SkipList::new());
    let start = Instant::now();

    let mut handles = Vec::with_capacity(threads);
    for t in 0..threads {
        let list = Arc::clone(&list);
        handles.push(thread::spawn(move || {
            let base = (t * per_thread) as i64;
            for k in base..base + per_thread as i64 {
                list.insert(k, k).expect("insert should not fail");
            }
            for k in base..base + per_thread as i64 {
                let _ = list.search(&k);
            }
            for k in base..base + per_thread as i64 {
                list.remove(&k).expect("remove should not fail");
            }
        }));
    }
    for h in handles {
        h.join().expect("worker thread panicked");
    }

    report("SkipList", start.elapsed(), threads * per_thread * 3);
}
