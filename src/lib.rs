//! # lockkit
//!
//! Busy-wait locks and lock-free data structures, built for teaching and
//! benchmarking contention management strategies rather than for drop-in
//! production use.
//!
//! ## Module organization
//!
//! ### Contention management
//! - [`mod@backoff`] - CPU pause hints, scheduler yields, and exponential
//!   backoff (spin-based and sleep-based) shared by every lock and
//!   lock-free structure below.
//!
//! ### Busy-wait locks
//! - [`spinlock`] - [`spinlock::TasLock`], [`spinlock::TtasLock`], and
//!   [`spinlock::TicketLock`]: three busy-wait mutexes with different
//!   fairness and cache-contention tradeoffs, all guarding their data
//!   behind an RAII guard.
//!
//! ### Lock-free data structures
//! - [`stack`] - a Treiber stack reclaiming popped nodes with hazard
//!   pointers.
//! - [`skiplist`] - an ordered map built on a lock-free skip list,
//!   reclaiming removed entries with multi-epoch garbage lists.
//!
//! ### Support
//! - [`error`] - the shared `ErrorKind` taxonomy and the best-effort
//!   sticky "last error" cell.
//! - [`hazard`] (private) - the hazard-pointer registry backing
//!   [`stack`].
//! - [`epoch`] (private) - the epoch registry backing [`skiplist`].

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// CPU pause hints, scheduler yields, and exponential backoff.
pub mod backoff;

/// Shared error taxonomy.
pub mod error;

mod epoch;
mod hazard;

/// Lock-free stack with hazard-pointer reclamation.
pub mod stack;

/// Lock-free ordered map with epoch-based reclamation.
pub mod skiplist;

/// Busy-wait locks: test-and-set, test-test-and-set, and ticket.
pub mod spinlock;

pub use error::ErrorKind;
pub use skiplist::SkipList;
pub use spinlock::{TasLock, TicketLock, TtasLock};
pub use stack::Stack;
