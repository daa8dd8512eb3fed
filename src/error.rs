//! Error taxonomy shared by the stack and skip list.
//!
//! The taxonomy mirrors the original C implementation's `errno`-style kinds,
//! but is surfaced the idiomatic Rust way: every fallible operation returns
//! a `Result<_, ErrorKind>` directly. Handles additionally keep a sticky
//! "last error" cell for parity with the original API shape. It is
//! best-effort and may race under concurrency: the `Result` returned from
//! the call that failed is the only authoritative signal.

use std::sync::atomic::{AtomicU8, Ordering};

/// The kinds of failure a [`crate::stack::Stack`] or
/// [`crate::skiplist::SkipList`] operation can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// Allocation failed.
    #[error("unable to allocate memory")]
    Memory,
    /// The requested key/value was not present.
    #[error("no matching element")]
    NoElement,
    /// The per-thread hazard-pointer or epoch-cell registry is exhausted.
    #[error("no free thread slot in the registry")]
    NoThreads,
    /// A caller-supplied argument was invalid.
    #[error("invalid argument")]
    InvalidArgument,
    /// Thread-local storage could not be established.
    #[error("thread-local storage error")]
    ThreadLocal,
}

/// A sticky, best-effort "last error" cell.
///
/// Encodes `Option<ErrorKind>` into a single `AtomicU8` so it can be stored
/// inline on a handle without extra indirection. `0` means "no error has
/// been recorded since construction"; successful operations never clear it.
#[derive(Debug, Default)]
pub(crate) struct LastError {
    code: AtomicU8,
}

impl LastError {
    pub(crate) const fn new() -> Self {
        Self {
            code: AtomicU8::new(0),
        }
    }

    /// Overwrite the sticky cell. Only call this from a failing operation:
    /// a successful call must never clear a previous error.
    pub(crate) fn set(&self, kind: ErrorKind) {
        self.code.store(encode(kind), Ordering::Relaxed);
    }

    /// Read the sticky cell as best-effort diagnostic information.
    pub fn get(&self) -> Option<ErrorKind> {
        decode(self.code.load(Ordering::Relaxed))
    }
}

fn encode(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Memory => 1,
        ErrorKind::NoElement => 2,
        ErrorKind::NoThreads => 3,
        ErrorKind::InvalidArgument => 4,
        ErrorKind::ThreadLocal => 5,
    }
}

fn decode(code: u8) -> Option<ErrorKind> {
    match code {
        1 => Some(ErrorKind::Memory),
        2 => Some(ErrorKind::NoElement),
        3 => Some(ErrorKind::NoThreads),
        4 => Some(ErrorKind::InvalidArgument),
        5 => Some(ErrorKind::ThreadLocal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear() {
        let e = LastError::new();
        assert_eq!(e.get(), None);
    }

    #[test]
    fn sticky_until_overwritten() {
        let e = LastError::new();
        e.set(ErrorKind::NoElement);
        assert_eq!(e.get(), Some(ErrorKind::NoElement));
        e.set(ErrorKind::Memory);
        assert_eq!(e.get(), Some(ErrorKind::Memory));
    }
}
