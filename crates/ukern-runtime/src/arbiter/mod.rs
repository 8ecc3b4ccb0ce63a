//! Synchronization primitives
//!
//! All three arbiters work on caller-owned `AtomicU32` cells and evaluate
//! their predicates under the scheduler lock. A blocked fiber records the
//! cell in its control block and moves onto a wait chain; see `state` for
//! the chain layout.
//!
//! - `lock` - mutex-style ownership of a cell holding the owner's handle
//! - `key` - condition keys that release and re-acquire a lock cell
//! - `address` - futex-style wait/wake on an address predicate

mod address;
mod key;
mod lock;
