//! Transactional circuit editing.
//!
//! Edits are collected into a [`Transaction`] and applied by
//! [`Project::submit`](crate::Project::submit), which write-locks every
//! circuit involved, applies the changes through a [`Mutator`], commits new
//! structures and hands back a [`TransactionResult`] with the reverse
//! transaction and per-circuit [`ReplacementMap`]s.

mod change;
pub(crate) mod locker;
mod replacement;
mod transaction;

pub use change::CircuitChange;
pub use locker::Access;
pub use replacement::ReplacementMap;
pub use transaction::{Mutator, Transaction, TransactionResult};
