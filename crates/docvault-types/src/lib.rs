//! Foundation types for docvault.
//!
//! Every record in the store is addressed by a [`StorageKey`]: an ordered,
//! non-empty sequence of path segments such as `["session", "proj-1",
//! "sess-9"]`. A key canonicalizes to a single `/`-joined string that is
//! used both for locking and for addressing the backing medium.

pub mod error;
pub mod key;

pub use error::TypeError;
pub use key::{StorageKey, SEPARATOR};
