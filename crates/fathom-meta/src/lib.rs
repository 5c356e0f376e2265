//! Metadata persistence layer wrapping Fjall.
//!
//! [`MetaStore`] keeps the small amount of state Fathom needs to survive a
//! restart. Object bytes never live here; they are on the backend nodes.
//!
//! - `degraded_writes`: content hash → [`DegradedWriteRecord`], the writes
//!   accepted below the replication factor that still need copies in some
//!   active domains.

mod error;
mod store;

pub use error::MetaError;
pub use store::{DegradedWriteRecord, MetaStore};
