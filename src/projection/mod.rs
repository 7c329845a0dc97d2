//! Schema-driven field projection and structural diffing.
//!
//! Both recorded and observed exchanges go through the same [`Schema`]
//! before they are persisted or compared, so fields the schema leaves out
//! (timestamps, ephemeral ports) never cause a mismatch.

pub mod diff;
pub mod schema;

pub use diff::{diff, Diff, DiffNode};
pub use schema::Schema;
