//! Stream annotator.
//!
//! Writes to the result store travel through replication like any other
//! change. [`ConsistencyCheckFilter`] recognizes them, routes them to the
//! shard of the checked database and normalizes their time zone;
//! [`CheckApplier`] answers them on the target.

mod applier;
mod event;
mod filter;

pub use applier::CheckApplier;
pub use event::{
    ChangeEvent, CheckAnnotation, CheckWrite, ColumnSpec, EventFragment, RowAction,
    CHECK_METADATA_KEY, DESCRIPTOR_METADATA_KEY, TIME_ZONE_KEY, UTC_OFFSET,
};
pub use filter::{ConsistencyCheckFilter, EventFilter};
