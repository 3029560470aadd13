//! Shared data model for Loam sensor measurements.
//!
//! This crate defines the types that move between the storage backends and
//! the HTTP service: normalized measurement records, the tabular shape that
//! query results take, and the compact time-range grammar used on every
//! read path.
//!
//! A [`Record`] is one measurement from one client: a timestamp plus a flat
//! map of numeric fields. The field set is open; clients may introduce new
//! field names at any time, and tables widen to the union of everything
//! seen.

pub mod range;
pub mod record;
pub mod table;

pub use range::parse_range;
pub use record::{Record, RecordError, flatten};
pub use table::{SampleRow, SampleTable, TableBuilder};
