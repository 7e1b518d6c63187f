//! Tehom state file format library
//!
//! Durable, versioned storage for certification progress, certified spans
//! and per-sensor coverage sets.

pub mod error;
pub mod format;
pub mod reader;
pub mod writer;

pub use error::StateError;
pub use format::{
    CoverageRecord, ProgressRecord, RangeRecord, SpanRecord, StateFile, StateFormat, StatePayload,
    MAGIC, VERSION,
};
pub use reader::StateReader;
pub use writer::StateWriter;
