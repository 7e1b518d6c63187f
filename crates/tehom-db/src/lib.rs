//! Tehom Database Layer
//!
//! PostgreSQL storage for certification progress, certified spans,
//! coverage sets and the read-only vessel-tracking tables.
//!
//! Every operation takes a [`GenericClient`] so callers can run several of
//! them inside one transaction.
//!
//! [`GenericClient`]: tokio_postgres::GenericClient

pub mod connection;
pub mod models;
pub mod operations;

// Re-export commonly used types
pub use connection::{create_pool, ensure_schema, test_connection, DbPool, PoolSettings};
pub use models::{
    BoundingBox, CoverageRange, NewCertifiedSpan, NewProgress, ProgressEntry, SpanRow,
    VesselBlockRow, VesselRecordRow,
};
pub use operations::{
    delete_coverage, delete_progress, delete_spans, get_all_progress, get_coverage, get_coverage_keys,
    get_last_span, get_spans, get_vessel_blocks, get_vessel_records, insert_span,
    lock_coverage, replace_coverage, update_span_bounds, upsert_progress,
};
