//! Orchestration: idempotent ingestion and versioned reconciliation runs.

pub mod ingest;
pub mod run;

pub use ingest::{IngestionError, IngestionResult, Ingestor};
pub use run::{Reconciler, RunError, RunReport};
