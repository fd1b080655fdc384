//! labelgridd — assembly of the LabelGrid pipeline.
//!
//! The binary in `main.rs` parses flags and configuration; this library
//! part wires the components together so the same assembly can be driven
//! from integration tests.

pub mod pipeline;

pub use pipeline::{Pipeline, PurgeReport, purge};
