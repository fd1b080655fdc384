//! labelgrid-core — shared vocabulary for the LabelGrid pipeline.
//!
//! Holds the domain types that travel over the task and result channels,
//! the collaborator traits every component is written against
//! ([`BlobStore`], [`MessageQueue`]), and the `labelgrid.toml` parser.

pub mod backend;
pub mod config;
pub mod error;
pub mod types;

pub use backend::{BlobStore, BoxFuture, MessageQueue, Receipt, ReceivedMessage};
pub use config::PipelineConfig;
pub use error::{BackendError, BackendResult, WireError};
pub use types::*;
