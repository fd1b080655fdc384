//! labelgrid-state — embedded broker for LabelGrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides the two external
//! collaborators the pipeline needs on a single host: named blob buckets
//! and named message queues with visibility-timeout leasing.
//!
//! # Architecture
//!
//! Blobs are stored raw under `{bucket}/{key}`. Queue messages are
//! JSON-serialized under `{queue}:{seq}` with a zero-padded per-queue
//! sequence number, so a prefix scan returns them in enqueue order.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and hands out [`Bucket`] and [`Queue`] handles that implement the
//! `labelgrid_core` collaborator traits.

pub mod error;
pub mod handles;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use handles::{Bucket, Queue};
pub use store::{QueueStats, StateStore};
