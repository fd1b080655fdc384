//! labelgrid-worker — stateless task processor.
//!
//! A [`Worker`] leases one task at a time from the task queue, fetches the
//! payload, runs it through a [`Classifier`], persists and publishes the
//! result, and only then acknowledges the task.

pub mod classifier;
pub mod error;
pub mod gallery;
pub mod worker;

pub use classifier::Classifier;
pub use error::{ClassifyError, WorkerError, WorkerResult};
pub use gallery::GalleryClassifier;
pub use worker::{Poll, Worker};
