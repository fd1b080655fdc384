//! Classification seam.

use labelgrid_core::BoxFuture;

use crate::error::ClassifyError;

/// Maps a payload to a label.
///
/// Takes the payload by value so implementations can move it onto the
/// blocking pool; the worker's copy is gone once this returns.
pub trait Classifier: Send + Sync {
    fn classify(&self, payload: Vec<u8>) -> BoxFuture<'_, Result<String, ClassifyError>>;
}
