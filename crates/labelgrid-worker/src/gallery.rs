//! Gallery classifier — nearest reference image by byte histogram.
//!
//! Every reference file in the gallery directory is reduced to a 256-bin
//! byte histogram normalised by length. A payload gets the label (file
//! stem) of the reference whose histogram is closest in euclidean
//! distance. Ties go to the label that sorts first.

use std::path::Path;
use std::sync::Arc;

use labelgrid_core::BoxFuture;
use tracing::{debug, info, warn};

use crate::classifier::Classifier;
use crate::error::ClassifyError;

type Embedding = [f32; 256];

#[derive(Debug)]
struct Reference {
    label: String,
    embedding: Embedding,
}

/// Nearest-neighbour classifier over a fixed reference gallery.
#[derive(Clone, Debug)]
pub struct GalleryClassifier {
    gallery: Arc<Vec<Reference>>,
}

impl GalleryClassifier {
    /// Load every regular file in `dir` as a reference, labelled by stem.
    pub fn from_dir(dir: &Path) -> Result<Self, ClassifyError> {
        let io_err = |source| ClassifyError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut references = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if !path.is_file() {
                continue;
            }
            let Some(label) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let bytes = std::fs::read(&path).map_err(|source| ClassifyError::Io {
                path: path.clone(),
                source,
            })?;
            if bytes.is_empty() {
                warn!(path = %path.display(), "skipping empty reference image");
                continue;
            }
            references.push((label.to_string(), bytes));
        }

        let classifier = Self::from_references(references)?;
        info!(
            dir = %dir.display(),
            references = classifier.len(),
            "gallery loaded"
        );
        Ok(classifier)
    }

    /// Build from in-memory `(label, bytes)` pairs.
    pub fn from_references(
        references: impl IntoIterator<Item = (String, Vec<u8>)>,
    ) -> Result<Self, ClassifyError> {
        let mut gallery: Vec<Reference> = references
            .into_iter()
            .filter(|(_, bytes)| !bytes.is_empty())
            .map(|(label, bytes)| Reference {
                embedding: embed(&bytes),
                label,
            })
            .collect();
        if gallery.is_empty() {
            return Err(ClassifyError::EmptyGallery);
        }
        gallery.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(Self {
            gallery: Arc::new(gallery),
        })
    }

    pub fn len(&self) -> usize {
        self.gallery.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gallery.is_empty()
    }

    fn nearest(gallery: &[Reference], payload: &[u8]) -> Result<String, ClassifyError> {
        if payload.is_empty() {
            return Err(ClassifyError::EmptyPayload);
        }
        let probe = embed(payload);

        let mut best: Option<(&Reference, f32)> = None;
        for reference in gallery {
            let d = distance(&probe, &reference.embedding);
            if best.is_none_or(|(_, best_d)| d < best_d) {
                best = Some((reference, d));
            }
        }
        let (reference, d) = best.ok_or(ClassifyError::EmptyGallery)?;
        debug!(label = %reference.label, distance = d, "nearest reference");
        Ok(reference.label.clone())
    }
}

impl Classifier for GalleryClassifier {
    fn classify(&self, payload: Vec<u8>) -> BoxFuture<'_, Result<String, ClassifyError>> {
        let gallery = Arc::clone(&self.gallery);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || Self::nearest(&gallery, &payload))
                .await
                .map_err(|e| ClassifyError::Internal(e.to_string()))?
        })
    }
}

fn embed(bytes: &[u8]) -> Embedding {
    let mut histogram = [0f32; 256];
    for &b in bytes {
        histogram[b as usize] += 1.0;
    }
    let len = bytes.len() as f32;
    for bin in histogram.iter_mut() {
        *bin /= len;
    }
    histogram
}

fn distance(a: &Embedding, b: &Embedding) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
