//! Test database manager
//!
//! Provides isolated `Store` instances backed by a temporary SQLite file, so
//! journeys never touch the developer's real database and every test starts
//! from a clean schema.

use longmem_core::embeddings::{Embedder, EmbeddingError};
use longmem_core::Store;

/// Deterministic stand-in for the real fastembed/ONNX embedder: hashes text
/// bytes into a fixed-width vector so equal/similar strings land near each
/// other in embedding space without pulling in model weights for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct FakeEmbedder;

impl Embedder for FakeEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("empty text".into()));
        }
        let mut v = vec![0.0_f32; 32];
        for (i, b) in text.to_lowercase().bytes().enumerate() {
            v[i % 32] += b as f32;
        }
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        32
    }
}

/// Open a `Store` at a fresh temp-directory database file, wired to
/// [`FakeEmbedder`]. The returned `TempDir` must be kept alive for the
/// duration of the test - dropping it deletes the backing file.
pub fn test_store() -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("journey.db");
    let store = Store::open(Some(path), Box::new(FakeEmbedder)).expect("open store");
    (store, dir)
}
