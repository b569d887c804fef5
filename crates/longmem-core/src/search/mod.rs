//! Search primitives: keyword tokenisation, vector indexing and RRF fusion.
//!
//! The Retriever (see `crate::retriever`) is the only consumer of this
//! module; everything here is a pure, storage-agnostic building block.

mod hybrid;
mod keyword;
mod vector;

pub use hybrid::{normalize_rrf, reciprocal_rank_fusion, DEFAULT_RRF_K};
pub use keyword::build_fts_query;
pub use vector::{VectorIndex, VectorIndexConfig, VectorSearchError};
