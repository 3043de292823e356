//! Text segmentation for providers with request size limits

pub mod chunker;

pub use chunker::{chunk_text, TextChunker};
