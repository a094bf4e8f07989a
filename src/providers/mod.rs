//! External provider boundaries: embedding and generation.

pub mod embedding;
pub mod generation;

pub use embedding::{EmbedFuture, EmbeddingProvider, OllamaEmbeddingProvider};
pub use generation::{
    GenFuture, GenerationChunk, GenerationOutput, GenerationProvider, GenerationStream,
    OllamaGenerationProvider, SentimentEstimate,
};
