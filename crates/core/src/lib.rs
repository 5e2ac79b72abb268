//! Core library: loading, cleaning, chunking, embeddings, retrieval and
//! answer generation.

pub mod chunker;
pub mod cleaner;
pub mod config;
pub mod embeddings;
pub mod llm;
pub mod loader;
pub mod pipeline;
pub mod scanner;
pub mod vectorstore;
