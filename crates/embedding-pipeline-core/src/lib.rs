//! # Embedding Pipeline Core
//!
//! Pure, I/O-free logic for the embedding pipeline: data models, partition
//! prefixes, log parsing, consent filtering, per-service text extraction,
//! token-window chunking, and run statistics.
//!
//! This crate contains no tokio, HTTP, or object-store dependencies. The
//! `embedding-pipeline` app crate wires these pieces to real storage and
//! embedding backends.

pub mod chunk;
pub mod consent;
pub mod extract;
pub mod models;
pub mod parse;
pub mod partition;
pub mod stats;
pub mod tokenize;
