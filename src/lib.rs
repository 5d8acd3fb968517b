//! # Embedding Pipeline
//!
//! A batch job that turns date-partitioned service logs into vector
//! embeddings for semantic search.
//!
//! Raw interaction logs live in an object store under
//! `raw/{service}/{yyyy}/{MM}/{dd}/`. For a date range, the pipeline reads
//! every object, keeps records from users who consented to AI training,
//! extracts the text worth embedding, splits it into overlapping token
//! windows, embeds the windows in rate-limited batches, and writes the
//! result to a vector database plus a gzipped JSON backup.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────┐   ┌───────────┐   ┌──────────────┐
//! │ Object store │──▶│ parse → consent →  │──▶│  Batcher  │──▶│ Vector store │
//! │ raw/{svc}/.. │   │ extract → chunk    │   │ (embedder)│   │ + backup     │
//! └──────────────┘   └────────────────────┘   └───────────┘   └──────────────┘
//! ```
//!
//! Pure logic (models, partitioning, parsing, extraction, chunking, stats)
//! lives in the `embedding-pipeline-core` crate. This crate adds the I/O
//! adapters, the orchestrator, and the `embedpipe` CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! embedpipe prefixes --start 2024-01-01 --end 2024-01-03
//! embedpipe run --start 2024-01-01 --end 2024-01-03
//! embedpipe last-days 7 --service journal-service --json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`object_store`] | Object-store trait, S3 and in-memory adapters, paginated listing |
//! | [`fetch`] | Object download with transparent gunzip |
//! | [`consent`] | Consent-eligible user sources |
//! | [`tokenizer`] | Tokenizer selection |
//! | [`embedding`] | Embedding provider abstraction (OpenAI, Ollama) |
//! | [`batcher`] | Batched, rate-limited embedding of chunks |
//! | [`vector_store`] | Vector database sinks (Qdrant, Weaviate) |
//! | [`backup`] | Gzipped JSON backup archive |
//! | [`pipeline`] | The orchestrator and run entry points |
//! | [`cancel`] | Cancellation token and run deadline |
//! | [`error`] | Run-level error type |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`report`] | Run summary output |

pub mod backup;
pub mod batcher;
pub mod cancel;
pub mod config;
pub mod consent;
pub mod embedding;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod object_store;
pub mod pipeline;
pub mod report;
pub mod tokenizer;
pub mod vector_store;
