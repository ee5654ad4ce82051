//! # ragbase
//!
//! Document ingestion and similarity retrieval over Postgres/pgvector.
//!
//! ragbase splits documents into overlapping chunks, embeds each chunk
//! through an Ollama endpoint, stores the vectors with bounded concurrency
//! and per-chunk retry, and serves ranked approximate-nearest-neighbor
//! queries — optionally synthesizing an answer from the retrieved context.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────┐   ┌───────────────┐
//! │  Loader  │──▶│ Ingestion Coordinator │──▶│   Postgres    │
//! │ pdf/docx │   │ split → embed → store │   │   pgvector    │
//! └──────────┘   └──────────────────────┘   └──────┬────────┘
//!                                                  │
//!                          ┌───────────────────────┤
//!                          ▼                       ▼
//!                   ┌────────────┐          ┌────────────┐
//!                   │ Retrieval  │─────────▶│   Answer   │
//!                   │  (query)   │          │   (ask)    │
//!                   └────────────┘          └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Pipeline error taxonomy and retry classification |
//! | [`models`] | Records, metadata, reports |
//! | [`splitter`] | Overlapping-window text splitting |
//! | [`dedup`] | Content fingerprinting and the dedup gate |
//! | [`store`] | Vector store seam and the pgvector backend |
//! | [`store_memory`] | In-memory store for tests and offline runs |
//! | [`retry`] | Bounded retry with exponential backoff |
//! | [`embedding`] | Embedder seam and the Ollama client |
//! | [`generation`] | Generator seam and the Ollama client |
//! | [`loader`] | Extension-dispatched document loading |
//! | [`ingest`] | Batched, retrying ingestion coordinator |
//! | [`retrieval`] | Similarity search with threshold filtering |
//! | [`answer`] | Context-grounded answer synthesis |
//! | [`db`] | Connection pool lifecycle |

pub mod answer;
pub mod config;
pub mod db;
pub mod dedup;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod loader;
pub mod models;
pub mod retrieval;
pub mod retry;
pub mod splitter;
pub mod store;
pub mod store_memory;
