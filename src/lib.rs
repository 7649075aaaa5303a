//! # rca-ingest
//!
//! Loads root-cause-analysis documents from an S3 bucket into a Qdrant
//! collection for similarity search.
//!
//! Every object under a prefix is downloaded to a scoped local file, decoded
//! to text, split into overlapping windows, embedded and upserted. Chunk IDs
//! are derived from `(object key, chunk index)` only, so re-running over
//! unchanged objects overwrites the same points instead of adding new ones.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────┐   ┌──────────────┐   ┌────────────┐
//! │ S3 listing │──▶│  Stage   │──▶│ Decode+Chunk │──▶│   Upsert   │
//! │ (paged)    │   │ (tmpfile)│   │ (txt/pdf/xml)│   │ embed+write│
//! └────────────┘   └──────────┘   └──────────────┘   └─────┬──────┘
//!                                                          ▼
//!                                                   ┌────────────┐
//!                                                   │   Qdrant   │
//!                                                   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rca-ingest --bucket rca-docs --prefix rcas/
//! rca-ingest --bucket rca-docs --prefix rcas/ --dry-run
//! rca-ingest --bucket rca-docs --config ./rca-ingest.toml --workers 4
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and defaults |
//! | [`models`] | Core data types |
//! | [`connector_s3`] | S3 listing and download |
//! | [`stage`] | Scoped local files |
//! | [`extract`] | Text extraction by file type |
//! | [`chunk`] | Text windows and deterministic chunk IDs |
//! | [`embedding`] | Embedding providers |
//! | [`qdrant`] | Vector index client |
//! | [`bootstrap`] | Collection creation and validation |
//! | [`upsert`] | Chunk writer with dry-run mode |
//! | [`ingest`] | Run orchestration and reporting |
//! | [`retry`] | Backoff for transient transport errors |
//! | [`error`] | Typed errors |
//! | [`memory`] | In-memory store, index and embedder |

pub mod bootstrap;
pub mod chunk;
pub mod config;
pub mod connector_s3;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod memory;
pub mod models;
pub mod qdrant;
pub mod retry;
pub mod stage;
pub mod upsert;
