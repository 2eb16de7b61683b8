//! # docvault
//!
//! Hash-based document tracking. Every file is identified by the SHA-256 of
//! its bytes, so renames and moves cost a metadata update instead of a
//! re-extraction and re-embedding.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌────────────────┐
//! │ scan +     │──▶│  Reconciler  │──▶│ Metadata Store │  vault.sqlite
//! │ hasher     │   │ classify+run │   └────────────────┘
//! └────────────┘   └──────┬───────┘            ▲
//!                         ▼                    │ resolve paths
//!                  ┌─────────────┐      ┌──────┴──────┐
//!                  │  Extractor  │─────▶│ Vector Index │  index.sqlite
//!                  └─────────────┘      └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docvault init
//! docvault sync ~/Documents
//! docvault search "quarterly budget"
//! docvault delete --path ~/Documents/old.pdf
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite pools |
//! | [`migrate`] | Schema migrations for both databases |
//! | [`metadata_store`] | SQLite Metadata Store |
//! | [`vector_index`] | SQLite FTS5 + embedding vector index |
//! | [`embedding`] | OpenAI, Ollama and local embedding providers |
//! | [`extract`] | Built-in text extraction |
//! | [`scan`] | Filesystem discovery |
//! | [`hasher`] | Parallel fingerprinting |
//! | [`reconciler`] | Sync/index/delete runner |
//! | [`progress`] | Progress reporting on stderr |
//!
//! The pure logic (fingerprints, classification, store and gateway
//! traits, search composition) lives in the `docvault-core` crate.

pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod hasher;
pub mod metadata_store;
pub mod migrate;
pub mod progress;
pub mod reconciler;
pub mod scan;
pub mod search;
pub mod status;
pub mod sync_cmd;
pub mod vault;
pub mod vector_index;
