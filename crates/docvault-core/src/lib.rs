//! # docvault core
//!
//! I/O-free logic for docvault: content fingerprints, the record model,
//! the pure reconciliation classifier, the metadata-store and gateway
//! abstractions, and the search composition that resolves index hits back
//! to current paths.
//!
//! This crate contains no tokio, sqlx, or filesystem walking. The
//! application crate supplies the SQLite store, the vector index backend,
//! the extractor, and the runner that drives a sync.
//!
//! ```text
//! filesystem ─▶ fingerprint ─▶ reconcile::classify ─▶ SyncPlan
//!                                                        │
//!                  ┌─────────────────────────────────────┤
//!                  ▼                                     ▼
//!           MetadataStore                     Extractor ─▶ VectorIndex
//!                  ▲                                     │
//!                  └──────────── search::Searcher ◀──────┘
//! ```

pub mod chunk;
pub mod embedding;
pub mod fingerprint;
pub mod gateway;
pub mod models;
pub mod reconcile;
pub mod search;
pub mod store;

pub use models::{DocumentRecord, ExtractionState, Fingerprint, IndexedState, ObservedFile};
