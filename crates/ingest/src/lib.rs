//! Batch ingest and enrichment contracts (C7, §4.7): chunk → validate →
//! embed → idempotent upsert, layered on top of `contextframe-store`'s
//! `Dataset`.

pub mod dedup;
pub mod hooks;
pub mod ingest;

pub use dedup::content_hash;
pub use hooks::{ChunkHook, EmbedError, EmbedHook, NoopChunker};
pub use ingest::{IngestError, IngestReport, ingest};
