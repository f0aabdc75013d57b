//! Host-boundary contracts for the builder state engine.
//!
//! The state engine never talks to browser storage or the host clock directly. It goes through
//! the [`DocumentStore`] service trait and the time helpers exported here, so the engine stays
//! testable off-target while `wasm32` builds get a `localStorage` adapter.

#![warn(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod storage;
pub mod time;

#[cfg(target_arch = "wasm32")]
pub use storage::local::LocalStorageDocumentStore;
pub use storage::document::{
    build_document_envelope, load_stored_document_with, save_envelope_with, DocumentEnvelope,
    DocumentStore, DocumentStoreFuture, MemoryDocumentStore, NoopDocumentStore, StoredDocument,
    DOCUMENT_ENVELOPE_VERSION,
};
pub use time::{next_monotonic_timestamp_ms, next_sequence, unix_time_ms_now};
