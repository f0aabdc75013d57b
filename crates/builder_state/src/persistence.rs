//! Storage keys and save/load adapters over [`builder_host::DocumentStore`].

use builder_host::{
    build_document_envelope, load_stored_document_with, save_envelope_with, DocumentStore,
    StoredDocument,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    ingest::{ingest_source, IngestError},
    model::{DocumentSnapshot, DOCUMENT_SCHEMA_VERSION},
    normalize::RepairReport,
};

/// Unscoped key written by older clients; migrated into [`DRAFT_STORAGE_KEY`] on load.
pub const LEGACY_STORAGE_KEY: &str = "mediakit.state";
pub const DRAFT_STORAGE_KEY: &str = "mediakit.state.draft";
const DOCUMENT_KEY_PREFIX: &str = "mediakit.state.doc.";

/// Storage key for a document: identity-scoped when it has one, the draft key otherwise.
pub fn storage_key_for(document_id: Option<&str>) -> String {
    match document_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => format!("{DOCUMENT_KEY_PREFIX}{id}"),
        None => DRAFT_STORAGE_KEY.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveTarget {
    /// Local storage is the primary copy.
    Draft,
    /// The host autosave owns the document; local storage keeps a recovery copy only.
    EmergencyBackup { document_id: String },
}

impl SaveTarget {
    pub fn key(&self) -> String {
        match self {
            Self::Draft => storage_key_for(None),
            Self::EmergencyBackup { document_id } => storage_key_for(Some(document_id)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    pub target: SaveTarget,
    pub delay_ms: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("document store failed: {0}")]
    Store(String),
    #[error("document could not be serialized: {0}")]
    Serialize(String),
    #[error("stored document is unusable: {0}")]
    Malformed(#[from] IngestError),
    #[error("stored schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: u32, supported: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDocument {
    pub document: DocumentSnapshot,
    pub report: RepairReport,
    /// Key the document was read from.
    pub key: String,
    pub migrated_from_legacy: bool,
}

fn migrate_document_payload(schema_version: u32, payload: Value) -> Result<Value, PersistenceError> {
    match schema_version {
        0 | DOCUMENT_SCHEMA_VERSION => Ok(payload),
        found => Err(PersistenceError::UnsupportedSchema {
            found,
            supported: DOCUMENT_SCHEMA_VERSION,
        }),
    }
}

fn stored_payload(stored: StoredDocument) -> Result<Value, PersistenceError> {
    match stored {
        StoredDocument::Envelope(envelope) => {
            migrate_document_payload(envelope.schema_version, envelope.payload)
        }
        StoredDocument::Raw(value) => Ok(value),
    }
}

/// Writes `document` under `key` in a versioned envelope.
///
/// # Errors
///
/// Returns [`PersistenceError`] when serialization or the store fails.
pub async fn save_document_with(
    store: &dyn DocumentStore,
    key: &str,
    document: &DocumentSnapshot,
) -> Result<(), PersistenceError> {
    let envelope = build_document_envelope(key, DOCUMENT_SCHEMA_VERSION, document)
        .map_err(PersistenceError::Serialize)?;
    save_envelope_with(store, &envelope)
        .await
        .map_err(PersistenceError::Store)
}

/// Loads and repairs the document for `document_id`.
///
/// Drafts fall back to [`LEGACY_STORAGE_KEY`]; a legacy hit is rewritten under the draft key and
/// the legacy entry deleted.
///
/// # Errors
///
/// Returns [`PersistenceError`] when the store fails or the stored value is unusable.
pub async fn load_document_with(
    store: &dyn DocumentStore,
    document_id: Option<&str>,
    now: u64,
) -> Result<Option<LoadedDocument>, PersistenceError> {
    let key = storage_key_for(document_id);
    if let Some(stored) = load_stored_document_with(store, &key)
        .await
        .map_err(PersistenceError::Store)?
    {
        let ingested = ingest_source(&stored_payload(stored)?, now)?;
        return Ok(Some(LoadedDocument {
            document: ingested.document,
            report: ingested.report,
            key,
            migrated_from_legacy: false,
        }));
    }
    if key != DRAFT_STORAGE_KEY {
        return Ok(None);
    }

    let Some(stored) = load_stored_document_with(store, LEGACY_STORAGE_KEY)
        .await
        .map_err(PersistenceError::Store)?
    else {
        return Ok(None);
    };
    let ingested = ingest_source(&stored_payload(stored)?, now)?;
    save_document_with(store, DRAFT_STORAGE_KEY, &ingested.document).await?;
    if let Err(err) = store.delete(LEGACY_STORAGE_KEY).await {
        warn!(error = %err, "legacy document migrated but the legacy key could not be removed");
    }
    info!(
        from = LEGACY_STORAGE_KEY,
        to = DRAFT_STORAGE_KEY,
        components = ingested.document.components.len(),
        "migrated legacy document"
    );
    Ok(Some(LoadedDocument {
        document: ingested.document,
        report: ingested.report,
        key,
        migrated_from_legacy: true,
    }))
}
