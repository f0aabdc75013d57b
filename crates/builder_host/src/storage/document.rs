//! Keyed document storage contract, stored-envelope types, and helpers.

use std::{cell::RefCell, collections::HashMap, future::Future, pin::Pin, rc::Rc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version for [`DocumentEnvelope`] metadata serialization.
pub const DOCUMENT_ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Versioned envelope wrapping a persisted builder document.
pub struct DocumentEnvelope {
    /// Envelope schema version.
    pub envelope_version: u32,
    /// Storage key the envelope was written under.
    pub key: String,
    /// Engine-defined schema version for the payload.
    pub schema_version: u32,
    /// Last update time in unix milliseconds.
    pub updated_at_unix_ms: u64,
    /// Serialized document payload.
    pub payload: Value,
}

impl DocumentEnvelope {
    /// Creates a new envelope stamped with a monotonic timestamp.
    pub fn new(key: impl Into<String>, schema_version: u32, payload: Value) -> Self {
        Self {
            envelope_version: DOCUMENT_ENVELOPE_VERSION,
            key: key.into(),
            schema_version,
            updated_at_unix_ms: crate::time::next_monotonic_timestamp_ms(),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A value read back from a [`DocumentStore`].
pub enum StoredDocument {
    /// Value written by [`save_envelope_with`].
    Envelope(DocumentEnvelope),
    /// Bare JSON written by an older client that did not wrap documents.
    Raw(Value),
}

/// Object-safe boxed future used by [`DocumentStore`] async methods.
pub type DocumentStoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Host service persisting raw JSON documents by key.
pub trait DocumentStore {
    /// Loads the raw JSON text stored under `key`.
    fn load_raw<'a>(&'a self, key: &'a str)
        -> DocumentStoreFuture<'a, Result<Option<String>, String>>;

    /// Stores raw JSON text under `key`, replacing any previous value.
    fn save_raw<'a>(
        &'a self,
        key: &'a str,
        raw_json: &'a str,
    ) -> DocumentStoreFuture<'a, Result<(), String>>;

    /// Deletes the value stored under `key`.
    fn delete<'a>(&'a self, key: &'a str) -> DocumentStoreFuture<'a, Result<(), String>>;

    /// Lists keys currently present in the store.
    fn list_keys<'a>(&'a self) -> DocumentStoreFuture<'a, Result<Vec<String>, String>>;
}

#[derive(Debug, Clone, Copy, Default)]
/// No-op document store for unsupported targets and baseline tests.
pub struct NoopDocumentStore;

impl DocumentStore for NoopDocumentStore {
    fn load_raw<'a>(
        &'a self,
        _key: &'a str,
    ) -> DocumentStoreFuture<'a, Result<Option<String>, String>> {
        Box::pin(async { Ok(None) })
    }

    fn save_raw<'a>(
        &'a self,
        _key: &'a str,
        _raw_json: &'a str,
    ) -> DocumentStoreFuture<'a, Result<(), String>> {
        Box::pin(async { Ok(()) })
    }

    fn delete<'a>(&'a self, _key: &'a str) -> DocumentStoreFuture<'a, Result<(), String>> {
        Box::pin(async { Ok(()) })
    }

    fn list_keys<'a>(&'a self) -> DocumentStoreFuture<'a, Result<Vec<String>, String>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

#[derive(Debug, Clone, Default)]
/// In-memory document store keyed by string. Clones share the same backing map.
pub struct MemoryDocumentStore {
    inner: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryDocumentStore {
    /// Seeds a raw value directly, bypassing the async API.
    pub fn insert_raw(&self, key: impl Into<String>, raw_json: impl Into<String>) {
        self.inner.borrow_mut().insert(key.into(), raw_json.into());
    }

    /// Returns whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.borrow().contains_key(key)
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn load_raw<'a>(
        &'a self,
        key: &'a str,
    ) -> DocumentStoreFuture<'a, Result<Option<String>, String>> {
        Box::pin(async move { Ok(self.inner.borrow().get(key).cloned()) })
    }

    fn save_raw<'a>(
        &'a self,
        key: &'a str,
        raw_json: &'a str,
    ) -> DocumentStoreFuture<'a, Result<(), String>> {
        Box::pin(async move {
            self.inner
                .borrow_mut()
                .insert(key.to_string(), raw_json.to_string());
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> DocumentStoreFuture<'a, Result<(), String>> {
        Box::pin(async move {
            self.inner.borrow_mut().remove(key);
            Ok(())
        })
    }

    fn list_keys<'a>(&'a self) -> DocumentStoreFuture<'a, Result<Vec<String>, String>> {
        Box::pin(async move {
            let mut keys = self.inner.borrow().keys().cloned().collect::<Vec<_>>();
            keys.sort();
            Ok(keys)
        })
    }
}

/// Builds a versioned [`DocumentEnvelope`] from a serializable payload.
///
/// # Errors
///
/// Returns an error when `payload` cannot be converted to JSON.
pub fn build_document_envelope<T: Serialize>(
    key: &str,
    schema_version: u32,
    payload: &T,
) -> Result<DocumentEnvelope, String> {
    let payload = serde_json::to_value(payload).map_err(|e| e.to_string())?;
    Ok(DocumentEnvelope::new(key, schema_version, payload))
}

/// Serializes `envelope` and writes it under its own key.
///
/// # Errors
///
/// Returns an error when serialization or the underlying store fails.
pub async fn save_envelope_with(
    store: &dyn DocumentStore,
    envelope: &DocumentEnvelope,
) -> Result<(), String> {
    let raw = serde_json::to_string(envelope).map_err(|e| e.to_string())?;
    store.save_raw(&envelope.key, &raw).await
}

/// Loads the value under `key`, accepting both enveloped and bare legacy JSON.
///
/// # Errors
///
/// Returns an error when the store fails or the stored text is not valid JSON.
pub async fn load_stored_document_with(
    store: &dyn DocumentStore,
    key: &str,
) -> Result<Option<StoredDocument>, String> {
    let Some(raw) = store.load_raw(key).await? else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
    let is_envelope = value
        .as_object()
        .map(|object| object.contains_key("envelope_version") && object.contains_key("payload"))
        .unwrap_or(false);
    if is_envelope {
        let envelope = serde_json::from_value(value).map_err(|e| e.to_string())?;
        Ok(Some(StoredDocument::Envelope(envelope)))
    } else {
        Ok(Some(StoredDocument::Raw(value)))
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use serde_json::json;

    use super::*;

    #[test]
    fn envelope_serialization_shape_is_snake_case() {
        let envelope = DocumentEnvelope {
            envelope_version: DOCUMENT_ENVELOPE_VERSION,
            key: "doc.key".to_string(),
            schema_version: 3,
            updated_at_unix_ms: 99,
            payload: json!({"components": {}}),
        };

        let value = serde_json::to_value(&envelope).expect("serialize envelope");
        let object = value.as_object().expect("object");
        assert_eq!(object.get("envelope_version"), Some(&json!(1)));
        assert_eq!(object.get("key"), Some(&json!("doc.key")));
        assert_eq!(object.get("schema_version"), Some(&json!(3)));
        assert_eq!(object.get("updated_at_unix_ms"), Some(&json!(99)));
        assert!(!object.contains_key("updatedAtUnixMs"));
    }

    #[test]
    fn build_envelope_serializes_payload() {
        let envelope =
            build_document_envelope("doc.key", 2, &json!({"theme": "dark"})).expect("build");
        assert_eq!(envelope.key, "doc.key");
        assert_eq!(envelope.schema_version, 2);
        assert_eq!(envelope.payload, json!({"theme": "dark"}));
    }

    #[test]
    fn stored_document_distinguishes_envelopes_from_legacy_json() {
        let store = MemoryDocumentStore::default();
        let envelope = DocumentEnvelope::new("wrapped", 1, json!({"theme": "a"}));
        block_on(save_envelope_with(&store, &envelope)).expect("save envelope");
        store.insert_raw("bare", r#"{"theme":"b"}"#);

        let wrapped = block_on(load_stored_document_with(&store, "wrapped"))
            .expect("load")
            .expect("present");
        match wrapped {
            StoredDocument::Envelope(envelope) => {
                assert_eq!(envelope.key, "wrapped");
                assert_eq!(envelope.payload, json!({"theme": "a"}));
            }
            StoredDocument::Raw(_) => panic!("expected an envelope"),
        }

        let bare = block_on(load_stored_document_with(&store, "bare"))
            .expect("load")
            .expect("present");
        assert_eq!(bare, StoredDocument::Raw(json!({"theme": "b"})));
    }

    #[test]
    fn stored_document_rejects_malformed_json() {
        let store = MemoryDocumentStore::default();
        store.insert_raw("broken", "{not json");
        let err = block_on(load_stored_document_with(&store, "broken")).expect_err("bad json");
        assert!(!err.is_empty());
    }

    #[test]
    fn memory_store_round_trip_overwrite_delete_and_list() {
        let store = MemoryDocumentStore::default();
        let store_obj: &dyn DocumentStore = &store;

        block_on(store_obj.save_raw("b", "1")).expect("save b");
        block_on(store_obj.save_raw("a", "1")).expect("save a");
        block_on(store_obj.save_raw("a", "2")).expect("overwrite a");

        assert_eq!(
            block_on(store_obj.load_raw("a")).expect("load"),
            Some("2".to_string())
        );
        assert_eq!(
            block_on(store_obj.list_keys()).expect("list"),
            vec!["a".to_string(), "b".to_string()]
        );

        block_on(store_obj.delete("b")).expect("delete");
        assert_eq!(block_on(store_obj.load_raw("b")).expect("load"), None);
        assert!(!store.contains_key("b"));
    }

    #[test]
    fn noop_store_is_empty_and_successful() {
        let store = NoopDocumentStore;
        let store_obj: &dyn DocumentStore = &store;
        assert_eq!(block_on(store_obj.load_raw("k")).expect("load"), None);
        block_on(store_obj.save_raw("k", "{}")).expect("save");
        block_on(store_obj.delete("k")).expect("delete");
        assert!(block_on(store_obj.list_keys()).expect("list").is_empty());
    }
}
