//! Browser `localStorage` adapter for [`DocumentStore`].

use super::document::{DocumentStore, DocumentStoreFuture};

#[derive(Debug, Clone, Copy, Default)]
/// [`DocumentStore`] backed by `window.localStorage`.
///
/// Every call resolves immediately; the async signature only exists to satisfy the trait.
pub struct LocalStorageDocumentStore;

fn local_storage() -> Result<web_sys::Storage, String> {
    web_sys::window()
        .ok_or_else(|| "window unavailable".to_string())?
        .local_storage()
        .map_err(|_| "localStorage access denied".to_string())?
        .ok_or_else(|| "localStorage unavailable".to_string())
}

impl DocumentStore for LocalStorageDocumentStore {
    fn load_raw<'a>(
        &'a self,
        key: &'a str,
    ) -> DocumentStoreFuture<'a, Result<Option<String>, String>> {
        Box::pin(async move {
            local_storage()?
                .get_item(key)
                .map_err(|_| format!("localStorage read failed for `{key}`"))
        })
    }

    fn save_raw<'a>(
        &'a self,
        key: &'a str,
        raw_json: &'a str,
    ) -> DocumentStoreFuture<'a, Result<(), String>> {
        Box::pin(async move {
            local_storage()?
                .set_item(key, raw_json)
                .map_err(|_| format!("localStorage write failed for `{key}` (quota exceeded?)"))
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> DocumentStoreFuture<'a, Result<(), String>> {
        Box::pin(async move {
            local_storage()?
                .remove_item(key)
                .map_err(|_| format!("localStorage delete failed for `{key}`"))
        })
    }

    fn list_keys<'a>(&'a self) -> DocumentStoreFuture<'a, Result<Vec<String>, String>> {
        Box::pin(async move {
            let storage = local_storage()?;
            let len = storage
                .length()
                .map_err(|_| "localStorage length unavailable".to_string())?;
            let mut keys = Vec::with_capacity(len as usize);
            for index in 0..len {
                if let Ok(Some(key)) = storage.key(index) {
                    keys.push(key);
                }
            }
            keys.sort();
            Ok(keys)
        })
    }
}
