//! Debounced save driver owned by the composition root.
//!
//! The manager only emits [`StoreEffect::ScheduleSave`] intents. The driver turns them into a single
//! supersedable deadline and performs the save when the host's timer says it is due.

use builder_host::DocumentStore;
use tracing::{debug, warn};

use crate::{
    manager::StateManager,
    persistence::{PersistenceError, SaveRequest, SaveTarget},
    reducer::StoreEffect,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSave {
    pub target: SaveTarget,
    pub due_at: u64,
    /// Incremented on every reschedule; a host timer holding an older generation is stale.
    pub generation: u64,
}

#[derive(Debug, Default)]
pub struct AutosaveDriver {
    pending: Option<PendingSave>,
    generation: u64,
}

impl AutosaveDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any pending save with `request`, due `request.delay_ms` after `now`.
    pub fn schedule(&mut self, request: SaveRequest, now: u64) -> &PendingSave {
        self.generation += 1;
        self.pending.insert(PendingSave {
            target: request.target,
            due_at: now.saturating_add(request.delay_ms),
            generation: self.generation,
        })
    }

    /// Consumes save intents from `effects` and returns the rest in order.
    pub fn absorb_effects(
        &mut self,
        effects: impl IntoIterator<Item = StoreEffect>,
        now: u64,
    ) -> Vec<StoreEffect> {
        let mut remaining = Vec::new();
        for effect in effects {
            match effect {
                StoreEffect::ScheduleSave(request) => {
                    self.schedule(request, now);
                }
                other => remaining.push(other),
            }
        }
        remaining
    }

    /// Drains the manager's effect outbox; see [`Self::absorb_effects`].
    pub fn pump(&mut self, manager: &mut StateManager, now: u64) -> Vec<StoreEffect> {
        self.absorb_effects(manager.take_effects(), now)
    }

    pub fn pending(&self) -> Option<&PendingSave> {
        self.pending.as_ref()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.pending.as_ref().map(|pending| pending.due_at)
    }

    pub fn is_due(&self, now: u64) -> bool {
        self.next_deadline().is_some_and(|due_at| now >= due_at)
    }

    /// Drops the pending save. Returns `false` when nothing was pending.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Saves if the pending deadline has passed. Returns `Ok(true)` when a save ran.
    ///
    /// A failed save stays cleared; the next eligible action schedules a fresh attempt.
    ///
    /// # Errors
    ///
    /// Returns the [`PersistenceError`] from the store; the manager has already recorded it.
    pub async fn flush_due(
        &mut self,
        manager: &mut StateManager,
        store: &dyn DocumentStore,
        now: u64,
    ) -> Result<bool, PersistenceError> {
        if !self.is_due(now) {
            return Ok(false);
        }
        self.flush_now(manager, store).await
    }

    /// Saves the pending target immediately, e.g. when the page is being hidden.
    ///
    /// # Errors
    ///
    /// See [`Self::flush_due`].
    pub async fn flush_now(
        &mut self,
        manager: &mut StateManager,
        store: &dyn DocumentStore,
    ) -> Result<bool, PersistenceError> {
        let Some(pending) = self.pending.take() else {
            return Ok(false);
        };
        let key = pending.target.key();
        debug!(key = %key, generation = pending.generation, "running scheduled save");
        match manager.save_under_key(store, &key).await {
            Ok(()) => Ok(true),
            Err(err) => {
                warn!(key = %key, error = %err, "scheduled save failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use builder_host::{DocumentStoreFuture, MemoryDocumentStore};
    use futures::executor::block_on;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        actions::ComponentDraft,
        config::StoreConfig,
        persistence::DRAFT_STORAGE_KEY,
    };

    struct FullStore;

    impl DocumentStore for FullStore {
        fn load_raw<'a>(&'a self, _key: &'a str) -> DocumentStoreFuture<'a, Result<Option<String>, String>> {
            Box::pin(async { Ok(None) })
        }

        fn save_raw<'a>(&'a self, _key: &'a str, _raw_json: &'a str) -> DocumentStoreFuture<'a, Result<(), String>> {
            Box::pin(async { Err("quota exceeded".to_string()) })
        }

        fn delete<'a>(&'a self, _key: &'a str) -> DocumentStoreFuture<'a, Result<(), String>> {
            Box::pin(async { Ok(()) })
        }

        fn list_keys<'a>(&'a self) -> DocumentStoreFuture<'a, Result<Vec<String>, String>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    fn request(delay_ms: u64) -> SaveRequest {
        SaveRequest {
            target: SaveTarget::Draft,
            delay_ms,
        }
    }

    #[test]
    fn rescheduling_supersedes_the_pending_deadline() {
        let mut driver = AutosaveDriver::new();
        assert_eq!(driver.schedule(request(100), 10).generation, 1);
        let pending = driver.schedule(request(100), 50).clone();
        assert_eq!(pending.due_at, 150);
        assert_eq!(pending.generation, 2);
        assert!(!driver.is_due(149));
        assert!(driver.is_due(150));
        assert!(driver.cancel());
        assert!(!driver.cancel());
        assert_eq!(driver.next_deadline(), None);
    }

    #[test]
    fn absorb_keeps_renderer_effects_in_order() {
        let mut driver = AutosaveDriver::new();
        let rest = driver.absorb_effects(
            vec![
                StoreEffect::ComponentAdded("a".into()),
                StoreEffect::ScheduleSave(request(5)),
                StoreEffect::ComponentRemoved("b".into()),
            ],
            1,
        );
        assert_eq!(
            rest,
            vec![
                StoreEffect::ComponentAdded("a".into()),
                StoreEffect::ComponentRemoved("b".into()),
            ]
        );
        assert_eq!(driver.next_deadline(), Some(6));
    }

    #[test]
    fn flush_due_saves_once_the_deadline_passes() {
        let store = MemoryDocumentStore::default();
        let mut manager = StateManager::with_clock(StoreConfig::default(), || 500);
        let mut driver = AutosaveDriver::new();

        manager.add_component(ComponentDraft::new("hero-1", "hero"));
        driver.pump(&mut manager, 500);
        let due_at = driver.next_deadline().expect("scheduled");

        assert_eq!(block_on(driver.flush_due(&mut manager, &store, due_at - 1)), Ok(false));
        assert!(!store.contains_key(DRAFT_STORAGE_KEY));
        assert_eq!(block_on(driver.flush_due(&mut manager, &store, due_at)), Ok(true));
        assert!(store.contains_key(DRAFT_STORAGE_KEY));
        assert_eq!(driver.pending(), None);
        assert_eq!(manager.state().ui.last_saved, Some(500));

        driver.pump(&mut manager, 600);
        assert_eq!(driver.pending(), None);
    }

    #[test]
    fn failed_saves_are_recorded_and_editing_continues() {
        let mut manager = StateManager::with_clock(StoreConfig::default(), || 7);
        let mut driver = AutosaveDriver::new();
        manager.add_component(ComponentDraft::new("hero-1", "hero"));
        driver.pump(&mut manager, 7);

        assert_eq!(
            block_on(driver.flush_now(&mut manager, &FullStore)),
            Err(PersistenceError::Store("quota exceeded".to_string()))
        );
        assert!(!manager.state().ui.is_saving);
        assert_eq!(
            manager.state().errors.last().map(|error| error.error_type.as_str()),
            Some("SAVE_ERROR")
        );
        assert!(manager.add_component(ComponentDraft::new("bio-1", "biography")).is_committed());
    }
}
