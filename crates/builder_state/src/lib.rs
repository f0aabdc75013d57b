//! Action-dispatch state engine for the page builder document.
//!
//! [`StateManager`] owns the canonical [`DocumentState`] and runs every action through the
//! middleware chain, [`reduce_document`], the inverse-action history, and subscriber
//! notification. Persistence is driven by the composition root through [`AutosaveDriver`] and a
//! [`builder_host::DocumentStore`].

pub mod actions;
pub mod autosave;
pub mod config;
pub mod events;
pub mod helpers;
pub mod history;
pub mod ids;
pub mod ingest;
pub mod manager;
pub mod middleware;
pub mod model;
pub mod normalize;
pub mod patch;
pub mod persistence;
pub mod reducer;

pub use actions::{
    is_valid_action_type, Action, ActionDecodeError, ActionGroup, ActionKind, ActionMeta,
    BuilderAction, ComponentDraft, MoveTarget, SectionDraft, UnknownActionType,
};
pub use autosave::{AutosaveDriver, PendingSave};
pub use config::StoreConfig;
pub use events::{DeferredDispatch, StateChangeEvent, SubscriptionId};
pub use history::{HistoryEntry, HistoryManager, HistoryState};
pub use ingest::{ingest_source, IngestError, IngestedDocument, SourceFormat};
pub use manager::{DispatchOutcome, StateManager};
pub use middleware::{
    default_chain, middleware_fn, LoggingMiddleware, Middleware, MiddlewareContext,
    MiddlewareOutcome, PersistenceMiddleware, ValidationMiddleware,
};
pub use model::*;
pub use normalize::{normalize_document, normalize_loaded_document, RepairReport};
pub use patch::{ComponentPatch, FieldChange, FieldPatch, SectionPatch};
pub use persistence::{
    load_document_with, save_document_with, storage_key_for, LoadedDocument, PersistenceError,
    SaveRequest, SaveTarget, DRAFT_STORAGE_KEY, LEGACY_STORAGE_KEY,
};
pub use reducer::{reduce_document, ReduceContext, ReducerError, StoreEffect};
