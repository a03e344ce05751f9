//! Convenience re-exports for common `chat-context` types.
//!
//! ```ignore
//! use chat_context::prelude::*;
//! ```
//!
//! Covers wiring services, building managers and attaching items. In-memory
//! backends and the stored-item helpers stay in their modules.

// ── Domain types ────────────────────────────────────────────────────
pub use crate::{
    ChatPrompt, ContextError, DEFAULT_CONTEXT_MANAGER_KEY, ImageData, Resource, ResourceQuery,
    ResourceTag, Result, Space, SpaceEntry, SpaceEntryOrigin, Tab, TabKind,
};

// ── Items ───────────────────────────────────────────────────────────
pub use crate::item::{ActiveSpaceInclude, ContextIcon, ContextItem, ContextItemType, ItemKind};

// ── Managers ────────────────────────────────────────────────────────
pub use crate::hub::{ContextHub, NoteContext};
pub use crate::manager::persist::{RestoreReport, StoredContextItem};
pub use crate::manager::{AddOptions, ContextManager, Mention};
pub use crate::prepare::prepare_page_tab;

// ── Services & config ───────────────────────────────────────────────
pub use crate::config::{ContextConfig, RestorePolicy, TabSelectionPolicy};
pub use crate::services::storage::JsonFileStore;
pub use crate::services::{
    Assistant, BrowserTab, ContextServices, KeyValueStore, ResourceStore, SpaceStore, StoreFuture,
    TabRegistry, WikipediaSource,
};
pub use crate::telemetry::{
    CompositeTelemetry, ContextTelemetry, ContextUpdateEvent, FnTelemetry, LoggingTelemetry,
    NoopTelemetry, UpdateAction, UpdateTrigger,
};
