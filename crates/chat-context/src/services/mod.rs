//! Collaborator contracts consumed by context items and managers.
//!
//! The host application owns resources, spaces, tabs and storage. This crate
//! only sees them through the narrow traits below, bundled into a
//! [`ContextServices`] handle that every item and manager shares.
//!
//! Async methods return a boxed [`StoreFuture`] so the traits stay
//! dyn-compatible and can be held as `Arc<dyn ...>`:
//!
//! ```ignore
//! impl SpaceStore for MySpaces {
//!     fn get_space<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Space>> {
//!         Box::pin(async move { self.db.space(id).await })
//!     }
//!     // ...
//! }
//! ```
//!
//! | Backend | Trait |
//! |---------|-------|
//! | [`memory::MemoryResourceStore`] | [`ResourceStore`] |
//! | [`memory::MemorySpaceStore`] | [`SpaceStore`] |
//! | [`memory::MemoryTabRegistry`] | [`TabRegistry`] |
//! | [`memory::MemoryBrowserTab`] | [`BrowserTab`] |
//! | [`memory::MemoryKeyValueStore`] | [`KeyValueStore`] |
//! | [`storage::JsonFileStore`] | [`KeyValueStore`] |
//! | [`memory::ScriptedAssistant`] | [`Assistant`] |
//! | [`memory::MemoryWikipedia`] | [`WikipediaSource`] |

pub mod memory;
pub mod storage;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ContextConfig;
use crate::telemetry::{ContextTelemetry, NoopTelemetry};
use crate::{
    ChatPrompt, ContextError, ImageData, NewResourceLink, Resource, ResourceQuery, Result, Space,
    SpaceEntry, Tab,
};

/// Boxed future returned by collaborator methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ── Resources & spaces ─────────────────────────────────────────────

pub trait ResourceStore: Send + Sync {
    fn get_resource<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Resource>>;

    /// Raw bytes of a resource, for image resources.
    fn get_resource_data<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<ImageData>>;

    /// Extracted text content, used for prompt suggestions. `None` while the
    /// resource has nothing extracted.
    fn get_resource_content<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<String>>;

    fn create_resource_link(&self, link: NewResourceLink) -> StoreFuture<'_, Result<Resource>>;

    fn delete_resources<'a>(&'a self, ids: &'a [String]) -> StoreFuture<'a, Result<()>>;

    fn list_resource_ids<'a>(&'a self, query: &'a ResourceQuery) -> StoreFuture<'a, Vec<String>>;
}

pub trait SpaceStore: Send + Sync {
    fn get_space<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Space>>;

    /// Entries of a space in display order, blacklisted ones included.
    fn space_contents<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Vec<SpaceEntry>>;
}

// ── Tabs ───────────────────────────────────────────────────────────

/// Result of app/content detection on a live tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedApp {
    pub app_id: String,
    pub app_name: Option<String>,
}

/// Options for [`BrowserTab::create_resource_for_chat`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatResourceOptions {
    /// Load the page in a separate webview instead of reusing the tab's.
    pub fresh_webview: bool,
}

/// Live handle to a loaded tab. Only exists for activated tabs.
pub trait BrowserTab: Send + Sync {
    /// Wait until the tab's content has been classified, or `timeout` passes.
    fn wait_for_app_detection(&self, timeout: Duration) -> StoreFuture<'_, Option<DetectedApp>>;

    /// Materialise the current page as a resource tagged for chat use.
    fn create_resource_for_chat(
        &self,
        options: ChatResourceOptions,
    ) -> StoreFuture<'_, Option<Resource>>;

    fn capture_page(&self) -> StoreFuture<'_, Option<ImageData>>;
}

/// The browser's tab list, activation state and chat selection.
pub trait TabRegistry: Send + Sync {
    fn tabs(&self) -> Vec<Tab>;

    fn tab(&self, id: &str) -> Option<Tab> {
        self.tabs().into_iter().find(|t| t.id == id)
    }

    fn active_tab(&self) -> Option<Tab>;

    /// Space the user is currently working in.
    fn active_scope_id(&self) -> Option<String>;

    fn is_activated(&self, id: &str) -> bool;

    /// Activate a tab. Activation starts before this returns; the future
    /// resolves once the tab reports it is ready to be driven. Callers bound
    /// the wait themselves and may drop the future early.
    fn activate_tab<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()>;

    fn browser_tab(&self, id: &str) -> Option<Arc<dyn BrowserTab>>;

    fn add_tab_to_selection(&self, id: &str);
    fn remove_tab_from_selection(&self, id: &str);
    fn clear_tab_selection(&self);
}

// ── Storage ────────────────────────────────────────────────────────

/// String key-value storage for persisted attachment sets.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;
}

// ── Assistant ──────────────────────────────────────────────────────

/// Page data handed to the assistant for prompt suggestions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSource {
    pub title: String,
    pub url: String,
    pub content: String,
}

pub trait Assistant: Send + Sync {
    /// Whether the selected model can answer in strict JSON.
    fn supports_json_format(&self) -> bool;

    fn generate_prompts(&self, source: PromptSource) -> StoreFuture<'_, Result<Vec<ChatPrompt>>>;

    /// Single-shot completion of `prompt` under `system`.
    fn complete<'a>(&'a self, prompt: &'a str, system: &'a str) -> StoreFuture<'a, Result<String>>;
}

/// Used when the host has no model wired up.
pub struct NoAssistant;

impl Assistant for NoAssistant {
    fn supports_json_format(&self) -> bool {
        false
    }

    fn generate_prompts(&self, _source: PromptSource) -> StoreFuture<'_, Result<Vec<ChatPrompt>>> {
        Box::pin(async { Err(ContextError::Assistant("no assistant configured".into())) })
    }

    fn complete<'a>(
        &'a self,
        _prompt: &'a str,
        _system: &'a str,
    ) -> StoreFuture<'a, Result<String>> {
        Box::pin(async { Err(ContextError::Assistant("no assistant configured".into())) })
    }
}

// ── Wikipedia ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikipediaPage {
    pub id: u64,
    pub title: String,
    pub url: String,
    /// Rendered article HTML.
    pub content: String,
}

pub trait WikipediaSource: Send + Sync {
    /// Best match for `title` in the `lang` edition.
    fn first_page<'a>(&'a self, title: &'a str, lang: &'a str)
    -> StoreFuture<'a, Option<WikipediaPage>>;
}

// ── ContextServices ────────────────────────────────────────────────

/// Everything items and managers need from the host, cheaply cloneable.
#[derive(Clone)]
pub struct ContextServices {
    pub resources: Arc<dyn ResourceStore>,
    pub spaces: Arc<dyn SpaceStore>,
    pub tabs: Arc<dyn TabRegistry>,
    pub storage: Arc<dyn KeyValueStore>,
    pub assistant: Arc<dyn Assistant>,
    pub wikipedia: Option<Arc<dyn WikipediaSource>>,
    pub telemetry: Arc<dyn ContextTelemetry>,
    pub config: ContextConfig,
}

impl ContextServices {
    pub fn new(
        resources: Arc<dyn ResourceStore>,
        spaces: Arc<dyn SpaceStore>,
        tabs: Arc<dyn TabRegistry>,
        storage: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            resources,
            spaces,
            tabs,
            storage,
            assistant: Arc::new(NoAssistant),
            wikipedia: None,
            telemetry: Arc::new(NoopTelemetry),
            config: ContextConfig::default(),
        }
    }

    pub fn with_assistant(mut self, assistant: Arc<dyn Assistant>) -> Self {
        self.assistant = assistant;
        self
    }

    pub fn with_wikipedia(mut self, wikipedia: Arc<dyn WikipediaSource>) -> Self {
        self.wikipedia = Some(wikipedia);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn ContextTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_config(mut self, config: ContextConfig) -> Self {
        self.config = config;
        self
    }
}

impl std::fmt::Debug for ContextServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextServices")
            .field("wikipedia", &self.wikipedia.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
