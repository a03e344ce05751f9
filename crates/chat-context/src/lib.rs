//! Attachment layer for an AI chat embedded in a browser.
//!
//! `chat-context` tracks which artifacts a user attached to a conversation
//! (open tabs, saved resources, spaces, screenshots, and virtual scopes such
//! as "everything I saved" or "the tab I'm looking at") and flattens that
//! heterogeneous set into the two payloads a model call needs: a deduplicated
//! list of resource ids and a list of inline images.
//!
//! # Where to find things
//!
//! - **Attach and detach items:** [`ContextManager`](manager::ContextManager)
//!   and its `add_*` / `remove_*` methods. Every mutation funnels through
//!   [`ContextManager::update_items`](manager::ContextManager::update_items),
//!   which runs destroy hooks for evicted items.
//!
//! - **Share attachments between conversations:** [`ContextHub`](hub::ContextHub)
//!   owns items per scope. [`ContextManager::fork`](manager::ContextManager::fork)
//!   seeds a new scope with the same item instances. Use
//!   [`NoteContext`](hub::NoteContext) when a conversation falls back to the
//!   default manager.
//!
//! - **Understand item kinds:** [`ContextItem`](item::ContextItem) and
//!   [`ItemKind`](item::ItemKind), a closed set of nine variants behind one
//!   capability interface.
//!
//! - **Turn a tab into a resource:** [`prepare_page_tab`](prepare::prepare_page_tab).
//!
//! - **Plug in the host application:** the collaborator traits in
//!   [`services`] ([`ResourceStore`](services::ResourceStore),
//!   [`TabRegistry`](services::TabRegistry), [`BrowserTab`](services::BrowserTab),
//!   [`KeyValueStore`](services::KeyValueStore), ...). In-memory backends live
//!   in [`services::memory`].
//!
//! - **Persist across restarts:** [`manager::persist`] defines the
//!   [`StoredContextItem`](manager::persist::StoredContextItem) projection.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`item`] | Context item variants, labels, icons, prompt caching |
//! | [`manager`] | Mutation API, aggregation, derived views, persistence |
//! | [`hub`] | Scoped item registry shared by managers, fallback context |
//! | [`prepare`] | Tab → resource preparation pipeline |
//! | [`services`] | Collaborator traits and in-memory backends |
//! | [`telemetry`] | Best-effort context update events |
//! | [`config`] | [`ContextConfig`](config::ContextConfig) and policies |
//! | [`canonical`] | URL normalisation and internal-link parsing |

pub mod canonical;
pub mod config;
pub mod error;
pub mod hub;
pub mod item;
pub mod manager;
pub mod prelude;
pub mod prepare;
pub mod services;
pub mod telemetry;

use serde::{Deserialize, Serialize};

pub use error::{ContextError, Result};

// ── Constants ──────────────────────────────────────────────────────

/// Storage key (and scope name) of the application-wide context manager.
pub const DEFAULT_CONTEXT_MANAGER_KEY: &str = "active_chat_context";

/// Well-known resource tag names.
pub mod tag_keys {
    pub const CANONICAL_URL: &str = "canonicalUrl";
    pub const DELETED: &str = "deleted";
    pub const SILENT: &str = "silent";
    pub const HIDE_IN_EVERYTHING: &str = "hideInEverything";
    pub const CREATED_FOR_CHAT: &str = "createdForChat";
}

/// Resource types excluded from the "everything" corpus.
pub mod resource_types {
    pub const HISTORY_ENTRY: &str = "application/vnd.space.history-entry";
    pub const ANNOTATION: &str = "application/vnd.space.annotation";
    pub const LINK: &str = "application/vnd.space.link";
}

// ── Resources ──────────────────────────────────────────────────────

/// A `name = value` tag attached to a resource.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ResourceTag {
    pub name: String,
    pub value: String,
}

impl ResourceTag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn silent() -> Self {
        Self::new(tag_keys::SILENT, "true")
    }

    pub fn created_for_chat() -> Self {
        Self::new(tag_keys::CREATED_FOR_CHAT, "true")
    }

    pub fn canonical_url(url: impl Into<String>) -> Self {
        Self::new(tag_keys::CANONICAL_URL, url)
    }

    pub fn deleted() -> Self {
        Self::new(tag_keys::DELETED, "true")
    }
}

/// A durable, addressable artifact (bookmark, note, document, image).
///
/// Owned by the resource store. Context items hold a snapshot for display and
/// re-resolve bytes through the store on demand.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Resource {
    pub id: String,
    /// MIME-like type, e.g. `image/png` or [`resource_types::LINK`].
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
    #[serde(default)]
    pub tags: Vec<ResourceTag>,
}

impl Resource {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            name: None,
            source_uri: None,
            tags: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_source_uri(mut self, uri: impl Into<String>) -> Self {
        self.source_uri = Some(uri.into());
        self
    }

    pub fn with_tag(mut self, tag: ResourceTag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Value of the first tag named `name`.
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.value.as_str())
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t.name == name)
    }

    pub fn is_deleted(&self) -> bool {
        self.tag(tag_keys::DELETED) == Some("true")
    }

    pub fn canonical_url(&self) -> Option<&str> {
        self.tag(tag_keys::CANONICAL_URL)
    }

    /// Canonical URL tag, falling back to the source URI.
    pub fn url(&self) -> Option<&str> {
        self.canonical_url().or(self.source_uri.as_deref())
    }

    pub fn is_image(&self) -> bool {
        self.resource_type.starts_with("image")
    }
}

/// Payload for [`ResourceStore::create_resource_link`](services::ResourceStore::create_resource_link).
#[derive(Clone, Debug, PartialEq)]
pub struct NewResourceLink {
    pub url: String,
    pub title: String,
    pub content_html: Option<String>,
    pub tags: Vec<ResourceTag>,
}

/// Filter for listing resource ids from the store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceQuery {
    pub exclude_deleted: bool,
    pub exclude_types: Vec<String>,
    /// Resources carrying any of these tags are skipped.
    pub exclude_tags: Vec<String>,
    /// Only resources that are not part of any space.
    pub outside_spaces: bool,
}

impl ResourceQuery {
    /// Everything a user would consider "their stuff": not deleted, not
    /// history or annotations, not silent or hidden.
    pub fn non_hidden() -> Self {
        Self {
            exclude_deleted: true,
            exclude_types: vec![
                resource_types::HISTORY_ENTRY.to_string(),
                resource_types::ANNOTATION.to_string(),
            ],
            exclude_tags: vec![
                tag_keys::HIDE_IN_EVERYTHING.to_string(),
                tag_keys::SILENT.to_string(),
            ],
            outside_spaces: false,
        }
    }

    pub fn outside_spaces(mut self) -> Self {
        self.outside_spaces = true;
        self
    }

    /// Whether `resource` passes the filter. `in_space` is only consulted
    /// when [`outside_spaces`](Self::outside_spaces) is set.
    pub fn matches(&self, resource: &Resource, in_space: bool) -> bool {
        if self.exclude_deleted && resource.is_deleted() {
            return false;
        }
        if self.exclude_types.contains(&resource.resource_type) {
            return false;
        }
        if self.exclude_tags.iter().any(|t| resource.has_tag(t)) {
            return false;
        }
        !(self.outside_spaces && in_space)
    }
}

// ── Tabs ───────────────────────────────────────────────────────────

/// What a browser tab is showing.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TabKind {
    /// A web page.
    Page {
        initial_location: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_location: Option<String>,
        /// Resource the user saved this page as.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource_bookmark: Option<String>,
        /// Resource previously created for chat from this page.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_resource_bookmark: Option<String>,
    },
    /// A space opened as a tab.
    Space { space_id: String },
    /// A saved resource opened as a tab.
    Resource { resource_id: String },
    /// Anything else (settings, importers, ...).
    Other,
}

/// A browser tab as seen by the tab registry.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Tab {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Space the tab was opened in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    #[serde(flatten)]
    pub kind: TabKind,
}

impl Tab {
    pub fn page(id: impl Into<String>, title: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            icon: None,
            scope_id: None,
            kind: TabKind::Page {
                initial_location: location.into(),
                current_location: None,
                resource_bookmark: None,
                chat_resource_bookmark: None,
            },
        }
    }

    pub fn space(id: impl Into<String>, title: impl Into<String>, space_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            icon: None,
            scope_id: None,
            kind: TabKind::Space {
                space_id: space_id.into(),
            },
        }
    }

    pub fn resource(
        id: impl Into<String>,
        title: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            icon: None,
            scope_id: None,
            kind: TabKind::Resource {
                resource_id: resource_id.into(),
            },
        }
    }

    pub fn in_scope(mut self, scope_id: impl Into<String>) -> Self {
        self.scope_id = Some(scope_id.into());
        self
    }

    pub fn with_current_location(mut self, location: impl Into<String>) -> Self {
        if let TabKind::Page {
            current_location, ..
        } = &mut self.kind
        {
            *current_location = Some(location.into());
        }
        self
    }

    pub fn with_chat_resource(mut self, resource_id: impl Into<String>) -> Self {
        if let TabKind::Page {
            chat_resource_bookmark,
            ..
        } = &mut self.kind
        {
            *chat_resource_bookmark = Some(resource_id.into());
        }
        self
    }

    pub fn with_resource_bookmark(mut self, resource_id: impl Into<String>) -> Self {
        if let TabKind::Page {
            resource_bookmark, ..
        } = &mut self.kind
        {
            *resource_bookmark = Some(resource_id.into());
        }
        self
    }

    pub fn is_page(&self) -> bool {
        matches!(self.kind, TabKind::Page { .. })
    }

    /// Current location of a page tab, falling back to where it started.
    pub fn location(&self) -> Option<&str> {
        match &self.kind {
            TabKind::Page {
                initial_location,
                current_location,
                ..
            } => Some(
                current_location
                    .as_deref()
                    .filter(|l| !l.is_empty())
                    .unwrap_or(initial_location),
            ),
            _ => None,
        }
    }

    /// Resource this page tab is already known to correspond to. A saved
    /// bookmark wins over a chat-only resource.
    pub fn remembered_resource(&self) -> Option<&str> {
        match &self.kind {
            TabKind::Page {
                resource_bookmark,
                chat_resource_bookmark,
                ..
            } => resource_bookmark
                .as_deref()
                .or(chat_resource_bookmark.as_deref()),
            _ => None,
        }
    }

    /// Whether two snapshots show the same thing: same tab, same kind, and
    /// for pages the same current location, for spaces the same space.
    pub fn same_content(&self, other: &Tab) -> bool {
        if self.id != other.id {
            return false;
        }
        match (&self.kind, &other.kind) {
            (TabKind::Page { .. }, TabKind::Page { .. }) => self.location() == other.location(),
            (TabKind::Space { space_id: a }, TabKind::Space { space_id: b }) => a == b,
            (TabKind::Resource { resource_id: a }, TabKind::Resource { resource_id: b }) => a == b,
            (TabKind::Other, TabKind::Other) => true,
            _ => false,
        }
    }
}

// ── Spaces ─────────────────────────────────────────────────────────

/// A user-curated collection of resources.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct Space {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colors: Option<Vec<String>>,
}

impl Space {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// How a resource ended up in a space.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpaceEntryOrigin {
    /// Added by a smart-space query.
    Automatic,
    /// Added by the user.
    Manual,
    /// Removed by the user from an automatic result; never contributes.
    Blacklisted,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SpaceEntry {
    pub resource_id: String,
    pub origin: SpaceEntryOrigin,
}

// ── Chat payloads ──────────────────────────────────────────────────

/// A suggested prompt shown under the chat input.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatPrompt {
    pub label: String,
    pub prompt: String,
}

impl ChatPrompt {
    pub fn new(label: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            prompt: prompt.into(),
        }
    }
}

/// In-memory image bytes with their MIME type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageData {
    pub mime: String,
    pub bytes: std::sync::Arc<[u8]>,
}

impl ImageData {
    pub fn new(mime: impl Into<String>, bytes: impl Into<std::sync::Arc<[u8]>>) -> Self {
        Self {
            mime: mime.into(),
            bytes: bytes.into(),
        }
    }

    pub fn png(bytes: impl Into<std::sync::Arc<[u8]>>) -> Self {
        Self::new("image/png", bytes)
    }

    /// Encode as a `data:` URL, the form inline images are sent to the model in.
    pub fn to_data_url(&self) -> String {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
        format!("data:{};base64,{encoded}", self.mime)
    }
}
