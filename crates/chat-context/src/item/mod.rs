//! Context items: the unit of attachment.
//!
//! A [`ContextItem`] couples a deterministic id and a few flags with an
//! [`ItemKind`], a closed set of nine variants. Every variant answers the
//! same capability calls:
//!
//! | Call | Purpose |
//! |------|---------|
//! | [`resource_ids`](ContextItem::resource_ids) | Durable resource ids the model may read |
//! | [`inline_images`](ContextItem::inline_images) | `data:` URLs sent inline with the message |
//! | [`get_prompts`](ContextItem::get_prompts) | Suggested prompts, cached until `fresh` |
//! | [`on_destroy`](ContextItem::on_destroy) | Cleanup once the item leaves every scope |
//!
//! Items never own the tab, resource or space they reference. Fixed
//! variants hold a snapshot for display; placeholder variants
//! ([`ActiveTabItem`], [`ActiveSpaceItem`]) re-resolve through the
//! collaborators on every call. Resolution failures are logged and yield
//! empty results.

mod active;
mod page_tab;
mod resource;
mod scopes;
mod wikipedia;

pub use active::{ActiveSpaceInclude, ActiveSpaceItem, ActiveTabItem};
pub(crate) use active::prompt_cache_key;
pub use page_tab::PageTabItem;
pub use resource::{ResourceItem, ScreenshotItem, SpaceItem};
pub use wikipedia::{TITLE_EXTRACTOR_PROMPT, WikipediaItem};

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::prepare::prepare_page_tab;
use crate::services::ContextServices;
use crate::{ChatPrompt, ImageData, Resource, Space, Tab, TabKind, canonical};

/// Boxed future returned by item capability calls.
pub type ItemFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Drop repeated ids, keeping the first occurrence of each.
pub fn dedup_preserving_order(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

// ── Types & icons ──────────────────────────────────────────────────

/// Stable tag of an item variant, as stored and reported.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ContextItemType {
    Resource,
    Screenshot,
    Space,
    PageTab,
    ActiveTab,
    ActiveSpace,
    Home,
    Everything,
    Wikipedia,
}

impl ContextItemType {
    pub const ALL: [ContextItemType; 9] = [
        Self::Resource,
        Self::Screenshot,
        Self::Space,
        Self::PageTab,
        Self::ActiveTab,
        Self::ActiveSpace,
        Self::Home,
        Self::Everything,
        Self::Wikipedia,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resource => "resource",
            Self::Screenshot => "screenshot",
            Self::Space => "space",
            Self::PageTab => "page-tab",
            Self::ActiveTab => "active-tab",
            Self::ActiveSpace => "active-space",
            Self::Home => "home",
            Self::Everything => "everything",
            Self::Wikipedia => "wikipedia",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for ContextItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an item is drawn in the attachment bar.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ContextIcon {
    /// Image URL (favicon, data URL, space image).
    Image(String),
    /// Name of a built-in icon.
    Icon(String),
    Emoji(String),
    /// Gradient colours of a space.
    Colors(Vec<String>),
}

impl ContextIcon {
    pub fn icon(name: &str) -> Self {
        Self::Icon(name.to_string())
    }
}

// ── ContextItem ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ItemKind {
    ActiveTab(ActiveTabItem),
    ActiveSpace(ActiveSpaceItem),
    PageTab(PageTabItem),
    Resource(ResourceItem),
    Space(SpaceItem),
    Screenshot(ScreenshotItem),
    Home,
    Everything,
    Wikipedia(WikipediaItem),
}

#[derive(Debug)]
pub struct ContextItem {
    id: String,
    visible: AtomicBool,
    destroyed: AtomicBool,
    prompts: Mutex<Vec<ChatPrompt>>,
    kind: ItemKind,
}

impl ContextItem {
    fn new(id: impl Into<String>, kind: ItemKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            visible: AtomicBool::new(true),
            destroyed: AtomicBool::new(false),
            prompts: Mutex::new(Vec::new()),
            kind,
        })
    }

    /// A saved resource, optionally remembering the tab it was opened in.
    pub fn resource(resource: Resource, source_tab: Option<Tab>) -> Arc<Self> {
        Self::new(
            format!("resource:{}", resource.id),
            ItemKind::Resource(ResourceItem::new(resource, source_tab)),
        )
    }

    pub fn space(space: Space, source_tab: Option<Tab>) -> Arc<Self> {
        Self::new(
            format!("space:{}", space.id),
            ItemKind::Space(SpaceItem::new(space, source_tab)),
        )
    }

    /// An in-memory image. Never persisted.
    pub fn screenshot(image: ImageData) -> Arc<Self> {
        Self::new(
            format!("screenshot:{}", uuid::Uuid::new_v4()),
            ItemKind::Screenshot(ScreenshotItem::new(image)),
        )
    }

    /// A page tab that becomes resource-bearing once prepared. Preparation
    /// starts in the background when eager preparation is configured and a
    /// tokio runtime is available.
    pub fn page_tab(tab: Tab, services: &ContextServices) -> Arc<Self> {
        let item = Self::new(
            format!("tab:{}", tab.id),
            ItemKind::PageTab(PageTabItem::new(tab)),
        );
        if services.config.eager_page_preparation {
            item.spawn_preparation(services);
        }
        item
    }

    pub fn active_tab() -> Arc<Self> {
        Self::new("active-tab", ItemKind::ActiveTab(ActiveTabItem::default()))
    }

    pub fn active_space(include: ActiveSpaceInclude) -> Arc<Self> {
        Self::new(
            "active-space",
            ItemKind::ActiveSpace(ActiveSpaceItem::new(include)),
        )
    }

    pub fn home() -> Arc<Self> {
        Self::new("home", ItemKind::Home)
    }

    pub fn everything() -> Arc<Self> {
        Self::new("everything", ItemKind::Everything)
    }

    pub fn wikipedia() -> Arc<Self> {
        Self::new("wikipedia", ItemKind::Wikipedia(WikipediaItem::default()))
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &ItemKind {
        &self.kind
    }

    pub fn item_type(&self) -> ContextItemType {
        match &self.kind {
            ItemKind::ActiveTab(_) => ContextItemType::ActiveTab,
            ItemKind::ActiveSpace(_) => ContextItemType::ActiveSpace,
            ItemKind::PageTab(_) => ContextItemType::PageTab,
            ItemKind::Resource(_) => ContextItemType::Resource,
            ItemKind::Space(_) => ContextItemType::Space,
            ItemKind::Screenshot(_) => ContextItemType::Screenshot,
            ItemKind::Home => ContextItemType::Home,
            ItemKind::Everything => ContextItemType::Everything,
            ItemKind::Wikipedia(_) => ContextItemType::Wikipedia,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Resource snapshot of a [`ItemKind::Resource`] item.
    pub fn resource_snapshot(&self) -> Option<&Resource> {
        match &self.kind {
            ItemKind::Resource(r) => Some(r.resource()),
            _ => None,
        }
    }

    /// False once a resource item's resource was found deleted. Other
    /// variants always report true.
    pub fn is_resolved(&self) -> bool {
        match &self.kind {
            ItemKind::Resource(r) => r.is_resolved(),
            _ => true,
        }
    }

    /// Space snapshot of a [`ItemKind::Space`] item.
    pub fn space_snapshot(&self) -> Option<&Space> {
        match &self.kind {
            ItemKind::Space(s) => Some(s.space()),
            _ => None,
        }
    }

    /// The tab this item was created from, if any.
    pub fn linked_tab(&self) -> Option<&Tab> {
        match &self.kind {
            ItemKind::PageTab(p) => Some(p.tab()),
            ItemKind::Resource(r) => r.source_tab(),
            ItemKind::Space(s) => s.source_tab(),
            _ => None,
        }
    }

    /// The item a wrapper currently resolves to: the prepared resource of a
    /// page tab, or the tracked item of an active placeholder.
    pub fn nested_item(&self) -> Option<Arc<ContextItem>> {
        match &self.kind {
            ItemKind::PageTab(p) => p.prepared(),
            ItemKind::ActiveTab(a) => a.current_item(),
            ItemKind::ActiveSpace(a) => a.current_item(),
            _ => None,
        }
    }

    pub fn label(&self) -> String {
        match &self.kind {
            ItemKind::ActiveTab(_) => self.nested_label("Active Tab"),
            ItemKind::ActiveSpace(_) => self.nested_label("Active Context"),
            ItemKind::PageTab(p) => match p.prepared() {
                Some(item) => item.label(),
                None if !p.tab().title.is_empty() => p.tab().title.clone(),
                None => "Tab".to_string(),
            },
            ItemKind::Resource(r) => r.label(),
            ItemKind::Space(s) => s.label(),
            ItemKind::Screenshot(_) => "Screenshot".to_string(),
            ItemKind::Home => "Home".to_string(),
            ItemKind::Everything => "All My Stuff".to_string(),
            ItemKind::Wikipedia(_) => "Wikipedia".to_string(),
        }
    }

    fn nested_label(&self, fallback: &str) -> String {
        self.nested_item()
            .map(|item| item.label())
            .unwrap_or_else(|| fallback.to_string())
    }

    pub fn icon(&self) -> ContextIcon {
        match &self.kind {
            ItemKind::ActiveTab(_) | ItemKind::ActiveSpace(_) => self
                .nested_item()
                .map(|item| item.icon())
                .unwrap_or_else(|| ContextIcon::icon("browser")),
            ItemKind::PageTab(p) => match (p.prepared(), &p.tab().icon) {
                (Some(item), _) => item.icon(),
                (None, Some(icon)) => ContextIcon::Image(icon.clone()),
                (None, None) => ContextIcon::icon("browser"),
            },
            ItemKind::Resource(r) => r.icon(),
            ItemKind::Space(s) => s.icon(),
            ItemKind::Screenshot(s) => ContextIcon::Image(s.image().to_data_url()),
            ItemKind::Home => ContextIcon::icon("circle-dot"),
            ItemKind::Everything => ContextIcon::icon("save"),
            ItemKind::Wikipedia(_) => canonical::favicon_url("https://wikipedia.org")
                .map(ContextIcon::Image)
                .unwrap_or_else(|| ContextIcon::icon("search")),
        }
    }

    // ── Capabilities ───────────────────────────────────────────────

    /// Resource ids this item contributes. `prompt` is only consulted by
    /// items that search on the user's behalf.
    pub fn resource_ids<'a>(
        &'a self,
        services: &'a ContextServices,
        prompt: Option<&'a str>,
    ) -> ItemFuture<'a, Vec<String>> {
        Box::pin(async move {
            match &self.kind {
                ItemKind::Resource(r) => r.resource_ids(services).await,
                ItemKind::Space(s) => s.resource_ids(services).await,
                ItemKind::Screenshot(_) => Vec::new(),
                ItemKind::PageTab(_) => match self.prepare_page(services).await {
                    Some(item) => item.resource_ids(services, prompt).await,
                    None => Vec::new(),
                },
                ItemKind::ActiveTab(a) => match a.refresh(services).await {
                    Some(item) => item.resource_ids(services, prompt).await,
                    None => Vec::new(),
                },
                ItemKind::ActiveSpace(a) => a.resource_ids(services).await,
                ItemKind::Home => scopes::home_resource_ids(services).await,
                ItemKind::Everything => scopes::everything_resource_ids(services).await,
                ItemKind::Wikipedia(w) => w.resource_ids(services, prompt, &self.destroyed).await,
            }
        })
    }

    /// Images to send inline, as `data:` URLs.
    pub fn inline_images<'a>(&'a self, services: &'a ContextServices) -> ItemFuture<'a, Vec<String>> {
        Box::pin(async move {
            match &self.kind {
                ItemKind::Resource(r) => r.inline_images(services).await,
                ItemKind::Screenshot(s) => vec![s.image().to_data_url()],
                ItemKind::PageTab(_) => match self.prepare_page(services).await {
                    Some(item) => item.inline_images(services).await,
                    None => Vec::new(),
                },
                ItemKind::ActiveTab(a) => match a.refresh(services).await {
                    Some(item) => item.inline_images(services).await,
                    None => Vec::new(),
                },
                ItemKind::ActiveSpace(a) => match a.refresh(services).await {
                    Some(item) => item.inline_images(services).await,
                    None => Vec::new(),
                },
                ItemKind::Space(_)
                | ItemKind::Home
                | ItemKind::Everything
                | ItemKind::Wikipedia(_) => Vec::new(),
            }
        })
    }

    /// Ask the assistant for prompt suggestions, bypassing every cache.
    pub fn generate_prompts<'a>(
        &'a self,
        services: &'a ContextServices,
    ) -> ItemFuture<'a, Vec<ChatPrompt>> {
        Box::pin(async move {
            let nested = match &self.kind {
                ItemKind::Resource(r) => return r.generate_prompts(services).await,
                ItemKind::PageTab(_) => self.prepare_page(services).await,
                ItemKind::ActiveTab(a) => a.refresh(services).await,
                ItemKind::ActiveSpace(a) => a.refresh(services).await,
                _ => None,
            };
            match nested {
                Some(item) => item.generate_prompts(services).await,
                None => Vec::new(),
            }
        })
    }

    /// Cached prompt suggestions. An empty cache or `fresh` regenerates.
    pub fn get_prompts<'a>(
        &'a self,
        services: &'a ContextServices,
        fresh: bool,
    ) -> ItemFuture<'a, Vec<ChatPrompt>> {
        Box::pin(async move {
            if let ItemKind::ActiveTab(a) = &self.kind {
                return a.get_prompts(services, fresh).await;
            }
            {
                let cached = lock(&self.prompts);
                if !cached.is_empty() && !fresh {
                    return cached.clone();
                }
            }
            let generated = self.generate_prompts(services).await;
            *lock(&self.prompts) = generated.clone();
            generated
        })
    }

    /// Run cleanup. Only the first call has any effect.
    pub fn on_destroy<'a>(&'a self, services: &'a ContextServices) -> ItemFuture<'a, ()> {
        Box::pin(async move {
            if self.destroyed.swap(true, Ordering::SeqCst) {
                return;
            }
            debug!(item = %self.id, "Destroying context item");
            if let ItemKind::Wikipedia(w) = &self.kind {
                w.cleanup(services).await;
            }
        })
    }

    // ── Page preparation ───────────────────────────────────────────

    /// Prepare a page tab's resource, or return the one already prepared.
    /// `None` for other kinds and when the pipeline fails.
    pub async fn prepare_page(&self, services: &ContextServices) -> Option<Arc<ContextItem>> {
        match &self.kind {
            ItemKind::PageTab(p) => p.prepare(services, &self.destroyed).await,
            _ => None,
        }
    }

    fn spawn_preparation(self: &Arc<Self>, services: &ContextServices) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(item = %self.id, "No runtime, deferring page preparation");
            return;
        };
        let item = Arc::clone(self);
        let services = services.clone();
        handle.spawn(async move {
            item.prepare_page(&services).await;
        });
    }
}

// ── Shared resolution helpers ──────────────────────────────────────

/// Build the item a tab stands for: page tabs are prepared into resources,
/// space and resource tabs resolve their referent. `None` when anything
/// fails to resolve.
pub(crate) async fn resolve_tab_item(
    services: &ContextServices,
    tab: &Tab,
) -> Option<Arc<ContextItem>> {
    match &tab.kind {
        TabKind::Page { .. } => match prepare_page_tab(services, tab).await {
            Ok(resource) => Some(ContextItem::resource(resource, Some(tab.clone()))),
            Err(e) => {
                warn!(tab = %tab.id, "Failed to prepare page tab: {e}");
                None
            }
        },
        TabKind::Space { space_id } => {
            let space = services.spaces.get_space(space_id).await?;
            Some(ContextItem::space(space, Some(tab.clone())))
        }
        TabKind::Resource { resource_id } => {
            let resource = services.resources.get_resource(resource_id).await?;
            Some(ContextItem::resource(resource, Some(tab.clone())))
        }
        TabKind::Other => None,
    }
}

/// Prepare every page tab matching `filter` concurrently and collect the
/// resulting resource ids in tab order. Failing tabs are skipped.
pub(crate) async fn prepared_tab_resource_ids(
    services: &ContextServices,
    filter: impl Fn(&Tab) -> bool,
) -> Vec<String> {
    let tabs: Vec<Tab> = services
        .tabs
        .tabs()
        .into_iter()
        .filter(|t| t.is_page() && filter(t))
        .collect();
    let prepared = join_all(tabs.iter().map(|tab| prepare_page_tab(services, tab))).await;
    prepared
        .into_iter()
        .zip(&tabs)
        .filter_map(|(result, tab)| match result {
            Ok(resource) => Some(resource.id),
            Err(e) => {
                warn!(tab = %tab.id, "Skipping tab that failed to prepare: {e}");
                None
            }
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::testing::Fixture;
    use super::*;
    use crate::{ResourceTag, SpaceEntry, SpaceEntryOrigin, resource_types};

    #[test]
    fn item_type_round_trips_through_str() {
        for t in ContextItemType::ALL {
            assert_eq!(ContextItemType::parse(t.as_str()), Some(t));
            assert_eq!(
                serde_json::to_value(t).unwrap(),
                serde_json::Value::String(t.to_string())
            );
        }
        assert_eq!(ContextItemType::parse("inbox"), None);
    }

    #[test]
    fn ids_are_deterministic_per_subject() {
        let fx = Fixture::new();
        let r = ContextItem::resource(Resource::new("r1", resource_types::LINK), None);
        assert_eq!(r.id(), "resource:r1");
        assert_eq!(ContextItem::space(Space::new("s1", "S"), None).id(), "space:s1");
        let tab = ContextItem::page_tab(Tab::page("t1", "A", "https://a.test/"), &fx.services);
        assert_eq!(tab.id(), "tab:t1");
        assert_eq!(ContextItem::active_tab().id(), "active-tab");
        assert_eq!(ContextItem::home().id(), "home");
        let a = ContextItem::screenshot(ImageData::png(vec![1u8]));
        let b = ContextItem::screenshot(ImageData::png(vec![1u8]));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn fixed_labels_and_icons() {
        assert_eq!(ContextItem::home().label(), "Home");
        assert_eq!(ContextItem::everything().label(), "All My Stuff");
        assert_eq!(ContextItem::wikipedia().label(), "Wikipedia");
        assert_eq!(ContextItem::active_tab().label(), "Active Tab");
        assert_eq!(
            ContextItem::active_space(ActiveSpaceInclude::default()).label(),
            "Active Context"
        );
        assert_eq!(ContextItem::everything().icon(), ContextIcon::icon("save"));
        let json = serde_json::to_value(ContextIcon::Emoji("🦀".into())).unwrap();
        assert_eq!(json["type"], "emoji");
        assert_eq!(json["data"], "🦀");
    }

    #[tokio::test]
    async fn space_item_skips_blacklisted_entries() {
        let fx = Fixture::new();
        let entry = |id: &str, origin| SpaceEntry {
            resource_id: id.into(),
            origin,
        };
        fx.spaces.insert(
            Space::new("s1", "Research"),
            vec![
                entry("r1", SpaceEntryOrigin::Manual),
                entry("r2", SpaceEntryOrigin::Blacklisted),
                entry("r3", SpaceEntryOrigin::Automatic),
            ],
        );
        let item = ContextItem::space(Space::new("s1", "Research"), None);
        assert_eq!(
            item.resource_ids(&fx.services, None).await,
            vec!["r1", "r3"]
        );
    }

    #[tokio::test]
    async fn screenshot_and_image_resources_inline() {
        let fx = Fixture::new();
        let shot = ContextItem::screenshot(ImageData::png(vec![1u8, 2, 3]));
        assert_eq!(
            shot.inline_images(&fx.services).await,
            vec!["data:image/png;base64,AQID"]
        );
        assert!(shot.resource_ids(&fx.services, None).await.is_empty());

        fx.resources.insert(Resource::new("img", "image/png"));
        fx.resources.set_data("img", ImageData::png(vec![1u8, 2, 3]));
        let image = ContextItem::resource(Resource::new("img", "image/png"), None);
        assert_eq!(image.inline_images(&fx.services).await.len(), 1);

        let missing = ContextItem::resource(Resource::new("gone", "image/png"), None);
        assert!(missing.inline_images(&fx.services).await.is_empty());
    }

    #[tokio::test]
    async fn home_and_everything_query_the_store() {
        let fx = Fixture::new();
        fx.resources.insert(Resource::new("loose", resource_types::LINK));
        fx.resources.insert(Resource::new("filed", resource_types::LINK));
        fx.resources.mark_in_space("filed");
        fx.resources
            .insert(Resource::new("quiet", resource_types::LINK).with_tag(ResourceTag::silent()));
        fx.resources
            .insert(Resource::new("visit", resource_types::HISTORY_ENTRY));

        fx.tabs.upsert_tab(Tab::page("t1", "Open", "https://open.test/"));
        fx.tabs.upsert_tab(Tab::page("t2", "Scoped", "https://scoped.test/").in_scope("s1"));
        fx.tabs.attach_live(
            "t1",
            fx.chat_tab(Resource::new("open", resource_types::LINK)),
        );

        let everything = ContextItem::everything().resource_ids(&fx.services, None).await;
        assert_eq!(everything, vec!["loose", "filed"]);

        let home = ContextItem::home().resource_ids(&fx.services, None).await;
        assert_eq!(home, vec!["loose", "open"]);
    }

    #[tokio::test]
    async fn destroy_runs_once() {
        let fx = Fixture::new();
        let item = ContextItem::home();
        item.on_destroy(&fx.services).await;
        item.on_destroy(&fx.services).await;
        assert!(item.is_destroyed());
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let ids = vec!["b".to_string(), "a".into(), "b".into(), "c".into(), "a".into()];
        assert_eq!(dedup_preserving_order(ids), vec!["b", "a", "c"]);
    }
}
