//! The attachment set of one conversation.
//!
//! A [`ContextManager`] is a view onto one scope of a
//! [`ContextHub`](crate::hub::ContextHub). It offers the mutation API used by
//! chat UI code, fans aggregation calls out to every item, and derives the
//! read-only views in [`views`]. Persistence lives in [`persist`].
//!
//! Every mutation goes through [`ContextManager::update_items`], so destroy
//! hooks always run for evicted items.

pub mod persist;
mod views;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::hub::{ContextHub, ScopeUpdate};
use crate::item::{
    ActiveSpaceInclude, ContextItem, ContextItemType, ItemKind, dedup_preserving_order, lock,
    prompt_cache_key,
};
use crate::services::ContextServices;
use crate::telemetry::{ContextUpdateEvent, UpdateAction, UpdateTrigger};
use crate::{ChatPrompt, ContextError, ImageData, Resource, Result, Space, Tab, TabKind};

/// Options for [`ContextManager::add_context_item`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Report the addition to telemetry with this trigger.
    pub trigger: Option<UpdateTrigger>,
    /// Insert at this position instead of appending. Clamped to the length.
    pub index: Option<usize>,
    pub visible: Option<bool>,
}

impl AddOptions {
    pub fn triggered(trigger: UpdateTrigger) -> Self {
        Self {
            trigger: Some(trigger),
            ..Self::default()
        }
    }

    pub fn at(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = Some(false);
        self
    }
}

/// Something the user mentioned in the chat editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mention {
    /// Drop all context.
    NoContext,
    Everything,
    /// Open tabs of the active space.
    Tabs,
    /// Saved contents of the active space.
    ActiveContext,
    ActiveTab,
    Wikipedia,
    Resource(String),
    Space(String),
}

pub struct ContextManager {
    key: String,
    hub: Arc<ContextHub>,
    prompt_cache: Mutex<HashMap<String, Vec<ChatPrompt>>>,
    generated_prompts: Mutex<Vec<ChatPrompt>>,
}

impl ContextManager {
    pub(crate) fn new(key: String, hub: Arc<ContextHub>) -> Self {
        Self {
            key,
            hub,
            prompt_cache: Mutex::new(HashMap::new()),
            generated_prompts: Mutex::new(Vec::new()),
        }
    }

    /// Storage key, also the scope name in the hub.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn hub(&self) -> &Arc<ContextHub> {
        &self.hub
    }

    pub fn services(&self) -> &ContextServices {
        self.hub.services()
    }

    /// Snapshot of the items in order.
    pub fn items(&self) -> Vec<Arc<ContextItem>> {
        self.hub.scoped_items(&self.key)
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    // ── Mutation ───────────────────────────────────────────────────

    /// The one entry point that changes the collection.
    pub async fn update_items<F>(&self, transform: F) -> ScopeUpdate
    where
        F: FnOnce(Vec<Arc<ContextItem>>) -> Vec<Arc<ContextItem>>,
    {
        self.hub.update_scope(&self.key, transform).await
    }

    /// Attach `item` unless an item with the same id is already attached,
    /// in which case the attached one is returned unchanged.
    pub async fn add_context_item(
        &self,
        item: Arc<ContextItem>,
        options: AddOptions,
    ) -> Arc<ContextItem> {
        if let Some(existing) = self.find(item.id()) {
            debug!(scope = %self.key, item = %item.id(), "Item already in context");
            return existing;
        }
        if let Some(visible) = options.visible {
            item.set_visible(visible);
        }

        let before = self.len();
        let candidate = Arc::clone(&item);
        self.update_items(move |mut items| {
            if items.iter().any(|i| i.id() == candidate.id()) {
                return items;
            }
            match options.index {
                Some(index) => items.insert(index.min(items.len()), candidate),
                None => items.push(candidate),
            }
            items
        })
        .await;

        let Some(committed) = self.find(item.id()) else {
            warn!(scope = %self.key, item = %item.id(), "Item vanished while being added");
            return item;
        };
        if !Arc::ptr_eq(&committed, &item) {
            return committed;
        }

        debug!(scope = %self.key, item = %item.id(), "Added context item");
        self.persist_best_effort();
        if self.selects_tabs()
            && let Some(tab) = committed.linked_tab()
        {
            self.services().tabs.add_tab_to_selection(&tab.id);
        }
        self.emit(
            UpdateAction::Add,
            before + 1,
            1,
            Some(committed.item_type()),
            options.trigger,
        );
        committed
    }

    /// Detach the item with `id`. Returns whether it was attached.
    pub async fn remove_context_item(&self, id: &str, trigger: Option<UpdateTrigger>) -> bool {
        let Some(existing) = self.find(id) else {
            debug!(scope = %self.key, item = %id, "Item not in context");
            return false;
        };
        let before = self.len();
        self.update_items(|items| items.into_iter().filter(|i| i.id() != id).collect())
            .await;

        if self.selects_tabs()
            && let Some(tab) = existing.linked_tab()
        {
            self.services().tabs.remove_tab_from_selection(&tab.id);
        }
        debug!(scope = %self.key, item = %id, "Removed context item");
        self.persist_best_effort();
        self.emit(
            UpdateAction::Remove,
            before.saturating_sub(1),
            1,
            Some(existing.item_type()),
            trigger,
        );
        true
    }

    /// Keep only the items whose id is in `ids`, in their current order.
    /// Returns how many items were removed.
    pub async fn remove_all_except(&self, ids: &[&str], trigger: Option<UpdateTrigger>) -> usize {
        let update = self
            .update_items(|items| {
                items
                    .into_iter()
                    .filter(|i| ids.iter().any(|id| *id == i.id()))
                    .collect()
            })
            .await;

        if self.selects_tabs() {
            for tab in update.removed.iter().filter_map(|i| i.linked_tab()) {
                self.services().tabs.remove_tab_from_selection(&tab.id);
            }
        }
        debug!(scope = %self.key, removed = update.removed.len(), "Removed all other items");
        self.persist_best_effort();
        self.emit(
            UpdateAction::ExcludeOthers,
            self.len(),
            update.removed.len(),
            None,
            trigger,
        );
        update.removed.len()
    }

    pub async fn clear(&self, trigger: Option<UpdateTrigger>) {
        let update = self.update_items(|_| Vec::new()).await;
        if self.selects_tabs() {
            self.services().tabs.clear_tab_selection();
        }
        debug!(scope = %self.key, removed = update.removed.len(), "Cleared context");
        self.persist_best_effort();
        self.emit(UpdateAction::Clear, 0, update.removed.len(), None, trigger);
    }

    /// Take over `other`'s current items.
    pub async fn replace_with(&self, other: &ContextManager) {
        let items = other.items();
        debug!(scope = %self.key, from = %other.key, count = items.len(), "Replacing context");
        self.update_items(move |_| items).await;
        self.persist_best_effort();
    }

    /// A new manager seeded with this one's items. Both keep sharing the
    /// same item instances until either side replaces them.
    pub async fn fork(&self, key: Option<String>) -> ContextManager {
        self.hub.create(Some(self.items()), key).await
    }

    // ── Adding by reference ────────────────────────────────────────

    pub async fn add_resource(&self, resource_id: &str, options: AddOptions) -> Result<Arc<ContextItem>> {
        let resource = self
            .services()
            .resources
            .get_resource(resource_id)
            .await
            .ok_or_else(|| ContextError::resource_not_found(resource_id))?;
        Ok(self.add_resource_value(resource, options).await)
    }

    pub async fn add_resource_value(&self, resource: Resource, options: AddOptions) -> Arc<ContextItem> {
        self.add_context_item(ContextItem::resource(resource, None), options)
            .await
    }

    pub async fn add_space(&self, space_id: &str, options: AddOptions) -> Result<Arc<ContextItem>> {
        let space = self
            .services()
            .spaces
            .get_space(space_id)
            .await
            .ok_or_else(|| ContextError::space_not_found(space_id))?;
        Ok(self.add_space_value(space, options).await)
    }

    pub async fn add_space_value(&self, space: Space, options: AddOptions) -> Arc<ContextItem> {
        self.add_context_item(ContextItem::space(space, None), options)
            .await
    }

    pub async fn add_tab(&self, tab_id: &str, options: AddOptions) -> Result<Arc<ContextItem>> {
        let tab = self
            .services()
            .tabs
            .tab(tab_id)
            .ok_or_else(|| ContextError::tab_not_found(tab_id))?;
        self.add_tab_value(tab, options).await
    }

    /// Attach a tab: page tabs as [`ItemKind::PageTab`], space and resource
    /// tabs as their referent with the tab remembered.
    pub async fn add_tab_value(&self, tab: Tab, options: AddOptions) -> Result<Arc<ContextItem>> {
        if let Some(existing) = self.get_tab_item(&tab.id, false) {
            debug!(scope = %self.key, tab = %tab.id, "Tab already in context");
            return Ok(existing);
        }
        let services = self.services();
        let item = match &tab.kind {
            TabKind::Page { .. } => ContextItem::page_tab(tab.clone(), services),
            TabKind::Space { space_id } => {
                let space = services
                    .spaces
                    .get_space(space_id)
                    .await
                    .ok_or_else(|| ContextError::space_not_found(space_id.clone()))?;
                ContextItem::space(space, Some(tab.clone()))
            }
            TabKind::Resource { resource_id } => {
                let resource = services
                    .resources
                    .get_resource(resource_id)
                    .await
                    .ok_or_else(|| ContextError::resource_not_found(resource_id.clone()))?;
                ContextItem::resource(resource, Some(tab.clone()))
            }
            TabKind::Other => return Err(ContextError::UnsupportedTab(tab.id.clone())),
        };
        Ok(self.add_context_item(item, options).await)
    }

    /// Attach several tabs in order and report them as one multi-select.
    /// Stops at the first tab that fails. Returns the first attached item.
    pub async fn add_tabs(
        &self,
        tab_ids: &[&str],
        trigger: Option<UpdateTrigger>,
    ) -> Result<Option<Arc<ContextItem>>> {
        let before = self.len();
        let mut first = None;
        for tab_id in tab_ids {
            let item = self.add_tab(tab_id, AddOptions::default()).await?;
            first.get_or_insert(item);
        }
        let after = self.len();
        self.emit(
            UpdateAction::MultiSelect,
            after,
            after.saturating_sub(before),
            Some(ContextItemType::PageTab),
            trigger,
        );
        Ok(first)
    }

    /// Attach a tab and detach everything else.
    pub async fn only_use_tab_in_context(
        &self,
        tab_id: &str,
        trigger: Option<UpdateTrigger>,
    ) -> Result<Arc<ContextItem>> {
        let item = self.add_tab(tab_id, AddOptions::default()).await?;
        self.remove_all_except(&[item.id()], trigger).await;
        Ok(item)
    }

    pub async fn add_screenshot(&self, image: ImageData, options: AddOptions) -> Arc<ContextItem> {
        self.add_context_item(ContextItem::screenshot(image), options)
            .await
    }

    /// Capture a live tab and attach the image.
    pub async fn add_tab_screenshot(&self, tab_id: &str, options: AddOptions) -> Result<Arc<ContextItem>> {
        let handle = self
            .services()
            .tabs
            .browser_tab(tab_id)
            .ok_or_else(|| ContextError::BrowserTabUnavailable(tab_id.to_string()))?;
        let image = handle
            .capture_page()
            .await
            .ok_or_else(|| ContextError::CaptureFailed(tab_id.to_string()))?;
        Ok(self.add_screenshot(image, options).await)
    }

    pub async fn add_active_tab(&self, options: AddOptions) -> Arc<ContextItem> {
        if let Some(existing) = self.find_type(ContextItemType::ActiveTab) {
            return existing;
        }
        self.add_context_item(ContextItem::active_tab(), options).await
    }

    /// Attach the active-space placeholder. If one is attached already it is
    /// returned, switched to `include` when given.
    pub async fn add_active_space_context(
        &self,
        include: Option<ActiveSpaceInclude>,
        options: AddOptions,
    ) -> Arc<ContextItem> {
        if let Some(existing) = self.find_type(ContextItemType::ActiveSpace) {
            if let (Some(include), ItemKind::ActiveSpace(active)) = (include, existing.kind()) {
                active.set_include(include);
                self.persist_best_effort();
            }
            return existing;
        }
        self.add_context_item(
            ContextItem::active_space(include.unwrap_or_default()),
            options,
        )
        .await
    }

    pub async fn add_home_context(&self, options: AddOptions) -> Arc<ContextItem> {
        if let Some(existing) = self.find_type(ContextItemType::Home) {
            return existing;
        }
        self.add_context_item(ContextItem::home(), options).await
    }

    pub async fn add_everything_context(&self, options: AddOptions) -> Arc<ContextItem> {
        if let Some(existing) = self.find_type(ContextItemType::Everything) {
            return existing;
        }
        self.add_context_item(ContextItem::everything(), options).await
    }

    pub async fn add_wikipedia_context(&self, options: AddOptions) -> Arc<ContextItem> {
        if let Some(existing) = self.find_type(ContextItemType::Wikipedia) {
            return existing;
        }
        self.add_context_item(ContextItem::wikipedia(), options).await
    }

    /// Route an editor mention to the matching `add_*` call. Mentions of
    /// tabs or the active context widen an attached active-space item
    /// instead of adding a second one.
    pub async fn add_mention(
        &self,
        mention: &Mention,
        options: AddOptions,
    ) -> Result<Option<Arc<ContextItem>>> {
        let item = match mention {
            Mention::NoContext => {
                self.clear(options.trigger).await;
                return Ok(None);
            }
            Mention::Everything => self.add_everything_context(options).await,
            Mention::Wikipedia => self.add_wikipedia_context(options).await,
            Mention::ActiveTab => self.add_active_tab(options).await,
            Mention::Tabs | Mention::ActiveContext => {
                let tabs = matches!(mention, Mention::Tabs);
                match self.active_space_item() {
                    Some(existing) => {
                        if let ItemKind::ActiveSpace(active) = existing.kind() {
                            let current = active.include();
                            active.set_include(if tabs {
                                current.mention_tabs()
                            } else {
                                current.mention_resources()
                            });
                            self.persist_best_effort();
                        }
                        existing
                    }
                    None => {
                        let include = if tabs {
                            ActiveSpaceInclude::Tabs
                        } else {
                            ActiveSpaceInclude::Resources
                        };
                        self.add_active_space_context(Some(include), options).await
                    }
                }
            }
            Mention::Resource(id) => self.add_resource(id, options).await?,
            Mention::Space(id) => self.add_space(id, options).await?,
        };
        Ok(Some(item))
    }

    // ── Removing by reference ──────────────────────────────────────

    pub async fn remove_tab_item(&self, tab_id: &str, trigger: Option<UpdateTrigger>) -> bool {
        match self.get_tab_item(tab_id, false) {
            Some(item) => self.remove_context_item(item.id(), trigger).await,
            None => false,
        }
    }

    pub async fn remove_space_item(&self, space_id: &str, trigger: Option<UpdateTrigger>) -> bool {
        let found = self.items().into_iter().find(|item| {
            matches!(item.kind(), ItemKind::Space(_))
                && item.space_snapshot().is_some_and(|s| s.id == space_id)
        });
        match found {
            Some(item) => self.remove_context_item(item.id(), trigger).await,
            None => false,
        }
    }

    /// Detach the resource item, or the page tab prepared into it.
    pub async fn remove_resource_item(&self, resource_id: &str, trigger: Option<UpdateTrigger>) -> bool {
        let found = self.items().into_iter().find(|item| match item.kind() {
            ItemKind::Resource(r) => r.resource().id == resource_id,
            ItemKind::PageTab(p) => p.prepared_resource().is_some_and(|r| r.id == resource_id),
            _ => false,
        });
        match found {
            Some(item) => self.remove_context_item(item.id(), trigger).await,
            None => false,
        }
    }

    // ── Lookup ─────────────────────────────────────────────────────

    fn find(&self, id: &str) -> Option<Arc<ContextItem>> {
        self.items().into_iter().find(|i| i.id() == id)
    }

    fn find_type(&self, item_type: ContextItemType) -> Option<Arc<ContextItem>> {
        self.items()
            .into_iter()
            .find(|i| i.item_type() == item_type)
    }

    /// Look an item up by id: attached items first, then the items the
    /// active placeholders and page tabs currently resolve to.
    pub fn get_item(&self, id: &str) -> Option<Arc<ContextItem>> {
        let items = self.items();
        if let Some(item) = items.iter().find(|i| i.id() == id) {
            return Some(Arc::clone(item));
        }
        let nested_of = |item_type: ContextItemType| {
            items
                .iter()
                .filter(|i| i.item_type() == item_type)
                .filter_map(|i| i.nested_item())
                .find(|nested| nested.id() == id)
        };
        nested_of(ContextItemType::ActiveTab)
            .or_else(|| nested_of(ContextItemType::ActiveSpace))
            .or_else(|| nested_of(ContextItemType::PageTab))
    }

    /// The item bound to `tab_id`. The active-tab placeholder only counts
    /// with `include_active` and when it currently tracks that tab.
    pub fn get_tab_item(&self, tab_id: &str, include_active: bool) -> Option<Arc<ContextItem>> {
        self.items().into_iter().find(|item| match item.kind() {
            ItemKind::ActiveTab(active) => {
                include_active && active.current_tab().is_some_and(|t| t.id == tab_id)
            }
            _ => item.linked_tab().is_some_and(|t| t.id == tab_id),
        })
    }

    /// The attached item that stands for `resource_id`, directly or through
    /// a prepared page tab or the active tab.
    pub fn get_resource_item(&self, resource_id: &str) -> Option<Arc<ContextItem>> {
        self.items().into_iter().find(|item| match item.kind() {
            ItemKind::Resource(r) => r.resource().id == resource_id,
            ItemKind::PageTab(_) | ItemKind::ActiveTab(_) => item
                .nested_item()
                .and_then(|n| n.resource_snapshot().map(|r| r.id == resource_id))
                .unwrap_or(false),
            _ => false,
        })
    }

    pub fn active_tab_item(&self) -> Option<Arc<ContextItem>> {
        self.find_type(ContextItemType::ActiveTab)
    }

    pub fn active_space_item(&self) -> Option<Arc<ContextItem>> {
        self.find_type(ContextItemType::ActiveSpace)
    }

    // ── Aggregation ────────────────────────────────────────────────

    /// Resource ids of every item, resolved concurrently, in item order with
    /// repeats removed. `prompt` is forwarded to items that search.
    pub async fn get_resource_ids(&self, prompt: Option<&str>) -> Vec<String> {
        let items = self.items();
        let services = self.services();
        let per_item = join_all(items.iter().map(|item| item.resource_ids(services, prompt))).await;
        let ids = dedup_preserving_order(per_item.into_iter().flatten().collect());
        debug!(scope = %self.key, items = items.len(), resources = ids.len(), "Collected resource ids");
        ids
    }

    pub async fn get_inline_images(&self) -> Vec<String> {
        let items = self.items();
        let services = self.services();
        let per_item = join_all(items.iter().map(|item| item.inline_images(services))).await;
        dedup_preserving_order(per_item.into_iter().flatten().collect())
    }

    // ── Prompts ────────────────────────────────────────────────────

    /// Prompt suggestions for what the active tab currently shows. Cached
    /// per resource; `force` regenerates.
    pub async fn get_prompts(&self, force: bool) -> Vec<ChatPrompt> {
        let prompts = self.compute_prompts(force).await;
        *lock(&self.generated_prompts) = prompts.clone();
        prompts
    }

    async fn compute_prompts(&self, force: bool) -> Vec<ChatPrompt> {
        let services = self.services();
        if !services.assistant.supports_json_format() {
            debug!("Assistant does not support JSON output, no prompts");
            return Vec::new();
        }
        let Some(active) = self.active_tab_item() else {
            debug!(scope = %self.key, "No active tab item, no prompts");
            return Vec::new();
        };
        let ItemKind::ActiveTab(tracker) = active.kind() else {
            return Vec::new();
        };
        let Some(item) = tracker.refresh(services).await else {
            debug!(scope = %self.key, "Active tab resolves to nothing, no prompts");
            return Vec::new();
        };

        let cache_key = prompt_cache_key(&item);
        if !force
            && let Some(cached) = lock(&self.prompt_cache).get(&cache_key)
            && !cached.is_empty()
        {
            return cached.clone();
        }
        let generated = item.generate_prompts(services).await;
        info!(scope = %self.key, item = %item.id(), count = generated.len(), "Generated prompts");
        lock(&self.prompt_cache).insert(cache_key, generated.clone());
        generated
    }

    /// Prompts from the last [`get_prompts`](Self::get_prompts) call.
    pub fn generated_prompts(&self) -> Vec<ChatPrompt> {
        lock(&self.generated_prompts).clone()
    }

    pub fn reset_prompts(&self) {
        lock(&self.generated_prompts).clear();
    }

    // ── Internals ──────────────────────────────────────────────────

    fn selects_tabs(&self) -> bool {
        self.services().config.tab_selection.applies_to(&self.key)
    }

    fn emit(
        &self,
        action: UpdateAction,
        total: usize,
        changed: usize,
        item_type: Option<ContextItemType>,
        trigger: Option<UpdateTrigger>,
    ) {
        let Some(trigger) = trigger else {
            return;
        };
        self.services().telemetry.on_update(&ContextUpdateEvent {
            action,
            total,
            changed,
            item_type,
            trigger,
        });
    }
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("key", &self.key)
            .field("items", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_CONTEXT_MANAGER_KEY;
    use crate::item::testing::Fixture;
    use crate::manager::persist::decode_stored;
    use crate::services::KeyValueStore;
    use crate::services::memory::{MemoryBrowserTab, ScriptedAssistant};
    use crate::telemetry::FnTelemetry;
    use crate::{SpaceEntry, SpaceEntryOrigin, resource_types};

    async fn manager(fx: &Fixture) -> ContextManager {
        ContextHub::new(fx.services.clone())
            .create_default(None)
            .await
    }

    fn live_page(fx: &Fixture, tab: Tab, resource_id: &str) {
        let id = tab.id.clone();
        fx.tabs.upsert_tab(tab);
        fx.tabs
            .attach_live(&id, fx.chat_tab(Resource::new(resource_id, resource_types::LINK)));
    }

    #[tokio::test]
    async fn add_is_idempotent_and_respects_index() {
        let fx = Fixture::new();
        fx.resources.insert(Resource::new("r1", resource_types::LINK));
        fx.resources.insert(Resource::new("r2", resource_types::LINK));
        let m = manager(&fx).await;

        let a = m.add_resource("r1", AddOptions::default()).await.unwrap();
        let again = m.add_resource("r1", AddOptions::default()).await.unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(m.len(), 1);

        m.add_home_context(AddOptions::default()).await;
        m.add_resource("r2", AddOptions::default().at(0).hidden())
            .await
            .unwrap();
        let ids: Vec<_> = m.items().iter().map(|i| i.id().to_string()).collect();
        assert_eq!(ids, vec!["resource:r2", "resource:r1", "home"]);
        assert!(!m.items()[0].is_visible());
    }

    #[tokio::test]
    async fn missing_references_are_errors() {
        let fx = Fixture::new();
        let m = manager(&fx).await;
        assert!(m.add_resource("nope", AddOptions::default()).await.unwrap_err().is_not_found());
        assert!(m.add_space("nope", AddOptions::default()).await.unwrap_err().is_not_found());
        assert!(m.add_tab("nope", AddOptions::default()).await.unwrap_err().is_not_found());

        fx.tabs.upsert_tab(Tab {
            kind: TabKind::Other,
            ..Tab::page("t9", "Settings", "about:settings")
        });
        let err = m.add_tab("t9", AddOptions::default()).await.unwrap_err();
        assert!(matches!(err, ContextError::UnsupportedTab(_)));
        assert!(m.is_empty());
    }

    #[tokio::test]
    async fn tabs_resolve_to_their_referent() {
        let fx = Fixture::new();
        fx.spaces.insert(Space::new("s1", "Trips"), Vec::new());
        fx.resources.insert(Resource::new("doc", "application/pdf"));
        fx.tabs.upsert_tab(Tab::space("ts", "Trips", "s1"));
        fx.tabs.upsert_tab(Tab::resource("tr", "Doc", "doc"));
        fx.tabs.upsert_tab(Tab::page("tp", "Page", "https://p.test/"));
        let m = manager(&fx).await;

        let space = m.add_tab("ts", AddOptions::default()).await.unwrap();
        assert_eq!(space.item_type(), ContextItemType::Space);
        let doc = m.add_tab("tr", AddOptions::default()).await.unwrap();
        assert_eq!(doc.item_type(), ContextItemType::Resource);
        let page = m.add_tab("tp", AddOptions::default()).await.unwrap();
        assert_eq!(page.id(), "tab:tp");

        assert!(Arc::ptr_eq(&m.get_tab_item("tr", false).unwrap(), &doc));
        assert_eq!(fx.tabs.selection(), vec!["ts", "tr", "tp"]);

        assert!(m.remove_tab_item("ts", None).await);
        assert!(!m.remove_tab_item("ts", None).await);
        assert_eq!(fx.tabs.selection(), vec!["tr", "tp"]);
        assert!(m.remove_resource_item("doc", None).await);
        assert_eq!(m.len(), 1);
    }

    #[tokio::test]
    async fn tab_selection_only_for_default_manager() {
        let fx = Fixture::new();
        fx.tabs.upsert_tab(Tab::page("t1", "A", "https://a.test/"));
        let hub = ContextHub::new(fx.services.clone());
        let other = hub.create(None, Some("note-1".into())).await;
        other.add_tab("t1", AddOptions::default()).await.unwrap();
        assert!(fx.tabs.selection().is_empty());

        let main = hub.create_default(None).await;
        main.add_tab("t1", AddOptions::default()).await.unwrap();
        assert_eq!(fx.tabs.selection(), vec!["t1"]);
        main.clear(None).await;
        assert!(fx.tabs.selection().is_empty());
        assert_eq!(main.key(), DEFAULT_CONTEXT_MANAGER_KEY);
    }

    #[tokio::test]
    async fn telemetry_reports_triggered_mutations() {
        let mut fx = Fixture::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        fx.services = fx
            .services
            .clone()
            .with_telemetry(Arc::new(FnTelemetry::new(move |e| {
                sink.lock().unwrap().push(e.clone())
            })));
        fx.tabs.upsert_tab(Tab::page("t1", "A", "https://a.test/"));
        fx.tabs.upsert_tab(Tab::page("t2", "B", "https://b.test/"));
        let m = manager(&fx).await;

        m.add_home_context(AddOptions::default()).await;
        m.add_everything_context(AddOptions::triggered(UpdateTrigger::ChatMention))
            .await;
        m.add_tabs(&["t1", "t2"], Some(UpdateTrigger::TabSelection))
            .await
            .unwrap();
        m.remove_context_item("home", Some(UpdateTrigger::AttachmentChip))
            .await;
        m.clear(Some(UpdateTrigger::ContextMenu)).await;

        let events = events.lock().unwrap();
        let actions: Vec<_> = events.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                UpdateAction::Add,
                UpdateAction::MultiSelect,
                UpdateAction::Remove,
                UpdateAction::Clear
            ]
        );
        assert_eq!(events[0].total, 2);
        assert_eq!(events[1].changed, 2);
        assert_eq!(events[2].item_type, Some(ContextItemType::Home));
        assert_eq!(events[3].changed, 3);
    }

    #[tokio::test]
    async fn mentions_toggle_active_space_include() {
        let fx = Fixture::new();
        let m = manager(&fx).await;

        let item = m
            .add_mention(&Mention::Tabs, AddOptions::default())
            .await
            .unwrap()
            .unwrap();
        let ItemKind::ActiveSpace(active) = item.kind() else {
            panic!("expected active space");
        };
        assert_eq!(active.include(), ActiveSpaceInclude::Tabs);

        m.add_mention(&Mention::ActiveContext, AddOptions::default())
            .await
            .unwrap();
        assert_eq!(active.include(), ActiveSpaceInclude::Everything);
        assert_eq!(m.len(), 1);

        m.add_mention(&Mention::Wikipedia, AddOptions::default())
            .await
            .unwrap();
        assert!(
            m.add_mention(&Mention::Resource("nope".into()), AddOptions::default())
                .await
                .is_err()
        );
        assert!(
            m.add_mention(&Mention::NoContext, AddOptions::default())
                .await
                .unwrap()
                .is_none()
        );
        assert!(m.is_empty());
    }

    #[tokio::test]
    async fn get_item_looks_inside_wrappers() {
        let fx = Fixture::new();
        live_page(&fx, Tab::page("t1", "A", "https://a.test/"), "ra");
        live_page(&fx, Tab::page("t2", "B", "https://b.test/"), "rb");
        fx.tabs.set_active_tab(Some("t2"));
        let m = manager(&fx).await;

        let page = m.add_tab("t1", AddOptions::default()).await.unwrap();
        let active = m.add_active_tab(AddOptions::default()).await;
        assert!(m.get_item("resource:ra").is_none());

        m.get_resource_ids(None).await;
        assert!(m.get_item("resource:ra").is_some());
        assert!(m.get_item("resource:rb").is_some());
        assert!(Arc::ptr_eq(&m.get_resource_item("ra").unwrap(), &page));
        assert!(Arc::ptr_eq(&m.get_resource_item("rb").unwrap(), &active));
        assert!(m.get_tab_item("t2", false).is_none());
        assert!(Arc::ptr_eq(&m.get_tab_item("t2", true).unwrap(), &active));
    }

    #[tokio::test]
    async fn aggregation_dedups_across_items() {
        let fx = Fixture::new();
        fx.resources.insert(Resource::new("shared", resource_types::LINK));
        fx.spaces.insert(
            Space::new("s1", "S"),
            vec![
                SpaceEntry {
                    resource_id: "shared".into(),
                    origin: SpaceEntryOrigin::Manual,
                },
                SpaceEntry {
                    resource_id: "other".into(),
                    origin: SpaceEntryOrigin::Manual,
                },
            ],
        );
        let m = manager(&fx).await;
        m.add_resource("shared", AddOptions::default()).await.unwrap();
        m.add_space("s1", AddOptions::default()).await.unwrap();
        m.add_screenshot(ImageData::png(vec![1u8]), AddOptions::default())
            .await;

        assert_eq!(m.get_resource_ids(None).await, vec!["shared", "other"]);
        assert_eq!(m.get_inline_images().await.len(), 1);
    }

    #[tokio::test]
    async fn prompts_follow_the_active_tab() {
        let mut fx = Fixture::new();
        let assistant = Arc::new(
            ScriptedAssistant::new().with_prompts(vec![ChatPrompt::new("Summarize", "Summarize")]),
        );
        fx.services = fx.services.clone().with_assistant(assistant.clone());
        live_page(&fx, Tab::page("t1", "A", "https://a.test/"), "ra");
        fx.resources.set_content("ra", "text");
        fx.tabs.set_active_tab(Some("t1"));
        let m = manager(&fx).await;

        assert!(m.get_prompts(false).await.is_empty());
        m.add_active_tab(AddOptions::default()).await;
        assert_eq!(m.get_prompts(false).await.len(), 1);
        assert_eq!(m.get_prompts(false).await.len(), 1);
        assert_eq!(assistant.prompt_calls(), 1);
        m.get_prompts(true).await;
        assert_eq!(assistant.prompt_calls(), 2);
        assert_eq!(m.generated_prompts().len(), 1);
        m.reset_prompts();
        assert!(m.generated_prompts().is_empty());
    }

    #[tokio::test]
    async fn prompts_need_json_support() {
        let mut fx = Fixture::new();
        fx.services = fx
            .services
            .clone()
            .with_assistant(Arc::new(ScriptedAssistant::new().with_json_support(false)));
        let m = manager(&fx).await;
        m.add_active_tab(AddOptions::default()).await;
        assert!(m.get_prompts(true).await.is_empty());
    }

    #[tokio::test]
    async fn tab_screenshot_requires_live_handle() {
        let fx = Fixture::new();
        let m = manager(&fx).await;
        let err = m.add_tab_screenshot("t1", AddOptions::default()).await.unwrap_err();
        assert!(matches!(err, ContextError::BrowserTabUnavailable(_)));

        fx.tabs.attach_live("t1", Arc::new(MemoryBrowserTab::new()));
        let err = m.add_tab_screenshot("t1", AddOptions::default()).await.unwrap_err();
        assert!(matches!(err, ContextError::CaptureFailed(_)));

        fx.tabs.attach_live(
            "t2",
            Arc::new(MemoryBrowserTab::new().with_capture(ImageData::png(vec![9u8]))),
        );
        let shot = m.add_tab_screenshot("t2", AddOptions::default()).await.unwrap();
        assert_eq!(shot.item_type(), ContextItemType::Screenshot);
        assert_eq!(m.screenshots_in_context().len(), 1);
    }

    fn stored_ids(fx: &Fixture, key: &str) -> Vec<String> {
        let json = fx.storage.get(key).unwrap().unwrap();
        decode_stored(&json).entries.into_iter().map(|e| e.id).collect()
    }

    #[tokio::test]
    async fn replace_with_destroys_evicted_items() {
        let fx = Fixture::new();
        fx.resources.insert(Resource::new("r1", resource_types::LINK));
        fx.resources.insert(Resource::new("r2", resource_types::LINK));
        let hub = ContextHub::new(fx.services.clone());
        let main = hub.create_default(None).await;
        let home = main.add_home_context(AddOptions::default()).await;
        let shared = main.add_resource("r1", AddOptions::default()).await.unwrap();

        let note = hub.create(Some(vec![shared.clone()]), Some("note-1".into())).await;
        note.add_resource("r2", AddOptions::default()).await.unwrap();

        main.replace_with(&note).await;
        let ids: Vec<_> = main.items().iter().map(|i| i.id().to_string()).collect();
        assert_eq!(ids, vec!["resource:r1", "resource:r2"]);
        assert!(home.is_destroyed());
        assert!(!shared.is_destroyed());
        assert_eq!(
            stored_ids(&fx, DEFAULT_CONTEXT_MANAGER_KEY),
            vec!["resource:r1", "resource:r2"]
        );
    }

    #[tokio::test]
    async fn only_use_tab_detaches_everything_else() {
        let fx = Fixture::new();
        fx.resources.insert(Resource::new("r1", resource_types::LINK));
        fx.spaces.insert(Space::new("s1", "S"), Vec::new());
        fx.tabs.upsert_tab(Tab::resource("t1", "Doc", "r1"));
        fx.tabs.upsert_tab(Tab::page("t2", "B", "https://b.test/"));
        let m = manager(&fx).await;
        let home = m.add_home_context(AddOptions::default()).await;
        m.add_space("s1", AddOptions::default()).await.unwrap();
        m.add_tab("t2", AddOptions::default()).await.unwrap();
        assert_eq!(fx.tabs.selection(), vec!["t2"]);

        assert!(m.only_use_tab_in_context("missing", None).await.is_err());
        assert_eq!(m.len(), 3);

        let item = m.only_use_tab_in_context("t1", None).await.unwrap();
        assert_eq!(item.id(), "resource:r1");
        let ids: Vec<_> = m.items().iter().map(|i| i.id().to_string()).collect();
        assert_eq!(ids, vec!["resource:r1"]);
        assert!(home.is_destroyed());
        assert_eq!(fx.tabs.selection(), vec!["t1"]);
        assert_eq!(stored_ids(&fx, DEFAULT_CONTEXT_MANAGER_KEY), vec!["resource:r1"]);
    }

    #[tokio::test]
    async fn add_tabs_counts_only_newly_attached() {
        let mut fx = Fixture::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        fx.services = fx
            .services
            .clone()
            .with_telemetry(Arc::new(FnTelemetry::new(move |e| {
                sink.lock().unwrap().push(e.clone())
            })));
        fx.tabs.upsert_tab(Tab::page("t1", "A", "https://a.test/"));
        fx.tabs.upsert_tab(Tab::page("t2", "B", "https://b.test/"));
        let m = manager(&fx).await;
        m.add_tab("t1", AddOptions::default()).await.unwrap();

        m.add_tabs(&["t1", "t2"], Some(UpdateTrigger::TabSelection))
            .await
            .unwrap();
        let events = events.lock().unwrap();
        let multi = events
            .iter()
            .find(|e| e.action == UpdateAction::MultiSelect)
            .unwrap();
        assert_eq!(multi.total, 2);
        assert_eq!(multi.changed, 1);
    }
}
