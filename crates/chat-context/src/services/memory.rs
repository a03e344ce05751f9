//! In-memory collaborator backends.
//!
//! Used by tests and by embedders that want a working context layer before
//! wiring real storage. Each backend is thread-safe via internal `Mutex`es
//! and counts the calls tests usually want to assert on.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{
    Assistant, BrowserTab, ChatResourceOptions, DetectedApp, KeyValueStore, PromptSource,
    ResourceStore, SpaceStore, StoreFuture, TabRegistry, WikipediaPage, WikipediaSource,
};
use crate::{
    ChatPrompt, ContextError, ImageData, NewResourceLink, Resource, ResourceQuery, ResourceTag,
    Result, Space, SpaceEntry, Tab, resource_types,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Resources ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryResourceStore {
    resources: Mutex<Vec<Resource>>,
    data: Mutex<HashMap<String, ImageData>>,
    content: Mutex<HashMap<String, String>>,
    in_space: Mutex<HashSet<String>>,
    deleted: Mutex<Vec<String>>,
    next_link: AtomicUsize,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, resource: Resource) {
        let mut resources = lock(&self.resources);
        resources.retain(|r| r.id != resource.id);
        resources.push(resource);
    }

    pub fn set_data(&self, id: &str, data: ImageData) {
        lock(&self.data).insert(id.to_string(), data);
    }

    pub fn set_content(&self, id: &str, content: impl Into<String>) {
        lock(&self.content).insert(id.to_string(), content.into());
    }

    /// Record that `id` belongs to some space.
    pub fn mark_in_space(&self, id: &str) {
        lock(&self.in_space).insert(id.to_string());
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.resources).iter().any(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        lock(&self.resources).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every id passed to `delete_resources`, in call order, repeats included.
    pub fn deleted_ids(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }

    pub fn created_links(&self) -> usize {
        self.next_link.load(Ordering::SeqCst)
    }
}

impl ResourceStore for MemoryResourceStore {
    fn get_resource<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Resource>> {
        let found = lock(&self.resources).iter().find(|r| r.id == id).cloned();
        Box::pin(async move { found })
    }

    fn get_resource_data<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<ImageData>> {
        let found = lock(&self.data).get(id).cloned();
        Box::pin(async move { found })
    }

    fn get_resource_content<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<String>> {
        let found = lock(&self.content).get(id).cloned();
        Box::pin(async move { found })
    }

    fn create_resource_link(&self, link: NewResourceLink) -> StoreFuture<'_, Result<Resource>> {
        Box::pin(async move {
            let n = self.next_link.fetch_add(1, Ordering::SeqCst) + 1;
            let mut resource = Resource::new(format!("link-{n}"), resource_types::LINK)
                .with_name(link.title)
                .with_source_uri(link.url.clone())
                .with_tag(ResourceTag::canonical_url(link.url));
            resource.tags.extend(link.tags);
            if let Some(html) = link.content_html {
                self.set_content(&resource.id, html);
            }
            self.insert(resource.clone());
            Ok(resource)
        })
    }

    fn delete_resources<'a>(&'a self, ids: &'a [String]) -> StoreFuture<'a, Result<()>> {
        Box::pin(async move {
            lock(&self.resources).retain(|r| !ids.contains(&r.id));
            lock(&self.deleted).extend(ids.iter().cloned());
            Ok(())
        })
    }

    fn list_resource_ids<'a>(&'a self, query: &'a ResourceQuery) -> StoreFuture<'a, Vec<String>> {
        let in_space = lock(&self.in_space).clone();
        let ids = lock(&self.resources)
            .iter()
            .filter(|r| query.matches(r, in_space.contains(&r.id)))
            .map(|r| r.id.clone())
            .collect();
        Box::pin(async move { ids })
    }
}

// ── Spaces ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemorySpaceStore {
    spaces: Mutex<HashMap<String, Space>>,
    contents: Mutex<HashMap<String, Vec<SpaceEntry>>>,
}

impl MemorySpaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, space: Space, entries: Vec<SpaceEntry>) {
        lock(&self.contents).insert(space.id.clone(), entries);
        lock(&self.spaces).insert(space.id.clone(), space);
    }

    pub fn remove(&self, id: &str) {
        lock(&self.spaces).remove(id);
        lock(&self.contents).remove(id);
    }
}

impl SpaceStore for MemorySpaceStore {
    fn get_space<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Space>> {
        let found = lock(&self.spaces).get(id).cloned();
        Box::pin(async move { found })
    }

    fn space_contents<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Vec<SpaceEntry>> {
        let entries = lock(&self.contents).get(id).cloned().unwrap_or_default();
        Box::pin(async move { entries })
    }
}

// ── Browser tabs ───────────────────────────────────────────────────

/// Scripted live tab handle.
#[derive(Default)]
pub struct MemoryBrowserTab {
    chat_resource: Mutex<Option<Resource>>,
    store: Option<Arc<MemoryResourceStore>>,
    detected: Option<DetectedApp>,
    detection_delay: Duration,
    capture: Option<ImageData>,
    create_calls: AtomicUsize,
    detection_calls: AtomicUsize,
    last_options: Mutex<Option<ChatResourceOptions>>,
}

impl MemoryBrowserTab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resource returned by `create_resource_for_chat`. Without one the call
    /// yields `None`.
    pub fn with_chat_resource(self, resource: Resource) -> Self {
        *lock(&self.chat_resource) = Some(resource);
        self
    }

    /// Save created chat resources into `store`, as a browser would.
    pub fn with_store(mut self, store: Arc<MemoryResourceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_detection(mut self, app: DetectedApp, delay: Duration) -> Self {
        self.detected = Some(app);
        self.detection_delay = delay;
        self
    }

    pub fn with_capture(mut self, image: ImageData) -> Self {
        self.capture = Some(image);
        self
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn detection_calls(&self) -> usize {
        self.detection_calls.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<ChatResourceOptions> {
        *lock(&self.last_options)
    }
}

impl BrowserTab for MemoryBrowserTab {
    fn wait_for_app_detection(&self, timeout: Duration) -> StoreFuture<'_, Option<DetectedApp>> {
        self.detection_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if self.detection_delay > timeout {
                tokio::time::sleep(timeout).await;
                return None;
            }
            if !self.detection_delay.is_zero() {
                tokio::time::sleep(self.detection_delay).await;
            }
            self.detected.clone()
        })
    }

    fn create_resource_for_chat(
        &self,
        options: ChatResourceOptions,
    ) -> StoreFuture<'_, Option<Resource>> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_options) = Some(options);
        let resource = lock(&self.chat_resource).clone();
        if let (Some(store), Some(created)) = (&self.store, &resource) {
            store.insert(created.clone());
        }
        Box::pin(async move { resource })
    }

    fn capture_page(&self) -> StoreFuture<'_, Option<ImageData>> {
        let image = self.capture.clone();
        Box::pin(async move { image })
    }
}

// ── Tab registry ───────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryTabRegistry {
    tabs: Mutex<Vec<Tab>>,
    active_tab: Mutex<Option<String>>,
    active_scope: Mutex<Option<String>>,
    activated: Mutex<HashSet<String>>,
    live: Mutex<HashMap<String, Arc<dyn BrowserTab>>>,
    dormant: Mutex<HashMap<String, Arc<dyn BrowserTab>>>,
    selection: Mutex<Vec<String>>,
    ready_delay: Duration,
    activations: AtomicUsize,
}

impl MemoryTabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long `activate_tab` takes before the tab reports ready.
    pub fn with_ready_delay(mut self, delay: Duration) -> Self {
        self.ready_delay = delay;
        self
    }

    /// Insert or replace a tab by id.
    pub fn upsert_tab(&self, tab: Tab) {
        let mut tabs = lock(&self.tabs);
        match tabs.iter_mut().find(|t| t.id == tab.id) {
            Some(existing) => *existing = tab,
            None => tabs.push(tab),
        }
    }

    pub fn close_tab(&self, id: &str) {
        lock(&self.tabs).retain(|t| t.id != id);
        lock(&self.live).remove(id);
        lock(&self.activated).remove(id);
    }

    pub fn set_active_tab(&self, id: Option<&str>) {
        *lock(&self.active_tab) = id.map(str::to_string);
    }

    pub fn set_active_scope(&self, scope_id: Option<&str>) {
        *lock(&self.active_scope) = scope_id.map(str::to_string);
    }

    /// Register an already activated tab with a live handle.
    pub fn attach_live(&self, id: &str, handle: Arc<dyn BrowserTab>) {
        lock(&self.activated).insert(id.to_string());
        lock(&self.live).insert(id.to_string(), handle);
    }

    /// Register a handle that only becomes live once the tab is activated.
    pub fn attach_dormant(&self, id: &str, handle: Arc<dyn BrowserTab>) {
        lock(&self.dormant).insert(id.to_string(), handle);
    }

    pub fn selection(&self) -> Vec<String> {
        lock(&self.selection).clone()
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }
}

impl TabRegistry for MemoryTabRegistry {
    fn tabs(&self) -> Vec<Tab> {
        lock(&self.tabs).clone()
    }

    fn active_tab(&self) -> Option<Tab> {
        let id = lock(&self.active_tab).clone()?;
        self.tab(&id)
    }

    fn active_scope_id(&self) -> Option<String> {
        lock(&self.active_scope).clone()
    }

    fn is_activated(&self, id: &str) -> bool {
        lock(&self.activated).contains(id)
    }

    fn activate_tab<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        lock(&self.activated).insert(id.to_string());
        if let Some(handle) = lock(&self.dormant).remove(id) {
            lock(&self.live).insert(id.to_string(), handle);
        }
        let delay = self.ready_delay;
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        })
    }

    fn browser_tab(&self, id: &str) -> Option<Arc<dyn BrowserTab>> {
        lock(&self.live).get(id).cloned()
    }

    fn add_tab_to_selection(&self, id: &str) {
        let mut selection = lock(&self.selection);
        if !selection.iter().any(|s| s == id) {
            selection.push(id.to_string());
        }
    }

    fn remove_tab_from_selection(&self, id: &str) {
        lock(&self.selection).retain(|s| s != id);
    }

    fn clear_tab_selection(&self) {
        lock(&self.selection).clear();
    }
}

// ── Key-value storage ──────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<BTreeMap<String, String>>,
    writes: AtomicUsize,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(lock(&self.entries).keys().cloned().collect())
    }
}

// ── Assistant ──────────────────────────────────────────────────────

/// Assistant that answers from fixed scripts.
#[derive(Default)]
pub struct ScriptedAssistant {
    supports_json: bool,
    prompts: Vec<ChatPrompt>,
    completion: Option<String>,
    prompt_calls: AtomicUsize,
    complete_calls: AtomicUsize,
}

impl ScriptedAssistant {
    pub fn new() -> Self {
        Self {
            supports_json: true,
            ..Self::default()
        }
    }

    pub fn with_json_support(mut self, supported: bool) -> Self {
        self.supports_json = supported;
        self
    }

    pub fn with_prompts(mut self, prompts: Vec<ChatPrompt>) -> Self {
        self.prompts = prompts;
        self
    }

    /// Text returned by `complete`. Without one `complete` fails.
    pub fn with_completion(mut self, text: impl Into<String>) -> Self {
        self.completion = Some(text.into());
        self
    }

    pub fn prompt_calls(&self) -> usize {
        self.prompt_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }
}

impl Assistant for ScriptedAssistant {
    fn supports_json_format(&self) -> bool {
        self.supports_json
    }

    fn generate_prompts(&self, _source: PromptSource) -> StoreFuture<'_, Result<Vec<ChatPrompt>>> {
        self.prompt_calls.fetch_add(1, Ordering::SeqCst);
        let prompts = self.prompts.clone();
        Box::pin(async move { Ok(prompts) })
    }

    fn complete<'a>(&'a self, _prompt: &'a str, _system: &'a str) -> StoreFuture<'a, Result<String>> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        let completion = self
            .completion
            .clone()
            .ok_or_else(|| ContextError::Assistant("no scripted completion".into()));
        Box::pin(async move { completion })
    }
}

// ── Wikipedia ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryWikipedia {
    pages: Mutex<HashMap<(String, String), WikipediaPage>>,
    lookups: AtomicUsize,
}

impl MemoryWikipedia {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `page` the answer for `title` (case-insensitive) in `lang`.
    pub fn insert(&self, lang: &str, title: &str, page: WikipediaPage) {
        lock(&self.pages).insert((lang.to_string(), title.to_lowercase()), page);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl WikipediaSource for MemoryWikipedia {
    fn first_page<'a>(
        &'a self,
        title: &'a str,
        lang: &'a str,
    ) -> StoreFuture<'a, Option<WikipediaPage>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let page = lock(&self.pages)
            .get(&(lang.to_string(), title.to_lowercase()))
            .cloned();
        Box::pin(async move { page })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SpaceEntryOrigin, tag_keys};

    #[tokio::test]
    async fn resource_store_links_and_deletes() {
        let store = MemoryResourceStore::new();
        let created = store
            .create_resource_link(NewResourceLink {
                url: "https://en.wikipedia.org/wiki/Rust".into(),
                title: "Rust".into(),
                content_html: Some("<p>Rust</p>".into()),
                tags: vec![ResourceTag::silent()],
            })
            .await
            .unwrap();
        assert_eq!(created.id, "link-1");
        assert!(created.has_tag(tag_keys::SILENT));
        assert_eq!(
            store.get_resource_content("link-1").await.as_deref(),
            Some("<p>Rust</p>")
        );

        store.delete_resources(&["link-1".to_string()]).await.unwrap();
        assert!(!store.contains("link-1"));
        assert_eq!(store.deleted_ids(), vec!["link-1".to_string()]);
    }

    #[tokio::test]
    async fn resource_store_query_respects_spaces() {
        let store = MemoryResourceStore::new();
        store.insert(Resource::new("a", resource_types::LINK));
        store.insert(Resource::new("b", resource_types::LINK));
        store.mark_in_space("b");
        let all = store.list_resource_ids(&ResourceQuery::non_hidden()).await;
        assert_eq!(all, vec!["a", "b"]);
        let loose = store
            .list_resource_ids(&ResourceQuery::non_hidden().outside_spaces())
            .await;
        assert_eq!(loose, vec!["a"]);
    }

    #[tokio::test]
    async fn activation_promotes_dormant_handle() {
        let registry = MemoryTabRegistry::new();
        registry.upsert_tab(Tab::page("t1", "A", "https://a.test/"));
        registry.attach_dormant("t1", Arc::new(MemoryBrowserTab::new()));
        assert!(!registry.is_activated("t1"));
        assert!(registry.browser_tab("t1").is_none());

        registry.activate_tab("t1").await;
        assert!(registry.is_activated("t1"));
        assert!(registry.browser_tab("t1").is_some());
        assert_eq!(registry.activations(), 1);
    }

    #[tokio::test]
    async fn detection_honours_timeout() {
        let tab = MemoryBrowserTab::new().with_detection(
            DetectedApp {
                app_id: "youtube".into(),
                app_name: None,
            },
            Duration::from_millis(50),
        );
        assert!(tab.wait_for_app_detection(Duration::from_millis(5)).await.is_none());
        assert!(tab.wait_for_app_detection(Duration::from_millis(500)).await.is_some());
        assert_eq!(tab.detection_calls(), 2);
    }

    #[test]
    fn selection_is_a_set() {
        let registry = MemoryTabRegistry::new();
        registry.add_tab_to_selection("a");
        registry.add_tab_to_selection("a");
        registry.add_tab_to_selection("b");
        registry.remove_tab_from_selection("a");
        assert_eq!(registry.selection(), vec!["b"]);
        registry.clear_tab_selection();
        assert!(registry.selection().is_empty());
    }

    #[tokio::test]
    async fn space_store_returns_entries() {
        let spaces = MemorySpaceStore::new();
        spaces.insert(
            Space::new("s1", "Research"),
            vec![SpaceEntry {
                resource_id: "r1".into(),
                origin: SpaceEntryOrigin::Manual,
            }],
        );
        assert_eq!(spaces.space_contents("s1").await.len(), 1);
        assert!(spaces.space_contents("missing").await.is_empty());
        spaces.remove("s1");
        assert!(spaces.get_space("s1").await.is_none());
    }
}
