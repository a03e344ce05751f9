//! Shared owner of context items across managers.
//!
//! A [`ContextHub`] keeps one ordered item list per scope. Every
//! [`ContextManager`] is a view onto one scope, named by its storage key.
//! The same item instance may sit in several scopes (a forked conversation
//! shares its parent's items), and its `on_destroy` hook only runs once the
//! last scope lets go of it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::DEFAULT_CONTEXT_MANAGER_KEY;
use crate::item::{ContextItem, lock};
use crate::manager::ContextManager;
use crate::services::ContextServices;

/// Outcome of [`ContextHub::update_scope`].
#[derive(Debug, Default)]
pub struct ScopeUpdate {
    /// Items now in the scope that were not before.
    pub added: Vec<Arc<ContextItem>>,
    /// Items that left the scope.
    pub removed: Vec<Arc<ContextItem>>,
    /// How many of the removed items were destroyed because no other scope
    /// holds them.
    pub destroyed: usize,
}

pub struct ContextHub {
    services: ContextServices,
    scopes: Mutex<HashMap<String, Vec<Arc<ContextItem>>>>,
    // Serializes `update_scope` so transforms can run outside `scopes`.
    updating: tokio::sync::Mutex<()>,
}

impl ContextHub {
    pub fn new(services: ContextServices) -> Arc<Self> {
        Arc::new(Self {
            services,
            scopes: Mutex::new(HashMap::new()),
            updating: tokio::sync::Mutex::new(()),
        })
    }

    pub fn services(&self) -> &ContextServices {
        &self.services
    }

    /// Snapshot of a scope's items in order. Unknown scopes are empty.
    pub fn scoped_items(&self, scope: &str) -> Vec<Arc<ContextItem>> {
        lock(&self.scopes).get(scope).cloned().unwrap_or_default()
    }

    pub fn scopes(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.scopes).keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn is_in_scope(&self, scope: &str, item_id: &str) -> bool {
        lock(&self.scopes)
            .get(scope)
            .is_some_and(|items| items.iter().any(|i| i.id() == item_id))
    }

    /// Replace a scope's items with `transform(current)`.
    ///
    /// Later duplicates of an id are dropped. Items that leave the scope and
    /// are held by no other scope are destroyed after the new list is
    /// committed.
    ///
    /// Updates are applied one at a time. `transform` runs without any hub
    /// lock held, so it may read this or any other scope.
    pub async fn update_scope<F>(&self, scope: &str, transform: F) -> ScopeUpdate
    where
        F: FnOnce(Vec<Arc<ContextItem>>) -> Vec<Arc<ContextItem>>,
    {
        let updating = self.updating.lock().await;
        let old = self.scoped_items(scope);
        let mut seen = HashSet::new();
        let new: Vec<Arc<ContextItem>> = transform(old.clone())
            .into_iter()
            .filter(|item| seen.insert(item.id().to_string()))
            .collect();

        let (update, orphans) = {
            let mut scopes = lock(&self.scopes);

            let removed: Vec<_> = old
                .iter()
                .filter(|o| !new.iter().any(|n| Arc::ptr_eq(o, n)))
                .cloned()
                .collect();
            let added: Vec<_> = new
                .iter()
                .filter(|n| !old.iter().any(|o| Arc::ptr_eq(o, n)))
                .cloned()
                .collect();

            scopes.insert(scope.to_string(), new);
            let orphans: Vec<_> = removed
                .iter()
                .filter(|item| {
                    !scopes
                        .values()
                        .any(|items| items.iter().any(|i| Arc::ptr_eq(i, item)))
                })
                .cloned()
                .collect();

            let update = ScopeUpdate {
                added,
                removed,
                destroyed: orphans.len(),
            };
            (update, orphans)
        };
        drop(updating);

        if !update.added.is_empty() || !update.removed.is_empty() {
            debug!(
                scope,
                added = update.added.len(),
                removed = update.removed.len(),
                destroyed = update.destroyed,
                "Updated context scope"
            );
        }
        for item in &orphans {
            item.on_destroy(&self.services).await;
        }
        update
    }

    /// Empty a scope and forget it.
    pub async fn drop_scope(&self, scope: &str) -> ScopeUpdate {
        let update = self.update_scope(scope, |_| Vec::new()).await;
        lock(&self.scopes).remove(scope);
        update
    }

    /// A manager over a new scope. `items` are appended to whatever the
    /// scope already holds; the key defaults to a random `context-<uuid>`.
    pub async fn create(
        self: &Arc<Self>,
        items: Option<Vec<Arc<ContextItem>>>,
        key: Option<String>,
    ) -> ContextManager {
        let key = key.unwrap_or_else(|| format!("context-{}", uuid::Uuid::new_v4()));
        debug!(scope = %key, "Creating context manager");
        if let Some(items) = items {
            self.update_scope(&key, |mut existing| {
                existing.extend(items);
                existing
            })
            .await;
        }
        ContextManager::new(key, Arc::clone(self))
    }

    /// The manager behind the main chat, keyed
    /// [`DEFAULT_CONTEXT_MANAGER_KEY`].
    pub async fn create_default(
        self: &Arc<Self>,
        items: Option<Vec<Arc<ContextItem>>>,
    ) -> ContextManager {
        self.create(items, Some(DEFAULT_CONTEXT_MANAGER_KEY.to_string()))
            .await
    }
}

impl std::fmt::Debug for ContextHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHub")
            .field("scopes", &self.scopes())
            .finish_non_exhaustive()
    }
}

// ── Notes ──────────────────────────────────────────────────────────

/// The context a note's chat uses: the note's own manager if it has one,
/// otherwise a fallback manager supplied by the host.
#[derive(Debug, Clone)]
pub struct NoteContext {
    own: Option<Arc<ContextManager>>,
    fallback: Arc<ContextManager>,
}

impl NoteContext {
    pub fn new(fallback: Arc<ContextManager>) -> Self {
        Self {
            own: None,
            fallback,
        }
    }

    pub fn with_own(mut self, manager: Arc<ContextManager>) -> Self {
        self.own = Some(manager);
        self
    }

    pub fn has_own(&self) -> bool {
        self.own.is_some()
    }

    pub fn fallback(&self) -> &Arc<ContextManager> {
        &self.fallback
    }

    pub fn manager(&self) -> &Arc<ContextManager> {
        self.own.as_ref().unwrap_or(&self.fallback)
    }

    /// Copy the fallback's items into the note's own manager when the note
    /// has one and it is still empty. Returns whether anything was copied.
    pub async fn seed_from_fallback(&self) -> bool {
        let Some(own) = &self.own else {
            return false;
        };
        if !own.is_empty() || self.fallback.is_empty() {
            return false;
        }
        debug!(note = %own.key(), "Seeding note context from fallback");
        own.replace_with(&self.fallback).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::testing::Fixture;
    use crate::{Resource, Space, resource_types};

    #[tokio::test]
    async fn shared_items_are_destroyed_by_the_last_scope() {
        let fx = Fixture::new();
        let hub = ContextHub::new(fx.services.clone());
        let home = ContextItem::home();

        hub.update_scope("a", |_| vec![home.clone()]).await;
        hub.update_scope("b", |_| vec![home.clone()]).await;

        let update = hub.update_scope("a", |_| Vec::new()).await;
        assert_eq!(update.removed.len(), 1);
        assert_eq!(update.destroyed, 0);
        assert!(!home.is_destroyed());

        let update = hub.update_scope("b", |_| Vec::new()).await;
        assert_eq!(update.destroyed, 1);
        assert!(home.is_destroyed());
    }

    #[tokio::test]
    async fn duplicate_ids_keep_the_first() {
        let fx = Fixture::new();
        let hub = ContextHub::new(fx.services.clone());
        let first = ContextItem::resource(Resource::new("r1", resource_types::LINK), None);
        let second = ContextItem::resource(Resource::new("r1", resource_types::LINK), None);
        let space = ContextItem::space(Space::new("s1", "S"), None);

        let update = hub
            .update_scope("a", |_| vec![first.clone(), space.clone(), second.clone()])
            .await;
        assert_eq!(update.added.len(), 2);
        let items = hub.scoped_items("a");
        assert_eq!(items.len(), 2);
        assert!(Arc::ptr_eq(&items[0], &first));
        assert!(hub.is_in_scope("a", "space:s1"));
        assert!(!hub.is_in_scope("b", "space:s1"));
    }

    #[tokio::test]
    async fn create_appends_and_defaults_key() {
        let fx = Fixture::new();
        let hub = ContextHub::new(fx.services.clone());
        let manager = hub.create(Some(vec![ContextItem::home()]), None).await;
        assert!(manager.key().starts_with("context-"));
        assert_eq!(manager.len(), 1);

        let default = hub.create_default(None).await;
        assert_eq!(default.key(), DEFAULT_CONTEXT_MANAGER_KEY);
        assert!(default.is_empty());
        assert_eq!(hub.scopes(), vec![manager.key().to_string()]);

        let dropped = hub.drop_scope(manager.key()).await;
        assert_eq!(dropped.destroyed, 1);
        assert!(hub.scopes().is_empty());
    }

    #[tokio::test]
    async fn note_context_falls_back() {
        let fx = Fixture::new();
        let hub = ContextHub::new(fx.services.clone());
        let fallback = Arc::new(hub.create(Some(vec![ContextItem::home()]), None).await);
        let note = NoteContext::new(fallback.clone());
        assert!(!note.has_own());
        assert_eq!(note.manager().key(), fallback.key());
        assert!(!note.seed_from_fallback().await);

        let own = Arc::new(hub.create(None, Some("note-1".into())).await);
        let note = note.with_own(own.clone());
        assert_eq!(note.manager().key(), "note-1");
        assert!(note.seed_from_fallback().await);
        assert_eq!(own.len(), 1);
        assert!(!note.seed_from_fallback().await);
    }

    #[tokio::test]
    async fn transforms_may_read_the_hub() {
        let fx = Fixture::new();
        let hub = ContextHub::new(fx.services.clone());
        let m = hub.create(Some(vec![ContextItem::home()]), Some("a".into())).await;

        let update = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            m.update_items(|mut items| {
                assert_eq!(m.len(), 1);
                assert!(hub.scoped_items("b").is_empty());
                items.push(ContextItem::everything());
                items
            }),
        )
        .await
        .expect("update finished");
        assert_eq!(update.added.len(), 1);
        assert_eq!(m.len(), 2);
    }
}
