use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::{ContextItem, lock};
use crate::prepare::prepare_page_tab;
use crate::services::ContextServices;
use crate::{Resource, Tab};

/// A specific open page that is not (yet) a resource.
///
/// The first capability call, or the background task started on creation,
/// runs the preparation pipeline and keeps the resulting resource item.
/// Concurrent callers wait for the same run. A result that arrives after the
/// owning item was destroyed is discarded.
#[derive(Debug)]
pub struct PageTabItem {
    tab: Tab,
    prepared: Mutex<Option<Arc<ContextItem>>>,
    preparing: tokio::sync::Mutex<()>,
}

impl PageTabItem {
    pub(crate) fn new(tab: Tab) -> Self {
        Self {
            tab,
            prepared: Mutex::new(None),
            preparing: tokio::sync::Mutex::new(()),
        }
    }

    pub fn tab(&self) -> &Tab {
        &self.tab
    }

    /// The prepared resource item, if preparation already succeeded.
    pub fn prepared(&self) -> Option<Arc<ContextItem>> {
        lock(&self.prepared).clone()
    }

    pub fn prepared_resource(&self) -> Option<Resource> {
        self.prepared()
            .and_then(|item| item.resource_snapshot().cloned())
    }

    pub(crate) async fn prepare(
        &self,
        services: &ContextServices,
        destroyed: &AtomicBool,
    ) -> Option<Arc<ContextItem>> {
        let _running = self.preparing.lock().await;
        if let Some(item) = self.prepared() {
            return Some(item);
        }
        if destroyed.load(Ordering::SeqCst) {
            return None;
        }

        let resource = match prepare_page_tab(services, &self.tab).await {
            Ok(resource) => resource,
            Err(e) => {
                warn!(tab = %self.tab.id, "Failed to prepare page tab: {e}");
                return None;
            }
        };

        if destroyed.load(Ordering::SeqCst) {
            debug!(tab = %self.tab.id, resource = %resource.id, "Item destroyed during preparation, discarding result");
            return None;
        }
        let item = ContextItem::resource(resource, Some(self.tab.clone()));
        *lock(&self.prepared) = Some(item.clone());
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemKind;
    use crate::item::testing::Fixture;
    use crate::services::memory::MemoryBrowserTab;
    use crate::{ResourceTag, resource_types};

    fn fixture_with_tab() -> (Fixture, Arc<MemoryBrowserTab>) {
        let fx = Fixture::new();
        let handle = fx.chat_tab(
            Resource::new("chat-1", resource_types::LINK)
                .with_tag(ResourceTag::canonical_url("https://a.test/")),
        );
        fx.tabs.upsert_tab(Tab::page("t1", "A", "https://a.test/"));
        fx.tabs.attach_live("t1", handle.clone());
        (fx, handle)
    }

    #[tokio::test]
    async fn prepares_once_for_concurrent_callers() {
        let (fx, handle) = fixture_with_tab();
        let item = ContextItem::page_tab(Tab::page("t1", "A", "https://a.test/"), &fx.services);
        assert!(item.nested_item().is_none());

        let (a, b) = tokio::join!(
            item.resource_ids(&fx.services, None),
            item.resource_ids(&fx.services, None)
        );
        assert_eq!(a, vec!["chat-1"]);
        assert_eq!(b, vec!["chat-1"]);
        assert_eq!(handle.create_calls(), 1);

        let ItemKind::PageTab(page) = item.kind() else {
            panic!("expected a page tab");
        };
        assert_eq!(page.prepared_resource().map(|r| r.id).as_deref(), Some("chat-1"));
        assert_eq!(item.label(), "A");
    }

    #[tokio::test]
    async fn destroyed_item_discards_result() {
        let (fx, handle) = fixture_with_tab();
        let item = ContextItem::page_tab(Tab::page("t1", "A", "https://a.test/"), &fx.services);
        item.on_destroy(&fx.services).await;

        assert!(item.resource_ids(&fx.services, None).await.is_empty());
        assert!(item.nested_item().is_none());
        assert_eq!(handle.create_calls(), 0);
    }

    #[tokio::test]
    async fn eager_preparation_runs_in_background() {
        let (mut fx, handle) = fixture_with_tab();
        fx.services = fx
            .services
            .clone()
            .with_config(crate::config::ContextConfig::default());
        let item = ContextItem::page_tab(Tab::page("t1", "A", "https://a.test/"), &fx.services);

        for _ in 0..50 {
            if item.nested_item().is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(item.nested_item().is_some());
        item.resource_ids(&fx.services, None).await;
        assert_eq!(handle.create_calls(), 1);
    }
}
