//! Read-only projections of a manager's items.
//!
//! Each view is recomputed from the current items on every call. Items that
//! currently resolve to nothing are left out. Resource items count as
//! resolved until an aggregation call finds their resource gone.

use super::ContextManager;
use crate::item::ItemKind;
use crate::{ImageData, Resource, Space, Tab};

impl ContextManager {
    /// Tabs bound to page-tab, resource, space and active-tab items.
    ///
    /// The active-tab item reports the registry's active tab when the tab it
    /// last resolved is a different one.
    pub fn tabs_in_context(&self) -> Vec<Tab> {
        let registry_active = self.services().tabs.active_tab();
        self.items()
            .iter()
            .filter_map(|item| match item.kind() {
                ItemKind::ActiveTab(active) => match (active.current_tab(), &registry_active) {
                    (Some(current), Some(live)) if current.id != live.id => Some(live.clone()),
                    (None, Some(live)) => Some(live.clone()),
                    (current, _) => current,
                },
                ItemKind::Resource(_) if !item.is_resolved() => None,
                ItemKind::PageTab(_) | ItemKind::Resource(_) | ItemKind::Space(_) => {
                    item.linked_tab().cloned()
                }
                _ => None,
            })
            .collect()
    }

    /// Spaces attached directly, plus the space the active-space item
    /// resolved to.
    pub fn spaces_in_context(&self) -> Vec<Space> {
        self.items()
            .iter()
            .filter_map(|item| match item.kind() {
                ItemKind::Space(space) if space.source_tab().is_none() => {
                    Some(space.space().clone())
                }
                ItemKind::ActiveSpace(active) => active.active_space(),
                _ => None,
            })
            .collect()
    }

    /// Resources attached directly, plus the resources page tabs were
    /// prepared into.
    pub fn resources_in_context(&self) -> Vec<Resource> {
        self.items()
            .iter()
            .filter_map(|item| match item.kind() {
                ItemKind::Resource(resource)
                    if resource.source_tab().is_none() && resource.is_resolved() =>
                {
                    Some(resource.resource().clone())
                }
                ItemKind::PageTab(page) => page
                    .prepared()
                    .filter(|prepared| prepared.is_resolved())
                    .and_then(|prepared| prepared.resource_snapshot().cloned()),
                _ => None,
            })
            .collect()
    }

    pub fn screenshots_in_context(&self) -> Vec<ImageData> {
        self.items()
            .iter()
            .filter_map(|item| match item.kind() {
                ItemKind::Screenshot(shot) => Some(shot.image().clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::hub::ContextHub;
    use crate::item::testing::Fixture;
    use crate::manager::AddOptions;
    use crate::services::ResourceStore;
    use crate::{ImageData, Resource, ResourceTag, Space, Tab, resource_types};

    #[tokio::test]
    async fn views_cover_each_item_kind() {
        let fx = Fixture::new();
        fx.resources.insert(Resource::new("loose", resource_types::LINK));
        fx.resources.insert(Resource::new("doc", "application/pdf"));
        fx.spaces.insert(Space::new("s1", "Direct"), Vec::new());
        fx.spaces.insert(Space::new("s2", "Via Tab"), Vec::new());
        fx.spaces.insert(Space::new("s3", "Active"), Vec::new());
        fx.tabs.upsert_tab(Tab::resource("tr", "Doc", "doc"));
        fx.tabs.upsert_tab(Tab::space("ts", "Via Tab", "s2"));
        fx.tabs.upsert_tab(Tab::page("tp", "Page", "https://p.test/"));
        fx.tabs
            .attach_live("tp", fx.chat_tab(Resource::new("prepared", resource_types::LINK)));
        fx.tabs.set_active_scope(Some("s3"));

        let m = ContextHub::new(fx.services.clone()).create(None, None).await;
        let opts = AddOptions::default;
        m.add_resource("loose", opts()).await.unwrap();
        m.add_space("s1", opts()).await.unwrap();
        m.add_tab("tr", opts()).await.unwrap();
        m.add_tab("ts", opts()).await.unwrap();
        let page = m.add_tab("tp", opts()).await.unwrap();
        let active_space = m.add_active_space_context(None, opts()).await;
        m.add_screenshot(ImageData::png(vec![1u8]), opts()).await;

        let tab_ids: Vec<_> = m.tabs_in_context().into_iter().map(|t| t.id).collect();
        assert_eq!(tab_ids, vec!["tr", "ts", "tp"]);

        assert_eq!(
            m.resources_in_context()
                .into_iter()
                .map(|r| r.id)
                .collect::<Vec<_>>(),
            vec!["loose"]
        );
        page.prepare_page(&fx.services).await;
        assert_eq!(m.resources_in_context().len(), 2);

        assert_eq!(m.spaces_in_context().len(), 1);
        active_space.resource_ids(&fx.services, None).await;
        let space_ids: Vec<_> = m.spaces_in_context().into_iter().map(|s| s.id).collect();
        assert_eq!(space_ids, vec!["s1", "s3"]);

        assert_eq!(m.screenshots_in_context().len(), 1);
    }

    #[tokio::test]
    async fn active_tab_view_falls_back_to_registry() {
        let fx = Fixture::new();
        fx.tabs.upsert_tab(Tab::page("t1", "A", "https://a.test/"));
        fx.tabs.upsert_tab(Tab::page("t2", "B", "https://b.test/"));
        let m = ContextHub::new(fx.services.clone()).create(None, None).await;
        m.add_active_tab(AddOptions::default()).await;
        assert!(m.tabs_in_context().is_empty());

        fx.tabs.set_active_tab(Some("t2"));
        let ids: Vec<_> = m.tabs_in_context().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["t2"]);
    }

    #[tokio::test]
    async fn deleted_resources_drop_out_of_aggregation_and_views() {
        let fx = Fixture::new();
        fx.resources.insert(Resource::new("r1", resource_types::LINK));
        fx.resources.insert(Resource::new("img", "image/png"));
        fx.resources.set_data("img", ImageData::png(vec![7u8]));
        fx.resources.insert(Resource::new("doc", "application/pdf"));
        fx.tabs.upsert_tab(Tab::resource("tr", "Doc", "doc"));

        let m = ContextHub::new(fx.services.clone()).create(None, None).await;
        m.add_resource("r1", AddOptions::default()).await.unwrap();
        m.add_resource("img", AddOptions::default()).await.unwrap();
        m.add_tab("tr", AddOptions::default()).await.unwrap();
        assert_eq!(m.get_resource_ids(None).await, vec!["r1", "img", "doc"]);
        assert_eq!(m.get_inline_images().await.len(), 1);

        let gone = vec!["r1".to_string(), "img".to_string(), "doc".to_string()];
        fx.resources.delete_resources(&gone).await.unwrap();
        assert!(fx.resources.get_resource("r1").await.is_none());

        assert!(m.get_resource_ids(None).await.is_empty());
        assert!(m.get_inline_images().await.is_empty());
        assert!(m.resources_in_context().is_empty());
        assert!(m.tabs_in_context().is_empty());
        // Still attached, just contributing nothing.
        assert_eq!(m.len(), 3);

        fx.resources.insert(Resource::new("r1", resource_types::LINK));
        assert_eq!(m.get_resource_ids(None).await, vec!["r1"]);
        assert_eq!(m.resources_in_context().len(), 1);
    }

    #[tokio::test]
    async fn resources_tagged_deleted_do_not_resolve() {
        let fx = Fixture::new();
        fx.resources.insert(Resource::new("r1", resource_types::LINK));
        let m = ContextHub::new(fx.services.clone()).create(None, None).await;
        let item = m.add_resource("r1", AddOptions::default()).await.unwrap();

        fx.resources.insert(
            Resource::new("r1", resource_types::LINK).with_tag(ResourceTag::deleted()),
        );
        assert!(m.get_resource_ids(None).await.is_empty());
        assert!(!item.is_resolved());
    }
}
