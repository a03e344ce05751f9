//! Placeholder variants that follow whatever is active right now.
//!
//! Neither item snapshots its referent. Each capability call first asks the
//! tab registry what is active and rebuilds the nested item when that
//! changed, so the manager never has to be told about tab or space switches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ContextItem, dedup_preserving_order, lock, prepared_tab_resource_ids, resolve_tab_item};
use crate::services::ContextServices;
use crate::telemetry::{ContextUpdateEvent, UpdateAction, UpdateTrigger};
use crate::{ChatPrompt, Space, Tab};

// ── Active tab ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ActiveTabState {
    current_tab: Option<Tab>,
    item: Option<Arc<ContextItem>>,
}

#[derive(Debug, Default)]
pub struct ActiveTabItem {
    state: Mutex<ActiveTabState>,
    refreshing: tokio::sync::Mutex<()>,
    // Keyed by the nested item's resource id, so switching back to a tab
    // reuses its prompts.
    prompt_cache: Mutex<HashMap<String, Vec<ChatPrompt>>>,
}

impl ActiveTabItem {
    /// The tab tracked by the last refresh.
    pub fn current_tab(&self) -> Option<Tab> {
        lock(&self.state).current_tab.clone()
    }

    pub fn current_item(&self) -> Option<Arc<ContextItem>> {
        lock(&self.state).item.clone()
    }

    /// Re-resolve against the registry's active tab and return the nested
    /// item. The nested item is rebuilt only when the active tab is a
    /// different tab or shows different content.
    pub async fn refresh(&self, services: &ContextServices) -> Option<Arc<ContextItem>> {
        let _refreshing = self.refreshing.lock().await;

        let Some(active) = services.tabs.active_tab() else {
            *lock(&self.state) = ActiveTabState::default();
            return None;
        };

        let previous = {
            let mut state = lock(&self.state);
            if let Some(current) = &state.current_tab
                && current.same_content(&active)
                && state.item.is_some()
            {
                return state.item.clone();
            }
            let previous = (state.current_tab.take(), state.item.take());
            state.current_tab = Some(active.clone());
            previous
        };

        debug!(tab = %active.id, "Active tab changed, resolving");
        let item = resolve_tab_item(services, &active).await;

        if let (Some(previous_tab), Some(_)) = &previous
            && previous_tab.id != active.id
        {
            services.telemetry.on_update(&ContextUpdateEvent {
                action: UpdateAction::ActiveChanged,
                total: 0,
                changed: 1,
                item_type: item.as_ref().map(|i| i.item_type()),
                trigger: UpdateTrigger::ActiveTabChanged,
            });
        }

        lock(&self.state).item = item.clone();
        item
    }

    pub(crate) async fn get_prompts(
        &self,
        services: &ContextServices,
        fresh: bool,
    ) -> Vec<ChatPrompt> {
        let Some(item) = self.refresh(services).await else {
            return Vec::new();
        };
        let key = prompt_cache_key(&item);
        if !fresh
            && let Some(cached) = lock(&self.prompt_cache).get(&key)
            && !cached.is_empty()
        {
            return cached.clone();
        }
        let generated = item.generate_prompts(services).await;
        lock(&self.prompt_cache).insert(key, generated.clone());
        generated
    }
}

/// Resource id of a resource item, the item id otherwise.
pub(crate) fn prompt_cache_key(item: &ContextItem) -> String {
    item.resource_snapshot()
        .map(|r| r.id.clone())
        .unwrap_or_else(|| item.id().to_string())
}

// ── Active space ───────────────────────────────────────────────────

/// Which parts of the active space contribute resources.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActiveSpaceInclude {
    /// Only pages open as tabs in the space.
    Tabs,
    /// Only the space's saved contents.
    Resources,
    #[default]
    Everything,
}

impl ActiveSpaceInclude {
    pub fn includes_tabs(self) -> bool {
        matches!(self, Self::Tabs | Self::Everything)
    }

    pub fn includes_resources(self) -> bool {
        matches!(self, Self::Resources | Self::Everything)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tabs => "tabs",
            Self::Resources => "resources",
            Self::Everything => "everything",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [Self::Tabs, Self::Resources, Self::Everything]
            .into_iter()
            .find(|i| i.as_str() == s)
    }

    /// Mode after the user mentions "tabs": widens `Resources` to
    /// `Everything`, anything else becomes `Tabs`.
    pub fn mention_tabs(self) -> Self {
        match self {
            Self::Resources => Self::Everything,
            _ => Self::Tabs,
        }
    }

    /// Mode after the user mentions "active context": widens `Tabs` to
    /// `Everything`, anything else becomes `Resources`.
    pub fn mention_resources(self) -> Self {
        match self {
            Self::Tabs => Self::Everything,
            _ => Self::Resources,
        }
    }
}

#[derive(Debug, Default)]
struct ActiveSpaceState {
    space_id: Option<String>,
    item: Option<Arc<ContextItem>>,
}

#[derive(Debug)]
pub struct ActiveSpaceItem {
    include: Mutex<ActiveSpaceInclude>,
    state: Mutex<ActiveSpaceState>,
    refreshing: tokio::sync::Mutex<()>,
}

impl ActiveSpaceItem {
    pub(crate) fn new(include: ActiveSpaceInclude) -> Self {
        Self {
            include: Mutex::new(include),
            state: Mutex::new(ActiveSpaceState::default()),
            refreshing: tokio::sync::Mutex::new(()),
        }
    }

    pub fn include(&self) -> ActiveSpaceInclude {
        *lock(&self.include)
    }

    pub fn set_include(&self, include: ActiveSpaceInclude) {
        *lock(&self.include) = include;
    }

    pub fn current_item(&self) -> Option<Arc<ContextItem>> {
        lock(&self.state).item.clone()
    }

    /// The space resolved by the last refresh.
    pub fn active_space(&self) -> Option<Space> {
        self.current_item()
            .and_then(|item| item.space_snapshot().cloned())
    }

    pub async fn refresh(&self, services: &ContextServices) -> Option<Arc<ContextItem>> {
        let _refreshing = self.refreshing.lock().await;

        let Some(scope_id) = services.tabs.active_scope_id() else {
            *lock(&self.state) = ActiveSpaceState::default();
            return None;
        };
        {
            let state = lock(&self.state);
            if state.space_id.as_deref() == Some(scope_id.as_str()) && state.item.is_some() {
                return state.item.clone();
            }
        }

        let Some(space) = services.spaces.get_space(&scope_id).await else {
            debug!(space = %scope_id, "Active space not found");
            *lock(&self.state) = ActiveSpaceState::default();
            return None;
        };

        let item = ContextItem::space(space, None);
        let had_item = {
            let mut state = lock(&self.state);
            let had_item = state.item.is_some();
            state.space_id = Some(scope_id);
            state.item = Some(item.clone());
            had_item
        };
        if had_item {
            services.telemetry.on_update(&ContextUpdateEvent {
                action: UpdateAction::ActiveContextChanged,
                total: 0,
                changed: 1,
                item_type: Some(item.item_type()),
                trigger: UpdateTrigger::ContextSwitch,
            });
        }
        Some(item)
    }

    /// The active space's contents and its open page tabs, per the include
    /// mode. Without an active space, the open tabs outside any space.
    pub(crate) async fn resource_ids(&self, services: &ContextServices) -> Vec<String> {
        let include = self.include();
        let Some(item) = self.refresh(services).await else {
            if !include.includes_tabs() {
                return Vec::new();
            }
            return prepared_tab_resource_ids(services, |tab| tab.scope_id.is_none()).await;
        };

        let mut ids = Vec::new();
        if include.includes_resources() {
            ids.extend(item.resource_ids(services, None).await);
        }
        if include.includes_tabs() {
            let space_id = item.space_snapshot().map(|s| s.id.clone());
            ids.extend(
                prepared_tab_resource_ids(services, |tab| {
                    tab.scope_id.is_some() && tab.scope_id == space_id
                })
                .await,
            );
        }
        dedup_preserving_order(ids)
    }
}
