//! Persisting a manager's items across restarts.
//!
//! The stored form is a JSON array of [`StoredContextItem`] under the
//! manager's key:
//!
//! ```json
//! [
//!   { "id": "resource:r1", "type": "resource", "data": "r1" },
//!   { "id": "tab:t4", "type": "page-tab", "data": "t4" },
//!   { "id": "active-space", "type": "active-space", "data": "tabs" },
//!   { "id": "active-tab", "type": "active-tab" }
//! ]
//! ```
//!
//! `data` is whatever is needed to resolve the item again: a resource, space
//! or tab id, or the include mode of the active-space item. Screenshots are
//! never stored.
//!
//! Restoring is sequential and never fails because of an entry. Entries that
//! cannot be decoded, have an unknown type or lack required data are dropped
//! and cause the stored array to be rewritten. Entries whose referent no
//! longer exists are dropped too; whether that triggers a rewrite is decided
//! by [`RestorePolicy`](crate::config::RestorePolicy).

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::ContextManager;
use crate::item::{ActiveSpaceInclude, ContextItem, ContextItemType, ItemKind};
use crate::{Result, TabKind};

/// Persisted projection of a [`ContextItem`].
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq, Eq)]
pub struct StoredContextItem {
    pub id: String,
    /// Item type tag, e.g. `resource` or `page-tab`.
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl StoredContextItem {
    /// `None` for items that are never persisted.
    pub fn from_item(item: &ContextItem) -> Option<Self> {
        let data = match item.kind() {
            ItemKind::Screenshot(_) => return None,
            ItemKind::Resource(r) => Some(r.resource().id.clone()),
            ItemKind::Space(s) => Some(s.space().id.clone()),
            ItemKind::PageTab(p) => Some(p.tab().id.clone()),
            ItemKind::ActiveSpace(a) => Some(a.include().as_str().to_string()),
            ItemKind::ActiveTab(_)
            | ItemKind::Home
            | ItemKind::Everything
            | ItemKind::Wikipedia(_) => None,
        };
        Some(Self {
            id: item.id().to_string(),
            item_type: item.item_type().as_str().to_string(),
            data,
        })
    }

    /// The type this entry restores as. `None` for unknown types and for
    /// types that are never stored.
    pub fn restorable_type(&self) -> Option<ContextItemType> {
        ContextItemType::parse(&self.item_type).filter(|t| *t != ContextItemType::Screenshot)
    }

    fn requires_data(item_type: ContextItemType) -> bool {
        matches!(
            item_type,
            ContextItemType::Resource | ContextItemType::Space | ContextItemType::PageTab
        )
    }

    fn has_data(&self) -> bool {
        self.data.as_deref().is_some_and(|d| !d.is_empty())
    }
}

/// Outcome of [`ContextManager::restore_items`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    /// Well-formed entries whose referent no longer resolves.
    pub dropped_unresolved: usize,
    /// Undecodable, unknown, incomplete or duplicate entries.
    pub dropped_malformed: usize,
    /// Whether the stored array was rewritten.
    pub rewritten: bool,
}

// ── Decoding & validation ──────────────────────────────────────────

/// A stored array split into decodable entries and a count of the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedItems {
    pub entries: Vec<StoredContextItem>,
    pub undecodable: usize,
}

/// Decode a stored array entry by entry. A value that is not an array at
/// all counts as one undecodable entry.
pub fn decode_stored(json: &str) -> DecodedItems {
    let values: Vec<serde_json::Value> = match serde_json::from_str(json) {
        Ok(values) => values,
        Err(e) => {
            warn!("Stored context is not a JSON array: {e}");
            return DecodedItems {
                entries: Vec::new(),
                undecodable: 1,
            };
        }
    };
    let mut decoded = DecodedItems::default();
    for value in values {
        match serde_json::from_value::<StoredContextItem>(value) {
            Ok(entry) => decoded.entries.push(entry),
            Err(e) => {
                debug!("Skipping undecodable stored item: {e}");
                decoded.undecodable += 1;
            }
        }
    }
    decoded
}

/// A problem with one stored entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredIssue {
    UnknownType { id: String, item_type: String },
    MissingData { id: String, item_type: String },
    DuplicateId { id: String },
}

impl fmt::Display for StoredIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownType { id, item_type } => write!(f, "{id}: unknown type `{item_type}`"),
            Self::MissingData { id, item_type } => {
                write!(f, "{id}: type `{item_type}` requires data")
            }
            Self::DuplicateId { id } => write!(f, "{id}: duplicate id"),
        }
    }
}

fn entry_issue(entry: &StoredContextItem, seen: &mut HashSet<String>) -> Option<StoredIssue> {
    let Some(item_type) = entry.restorable_type() else {
        return Some(StoredIssue::UnknownType {
            id: entry.id.clone(),
            item_type: entry.item_type.clone(),
        });
    };
    if StoredContextItem::requires_data(item_type) && !entry.has_data() {
        return Some(StoredIssue::MissingData {
            id: entry.id.clone(),
            item_type: entry.item_type.clone(),
        });
    }
    if !seen.insert(entry.id.clone()) {
        return Some(StoredIssue::DuplicateId {
            id: entry.id.clone(),
        });
    }
    None
}

/// Every structural problem in `entries`, in order.
pub fn validate_stored(entries: &[StoredContextItem]) -> Vec<StoredIssue> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .filter_map(|entry| entry_issue(entry, &mut seen))
        .collect()
}

/// `entries` without the ones [`validate_stored`] complains about.
pub fn prune_stored(entries: Vec<StoredContextItem>) -> Vec<StoredContextItem> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|entry| entry_issue(entry, &mut seen).is_none())
        .collect()
}

// ── Manager integration ────────────────────────────────────────────

enum Restored {
    Item(Arc<ContextItem>),
    Unresolved,
}

impl ContextManager {
    /// Projection of the current items, screenshots excluded.
    pub fn stored_items(&self) -> Vec<StoredContextItem> {
        self.items()
            .iter()
            .filter_map(|item| StoredContextItem::from_item(item))
            .collect()
    }

    /// Write the projection under this manager's key.
    pub fn persist_items(&self) -> Result<()> {
        let stored = self.stored_items();
        let json = serde_json::to_string(&stored)?;
        self.services().storage.set(&self.key, &json)?;
        debug!(scope = %self.key, count = stored.len(), "Persisted context items");
        Ok(())
    }

    pub(crate) fn persist_best_effort(&self) {
        if let Err(e) = self.persist_items() {
            warn!(scope = %self.key, "Failed to persist context items: {e}");
        }
    }

    /// Rebuild the items from storage, replacing the current ones. Nothing
    /// changes when nothing is stored. Only a failing storage read is an
    /// error.
    pub async fn restore_items(&self) -> Result<RestoreReport> {
        let services = self.services();
        let Some(json) = services.storage.get(&self.key)? else {
            debug!(scope = %self.key, "Nothing stored, skipping restore");
            return Ok(RestoreReport::default());
        };

        let decoded = decode_stored(&json);
        let mut report = RestoreReport {
            dropped_malformed: decoded.undecodable,
            ..RestoreReport::default()
        };
        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for entry in &decoded.entries {
            if let Some(issue) = entry_issue(entry, &mut seen) {
                warn!(scope = %self.key, "Dropping stored item: {issue}");
                report.dropped_malformed += 1;
                continue;
            }
            match self.restore_entry(entry).await {
                Restored::Item(item) => items.push(item),
                Restored::Unresolved => {
                    debug!(scope = %self.key, item = %entry.id, "Stored item no longer resolves");
                    report.dropped_unresolved += 1;
                }
            }
        }

        report.restored = items.len();
        self.update_items(move |_| items).await;

        let rewrite = report.dropped_malformed > 0
            || (report.dropped_unresolved > 0 && services.config.restore.rewrite_on_unresolved);
        if rewrite {
            self.persist_items()?;
            report.rewritten = true;
        }
        info!(
            scope = %self.key,
            restored = report.restored,
            unresolved = report.dropped_unresolved,
            malformed = report.dropped_malformed,
            rewritten = report.rewritten,
            "Restored context items"
        );
        Ok(report)
    }

    /// Resolve one validated entry.
    async fn restore_entry(&self, entry: &StoredContextItem) -> Restored {
        let services = self.services();
        let data = entry.data.as_deref().unwrap_or_default();
        let Some(item_type) = entry.restorable_type() else {
            return Restored::Unresolved;
        };
        let item = match item_type {
            ContextItemType::Resource => services
                .resources
                .get_resource(data)
                .await
                .map(|r| ContextItem::resource(r, None)),
            ContextItemType::Space => services
                .spaces
                .get_space(data)
                .await
                .map(|s| ContextItem::space(s, None)),
            ContextItemType::PageTab => match services.tabs.tab(data) {
                None => None,
                Some(tab) => match &tab.kind {
                    TabKind::Page { .. } => Some(ContextItem::page_tab(tab.clone(), services)),
                    TabKind::Space { space_id } => services
                        .spaces
                        .get_space(space_id)
                        .await
                        .map(|s| ContextItem::space(s, Some(tab.clone()))),
                    TabKind::Resource { resource_id } => services
                        .resources
                        .get_resource(resource_id)
                        .await
                        .map(|r| ContextItem::resource(r, Some(tab.clone()))),
                    TabKind::Other => None,
                },
            },
            ContextItemType::ActiveTab => Some(ContextItem::active_tab()),
            ContextItemType::ActiveSpace => Some(ContextItem::active_space(
                ActiveSpaceInclude::parse(data).unwrap_or_default(),
            )),
            ContextItemType::Home => Some(ContextItem::home()),
            ContextItemType::Everything => Some(ContextItem::everything()),
            ContextItemType::Wikipedia => Some(ContextItem::wikipedia()),
            ContextItemType::Screenshot => None,
        };
        match item {
            Some(item) => Restored::Item(item),
            None => Restored::Unresolved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContextConfig, RestorePolicy};
    use crate::hub::ContextHub;
    use crate::item::testing::Fixture;
    use crate::manager::AddOptions;
    use crate::services::KeyValueStore;
    use crate::{DEFAULT_CONTEXT_MANAGER_KEY, ImageData, Resource, Space, Tab, resource_types};

    fn entry(id: &str, item_type: &str, data: Option<&str>) -> StoredContextItem {
        StoredContextItem {
            id: id.into(),
            item_type: item_type.into(),
            data: data.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn projection_skips_screenshots() {
        let fx = Fixture::new();
        fx.resources.insert(Resource::new("r1", resource_types::LINK));
        let m = ContextHub::new(fx.services.clone()).create_default(None).await;
        m.add_resource("r1", AddOptions::default()).await.unwrap();
        m.add_screenshot(ImageData::png(vec![1u8]), AddOptions::default())
            .await;
        m.add_active_space_context(Some(ActiveSpaceInclude::Tabs), AddOptions::default())
            .await;
        m.add_active_tab(AddOptions::default()).await;

        assert_eq!(
            m.stored_items(),
            vec![
                entry("resource:r1", "resource", Some("r1")),
                entry("active-space", "active-space", Some("tabs")),
                entry("active-tab", "active-tab", None),
            ]
        );
        let json = fx.storage.get(DEFAULT_CONTEXT_MANAGER_KEY).unwrap().unwrap();
        assert!(!json.contains("screenshot"));
        assert!(!json.contains("\"data\":null"));
    }

    #[test]
    fn decode_counts_bad_entries() {
        let decoded = decode_stored(
            r#"[{"id":"home","type":"home"},{"id":7},"junk",{"id":"space:s1","type":"space","data":"s1"}]"#,
        );
        assert_eq!(decoded.entries.len(), 2);
        assert_eq!(decoded.undecodable, 2);
        assert_eq!(decode_stored("{}").undecodable, 1);
    }

    #[test]
    fn validation_and_pruning_agree() {
        let entries = vec![
            entry("home", "home", None),
            entry("inbox", "inbox", None),
            entry("resource:r1", "resource", None),
            entry("home", "home", None),
            entry("space:s1", "space", Some("s1")),
        ];
        let issues = validate_stored(&entries);
        assert_eq!(issues.len(), 3);
        assert_eq!(issues[0].to_string(), "inbox: unknown type `inbox`");
        assert!(matches!(issues[2], StoredIssue::DuplicateId { .. }));

        let pruned = prune_stored(entries);
        let ids: Vec<_> = pruned.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["home", "space:s1"]);
    }

    #[tokio::test]
    async fn restore_drops_and_rewrites_malformed_entries() {
        let fx = Fixture::new();
        fx.resources.insert(Resource::new("r1", resource_types::LINK));
        fx.spaces.insert(Space::new("s2", "Space"), Vec::new());
        fx.tabs.upsert_tab(Tab::space("ts", "Space", "s2"));
        let stored = serde_json::to_string(&vec![
            entry("resource:r1", "resource", Some("r1")),
            entry("inbox", "inbox", None),
            entry("tab:ts", "page-tab", Some("ts")),
            entry("active-space", "active-space", Some("resources")),
            entry("wikipedia", "wikipedia", None),
        ])
        .unwrap();
        fx.storage.set("ctx", &stored).unwrap();

        let m = ContextHub::new(fx.services.clone())
            .create(None, Some("ctx".into()))
            .await;
        let report = m.restore_items().await.unwrap();
        assert_eq!(report.restored, 4);
        assert_eq!(report.dropped_malformed, 1);
        assert!(report.rewritten);

        let ids: Vec<_> = m.items().iter().map(|i| i.id().to_string()).collect();
        assert_eq!(ids, vec!["resource:r1", "space:s2", "active-space", "wikipedia"]);
        assert!(m.items()[1].linked_tab().is_some());
        let items = m.items();
        let ItemKind::ActiveSpace(active) = items[2].kind() else {
            panic!("expected active space");
        };
        assert_eq!(active.include(), ActiveSpaceInclude::Resources);
        assert!(!fx.storage.get("ctx").unwrap().unwrap().contains("inbox"));
    }

    #[tokio::test]
    async fn unresolved_entries_follow_the_policy() {
        let stored = serde_json::to_string(&vec![
            entry("resource:gone", "resource", Some("gone")),
            entry("home", "home", None),
        ])
        .unwrap();

        let fx = Fixture::new();
        fx.storage.set("ctx", &stored).unwrap();
        let m = ContextHub::new(fx.services.clone())
            .create(None, Some("ctx".into()))
            .await;
        let writes = fx.storage.writes();
        let report = m.restore_items().await.unwrap();
        assert_eq!(report.dropped_unresolved, 1);
        assert!(!report.rewritten);
        assert_eq!(fx.storage.writes(), writes);

        let mut fx = Fixture::new();
        fx.services = fx.services.clone().with_config(
            ContextConfig::default()
                .with_eager_page_preparation(false)
                .with_restore_policy(RestorePolicy::rewrite_on_unresolved()),
        );
        fx.storage.set("ctx", &stored).unwrap();
        let m = ContextHub::new(fx.services.clone())
            .create(None, Some("ctx".into()))
            .await;
        let report = m.restore_items().await.unwrap();
        assert!(report.rewritten);
        assert_eq!(m.stored_items(), vec![entry("home", "home", None)]);
        assert_eq!(
            fx.storage.get("ctx").unwrap().as_deref(),
            Some(r#"[{"id":"home","type":"home"}]"#)
        );
    }

    #[tokio::test]
    async fn nothing_stored_leaves_items_alone() {
        let fx = Fixture::new();
        let m = ContextHub::new(fx.services.clone()).create(None, None).await;
        m.add_home_context(AddOptions::default()).await;
        let other = m.hub().create(None, None).await;
        other.add_everything_context(AddOptions::default()).await;

        let fresh = m.hub().create(None, None).await;
        assert_eq!(fresh.restore_items().await.unwrap(), RestoreReport::default());
        assert!(fresh.is_empty());
        assert_eq!(m.len(), 1);
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn schema_names_the_type_field() {
        let schema = schemars::schema_for!(StoredContextItem);
        let json = serde_json::to_value(&schema).unwrap();
        assert!(json["properties"]["type"].is_object());
        assert!(json["properties"]["data"].is_object());
    }
}
