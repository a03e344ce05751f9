//! Library-wide scopes: the home view and everything the user has saved.

use super::{dedup_preserving_order, prepared_tab_resource_ids};
use crate::ResourceQuery;
use crate::services::ContextServices;

/// Saved resources outside any space, followed by the open page tabs that
/// are not scoped to a space.
pub(crate) async fn home_resource_ids(services: &ContextServices) -> Vec<String> {
    let query = ResourceQuery::non_hidden().outside_spaces();
    let mut ids = services.resources.list_resource_ids(&query).await;
    ids.extend(prepared_tab_resource_ids(services, |tab| tab.scope_id.is_none()).await);
    dedup_preserving_order(ids)
}

pub(crate) async fn everything_resource_ids(services: &ContextServices) -> Vec<String> {
    services
        .resources
        .list_resource_ids(&ResourceQuery::non_hidden())
        .await
}
