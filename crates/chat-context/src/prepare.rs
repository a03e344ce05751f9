//! Turning a browser tab into a durable resource.
//!
//! [`prepare_page_tab`] walks a fixed sequence of states, each of which may
//! end the run:
//!
//! 1. Internal link: a `<scheme>://resource/<id>` location resolves straight
//!    to that resource.
//! 2. Activation: a dormant tab is activated and given up to `warmup_ms` to
//!    report ready. A tab without a live handle afterwards is an error.
//! 3. Detection: a freshly activated tab gets up to `detection_timeout_ms`
//!    for app detection. Timing out is not an error.
//! 4. Reuse: the tab's remembered resource is returned as-is if it still
//!    exists, is not deleted, and its canonical URL matches the tab.
//! 5. Creation: the browser handle materialises a new resource.
//!
//! The function keeps no state between calls, so different tabs can be
//! prepared concurrently.

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::canonical;
use crate::services::{ChatResourceOptions, ContextServices};
use crate::{ContextError, Resource, Result, Tab};

pub async fn prepare_page_tab(services: &ContextServices, tab: &Tab) -> Result<Resource> {
    let pipeline = &services.config.pipeline;
    let location = tab
        .location()
        .ok_or_else(|| ContextError::UnsupportedTab(tab.id.clone()))?;

    if let Some(resource_id) = canonical::internal_resource_id(location, &pipeline.internal_scheme) {
        debug!(tab = %tab.id, resource = %resource_id, "Tab shows an internal resource");
        return services
            .resources
            .get_resource(&resource_id)
            .await
            .ok_or_else(|| ContextError::resource_not_found(resource_id));
    }

    if !services.tabs.is_activated(&tab.id) {
        debug!(tab = %tab.id, "Tab not activated, activating first");
        if timeout(pipeline.warmup(), services.tabs.activate_tab(&tab.id))
            .await
            .is_err()
        {
            debug!(tab = %tab.id, "Tab not ready after {}ms, continuing", pipeline.warmup_ms);
        }

        let handle = services
            .tabs
            .browser_tab(&tab.id)
            .ok_or_else(|| ContextError::BrowserTabUnavailable(tab.id.clone()))?;

        let detection = pipeline.detection_timeout();
        match timeout(detection, handle.wait_for_app_detection(detection)).await {
            Ok(Some(app)) => debug!(tab = %tab.id, app = %app.app_id, "App detected"),
            Ok(None) | Err(_) => debug!(tab = %tab.id, "No app detected, continuing"),
        }
    }

    let handle = services
        .tabs
        .browser_tab(&tab.id)
        .ok_or_else(|| ContextError::BrowserTabUnavailable(tab.id.clone()))?;

    if let Some(resource) = reusable_resource(services, tab, location).await {
        debug!(tab = %tab.id, resource = %resource.id, "Reusing existing resource for tab");
        return Ok(resource);
    }

    let options = ChatResourceOptions {
        fresh_webview: canonical::is_youtube_url(location),
    };
    debug!(tab = %tab.id, fresh_webview = options.fresh_webview, "Creating resource for chat");
    let resource = handle
        .create_resource_for_chat(options)
        .await
        .ok_or_else(|| ContextError::ResourceCreationFailed(tab.id.clone()))?;
    info!(tab = %tab.id, resource = %resource.id, "Tab prepared for chat context");
    Ok(resource)
}

/// The tab's remembered resource, if it still represents what the tab shows.
async fn reusable_resource(
    services: &ContextServices,
    tab: &Tab,
    location: &str,
) -> Option<Resource> {
    let resource_id = tab.remembered_resource()?;
    let Some(resource) = services.resources.get_resource(resource_id).await else {
        debug!(tab = %tab.id, resource = %resource_id, "Remembered resource no longer exists");
        return None;
    };
    if resource.is_deleted() {
        debug!(tab = %tab.id, resource = %resource_id, "Remembered resource is deleted");
        return None;
    }
    if let Some(canonical_url) = resource.canonical_url()
        && !canonical::same_location(canonical_url, location)
    {
        warn!(
            tab = %tab.id,
            resource = %resource_id,
            "Remembered resource is for {canonical_url}, tab shows {location}"
        );
        return None;
    }
    Some(resource)
}
