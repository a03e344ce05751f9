//! Fixed-referent variants: saved resources, spaces and screenshots.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use super::ContextIcon;
use crate::services::{ContextServices, PromptSource};
use crate::{ChatPrompt, ImageData, Resource, Space, SpaceEntryOrigin, Tab, canonical};

// ── Resource ───────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ResourceItem {
    resource: Resource,
    source_tab: Option<Tab>,
    // Cleared once the store no longer has the resource, or has it tagged
    // deleted. Refreshed by every aggregation call.
    resolved: AtomicBool,
}

impl ResourceItem {
    pub(crate) fn new(resource: Resource, source_tab: Option<Tab>) -> Self {
        Self {
            resource,
            source_tab,
            resolved: AtomicBool::new(true),
        }
    }

    /// Whether the last lookup still found the resource.
    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::SeqCst)
    }

    /// Look the resource up again and record whether it still resolves.
    pub(crate) async fn resolve(&self, services: &ContextServices) -> bool {
        let resolved = services
            .resources
            .get_resource(&self.resource.id)
            .await
            .is_some_and(|r| !r.is_deleted());
        if !resolved && self.resolved.swap(false, Ordering::SeqCst) {
            debug!(resource = %self.resource.id, "Resource no longer resolves");
        } else if resolved {
            self.resolved.store(true, Ordering::SeqCst);
        }
        resolved
    }

    pub(crate) async fn resource_ids(&self, services: &ContextServices) -> Vec<String> {
        if self.resolve(services).await {
            vec![self.resource.id.clone()]
        } else {
            Vec::new()
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn source_tab(&self) -> Option<&Tab> {
        self.source_tab.as_ref()
    }

    pub(crate) fn label(&self) -> String {
        if let Some(tab) = &self.source_tab {
            return tab.title.clone();
        }
        if let Some(name) = &self.resource.name {
            return name.clone();
        }
        match self.resource.url() {
            Some(url) => canonical::truncate_url(url, 40),
            None => file_type(&self.resource.resource_type),
        }
    }

    pub(crate) fn icon(&self) -> ContextIcon {
        if self.resource.is_image() {
            return ContextIcon::icon("image");
        }
        self.resource
            .url()
            .and_then(canonical::favicon_url)
            .map(ContextIcon::Image)
            .unwrap_or_else(|| ContextIcon::icon("file"))
    }

    pub(crate) async fn inline_images(&self, services: &ContextServices) -> Vec<String> {
        if !self.resource.is_image() || !self.resolve(services).await {
            return Vec::new();
        }
        match services.resources.get_resource_data(&self.resource.id).await {
            Some(data) => vec![data.to_data_url()],
            None => {
                debug!(resource = %self.resource.id, "Image resource has no data");
                Vec::new()
            }
        }
    }

    pub(crate) async fn generate_prompts(&self, services: &ContextServices) -> Vec<ChatPrompt> {
        let Some(content) = services
            .resources
            .get_resource_content(&self.resource.id)
            .await
        else {
            debug!(resource = %self.resource.id, "No resource content, skipping prompts");
            return Vec::new();
        };

        let title = self
            .source_tab
            .as_ref()
            .map(|t| t.title.clone())
            .or_else(|| self.resource.name.clone())
            .unwrap_or_default();
        let url = self
            .source_tab
            .as_ref()
            .and_then(Tab::location)
            .or(self.resource.url())
            .unwrap_or_default()
            .to_string();

        match services
            .assistant
            .generate_prompts(PromptSource {
                title,
                url,
                content,
            })
            .await
        {
            Ok(prompts) => prompts,
            Err(e) => {
                warn!(resource = %self.resource.id, "Failed to generate prompts: {e}");
                Vec::new()
            }
        }
    }
}

/// Human name for a MIME-like type: `application/pdf` → `PDF`.
fn file_type(resource_type: &str) -> String {
    let subtype = resource_type.rsplit('/').next().unwrap_or(resource_type);
    let subtype = subtype.rsplit('.').next().unwrap_or(subtype);
    if subtype.is_empty() {
        "File".to_string()
    } else {
        subtype.to_uppercase()
    }
}

// ── Space ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct SpaceItem {
    space: Space,
    source_tab: Option<Tab>,
}

impl SpaceItem {
    pub(crate) fn new(space: Space, source_tab: Option<Tab>) -> Self {
        Self { space, source_tab }
    }

    pub fn space(&self) -> &Space {
        &self.space
    }

    pub fn source_tab(&self) -> Option<&Tab> {
        self.source_tab.as_ref()
    }

    pub(crate) fn label(&self) -> String {
        self.space
            .name
            .clone()
            .unwrap_or_else(|| "Space".to_string())
    }

    pub(crate) fn icon(&self) -> ContextIcon {
        if let Some(emoji) = &self.space.emoji {
            ContextIcon::Emoji(emoji.clone())
        } else if let Some(image) = &self.space.image_icon {
            ContextIcon::Image(image.clone())
        } else if let Some(colors) = &self.space.colors {
            ContextIcon::Colors(colors.clone())
        } else {
            ContextIcon::icon("circle-dot")
        }
    }

    pub(crate) async fn resource_ids(&self, services: &ContextServices) -> Vec<String> {
        services
            .spaces
            .space_contents(&self.space.id)
            .await
            .into_iter()
            .filter(|entry| entry.origin != SpaceEntryOrigin::Blacklisted)
            .map(|entry| entry.resource_id)
            .collect()
    }
}

// ── Screenshot ─────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ScreenshotItem {
    image: ImageData,
}

impl ScreenshotItem {
    pub(crate) fn new(image: ImageData) -> Self {
        Self { image }
    }

    pub fn image(&self) -> &ImageData {
        &self.image
    }
}
