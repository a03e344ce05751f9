//! Configuration for context managers and the preparation pipeline.
//!
//! Every field has a default, so an empty JSON object is a valid config:
//!
//! ```ignore
//! let config = ContextConfig::default()
//!     .with_warmup(Duration::from_millis(50))
//!     .with_restore_policy(RestorePolicy::rewrite_on_unresolved())
//!     .with_eager_page_preparation(false);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::Result;

// ── Pipeline ───────────────────────────────────────────────────────

/// Bounds for turning a tab into a resource.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on waiting for a freshly activated tab to report ready.
    pub warmup_ms: u64,
    /// Upper bound on app/content detection. Timing out is not an error.
    pub detection_timeout_ms: u64,
    /// Scheme of internal resource links (`<scheme>://resource/<id>`).
    pub internal_scheme: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            warmup_ms: 200,
            detection_timeout_ms: 3000,
            internal_scheme: "surf".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn detection_timeout(&self) -> Duration {
        Duration::from_millis(self.detection_timeout_ms)
    }
}

// ── Restore ────────────────────────────────────────────────────────

/// What `restore_items` does with stored entries it cannot use.
///
/// Entries with an unknown type always trigger a write-back. Entries with a
/// known type whose referent no longer resolves only do when
/// `rewrite_on_unresolved` is set.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(default)]
pub struct RestorePolicy {
    pub rewrite_on_unresolved: bool,
}

impl RestorePolicy {
    pub fn rewrite_on_unresolved() -> Self {
        Self {
            rewrite_on_unresolved: true,
        }
    }
}

// ── Tab selection ──────────────────────────────────────────────────

/// Which managers mirror their tab-bound items into the tab registry's
/// selection.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TabSelectionPolicy {
    /// Only the application-wide manager (`active_chat_context`).
    #[default]
    DefaultManagerOnly,
    Always,
    Never,
}

impl TabSelectionPolicy {
    pub fn applies_to(self, key: &str) -> bool {
        match self {
            Self::DefaultManagerOnly => key == crate::DEFAULT_CONTEXT_MANAGER_KEY,
            Self::Always => true,
            Self::Never => false,
        }
    }
}

// ── ContextConfig ──────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ContextConfig {
    pub pipeline: PipelineConfig,
    pub restore: RestorePolicy,
    pub tab_selection: TabSelectionPolicy,
    /// Start preparing a page tab's resource as soon as it is attached.
    pub eager_page_preparation: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            restore: RestorePolicy::default(),
            tab_selection: TabSelectionPolicy::default(),
            eager_page_preparation: true,
        }
    }
}

impl ContextConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.pipeline.warmup_ms = warmup.as_millis() as u64;
        self
    }

    pub fn with_detection_timeout(mut self, timeout: Duration) -> Self {
        self.pipeline.detection_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_internal_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.pipeline.internal_scheme = scheme.into();
        self
    }

    pub fn with_restore_policy(mut self, policy: RestorePolicy) -> Self {
        self.restore = policy;
        self
    }

    pub fn with_tab_selection(mut self, policy: TabSelectionPolicy) -> Self {
        self.tab_selection = policy;
        self
    }

    pub fn with_eager_page_preparation(mut self, eager: bool) -> Self {
        self.eager_page_preparation = eager;
        self
    }
}
