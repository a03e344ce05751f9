//! Error taxonomy for the attachment layer.
//!
//! Only operations that act on a caller-supplied reference return errors.
//! Aggregation (`get_resource_ids`, `get_inline_images`) and derived views
//! never fail: an item that cannot resolve contributes nothing.

use std::fmt;

/// Kind of domain object a reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Resource,
    Space,
    Tab,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::Resource => write!(f, "resource"),
            ReferenceKind::Space => write!(f, "space"),
            ReferenceKind::Tab => write!(f, "tab"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// A resource, space or tab id did not resolve.
    #[error("{kind} not found: {id}")]
    ReferenceNotFound { kind: ReferenceKind, id: String },

    /// No live browser handle exists for the tab after activation.
    #[error("browser tab not found: {0}")]
    BrowserTabUnavailable(String),

    /// The browser handle returned nothing when asked to materialise a resource.
    #[error("failed to bookmark page for chat context: {0}")]
    ResourceCreationFailed(String),

    /// The browser handle could not capture the page.
    #[error("failed to capture tab: {0}")]
    CaptureFailed(String),

    /// The tab kind cannot be represented as a context item.
    #[error("unsupported tab type: {0}")]
    UnsupportedTab(String),

    /// Key-value storage rejected a read or write.
    #[error("storage error: {0}")]
    Storage(String),

    /// The assistant collaborator failed or is not configured.
    #[error("assistant error: {0}")]
    Assistant(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ContextError {
    pub fn resource_not_found(id: impl Into<String>) -> Self {
        Self::ReferenceNotFound {
            kind: ReferenceKind::Resource,
            id: id.into(),
        }
    }

    pub fn space_not_found(id: impl Into<String>) -> Self {
        Self::ReferenceNotFound {
            kind: ReferenceKind::Space,
            id: id.into(),
        }
    }

    pub fn tab_not_found(id: impl Into<String>) -> Self {
        Self::ReferenceNotFound {
            kind: ReferenceKind::Tab,
            id: id.into(),
        }
    }

    /// Whether this is a [`ContextError::ReferenceNotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ReferenceNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, ContextError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_messages_name_the_kind() {
        assert_eq!(
            ContextError::resource_not_found("r1").to_string(),
            "resource not found: r1"
        );
        assert_eq!(
            ContextError::space_not_found("s1").to_string(),
            "space not found: s1"
        );
        assert!(ContextError::tab_not_found("t1").is_not_found());
    }

    #[test]
    fn pipeline_errors_are_not_lookup_failures() {
        let err = ContextError::BrowserTabUnavailable("t1".into());
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "browser tab not found: t1");
    }
}
