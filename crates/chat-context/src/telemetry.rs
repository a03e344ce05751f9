//! Best-effort notifications about changes to a conversation's context.
//!
//! Managers emit a [`ContextUpdateEvent`] whenever a mutation carries an
//! [`UpdateTrigger`], and active items emit one when the thing they track
//! changes. Sinks are synchronous and fire-and-forget: they return nothing
//! and cannot influence the manager.
//!
//! | Sink | Use case |
//! |------|----------|
//! | [`NoopTelemetry`] | Default, tests |
//! | [`LoggingTelemetry`] | Structured logging via `tracing` |
//! | [`FnTelemetry`] | Quick closures, assertions in tests |
//! | [`CompositeTelemetry`] | Fan out to several sinks in order |

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::item::ContextItemType;

// ── Events ─────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
    Add,
    Remove,
    Clear,
    ExcludeOthers,
    MultiSelect,
    /// The active-tab item switched to a different tab.
    ActiveChanged,
    /// The active-space item switched to a different space.
    ActiveContextChanged,
}

/// What the user did to cause an update.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateTrigger {
    ChatInput,
    ChatMention,
    ContextMenu,
    TabSelection,
    AttachmentChip,
    ActiveTabChanged,
    ContextSwitch,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ContextUpdateEvent {
    pub action: UpdateAction,
    /// Items in the context after the update.
    pub total: usize,
    /// Items the update touched.
    pub changed: usize,
    pub item_type: Option<ContextItemType>,
    pub trigger: UpdateTrigger,
}

// ── Sinks ──────────────────────────────────────────────────────────

pub trait ContextTelemetry: Send + Sync {
    fn on_update(&self, event: &ContextUpdateEvent) {
        let _ = event;
    }
}

pub struct NoopTelemetry;
impl ContextTelemetry for NoopTelemetry {}

/// Logs every event at `info`.
pub struct LoggingTelemetry;

impl ContextTelemetry for LoggingTelemetry {
    fn on_update(&self, event: &ContextUpdateEvent) {
        info!(
            action = ?event.action,
            trigger = ?event.trigger,
            item_type = ?event.item_type,
            "context update: {} item(s), {} changed",
            event.total,
            event.changed
        );
    }
}

/// A sink backed by a closure.
///
/// ```ignore
/// let events = Arc::new(Mutex::new(Vec::new()));
/// let sink = events.clone();
/// let telemetry = FnTelemetry::new(move |e| sink.lock().unwrap().push(e.clone()));
/// ```
pub struct FnTelemetry<F>(F)
where
    F: Fn(&ContextUpdateEvent) + Send + Sync;

impl<F> FnTelemetry<F>
where
    F: Fn(&ContextUpdateEvent) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ContextTelemetry for FnTelemetry<F>
where
    F: Fn(&ContextUpdateEvent) + Send + Sync,
{
    fn on_update(&self, event: &ContextUpdateEvent) {
        (self.0)(event)
    }
}

/// Dispatches each event to every inner sink in registration order.
pub struct CompositeTelemetry {
    sinks: Vec<Box<dyn ContextTelemetry>>,
}

impl CompositeTelemetry {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with(mut self, sink: impl ContextTelemetry + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn with_if(self, condition: bool, sink: impl ContextTelemetry + 'static) -> Self {
        if condition { self.with(sink) } else { self }
    }
}

impl Default for CompositeTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextTelemetry for CompositeTelemetry {
    fn on_update(&self, event: &ContextUpdateEvent) {
        for sink in &self.sinks {
            sink.on_update(event);
        }
    }
}
