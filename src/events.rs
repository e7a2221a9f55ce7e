//! Project lifecycle notifications for cache invalidation and other subscribers.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::LifecycleStatus;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProjectEvent {
    Registered {
        tenant_id: String,
        slug: String,
        project_id: String,
        content_version: String,
    },
    Updated {
        tenant_id: String,
        slug: String,
        project_id: String,
        previous_version: String,
        content_version: String,
    },
    StatusChanged {
        tenant_id: String,
        slug: String,
        project_id: String,
        status: LifecycleStatus,
    },
    Deleted {
        tenant_id: String,
        slug: String,
        project_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        backup_path: Option<String>,
    },
}

impl ProjectEvent {
    #[must_use]
    pub fn project_id(&self) -> &str {
        match self {
            Self::Registered { project_id, .. }
            | Self::Updated { project_id, .. }
            | Self::StatusChanged { project_id, .. }
            | Self::Deleted { project_id, .. } => project_id,
        }
    }

    #[must_use]
    pub fn slug(&self) -> &str {
        match self {
            Self::Registered { slug, .. }
            | Self::Updated { slug, .. }
            | Self::StatusChanged { slug, .. }
            | Self::Deleted { slug, .. } => slug,
        }
    }
}

/// Fan-out of [`ProjectEvent`]s. Publishing never blocks; subscribers that
/// fall behind skip the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ProjectEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProjectEvent> {
        self.sender.subscribe()
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, event: ProjectEvent) -> usize {
        tracing::debug!(slug = event.slug(), ?event, "Publishing project event");
        self.sender.send(event).unwrap_or(0)
    }
}
