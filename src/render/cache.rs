use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::planner::LoadPlan;
use crate::events::EventBus;

/// Computed load plans keyed by project id, content version and the base URL
/// they were built for. A re-upload changes the version, so a stale plan is
/// never returned for the new files even before the event for it arrives;
/// entries are dropped when a [`crate::events::ProjectEvent`] names the project.
#[derive(Debug, Default)]
pub struct PlanCache {
    plans: RwLock<HashMap<PlanKey, Arc<LoadPlan>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PlanKey {
    project_id: String,
    content_version: String,
    base_url: String,
}

impl PlanKey {
    fn new(project_id: &str, content_version: &str, base_url: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            content_version: content_version.to_string(),
            base_url: base_url.to_string(),
        }
    }
}

impl PlanCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(
        &self,
        project_id: &str,
        content_version: &str,
        base_url: &str,
    ) -> Option<Arc<LoadPlan>> {
        let plans = self.plans.read().unwrap_or_else(PoisonError::into_inner);
        plans
            .get(&PlanKey::new(project_id, content_version, base_url))
            .cloned()
    }

    /// Stores `plan` under its own project id and content version.
    pub fn insert(&self, base_url: &str, plan: LoadPlan) -> Arc<LoadPlan> {
        let key = PlanKey::new(&plan.project_id, &plan.content_version, base_url);
        let plan = Arc::new(plan);
        let mut plans = self.plans.write().unwrap_or_else(PoisonError::into_inner);
        plans.insert(key, Arc::clone(&plan));
        plan
    }

    pub fn invalidate(&self, project_id: &str) -> usize {
        let mut plans = self.plans.write().unwrap_or_else(PoisonError::into_inner);
        let before = plans.len();
        plans.retain(|key, _| key.project_id != project_id);
        before - plans.len()
    }

    pub fn clear(&self) {
        self.plans
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawns a task that invalidates entries as project events arrive. The
    /// whole cache is cleared if the task falls behind the bus.
    pub fn spawn_invalidator(self: &Arc<Self>, events: &EventBus) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let removed = cache.invalidate(event.project_id());
                        debug!(slug = event.slug(), removed, "Invalidated cached load plans");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Plan cache missed project events, clearing");
                        cache.clear();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ProjectEvent;
    use crate::types::LifecycleStatus;

    fn plan(project_id: &str, version: &str) -> LoadPlan {
        LoadPlan {
            project_id: project_id.into(),
            slug: "demo".into(),
            content_version: version.into(),
            critical_css: Vec::new(),
            deferred_css: Vec::new(),
            critical_js: Vec::new(),
            deferred_js: Vec::new(),
        }
    }

    #[test]
    fn test_lookup_is_scoped_to_version() {
        let cache = PlanCache::new();
        cache.insert("https://a", plan("p1", "v1"));

        assert!(cache.get("p1", "v1", "https://a").is_some());
        assert!(cache.get("p1", "v2", "https://a").is_none());
        assert!(cache.get("p1", "v1", "https://b").is_none());
    }

    #[test]
    fn test_invalidate_drops_every_entry_for_project() {
        let cache = PlanCache::new();
        cache.insert("https://a", plan("p1", "v1"));
        cache.insert("https://b", plan("p1", "v1"));
        cache.insert("https://a", plan("p1", "v2"));
        cache.insert("https://a", plan("p2", "v1"));

        assert_eq!(cache.invalidate("p1"), 3);
        assert!(cache.get("p2", "v1", "https://a").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_events_invalidate() {
        let cache = Arc::new(PlanCache::new());
        let bus = EventBus::default();
        let handle = cache.spawn_invalidator(&bus);

        cache.insert("https://a", plan("p1", "v1"));
        bus.publish(ProjectEvent::StatusChanged {
            tenant_id: "t".into(),
            slug: "demo".into(),
            project_id: "p1".into(),
            status: LifecycleStatus::Inactive,
        });

        for _ in 0..50 {
            if cache.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(cache.is_empty());
        handle.abort();
    }
}
