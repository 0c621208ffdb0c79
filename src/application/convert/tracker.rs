use std::collections::{BTreeSet, HashMap};

use crate::application::engine::ResponseStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Pending,
    Resolved,
}

/// Per-URL loading state fed by engine network events.
///
/// Entries only move from `Pending` to `Resolved` and are never removed.
#[derive(Debug, Default)]
pub struct ResourceTracker {
    states: HashMap<String, ResourceState>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_started(&mut self, url: &str) {
        self.states
            .entry(url.to_string())
            .or_insert(ResourceState::Pending);
    }

    /// Only the final stage resolves a resource.
    pub fn response_received(&mut self, url: &str, stage: ResponseStage) {
        if stage == ResponseStage::End {
            self.resolve(url);
        }
    }

    /// Failed loads count as resolved.
    pub fn request_failed(&mut self, url: &str) {
        self.resolve(url);
    }

    fn resolve(&mut self, url: &str) {
        self.states
            .insert(url.to_string(), ResourceState::Resolved);
    }

    pub fn state(&self, url: &str) -> Option<ResourceState> {
        self.states.get(url).copied()
    }

    pub fn has_pending(&self) -> bool {
        self.states
            .values()
            .any(|state| *state == ResourceState::Pending)
    }

    pub fn pending(&self) -> BTreeSet<String> {
        self.states
            .iter()
            .filter(|(_, state)| **state == ResourceState::Pending)
            .map(|(url, _)| url.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "http://example.com/bg.png";

    #[test]
    fn start_stage_keeps_resource_pending() {
        let mut tracker = ResourceTracker::new();
        tracker.request_started(URL);
        tracker.response_received(URL, ResponseStage::Start);

        assert_eq!(tracker.state(URL), Some(ResourceState::Pending));
        assert!(tracker.has_pending());
    }

    #[test]
    fn end_stage_resolves_resource() {
        let mut tracker = ResourceTracker::new();
        tracker.request_started(URL);
        tracker.response_received(URL, ResponseStage::End);

        assert_eq!(tracker.state(URL), Some(ResourceState::Resolved));
        assert!(tracker.pending().is_empty());
    }

    #[test]
    fn failure_resolves_resource() {
        let mut tracker = ResourceTracker::new();
        tracker.request_started(URL);
        tracker.request_failed(URL);
        assert!(!tracker.has_pending());
    }

    #[test]
    fn resolved_resources_never_return_to_pending() {
        let mut tracker = ResourceTracker::new();
        tracker.request_started(URL);
        tracker.request_failed(URL);
        tracker.request_started(URL);

        assert_eq!(tracker.state(URL), Some(ResourceState::Resolved));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn pending_lists_only_unresolved_urls() {
        let mut tracker = ResourceTracker::new();
        tracker.request_started("http://a/1.png");
        tracker.request_started("http://a/2.png");
        tracker.response_received("http://a/1.png", ResponseStage::End);

        assert_eq!(
            tracker.pending(),
            BTreeSet::from(["http://a/2.png".to_string()])
        );
    }
}
