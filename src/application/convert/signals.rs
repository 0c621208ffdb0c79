use std::collections::HashSet;

use crate::domain::request::BindingName;

/// Completion signals observed on one page's console channel.
///
/// Scoped to a single request; a fresh table is created for every page.
#[derive(Debug, Default)]
pub struct SignalTable {
    seen: HashSet<String>,
}

impl SignalTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, signal: impl Into<String>) {
        self.seen.insert(signal.into());
    }

    pub fn observed(&self, signal: &str) -> bool {
        self.seen.contains(signal)
    }

    pub fn binding_observed(&self, name: BindingName) -> bool {
        self.observed(&name.signal())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
