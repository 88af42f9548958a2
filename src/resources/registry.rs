use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Kind of resource tracked by a [`ResourceRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Browser,
    Context,
    Page,
    HttpSession,
    Batcher,
}

/// Live resource counters shared by the managers of one process
///
/// Managers receive the registry explicitly (usually as an `Arc`); several
/// managers sharing a registry see each other's counts. Counters never go below
/// zero.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    browsers: AtomicUsize,
    contexts: AtomicUsize,
    pages: AtomicUsize,
    http_sessions: AtomicUsize,
    batchers: AtomicUsize,
}

/// Point-in-time copy of the registry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    pub browsers: usize,
    pub contexts: usize,
    pub pages: usize,
    pub http_sessions: usize,
    pub batchers: usize,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, kind: ResourceKind) -> &AtomicUsize {
        match kind {
            ResourceKind::Browser => &self.browsers,
            ResourceKind::Context => &self.contexts,
            ResourceKind::Page => &self.pages,
            ResourceKind::HttpSession => &self.http_sessions,
            ResourceKind::Batcher => &self.batchers,
        }
    }

    pub fn opened(&self, kind: ResourceKind) {
        self.counter(kind).fetch_add(1, Ordering::SeqCst);
    }

    pub fn closed(&self, kind: ResourceKind) {
        let _ = self
            .counter(kind)
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        self.counter(kind).load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            browsers: self.count(ResourceKind::Browser),
            contexts: self.count(ResourceKind::Context),
            pages: self.count(ResourceKind::Page),
            http_sessions: self.count(ResourceKind::HttpSession),
            batchers: self.count(ResourceKind::Batcher),
        }
    }
}
