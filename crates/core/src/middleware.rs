use std::sync::Arc;

use parking_lot::RwLock;

use crate::media::{PcmFrame, RawVideoFrame};

/// Interceptor for raw capture frames, run before encoding.
///
/// Both hooks default to pass-through so a middleware can handle one track only.
pub trait CaptureMiddleware: Send + Sync {
    fn process_audio(&self, _frame: &mut PcmFrame) {}
    fn process_video(&self, _frame: &mut RawVideoFrame) {}
}

struct Entry {
    id: String,
    middleware: Arc<dyn CaptureMiddleware>,
    active: bool,
}

/// Registry of capture middlewares, keyed by identifier.
///
/// Middlewares run in attach order. A disabled middleware keeps its slot
/// and can be re-enabled. Frames are processed against a snapshot of the
/// active set, so hooks run with no registry lock held.
#[derive(Clone, Default)]
pub struct MiddlewareRegistry {
    entries: Arc<RwLock<Vec<Entry>>>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an active middleware. Replaces any existing one with the same id,
    /// keeping its position.
    pub fn attach(&self, id: &str, middleware: Arc<dyn CaptureMiddleware>) {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.middleware = middleware;
                entry.active = true;
            }
            None => entries.push(Entry {
                id: id.to_string(),
                middleware,
                active: true,
            }),
        }
        tracing::debug!(id, "middleware attached");
    }

    /// Returns whether a middleware was removed.
    pub fn detach(&self, id: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if removed {
            tracing::debug!(id, "middleware detached");
        }
        removed
    }

    /// Returns false for an unknown id.
    pub fn enable(&self, id: &str) -> bool {
        self.set_active(id, true)
    }

    /// Returns false for an unknown id.
    pub fn disable(&self, id: &str) -> bool {
        self.set_active(id, false)
    }

    fn set_active(&self, id: &str, active: bool) -> bool {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.active = active;
                tracing::debug!(id, active, "middleware toggled");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.entries
            .read()
            .iter()
            .any(|e| e.id == id && e.active)
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.read().iter().map(|e| e.id.clone()).collect()
    }

    fn active(&self) -> Vec<Arc<dyn CaptureMiddleware>> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.active)
            .map(|e| e.middleware.clone())
            .collect()
    }

    pub fn process_audio(&self, frame: &mut PcmFrame) {
        for middleware in self.active() {
            middleware.process_audio(frame);
        }
    }

    pub fn process_video(&self, frame: &mut RawVideoFrame) {
        for middleware in self.active() {
            middleware.process_video(frame);
        }
    }
}
