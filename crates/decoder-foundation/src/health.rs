//! Lightweight liveness tracking for pipeline components.
//!
//! A search stage's worker task reports into a `HealthMonitor` every time
//! it makes progress; the pipeline (or a test driver) polls it to decide
//! whether a stage has wedged. This carries no recovery logic of its own —
//! see [`crate::error::RecoveryStrategy`] for what a caller does with a
//! stale component.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub last_heartbeat: Instant,
    pub healthy: bool,
}

#[derive(Clone)]
pub struct HealthMonitor {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Called by a worker task whenever it completes a unit of work
    /// (a frame scored, a bp entered, a sweep committed).
    pub fn heartbeat(&self, component: &str) {
        let mut components = self.components.write();
        components
            .entry(component.to_string())
            .and_modify(|h| {
                h.last_heartbeat = Instant::now();
                h.healthy = true;
            })
            .or_insert(ComponentHealth {
                last_heartbeat: Instant::now(),
                healthy: true,
            });
    }

    pub fn mark_unhealthy(&self, component: &str) {
        if let Some(h) = self.components.write().get_mut(component) {
            h.healthy = false;
        }
    }

    /// Returns the names of components that haven't heartbeat within `stale_after`.
    pub fn stale_components(&self, stale_after: Duration) -> Vec<String> {
        let now = Instant::now();
        self.components
            .read()
            .iter()
            .filter(|(_, h)| !h.healthy || now.duration_since(h.last_heartbeat) > stale_after)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn snapshot(&self) -> HashMap<String, ComponentHealth> {
        self.components.read().clone()
    }
}
