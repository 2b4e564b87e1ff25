//! Process-level cooperative shutdown.
//!
//! This is distinct from a pipeline's own `producer_shutdown` (which
//! force-quits the feature buffer and arc buffers so worker tasks unwind).
//! `ShutdownHandler` is the outer layer a host binary installs once, to
//! turn Ctrl-C and panics into a single signal that triggers that inner
//! `producer_shutdown` call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info};

pub struct ShutdownHandler {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownHandler {
    /// Installs a ctrl-c listener and a panic hook that both request
    /// shutdown, then returns a handler whose guard can be cloned and
    /// handed to every pipeline-owning task.
    pub async fn install() -> Self {
        let requested = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());

        let sig_requested = requested.clone();
        let sig_notify = notify.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received ctrl-c, requesting shutdown");
                sig_requested.store(true, Ordering::SeqCst);
                sig_notify.notify_waiters();
            }
        });

        let panic_requested = requested.clone();
        let panic_notify = notify.clone();
        let previous_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            error!(%info, "panic detected, requesting shutdown");
            panic_requested.store(true, Ordering::SeqCst);
            panic_notify.notify_waiters();
            previous_hook(info);
        }));

        Self { requested, notify }
    }

    pub fn guard(&self) -> ShutdownGuard {
        ShutdownGuard {
            requested: self.requested.clone(),
            notify: self.notify.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ShutdownGuard {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownGuard {
    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Suspends until shutdown is requested. Safe to call from multiple
    /// tasks concurrently; each gets woken.
    pub async fn wait(&self) {
        if self.is_shutdown_requested() {
            return;
        }
        self.notify.notified().await;
    }

    pub fn request_shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}
