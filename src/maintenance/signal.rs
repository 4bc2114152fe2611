use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::TransportError;
use crate::shutdown::Shutdown;
use crate::transport::{SignalChannel, maintenance_channel};

/// "Maintenance now" flag shared between a stage's control loop and its
/// signal listener. Set by the listener, taken by the loop.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceFlag(Arc<AtomicBool>);

impl MaintenanceFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns whether a request was pending and clears it in one step, so
    /// each request is consumed exactly once.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Subscribes to the stage's maintenance channel and raises `flag` on every
/// message until shutdown.
pub async fn spawn_listener(
    signals: Arc<dyn SignalChannel>,
    stage: &str,
    flag: MaintenanceFlag,
    shutdown: Shutdown,
) -> Result<JoinHandle<()>, TransportError> {
    let topic = maintenance_channel(stage);
    let (tx, mut rx) = mpsc::channel::<String>(8);
    signals.subscribe(&topic, tx).await?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                message = rx.recv() => match message {
                    Some(payload) => {
                        info!(%topic, %payload, "maintenance requested");
                        flag.request();
                    }
                    None => {
                        debug!(%topic, "signal channel closed");
                        break;
                    }
                },
            }
        }
    }))
}
