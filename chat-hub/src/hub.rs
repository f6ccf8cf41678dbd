//! The relay at the centre of the chat: owns the registry and the broadcast
//! dispatch loop.
//!
//! Broadcasts go through one unbounded FIFO channel drained by a single task,
//! which is what keeps every sender's messages in order for every recipient.
//! Direct messages skip the channel and land straight in the target's queue.

use std::{net::SocketAddr, sync::Arc};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::{
    error::{HubError, HubResult},
    registry::Registry,
};

pub struct Hub {
    registry: Arc<Registry>,
    broadcaster: mpsc::UnboundedSender<String>,
}

impl Hub {
    /// Creates a hub and starts its dispatch task on the current runtime.
    ///
    /// The task runs until the last handle to the hub is dropped.
    pub fn spawn() -> Arc<Self> {
        let registry = Arc::new(Registry::new());
        let (broadcaster, inbound) = mpsc::unbounded_channel();
        tokio::spawn(dispatch_loop(inbound, Arc::clone(&registry)));
        Arc::new(Self {
            registry,
            broadcaster,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Queues `text` for delivery to every registered session, tagged with
    /// the sender's address and name.
    pub fn broadcast(&self, sender_name: &str, sender_addr: SocketAddr, text: &str) {
        let line = format_broadcast(sender_name, sender_addr, text);
        if let Err(error) = self.broadcaster.send(line) {
            warn!(?error, "dispatch loop is gone; dropping broadcast");
        }
    }

    /// Delivers `text` to the single session registered as `to`.
    pub async fn direct_message(&self, from: &str, to: &str, text: &str) -> HubResult<()> {
        let target = self
            .registry
            .lookup(to)
            .await
            .ok_or_else(|| HubError::UserNotFound(to.to_string()))?;

        // A target that is mid-teardown is as good as gone.
        if !target.enqueue(format_direct(from, text)) {
            return Err(HubError::UserNotFound(to.to_string()));
        }
        trace!(from, to, "direct message delivered");
        Ok(())
    }
}

pub fn format_broadcast(sender_name: &str, sender_addr: SocketAddr, text: &str) -> String {
    format!("[{sender_addr}]{sender_name}: {text}")
}

pub fn format_direct(from: &str, text: &str) -> String {
    format!("[private]{from}: {text}")
}

async fn dispatch_loop(mut inbound: mpsc::UnboundedReceiver<String>, registry: Arc<Registry>) {
    while let Some(line) = inbound.recv().await {
        let recipients = registry.snapshot().await;
        let mut delivered = 0usize;
        for session in &recipients {
            // Closed queues are skipped; one dead session never holds up
            // the rest.
            if session.enqueue(line.as_str()) {
                delivered += 1;
            }
        }
        trace!(delivered, recipients = recipients.len(), "broadcast fanned out");
    }
    debug!("broadcast channel closed; dispatch loop exiting");
}
