use std::collections::HashMap;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::debug;

/// Runtime-internal signal announcing module teardown, namespaced per
/// package id. Running components subscribe so they can self-terminate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSignal {
    Unloading { package_id: String },
}

#[derive(Default)]
pub struct ModuleSignalBus {
    subscribers: Mutex<HashMap<String, Vec<Sender<ModuleSignal>>>>,
}

impl ModuleSignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, package_id: &str) -> Receiver<ModuleSignal> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .entry(package_id.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Deliver the unloading signal to every live subscriber of
    /// `package_id`, pruning disconnected ones. Returns deliveries.
    pub fn broadcast_unloading(&self, package_id: &str) -> usize {
        let mut subscribers = self.subscribers.lock();
        let Some(senders) = subscribers.get_mut(package_id) else {
            return 0;
        };
        let signal = ModuleSignal::Unloading {
            package_id: package_id.to_string(),
        };
        senders.retain(|tx| tx.send(signal.clone()).is_ok());
        let delivered = senders.len();
        if senders.is_empty() {
            subscribers.remove(package_id);
        }
        debug!(package_id, delivered, "module unloading signal broadcast");
        delivered
    }

    pub fn subscriber_count(&self, package_id: &str) -> usize {
        self.subscribers
            .lock()
            .get(package_id)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
#[path = "tests/events_tests.rs"]
mod tests;
