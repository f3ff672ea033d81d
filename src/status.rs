//! User-visible status line

use std::sync::Mutex;

use flume::{Receiver, Sender};
use tracing::debug;

/// Single text value with change-only notifications.
///
/// Both the capture loop and inference tasks write here; subscribers only
/// hear about values that differ from the previous one.
#[derive(Default)]
pub struct StatusText {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    value: Option<String>,
    subscribers: Vec<Sender<String>>,
}

impl StatusText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<String> {
        self.lock().value.clone()
    }

    /// Replace the value. Returns `false` and notifies nobody when unchanged.
    pub fn set(&self, value: impl Into<String>) -> bool {
        let value = value.into();
        let mut inner = self.lock();
        if inner.value.as_deref() == Some(value.as_str()) {
            return false;
        }

        debug!(status = %value, "Status changed");
        inner
            .subscribers
            .retain(|tx| tx.send(value.clone()).is_ok());
        inner.value = Some(value);
        true
    }

    /// Receive every future change
    pub fn subscribe(&self) -> Receiver<String> {
        let (tx, rx) = flume::unbounded();
        self.lock().subscribers.push(tx);
        rx
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
