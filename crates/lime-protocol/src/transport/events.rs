//! Transport lifecycle: pre-close hooks and a status watch.

use std::fmt;
use std::future::Future;
use std::sync::Mutex;

use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tracing::debug;

use crate::error::ProtocolError;

/// Async callback awaited before a transport finishes closing.
pub type ClosingHook = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Connection status of a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportStatus {
    /// Not opened yet.
    Idle,
    Connected,
    /// Closed locally or by the peer.
    Closed,
    /// Faulted with the given message.
    Failed(String),
}

impl TransportStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed(_))
    }

    /// The error reads and writes report in this status.
    pub fn to_error(&self) -> ProtocolError {
        match self {
            Self::Idle => ProtocolError::NotConnected,
            Self::Failed(message) => ProtocolError::TransportFailed(message.clone()),
            Self::Connected | Self::Closed => ProtocolError::ConnectionClosed,
        }
    }
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connected => write!(f, "connected"),
            Self::Closed => write!(f, "closed"),
            Self::Failed(message) => write!(f, "failed: {}", message),
        }
    }
}

/// Closing hooks and status shared by a transport and its observers.
///
/// `Closed` and `Failed` are terminal: whichever is published first sticks.
pub struct TransportEvents {
    hooks: Mutex<Vec<ClosingHook>>,
    status: watch::Sender<TransportStatus>,
}

impl TransportEvents {
    pub fn new(initial: TransportStatus) -> Self {
        let (status, _) = watch::channel(initial);
        Self {
            hooks: Mutex::new(Vec::new()),
            status,
        }
    }

    /// Registers a hook run by [`run_closing_hooks`](Self::run_closing_hooks).
    pub fn on_closing<F, Fut>(&self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: ClosingHook = Box::new(move || Box::pin(hook()));
        self.hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(hook);
    }

    /// Awaits every registered hook in registration order.
    ///
    /// Hooks run at most once; later calls find the list empty.
    pub async fn run_closing_hooks(&self) {
        let hooks = std::mem::take(&mut *self.hooks.lock().unwrap_or_else(|e| e.into_inner()));
        if !hooks.is_empty() {
            debug!(count = hooks.len(), "Running transport closing hooks");
        }
        for hook in &hooks {
            hook().await;
        }
    }

    pub fn status(&self) -> TransportStatus {
        self.status.borrow().clone()
    }

    /// Moves from `Idle` to `Connected`. No effect on other states.
    pub fn mark_connected(&self) -> bool {
        self.status.send_if_modified(|status| {
            if *status == TransportStatus::Idle {
                *status = TransportStatus::Connected;
                true
            } else {
                false
            }
        })
    }

    /// Publishes `Closed` unless already terminal. Returns true if it did.
    pub fn mark_closed(&self) -> bool {
        self.publish_terminal(TransportStatus::Closed)
    }

    /// Publishes `Failed` unless already terminal. Returns true if it did.
    pub fn mark_failed(&self, message: impl Into<String>) -> bool {
        self.publish_terminal(TransportStatus::Failed(message.into()))
    }

    fn publish_terminal(&self, next: TransportStatus) -> bool {
        self.status.send_if_modified(|status| {
            if status.is_terminal() {
                false
            } else {
                *status = next;
                true
            }
        })
    }

    /// Returns a receiver observing status changes.
    pub fn subscribe(&self) -> watch::Receiver<TransportStatus> {
        self.status.subscribe()
    }

    /// Waits until the status is `Closed` or `Failed` and returns it.
    pub async fn wait_terminal(&self) -> TransportStatus {
        let mut rx = self.status.subscribe();
        loop {
            {
                let status = rx.borrow_and_update();
                if status.is_terminal() {
                    return status.clone();
                }
            }
            if rx.changed().await.is_err() {
                return self.status();
            }
        }
    }
}

impl Default for TransportEvents {
    fn default() -> Self {
        Self::new(TransportStatus::Idle)
    }
}

impl fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportEvents")
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}
