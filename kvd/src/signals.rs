//! Shutdown coordination shared by the acceptor loop and its timers.
//!
//! Grounded in the broadcast/watch-style `Shutdown`/`Phase` handles used
//! throughout the teacher crate's generators and blackholes
//! (`crate::signals::Shutdown`, `crate::signals::Phase`): one owner
//! triggers, any number of cloned watchers observe the same transition
//! exactly once each.

use tokio::sync::watch;

/// Owned by whoever decides the process should stop (typically `main`,
/// reacting to Ctrl-C). Dropping this after [`Shutdown::trigger`] is fine;
/// watchers have already latched the signal.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

/// A cloneable handle tasks `.await` to learn the process is shutting down.
#[derive(Debug, Clone)]
pub struct ShutdownWatch {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Create a new shutdown signal, paired with its first watcher.
    #[must_use]
    pub fn new() -> (Self, ShutdownWatch) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, ShutdownWatch { rx })
    }

    /// Signal every current and future watcher.
    pub fn trigger(&self) {
        // No receivers is not an error: it just means nothing is listening yet.
        let _ = self.tx.send(true);
    }

    /// Create another independent watcher of this same signal.
    #[must_use]
    pub fn watch(&self) -> ShutdownWatch {
        ShutdownWatch {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownWatch {
    /// Resolve once shutdown has been triggered. Safe to call repeatedly or
    /// after the signal already fired.
    pub async fn recv(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        // `changed` only errors if every `Shutdown` was dropped without ever
        // triggering, which only happens during teardown; either way the
        // process is on its way down.
        let _ = self.rx.changed().await;
    }

    /// Non-blocking check of the current state.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watchers_observe_trigger() {
        let (shutdown, mut watch_a) = Shutdown::new();
        let mut watch_b = shutdown.watch();

        assert!(!watch_a.is_shutdown());
        assert!(!watch_b.is_shutdown());

        shutdown.trigger();

        watch_a.recv().await;
        watch_b.recv().await;
        assert!(watch_a.is_shutdown());
        assert!(watch_b.is_shutdown());
    }

    #[tokio::test]
    async fn recv_after_trigger_returns_immediately() {
        let (shutdown, mut watcher) = Shutdown::new();
        shutdown.trigger();
        watcher.recv().await;
        watcher.recv().await;
    }
}
