//! Shutdown notification fanned out from the server to its connections.

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct Shutdown {
    is_shutdown: bool,
    notify: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new(notify: watch::Receiver<bool>) -> Self {
        Self {
            is_shutdown: false,
            notify,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// Resolves once shutdown was requested or the notifier went away.
    ///
    /// Safe to use as a `select!` branch: dropping it early loses nothing.
    pub async fn recv(&mut self) {
        while !self.is_shutdown {
            let requested = *self.notify.borrow();
            if requested || self.notify.changed().await.is_err() {
                self.is_shutdown = true;
            }
        }
    }
}
