//! In-memory key-value storage.
//!
//! The data lives inside a single [`Backend`] task and is never shared: every
//! access goes through a bounded queue of [`Envelope`]s and is applied in
//! arrival order. The queue only closes once every [`Store`] handle has been
//! dropped, so the backend always drains what was already queued before it
//! stops.

use super::types::{Data, Envelope};
use crate::command::{Command, Reply};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::debug;

pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

#[derive(Debug)]
pub struct Backend {
    data: Data,
    envelopes: mpsc::Receiver<Envelope>,
}

#[derive(Debug, Clone)]
pub struct Store {
    envelopes: mpsc::Sender<Envelope>,
}

/// Spawns the backend and returns a handle to reach it.
///
/// The returned [`JoinHandle`] resolves once every handle is gone and the
/// queue has been drained.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn start(capacity: usize) -> (Store, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity);

    let backend = Backend {
        data: Data::new(),
        envelopes: rx,
    };

    let handle = tokio::spawn(backend.start());

    (Store { envelopes: tx }, handle)
}

#[async_trait]
impl super::Store for Store {
    type Err = anyhow::Error;

    async fn dispatch(&self, command: Command) -> Result<Reply, Self::Err> {
        let (tx, rx) = oneshot::channel();
        self.envelopes
            .send(Envelope { command, reply: tx })
            .await
            .context("unable to enqueue command")?;
        rx.await.context("unable to access reply of command")
    }
}

impl Backend {
    pub async fn start(mut self) {
        while let Some(Envelope { command, reply }) = self.envelopes.recv().await {
            let outcome = command.apply(&mut self.data);
            if reply.send(outcome).is_err() {
                debug!("requester left before the reply was delivered");
            }
        }
        debug!(keys = self.data.len(), "store backend stopped");
    }
}
