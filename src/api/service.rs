//! Per-connection service: reads requests, runs them against the store and
//! writes the replies back.

use super::types::Request;
use crate::{
    command::{Command, Reply},
    shutdown::Shutdown,
    storage::Store,
};
use anyhow::Result;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct StoreService<F, S> {
    frames: F,
    store: S,
    shutdown: Shutdown,
}

impl<F, S> StoreService<F, S>
where
    F: Stream<Item = anyhow::Result<Request>> + Sink<Reply, Error = anyhow::Error> + Unpin,
    S: Store<Err = anyhow::Error>,
{
    pub fn new(frames: F, store: S, shutdown: Shutdown) -> Self {
        Self {
            frames,
            store,
            shutdown,
        }
    }

    /// Serves requests one at a time until the peer hangs up or shutdown is
    /// requested.
    pub async fn handle(mut self) -> Result<()> {
        while !self.shutdown.is_shutdown() {
            let req = tokio::select! {
                req = self.frames.next() => req,
                _ = self.shutdown.recv() => break,
            };

            let req = match req {
                Some(req) => req?,
                None => break,
            };

            let res = match self.process(req).await? {
                Some(res) => res,
                None => break,
            };

            tokio::select! {
                sent = self.frames.send(res) => sent?,
                _ = self.shutdown.recv() => break,
            }
        }
        Ok(())
    }

    /// Produces the reply to `req`, or `None` if shutdown interrupted it.
    async fn process(&mut self, req: Request) -> Result<Option<Reply>> {
        match req {
            Ok(command) => {
                debug!(?command, "dispatching");
                self.dispatch(command).await
            }
            Err(e) => {
                warn!(reason = %e, "rejecting malformed request");
                Ok(Some(Reply::Error(e.to_string())))
            }
        }
    }

    async fn dispatch(&mut self, command: Command) -> Result<Option<Reply>> {
        tokio::select! {
            res = self.store.dispatch(command) => res.map(Some),
            _ = self.shutdown.recv() => Ok(None),
        }
    }
}
