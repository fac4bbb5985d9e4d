//! Network server meant to interact to service requests from clients.

use crate::{
    api::{framed, StoreService},
    shutdown::Shutdown,
    storage::Store,
};
use anyhow::Result;
use std::{future::Future, io, net::SocketAddr, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    sync::watch,
    time::sleep,
};
use tracing::{error, info, info_span, warn};
use tracing_futures::Instrument;

/// Longest pause between two failed attempts to accept a connection.
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

pub struct Server<S> {
    listener: TcpListener,
    store: S,
}

impl<S> Server<S>
where
    S: Store<Err = anyhow::Error> + Clone + Send + Sync + 'static,
{
    pub fn new(listener: TcpListener, store: S) -> Self {
        Self { listener, store }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `signal` resolves.
    ///
    /// On return the listening socket is closed and every open connection has
    /// been told to close as well. Connections are not awaited.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (notify, shutdown) = watch::channel(false);
        tokio::pin!(signal);

        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("shutting down");
                    let _ = notify.send(true);
                    break;
                }
                (conn, peer_addr) = self.accept() => {
                    self.handle(conn, peer_addr, Shutdown::new(shutdown.clone()))
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(reason = %e, "unable to listen for ctrl-c");
            }
        })
        .await
    }

    /// Waits for the next connection, pausing a little longer after each
    /// failed attempt.
    async fn accept(&self) -> (TcpStream, SocketAddr) {
        let mut failures = 0;
        loop {
            match self.listener.accept().await {
                Ok(accepted) => return accepted,
                Err(e) => {
                    failures += 1;
                    let backoff = accept_backoff(failures);
                    warn!(reason = %e, ?backoff, "unable to accept connection");
                    sleep(backoff).await;
                }
            }
        }
    }

    fn handle<C>(&self, conn: C, peer_addr: SocketAddr, shutdown: Shutdown)
    where
        C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let service = self.new_service(conn, shutdown);
        let span = info_span!("connection", peer_addr = %peer_addr);

        tokio::spawn(
            async move {
                info!("serving new connection");

                match service.handle().await {
                    Ok(_) => info!("bye"),
                    Err(e) => error!(reason = %e, "oops"),
                }
            }
            .instrument(span),
        );
    }

    fn new_service<C>(&self, conn: C, shutdown: Shutdown) -> StoreService<C, S>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        StoreService::new(framed(conn), self.store.clone(), shutdown)
    }
}

fn accept_backoff(failures: u32) -> Duration {
    let backoff = Duration::from_millis(10) * 2u32.saturating_pow(failures.saturating_sub(1));
    backoff.min(MAX_ACCEPT_BACKOFF)
}
