use anyhow::{ensure, Context, Result};
use structopt::StructOpt;
use tokio::net::TcpListener;
use toy_redis::{storage::inmemory, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(StructOpt)]
struct Opts {
    #[structopt(short, long, default_value = "127.0.0.1:6379")]
    address: String,

    /// Number of requests that may wait for the store before senders block.
    #[structopt(short, long, default_value = "10")]
    queue_capacity: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();

    let opts = Opts::from_args();

    run_with(opts).await
}

async fn run_with(opts: Opts) -> Result<()> {
    ensure!(opts.queue_capacity > 0, "queue capacity must be at least 1");

    let listener = TcpListener::bind(&opts.address)
        .await
        .with_context(|| format!("unable to listen at {}", opts.address))?;

    info!("Listening at {}", opts.address);

    let (store, backend) = inmemory::start(opts.queue_capacity);

    Server::new(listener, store).run_until_ctrl_c().await?;

    backend.await.context("store backend crashed")?;

    info!("Bye");

    Ok(())
}

fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
