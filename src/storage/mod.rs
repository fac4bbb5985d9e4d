use crate::command::{Command, Reply};
use async_trait::async_trait;

pub mod inmemory;
pub mod types;

#[async_trait]
pub trait Store {
    type Err;

    /// Hands `command` over to the store and waits for its reply.
    async fn dispatch(&self, command: Command) -> Result<Reply, Self::Err>;
}
