pub mod api;
pub mod command;
pub mod shutdown;
pub mod storage;

pub use api::Server;
pub use command::{Command, Reply};
