use crate::command::{Command, Reply};
use std::collections::HashMap;
use tokio::sync::oneshot;

/// A command on its way to the backend, along with where to deliver its reply.
#[derive(Debug)]
pub struct Envelope {
    pub command: Command,
    pub reply: oneshot::Sender<Reply>,
}

pub type Key = String;
pub type Value = String;

pub type Data = HashMap<Key, Value>;
