//! Pluggable handlers for peer commands.
//!
//! A request whose body is a JSON object with a string `command` field is
//! routed to the handler registered under that name. The built-in session
//! commands are stubs that succeed without a payload until real handlers are
//! registered over them.

use std::collections::HashMap;

use laplace_transport::PeerMessage;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::snapshot::Snapshot;

/// Names of the built-in session commands.
pub mod commands {
    pub const REGISTER: &str = "register";
    pub const NEW_TOKEN: &str = "new_token";
    pub const START_TLS: &str = "start_tls";
    pub const OBSERVE_GAME: &str = "observe_game";
    pub const GET_AUTH_ID: &str = "get_auth_id";
    pub const CREATE_GAME: &str = "create_game";
    pub const JOIN_GAME: &str = "join_game";
    pub const LEAVE_GAME: &str = "leave_game";
    pub const DELETE_GAME: &str = "delete_game";

    pub const ALL: [&str; 9] = [
        REGISTER,
        NEW_TOKEN,
        START_TLS,
        OBSERVE_GAME,
        GET_AUTH_ID,
        CREATE_GAME,
        JOIN_GAME,
        LEAVE_GAME,
        DELETE_GAME,
    ];
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("invalid arguments for {command}: {reason}")]
    InvalidArgs { command: String, reason: String },
    #[error("{command} rejected: {reason}")]
    Rejected { command: String, reason: String },
}

/// Command envelope carried in a peer request body.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl CommandRequest {
    /// Reads the envelope from the last frame; `None` if it is not one.
    pub fn parse(message: &PeerMessage) -> Option<Self> {
        let body = message.body()?;
        serde_json::from_slice(body).ok()
    }
}

pub trait CommandHandler: Send {
    /// Handles one command; `Some` becomes the next outgoing snapshot.
    fn handle(&mut self, request: &CommandRequest) -> Result<Option<Snapshot>, CommandError>;
}

impl<F> CommandHandler for F
where
    F: FnMut(&CommandRequest) -> Result<Option<Snapshot>, CommandError> + Send,
{
    fn handle(&mut self, request: &CommandRequest) -> Result<Option<Snapshot>, CommandError> {
        self(request)
    }
}

fn acknowledge(_: &CommandRequest) -> Result<Option<Snapshot>, CommandError> {
    Ok(None)
}

/// Command name to handler table.
#[derive(Default)]
pub struct CommandDispatch {
    handlers: HashMap<String, Box<dyn CommandHandler>>,
    dispatched: u64,
}

impl CommandDispatch {
    /// Empty table; nothing is dispatched.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every built-in command answering `Ok(None)`.
    pub fn with_default_handlers() -> Self {
        let mut dispatch = Self::new();
        for name in commands::ALL {
            dispatch.register(name, acknowledge);
        }
        dispatch
    }

    /// Registers `handler` under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, handler: impl CommandHandler + 'static) {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Number of requests handed to a handler so far.
    pub fn dispatched_count(&self) -> u64 {
        self.dispatched
    }

    /// Routes a received request. Non-command requests yield `Ok(None)`.
    pub fn route(&mut self, message: &PeerMessage) -> Result<Option<Snapshot>, CommandError> {
        let Some(request) = CommandRequest::parse(message) else {
            return Ok(None);
        };
        let handler = self
            .handlers
            .get_mut(&request.command)
            .ok_or_else(|| CommandError::UnknownCommand(request.command.clone()))?;
        debug!(command = %request.command, "dispatching peer command");
        self.dispatched += 1;
        handler.handle(&request)
    }
}

impl std::fmt::Debug for CommandDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("CommandDispatch")
            .field("handlers", &names)
            .field("dispatched", &self.dispatched)
            .finish()
    }
}
