//! Command implementations.
//!
//! Every command builds on one [`ClientContext`]; results go to stdout, logs
//! to stderr.

use std::path::PathBuf;

use regusto_client::{ClientConfig, ClientContext, ClientError, ConfigError};
use thiserror::Error;

pub mod cart;
pub mod chat;
pub mod orders;
pub mod session;
pub mod stores;

/// Errors that end a command.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),

    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl CliError {
    /// Process exit code: 2 for bad input, 3 when a new sign-in is needed,
    /// 1 otherwise.
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Client(ClientError::Validation(_)) | Self::NotFound(_) => 2,
            Self::Client(ClientError::Auth | ClientError::Session(_)) => 3,
            _ => 1,
        }
    }
}

/// Build the client context from the environment. The session file from
/// the command line wins over `REGUSTO_SESSION_FILE`.
pub fn context(session_file: PathBuf) -> Result<ClientContext, CliError> {
    let mut config = ClientConfig::from_env()?;
    if config.session_file.is_none() {
        config.session_file = Some(session_file);
    }
    Ok(ClientContext::new(config)?)
}

/// Write one line of command output.
#[allow(clippy::print_stdout)]
fn emit(line: impl std::fmt::Display) {
    println!("{line}");
}
