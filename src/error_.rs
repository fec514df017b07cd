// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt::{Display, Formatter};
use std::io;

use log::info;
use thiserror::Error;

use crate::bolt::BoltMeta;
use crate::value::ValueReceive;

/// Errors that can occur while driving a [`Connection`](crate::Connection).
///
/// **Important Notes on Usage:**
///  * Error messages are *not* considered part of the crate's API.
///    They may change at any time and don't follow semantic versioning.
///  * The only string in errors that can be (somewhat<sup>1</sup>) reliably
///    used is [`ServerError::code()`].
///
/// <sup>1</sup>The code is received from the server and therefore might
/// still change depending on the server version.
#[derive(Error, Debug)]
pub enum BoltError {
    /// Used when experiencing a connectivity error: a broken socket, an
    /// unexpected EOF, a failed write.
    #[error("connection failed: {message} (during commit: {during_commit}){}",
            source.as_ref().map(|err| format!(" caused by: {err}")).unwrap_or_default())]
    #[non_exhaustive]
    Disconnect {
        message: String,
        source: Option<io::Error>,
        /// Will be true when the connection was lost while the driver cannot
        /// be sure whether the ongoing transaction has been committed or not.
        /// To recover from this situation, business logic is required to
        /// check whether the transaction should or shouldn't be retried.
        during_commit: bool,
    },

    /// Used when the connection is configured in a way the negotiated
    /// protocol version cannot express (e.g., notification filtering on a
    /// server that doesn't support it).
    #[error("invalid configuration: {message}")]
    #[non_exhaustive]
    InvalidConfig { message: String },

    /// Used when the server returns a `FAILURE` message.
    #[error("{error}")]
    #[non_exhaustive]
    ServerError { error: Box<ServerError> },

    /// Used when an operation's deadline expired or the server-hinted read
    /// timeout elapsed. The connection is dead afterwards.
    #[error("{message}")]
    #[non_exhaustive]
    Timeout { message: String },

    /// Used when the caller drives the connection in a way its current
    /// state doesn't permit (e.g., committing without a transaction,
    /// reading a stream that has been invalidated).
    ///
    /// This error is never sticky: it does not poison the connection.
    #[error("{message}")]
    #[non_exhaustive]
    InvalidState { message: String },

    /// An unexpected message or message content was received from the
    /// server. There's either a bug in this crate or in the server.
    #[error(
        "the connection encountered a protocol violation, \
        this is likely a bug in the driver or the server: {message}"
    )]
    #[non_exhaustive]
    ProtocolError { message: String },
}

impl BoltError {
    pub(crate) fn wrap_read<T>(res: io::Result<T>) -> Result<T> {
        match res {
            Ok(t) => Ok(t),
            Err(err) => Err(Self::read_err(err)),
        }
    }

    pub(crate) fn read_err(err: io::Error) -> Self {
        info!("read error: {err}");
        if is_timeout_kind(&err) {
            return Self::Timeout {
                message: format!("read timed out: {err}"),
            };
        }
        Self::Disconnect {
            message: String::from("failed to read"),
            source: Some(err),
            during_commit: false,
        }
    }

    pub(crate) fn wrap_write<T>(res: io::Result<T>) -> Result<T> {
        match res {
            Ok(t) => Ok(t),
            Err(err) => Err(Self::write_err(err)),
        }
    }

    pub(crate) fn write_err(err: io::Error) -> Self {
        info!("write error: {err}");
        if is_timeout_kind(&err) {
            return Self::Timeout {
                message: format!("write timed out: {err}"),
            };
        }
        Self::Disconnect {
            message: String::from("failed to write"),
            source: Some(err),
            during_commit: false,
        }
    }

    pub(crate) fn connect_error(err: io::Error) -> Self {
        Self::Disconnect {
            message: String::from("failed to open connection"),
            source: Some(err),
            during_commit: false,
        }
    }

    pub(crate) fn wrap_connect<T>(res: io::Result<T>) -> Result<T> {
        match res {
            Ok(t) => Ok(t),
            Err(err) => Err(Self::connect_error(err)),
        }
    }

    pub(crate) fn protocol_error<S: Into<String>>(message: S) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub(crate) fn failed_commit(mut self) -> Self {
        if let Self::Disconnect { during_commit, .. } = &mut self {
            *during_commit = true;
        }
        self
    }

    pub(crate) fn wrap_commit<T>(res: Result<T>) -> Result<T> {
        match res {
            Ok(t) => Ok(t),
            Err(err) => Err(err.failed_commit()),
        }
    }

    /// Whether this error kills the connection for good.
    ///
    /// Everything is fatal except a server-side `ClientError`, which leaves
    /// the connection in a failed state that a `RESET` can recover from.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::ServerError { error } => error.is_fatal(),
            _ => true,
        }
    }
}

// The sticky connection error has to be handed out on every subsequent
// gated operation. `io::Error` isn't `Clone`, so the source is rebuilt from
// its kind and message.
impl Clone for BoltError {
    fn clone(&self) -> Self {
        match self {
            Self::Disconnect {
                message,
                source,
                during_commit,
            } => Self::Disconnect {
                message: message.clone(),
                source: source
                    .as_ref()
                    .map(|e| io::Error::new(e.kind(), e.to_string())),
                during_commit: *during_commit,
            },
            Self::InvalidConfig { message } => Self::InvalidConfig {
                message: message.clone(),
            },
            Self::ServerError { error } => Self::ServerError {
                error: error.clone(),
            },
            Self::Timeout { message } => Self::Timeout {
                message: message.clone(),
            },
            Self::InvalidState { message } => Self::InvalidState {
                message: message.clone(),
            },
            Self::ProtocolError { message } => Self::ProtocolError {
                message: message.clone(),
            },
        }
    }
}

fn is_timeout_kind(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

const UNKNOWN_NEO4J_CODE: &str = "Neo.DatabaseError.General.UnknownError";
const UNKNOWN_NEO4J_MESSAGE: &str = "An unknown error occurred.";

/// A `FAILURE` received from the server.
///
/// The `code` has the form `Neo.<Classification>.<Category>.<Title>`.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ServerError {
    pub code: String,
    pub message: String,
}

impl ServerError {
    pub(crate) fn from_meta(mut meta: BoltMeta) -> Self {
        let code = match meta.remove("code") {
            Some(ValueReceive::String(code)) => code,
            _ => UNKNOWN_NEO4J_CODE.into(),
        };
        let message = match meta.remove("message") {
            Some(ValueReceive::String(message)) => message,
            _ => UNKNOWN_NEO4J_MESSAGE.into(),
        };
        Self { code, message }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn classification(&self) -> &str {
        self.code.split('.').nth(1).unwrap_or("")
    }

    pub fn category(&self) -> &str {
        self.code.split('.').nth(2).unwrap_or("")
    }

    pub fn title(&self) -> &str {
        self.code.split('.').nth(3).unwrap_or("")
    }

    /// Only `ClientError`s leave the connection recoverable. Transient and
    /// database errors, as well as classifications this crate doesn't know,
    /// kill it.
    pub(crate) fn is_fatal(&self) -> bool {
        self.classification() != "ClientError"
    }

    pub(crate) fn into_error(self) -> BoltError {
        BoltError::ServerError {
            error: Box::new(self),
        }
    }
}

impl Display for ServerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "server error: {} (code: {})", self.message, self.code)
    }
}

pub type Result<T> = std::result::Result<T, BoltError>;
