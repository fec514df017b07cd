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

use std::io;

use thiserror::Error;

use crate::error_::BoltError;

/// Failure while packing a value: either the value cannot be expressed on
/// the wire or the underlying writer failed.
#[derive(Debug, Error)]
#[error("{message}")]
pub(crate) struct PackStreamSerializeError {
    message: String,
    #[source]
    cause: Option<io::Error>,
}

impl From<String> for PackStreamSerializeError {
    fn from(message: String) -> Self {
        Self {
            message,
            cause: None,
        }
    }
}

impl From<&str> for PackStreamSerializeError {
    fn from(message: &str) -> Self {
        String::from(message).into()
    }
}

impl From<io::Error> for PackStreamSerializeError {
    fn from(err: io::Error) -> Self {
        Self {
            message: format!("IO error while serializing: {err}"),
            cause: Some(err),
        }
    }
}

impl From<PackStreamSerializeError> for BoltError {
    fn from(err: PackStreamSerializeError) -> Self {
        match err.cause {
            Some(io_err) => BoltError::write_err(io_err),
            None => BoltError::InvalidConfig {
                message: err.message,
            },
        }
    }
}

/// Failure while hydrating a value: protocol violation or a failed read.
#[derive(Debug, Error)]
#[error("{message}")]
pub(crate) struct PackStreamDeserializeError {
    message: String,
    #[source]
    cause: Option<io::Error>,
}

impl From<String> for PackStreamDeserializeError {
    fn from(message: String) -> Self {
        Self {
            message,
            cause: None,
        }
    }
}

impl From<&str> for PackStreamDeserializeError {
    fn from(message: &str) -> Self {
        String::from(message).into()
    }
}

impl From<io::Error> for PackStreamDeserializeError {
    fn from(err: io::Error) -> Self {
        Self {
            message: format!("IO error while deserializing: {err}"),
            cause: Some(err),
        }
    }
}

impl From<PackStreamDeserializeError> for BoltError {
    fn from(err: PackStreamDeserializeError) -> Self {
        match err.cause {
            Some(io_err) => BoltError::read_err(io_err),
            None => BoltError::protocol_error(err.message),
        }
    }
}
