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

#![allow(clippy::option_map_unit_fn)]

//! # Bolt v5 Connection Core
//!
//! This crate implements the client half of the Bolt v5 protocol state
//! machine: one [`Connection`] per server socket, multiplexing cypher query
//! execution over a single duplex byte stream.
//!
//! It is the building block a connection pool or routing driver is built on
//! top of; it deliberately does *not* establish connections, pool them, or
//! retry work. The caller hands over an already-connected stream and drives
//! one operation at a time.
//!
//! ## What the connection does
//!  * mirrors the server-side protocol state machine and gates every
//!    operation on it ([`Connection::run`], [`Connection::tx_begin`], …),
//!  * pipelines requests and dispatches responses to per-request handlers
//!    in FIFO order,
//!  * tracks any number of open result streams within a transaction,
//!    paging each one lazily ([`Connection::next`]) and discarding on
//!    demand ([`Connection::consume`]),
//!  * distinguishes recoverable server failures (cured by
//!    [`Connection::reset`]) from fatal ones that kill the connection.
//!
//! ## Cancellation
//! Every operation that touches the wire accepts an optional deadline.
//! When the deadline passes mid-read, the socket is shut down, the
//! operation fails with [`BoltError::Timeout`], and the connection is dead.
//! A [`ShutdownHandle`] offers the same escape hatch to a supervising
//! thread closing the owning driver.
//!
//! ## Logging
//! The crate logs through the [`log`] facade. Outbound and inbound
//! messages are logged at `DEBUG`, raw chunks at `TRACE`, prefixed with
//! the connection's local port and server-assigned connection id.

mod macros;

mod bolt;
mod error_;
mod record;
mod summary;
mod util;
pub mod value;

pub use bolt::auth::AuthToken;
pub use bolt::notification::{MinimumSeverity, NotificationFilter};
pub use bolt::routing::RoutingTable;
pub use bolt::streams::StreamHandle;
pub use bolt::{
    AccessMode, Command, Connection, HelloConfig, ProtocolVersion, ShutdownHandle, StreamEvent,
    TcpConnection, TxConfig, TxHandle, DEFAULT_FETCH_SIZE, DEFAULT_USER_AGENT,
};
pub use error_::{BoltError, Result, ServerError};
pub use record::Record;
pub use summary::{Counters, Notification, Plan, Position, Profile, QueryType, Summary};
pub use value::{ValueReceive, ValueSend};
