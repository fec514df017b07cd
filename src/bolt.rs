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

pub(crate) mod auth;
mod chunk;
mod deadline;
mod handler;
mod message;
pub(crate) mod notification;
mod packstream;
mod queue;
pub(crate) mod routing;
mod state;
pub(crate) mod streams;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::io::{Read, Write};
use std::mem;
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use atomic_refcell::AtomicRefCell;
use itertools::Itertools;
use log::{log_enabled, Level};

use crate::error_::{BoltError, Result, ServerError};
use crate::record::Record;
use crate::summary::Summary;
use crate::value::{ValueReceive, ValueSend};
use auth::AuthToken;
use chunk::{Chunker, Dechunker};
use deadline::DeadlineIO;
use handler::ResponseHandler;
use message::{assert_response_field_count, BoltMessage};
use notification::NotificationFilter;
use packstream::{
    write_value, PackStreamDeserializerImpl, PackStreamSerializeError, PackStreamSerializer,
    PackStreamSerializerDebugImpl, PackStreamSerializerImpl,
};
use queue::MessageQueue;
use routing::RoutingTable;
use state::ConnectionState;
use streams::{Stream, StreamHandle, StreamPool};

/// Applied when the caller passes a fetch size of `0`.
pub const DEFAULT_FETCH_SIZE: i64 = 1000;

/// The user agent sent if the caller doesn't configure one.
pub const DEFAULT_USER_AGENT: &str = env!("NEO4J_BOLT_AGENT_PRODUCT");

const SERVER_AGENT_KEY: &str = "server";
const HINTS_KEY: &str = "hints";
const RECV_TIMEOUT_KEY: &str = "connection.recv_timeout_seconds";

// Bolt 5.2 introduced notification filtering.
const MIN_MINOR_NOTIFICATION_FILTER: u8 = 2;

const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_millis(100);

const MSG_HELLO: u8 = 0x01;
const MSG_GOODBYE: u8 = 0x02;
const MSG_RESET: u8 = 0x0F;
const MSG_RUN: u8 = 0x10;
const MSG_BEGIN: u8 = 0x11;
const MSG_COMMIT: u8 = 0x12;
const MSG_ROLLBACK: u8 = 0x13;
const MSG_DISCARD: u8 = 0x2F;
const MSG_PULL: u8 = 0x3F;
const MSG_ROUTE: u8 = 0x66;
const MSG_LOGON: u8 = 0x6A;

const MSG_SUCCESS: u8 = 0x70;
const MSG_RECORD: u8 = 0x71;
const MSG_IGNORED: u8 = 0x7E;
const MSG_FAILURE: u8 = 0x7F;

pub(crate) type BoltMeta = HashMap<String, ValueReceive>;

pub(crate) fn dbg_extra(port: Option<u16>, bolt_id: Option<&str>) -> String {
    format!(
        "[#{:04X} {:<10}] ",
        port.unwrap_or(0),
        bolt_id.unwrap_or("")
    )
}

macro_rules! conn_log_extra {
    ($conn:expr) => {
        'a: {
            {
                let meta = $conn.meta.try_borrow();
                let Ok(meta) = meta else {
                    break 'a dbg_extra($conn.local_port, Some("!!!!"));
                };
                let Some(ValueReceive::String(id)) = meta.get("connection_id") else {
                    break 'a dbg_extra($conn.local_port, None);
                };
                dbg_extra($conn.local_port, Some(id))
            }
        }
    };
}

macro_rules! conn_debug {
    ($conn:expr, $($args:tt)+) => {{
        #[allow(unused_imports)]
        use log::debug;

        debug!("{}{}", conn_log_extra!($conn), format!($($args)*));
    }};
}

macro_rules! conn_info {
    ($conn:expr, $($args:tt)+) => {{
        #[allow(unused_imports)]
        use log::info;

        info!("{}{}", conn_log_extra!($conn), format!($($args)*));
    }};
}

macro_rules! conn_error {
    ($conn:expr, $($args:tt)+) => {{
        #[allow(unused_imports)]
        use log::error;

        error!("{}{}", conn_log_extra!($conn), format!($($args)*));
    }};
}

/// The negotiated protocol version.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

/// Identifies the transaction a connection currently has open.
///
/// Guards against callers sticking to a connection across transaction
/// boundaries: operations taking a handle fail when it isn't the current
/// one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TxHandle(u64);

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    #[default]
    Write,
}

/// Everything the handshake (`HELLO` + `LOGON`) sends.
#[derive(Debug, Clone, Copy)]
pub struct HelloConfig<'a> {
    pub user_agent: &'a str,
    pub auth: &'a AuthToken,
    pub routing_context: Option<&'a HashMap<String, ValueSend>>,
    pub notification_filter: &'a NotificationFilter,
}

/// Transaction settings for [`Connection::tx_begin`] and auto-commit
/// [`Connection::run`].
#[derive(Debug, Clone, Default)]
pub struct TxConfig<'a> {
    pub mode: AccessMode,
    pub bookmarks: Option<&'a [String]>,
    pub tx_timeout: Option<Duration>,
    pub tx_metadata: Option<&'a HashMap<String, ValueSend>>,
    pub impersonated_user: Option<&'a str>,
    pub notification_filter: NotificationFilter,
}

/// One query to execute.
#[derive(Debug, Clone, Copy)]
pub struct Command<'a> {
    pub cypher: &'a str,
    pub parameters: Option<&'a HashMap<String, ValueSend>>,
    /// Records per `PULL` batch; `0` picks [`DEFAULT_FETCH_SIZE`], negative
    /// means all remaining records in one batch.
    pub fetch_size: i64,
}

/// What [`Connection::next`] yields: another record, or the summary that
/// terminated the stream.
#[derive(Debug)]
pub enum StreamEvent {
    Record(Record),
    Summary(Arc<Summary>),
}

/// Lets a supervising thread (e.g., the driver shutting down its pool)
/// unblock a connection stuck in I/O. The next read or write fails, which
/// kills the connection.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    socket: Arc<Option<TcpStream>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        if let Some(socket) = (*self.socket).as_ref() {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }
}

pub type TcpConnection = Connection<TcpStream>;

/// One Bolt v5 server connection.
///
/// A connection is driven by a single logical caller: one operation runs to
/// completion before the next starts. It does not synchronize internally;
/// mutual exclusion is the owner's job (in practice, the connection pool).
/// The only supported concurrent interaction is [`ShutdownHandle`].
///
/// Operations that touch the wire take an optional deadline. A passed
/// deadline fails the operation with [`BoltError::Timeout`] and kills the
/// connection, so the caller must discard it.
pub struct Connection<RW: Read + Write> {
    stream: RW,
    socket: Arc<Option<TcpStream>>,
    local_port: Option<u16>,
    minor: u8,

    state: ConnectionState,
    /// Sticky error: the first failure wins and every later gated
    /// operation returns it unchanged.
    err: Option<BoltError>,
    queue: MessageQueue,
    streams: StreamPool,

    tx_counter: u64,
    tx_id: u64,
    last_qid: i64,
    bookmark: Option<String>,
    database: Option<String>,
    routing_table: Option<RoutingTable>,

    meta: Arc<AtomicRefCell<BoltMeta>>,
    server_agent: Arc<AtomicRefCell<Arc<String>>>,
    server_name: String,
    connection_id: String,
    read_timeout: Option<Duration>,

    birth_date: Instant,
    idle_since: Instant,
}

impl TcpConnection {
    /// Wraps an already-connected TCP stream. The stream is cloned so
    /// deadlines and [`ShutdownHandle`] can reach the socket while the
    /// connection reads or writes.
    pub fn from_tcp_stream(
        stream: TcpStream,
        server_name: impl Into<String>,
        minor: u8,
    ) -> Result<Self> {
        let socket = BoltError::wrap_connect(stream.try_clone())?;
        let local_port = stream.local_addr().ok().map(|addr| addr.port());
        Ok(Self::with_socket(
            stream,
            Arc::new(Some(socket)),
            local_port,
            server_name,
            minor,
        ))
    }
}

impl<RW: Read + Write> Connection<RW> {
    /// Wraps any duplex byte stream. Without a TCP socket there is nothing
    /// to apply deadlines to or shut down, so cancellation degrades to
    /// whatever the stream itself does.
    pub fn new(stream: RW, server_name: impl Into<String>, minor: u8) -> Self {
        Self::with_socket(stream, Arc::new(None), None, server_name, minor)
    }

    fn with_socket(
        stream: RW,
        socket: Arc<Option<TcpStream>>,
        local_port: Option<u16>,
        server_name: impl Into<String>,
        minor: u8,
    ) -> Self {
        let now = Instant::now();
        Self {
            stream,
            socket,
            local_port,
            minor,
            state: ConnectionState::Unauthorized,
            err: None,
            queue: MessageQueue::default(),
            streams: StreamPool::default(),
            tx_counter: 0,
            tx_id: 0,
            last_qid: -1,
            bookmark: None,
            database: None,
            routing_table: None,
            meta: Default::default(),
            server_agent: Default::default(),
            server_name: server_name.into(),
            connection_id: String::new(),
            read_timeout: None,
            birth_date: now,
            idle_since: now,
        }
    }

    // ================
    // Contract surface
    // ================

    /// Performs the handshake: `HELLO`, and `LOGON` for 5.1+. For 5.0 the
    /// auth token is folded into the `HELLO` extras (without overwriting
    /// existing keys).
    pub fn connect(&mut self, deadline: Option<Instant>, config: HelloConfig) -> Result<()> {
        self.assert_state(&[ConnectionState::Unauthorized])?;
        self.check_notification_filter_support(config.notification_filter)?;

        let mut extra: HashMap<String, ValueSend> = HashMap::new();
        extra.insert("user_agent".into(), config.user_agent.into());
        if let Some(routing_context) = config.routing_context {
            extra.insert("routing".into(), ValueSend::Map(routing_context.clone()));
        }
        config.notification_filter.write_to_meta(&mut extra);
        if self.minor == 0 {
            for (k, v) in &config.auth.data {
                extra
                    .entry(k.clone())
                    .or_insert_with(|| v.clone());
            }
        }

        self.append_message(
            "HELLO",
            MSG_HELLO,
            &[FieldRef::Map(&extra)],
            Some(ResponseHandler::Hello),
        )?;
        if self.minor > 0 {
            self.append_message(
                "LOGON",
                MSG_LOGON,
                &[FieldRef::Map(&config.auth.data)],
                Some(ResponseHandler::Logon),
            )?;
        }
        self.send(deadline)?;
        self.receive_all(deadline)?;
        self.check_sticky()?;

        self.state = ConnectionState::Ready;
        self.streams.reset();
        conn_info!(self, "connected");
        Ok(())
    }

    pub fn tx_begin(&mut self, deadline: Option<Instant>, config: &TxConfig) -> Result<TxHandle> {
        // Beginning while an auto-commit stream is open is fine, the
        // stream is pulled into its buffer first.
        if self.state == ConnectionState::Streaming {
            self.buffer_current(deadline)?;
            self.check_sticky()?;
        }
        // Makes all outstanding stream handles invalid.
        self.streams.reset();

        self.assert_state(&[ConnectionState::Ready])?;
        self.check_notification_filter_support(&config.notification_filter)?;

        let extra = self.build_tx_meta(config);
        self.append_message(
            "BEGIN",
            MSG_BEGIN,
            &[FieldRef::Map(&extra)],
            Some(ResponseHandler::Begin),
        )?;
        self.send(deadline)?;
        self.receive_all(deadline)?;
        self.check_sticky()?;

        self.state = ConnectionState::Tx;
        self.tx_counter += 1;
        self.tx_id = self.tx_counter;
        Ok(TxHandle(self.tx_id))
    }

    pub fn tx_commit(&mut self, deadline: Option<Instant>, tx: TxHandle) -> Result<()> {
        self.assert_tx_handle(tx)?;

        // Streams may not be touched past the transaction boundary, so
        // they are discarded rather than buffered.
        self.discard_all_streams(deadline)?;
        self.check_sticky()?;

        self.assert_state(&[ConnectionState::Tx])?;

        self.append_message("COMMIT", MSG_COMMIT, &[], Some(ResponseHandler::Commit))?;
        BoltError::wrap_commit(self.send(deadline))?;
        BoltError::wrap_commit(self.receive_all(deadline))?;
        BoltError::wrap_commit(self.check_sticky())?;

        self.state = ConnectionState::Ready;
        Ok(())
    }

    pub fn tx_rollback(&mut self, deadline: Option<Instant>, tx: TxHandle) -> Result<()> {
        self.assert_tx_handle(tx)?;

        self.discard_all_streams(deadline)?;
        self.check_sticky()?;

        self.assert_state(&[ConnectionState::Tx])?;

        self.append_message(
            "ROLLBACK",
            MSG_ROLLBACK,
            &[],
            Some(ResponseHandler::Rollback),
        )?;
        self.send(deadline)?;
        self.receive_all(deadline)?;
        self.check_sticky()?;

        self.state = ConnectionState::Ready;
        Ok(())
    }

    /// Runs an auto-commit query. A still-open stream of a previous
    /// auto-commit query is buffered first.
    pub fn run(
        &mut self,
        deadline: Option<Instant>,
        command: Command,
        config: &TxConfig,
    ) -> Result<StreamHandle> {
        self.assert_state(&[ConnectionState::Streaming, ConnectionState::Ready])?;
        self.check_notification_filter_support(&config.notification_filter)?;
        let extra = self.build_tx_meta(config);
        self.run_inner(deadline, command, extra)
    }

    /// Runs a query inside the open transaction. A current stream is
    /// paused (its in-flight batch received to completion), not consumed.
    pub fn run_tx(
        &mut self,
        deadline: Option<Instant>,
        tx: TxHandle,
        command: Command,
    ) -> Result<StreamHandle> {
        self.assert_tx_handle(tx)?;
        self.run_inner(deadline, command, HashMap::new())
    }

    /// The stream's field names. Works on any handle this connection
    /// issued, current or not, even terminated.
    pub fn keys(&self, stream: StreamHandle) -> Result<Arc<Vec<String>>> {
        Ok(Arc::clone(&self.streams.get_unsafe(stream)?.keys))
    }

    /// Yields the next record of the stream, or its terminating summary.
    ///
    /// Buffered records are served without wire traffic. At a batch
    /// boundary the next batch is requested automatically; a paused stream
    /// is resumed (pausing the current one) with an explicit `qid`.
    pub fn next(&mut self, deadline: Option<Instant>, stream: StreamHandle) -> Result<StreamEvent> {
        loop {
            {
                let s = self.streams.get_unsafe_mut(stream)?;
                if let Some(record) = s.buffer.pop_front() {
                    return Ok(StreamEvent::Record(record));
                }
            }
            {
                let s = self.streams.get_unsafe(stream)?;
                if let Some(err) = &s.error {
                    return Err(err.clone());
                }
                if let Some(summary) = &s.summary {
                    return Ok(StreamEvent::Summary(Arc::clone(summary)));
                }
            }

            // Nothing buffered, not terminated: the wire has to deliver.
            self.streams.assert_safe(stream)?;
            if !self.streams.is_current(stream) {
                self.pause_current(deadline)?;
                self.check_sticky()?;
                self.resume_stream(deadline, stream)?;
                self.check_sticky()?;
            } else if self.streams.get_unsafe(stream)?.end_of_batch {
                self.streams.get_unsafe_mut(stream)?.end_of_batch = false;
                self.append_pull(stream)?;
                self.send(deadline)?;
                self.check_sticky()?;
            }
            if !self.queue.expects_reply() {
                return Err(BoltError::protocol_error(
                    "there should be more results to pull",
                ));
            }
            self.receive_one(deadline)?;
            self.check_sticky()?;
        }
    }

    /// Discards the rest of the stream server-side and returns its
    /// summary. Repeats `DISCARD` across batch boundaries until the server
    /// reports no more records.
    pub fn consume(
        &mut self,
        deadline: Option<Instant>,
        stream: StreamHandle,
    ) -> Result<Arc<Summary>> {
        {
            // A completed stream answers regardless of whom it belongs to.
            let s = self.streams.get_unsafe(stream)?;
            if s.is_terminated() {
                return s.terminal_result().map(|sum| sum.expect("terminated"));
            }
        }

        self.streams.assert_safe(stream)?;
        self.assert_state(&[ConnectionState::Streaming, ConnectionState::StreamingTx])?;

        if !self.streams.is_current(stream) {
            self.pause_current(deadline)?;
            self.check_sticky()?;
            self.resume_stream(deadline, stream)?;
            self.check_sticky()?;
        }

        self.discard_current(deadline)?;
        self.check_sticky()?;

        let s = self.streams.get_unsafe(stream)?;
        match s.terminal_result()? {
            Some(summary) => Ok(summary),
            None => Err(BoltError::protocol_error(
                "stream consumed without a terminal summary",
            )),
        }
    }

    /// Pulls all remaining records of the stream into its buffer so the
    /// connection is free for other work.
    pub fn buffer(&mut self, deadline: Option<Instant>, stream: StreamHandle) -> Result<()> {
        {
            let s = self.streams.get_unsafe(stream)?;
            if s.is_terminated() {
                return s.terminal_result().map(drop);
            }
        }

        self.streams.assert_safe(stream)?;
        self.assert_state(&[ConnectionState::Streaming, ConnectionState::StreamingTx])?;

        if !self.streams.is_current(stream) {
            self.pause_current(deadline)?;
            self.check_sticky()?;
            self.resume_stream(deadline, stream)?;
            self.check_sticky()?;
        }

        self.buffer_current(deadline)?;

        match &self.streams.get_unsafe(stream)?.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// The last bookmark observed on this connection.
    pub fn bookmark(&self) -> Option<&str> {
        self.bookmark.as_deref()
    }

    pub fn is_alive(&self) -> bool {
        self.state != ConnectionState::Dead
    }

    pub fn has_failed(&self) -> bool {
        self.state == ConnectionState::Failed
    }

    pub fn birth_date(&self) -> Instant {
        self.birth_date
    }

    /// When the connection last saw wire activity. Pool reapers polling
    /// this from another thread observe stale but monotonic values.
    pub fn idle_date(&self) -> Instant {
        self.idle_since
    }

    pub fn is_older_than(&self, duration: Duration) -> bool {
        self.birth_date.elapsed() >= duration
    }

    pub fn is_idle_for(&self, timeout: Duration) -> bool {
        self.idle_since.elapsed() >= timeout
    }

    /// Returns the connection to `Ready`, dropping transaction state,
    /// bookmark, selected database, the sticky error, and every stream.
    ///
    /// A no-op on the wire when already `Ready`; the only way back from a
    /// recoverable failure.
    pub fn reset(&mut self, deadline: Option<Instant>) {
        if self.state != ConnectionState::Ready {
            self.force_reset(deadline);
        }
        conn_debug!(self, "resetting connection internal state");
        self.tx_id = 0;
        self.bookmark = None;
        self.database = None;
        self.err = None;
        self.last_qid = -1;
        self.streams.reset();
    }

    /// Drains outstanding responses, sends a protocol `RESET`, and applies
    /// its outcome: success puts the connection back to `Ready`, anything
    /// else kills it. Does nothing on a dead connection.
    pub fn force_reset(&mut self, deadline: Option<Instant>) {
        if self.state == ConnectionState::Dead {
            return;
        }

        // Any pending error matches the failed state, so it is
        // recoverable and about to be resolved.
        self.err = None;

        if self.receive_all(deadline).is_err() || self.err.is_some() {
            return;
        }
        if self
            .append_message("RESET", MSG_RESET, &[], Some(ResponseHandler::Reset))
            .is_err()
        {
            return;
        }
        if self.send(deadline).is_err() || self.err.is_some() {
            return;
        }
        let _ = self.receive_one(deadline);
    }

    /// Asks the server for the cluster's routing table.
    pub fn get_routing_table(
        &mut self,
        deadline: Option<Instant>,
        routing_context: &HashMap<String, ValueSend>,
        bookmarks: Option<&[String]>,
        db: Option<&str>,
        impersonated_user: Option<&str>,
    ) -> Result<RoutingTable> {
        self.assert_state(&[ConnectionState::Ready])?;

        conn_info!(self, "retrieving routing table");
        let mut extra: HashMap<String, ValueSend> = HashMap::new();
        if let Some(db) = db {
            extra.insert("db".into(), db.into());
        }
        if let Some(impersonated_user) = impersonated_user {
            extra.insert("imp_user".into(), impersonated_user.into());
        }

        let bookmarks = bookmarks.unwrap_or(&[]);
        self.append_message(
            "ROUTE",
            MSG_ROUTE,
            &[
                FieldRef::Map(routing_context),
                FieldRef::StringList(bookmarks),
                FieldRef::Map(&extra),
            ],
            Some(ResponseHandler::Route),
        )?;
        self.send(deadline)?;
        self.receive_all(deadline)?;
        self.check_sticky()?;

        self.routing_table
            .take()
            .ok_or_else(|| BoltError::protocol_error("ROUTE exchange yielded no routing table"))
    }

    /// Sends a best-effort `GOODBYE`, shuts the socket down, and marks the
    /// connection dead. Idempotent.
    pub fn close(&mut self) {
        conn_info!(self, "close");
        if self.state != ConnectionState::Dead {
            let _ = self.append_message("GOODBYE", MSG_GOODBYE, &[], None);
            let _ = self.send(Some(Instant::now() + CLOSE_FLUSH_TIMEOUT));
        }
        self.queue.clear();
        self.shutdown_socket();
        self.state = ConnectionState::Dead;
    }

    /// Selects the database subsequent transactions and queries run
    /// against; `None` is the server's default database.
    pub fn select_database(&mut self, database: Option<String>) {
        self.database = database;
    }

    pub fn version(&self) -> ProtocolVersion {
        ProtocolVersion {
            major: 5,
            minor: self.minor,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// The server agent string from the handshake (e.g., `"Neo4j/5.23.0"`).
    pub fn server_version(&self) -> Arc<String> {
        Arc::clone(&self.server_agent.borrow())
    }

    /// The server-assigned id of this connection, for log correlation.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            socket: Arc::clone(&self.socket),
        }
    }

    // =================
    // Queue and the pump
    // =================

    fn send(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.idle_since = Instant::now();
        while let Some(message) = self.queue.pop_message() {
            let res = {
                let mut writer =
                    DeadlineIO::new(&mut self.stream, deadline, (*self.socket).as_ref());
                let mut res = Ok(());
                for chunk in Chunker::new(&message) {
                    let write_res = BoltError::wrap_write(writer.write_all(&chunk));
                    res = writer.rewrite_error(write_res);
                    if res.is_err() {
                        break;
                    }
                }
                if res.is_ok() {
                    let flush_res = BoltError::wrap_write(writer.flush());
                    res = writer.rewrite_error(flush_res);
                }
                res
            };
            if let Err(err) = res {
                self.handle_io_error("write", &err);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Reads, decodes, and dispatches exactly one response message to the
    /// handler at the head of the queue.
    pub(crate) fn receive_one(&mut self, deadline: Option<Instant>) -> Result<()> {
        let deadline = self.effective_read_deadline(deadline);
        let message_res = {
            let mut reader = DeadlineIO::new(&mut self.stream, deadline, (*self.socket).as_ref());
            let mut dechunker = Dechunker::new(&mut reader);
            let res: Result<BoltMessage<ValueReceive>> =
                BoltMessage::load(&mut dechunker, |r| {
                    let mut deserializer = PackStreamDeserializerImpl::new(r);
                    deserializer.load().map_err(Into::into)
                });
            drop(dechunker);
            reader.rewrite_error(res)
        };
        let message = match message_res {
            Ok(message) => message,
            Err(err) => {
                self.handle_io_error("read", &err);
                return Err(err);
            }
        };
        self.idle_since = Instant::now();
        let res = self.dispatch(message);
        if let Err(err) = &res {
            self.set_error(err, true);
        }
        res
    }

    /// Receives until no response is outstanding.
    pub(crate) fn receive_all(&mut self, deadline: Option<Instant>) -> Result<()> {
        while self.queue.expects_reply() {
            self.receive_one(deadline)?;
        }
        Ok(())
    }

    pub(crate) fn expects_reply(&self) -> bool {
        self.queue.expects_reply()
    }

    pub(crate) fn expected_reply_len(&self) -> usize {
        self.queue.expected_reply_len()
    }

    pub(crate) fn has_buffered_message(&self) -> bool {
        self.queue.has_buffered_message()
    }

    fn effective_read_deadline(&self, deadline: Option<Instant>) -> Option<Instant> {
        match (deadline, self.read_timeout) {
            (deadline, None) => deadline,
            (None, Some(timeout)) => Some(Instant::now() + timeout),
            (Some(deadline), Some(timeout)) => {
                Some(deadline.min(Instant::now() + timeout))
            }
        }
    }

    fn handle_io_error(&mut self, during: &str, err: &BoltError) {
        conn_debug!(self, "{during} failed: {err}");
        self.shutdown_socket();
        self.set_error(err, true);
    }

    fn shutdown_socket(&self) {
        (*self.socket)
            .as_ref()
            .map(|s| s.shutdown(Shutdown::Both));
    }

    // ==================
    // Response dispatch
    // ==================

    fn dispatch(&mut self, message: BoltMessage<ValueReceive>) -> Result<()> {
        let handler = self
            .queue
            .pop_handler()
            .expect("received a response message without a pending request");
        let BoltMessage { tag, mut fields } = message;
        match tag {
            MSG_SUCCESS => {
                assert_response_field_count("SUCCESS", &fields, 1)?;
                let meta = fields.pop().unwrap();
                conn_debug!(self, "S: SUCCESS {}", meta.dbg_print());
                let meta = meta
                    .try_into_map()
                    .map_err(|_| BoltError::protocol_error("SUCCESS meta was not a dictionary"))?;
                self.on_success(handler, meta)
            }
            MSG_RECORD => {
                assert_response_field_count("RECORD", &fields, 1)?;
                let values = fields.pop().unwrap();
                conn_debug!(self, "S: RECORD [...]");
                let values = values
                    .try_into_list()
                    .map_err(|_| BoltError::protocol_error("RECORD data was not a list"))?;
                self.on_record(handler, values)
            }
            MSG_IGNORED => {
                assert_response_field_count("IGNORED", &fields, 0)?;
                conn_debug!(self, "S: IGNORED");
                self.on_ignored(handler);
                Ok(())
            }
            MSG_FAILURE => {
                assert_response_field_count("FAILURE", &fields, 1)?;
                let meta = fields.pop().unwrap();
                conn_debug!(self, "S: FAILURE {}", meta.dbg_print());
                let meta = meta
                    .try_into_map()
                    .map_err(|_| BoltError::protocol_error("FAILURE meta was not a dictionary"))?;
                self.on_failure(handler, ServerError::from_meta(meta));
                Ok(())
            }
            tag => Err(BoltError::protocol_error(format!(
                "unknown response message tag {:02X?}",
                tag
            ))),
        }
    }

    fn on_success(&mut self, handler: ResponseHandler, mut meta: BoltMeta) -> Result<()> {
        match handler {
            ResponseHandler::Hello => {
                self.on_hello_success(meta);
                Ok(())
            }
            // The handshake sequencing suffices; `connect` moves the state.
            ResponseHandler::Logon => Ok(()),
            ResponseHandler::Begin => Ok(()),
            ResponseHandler::Run { stream } => {
                let keys = match meta.remove("fields") {
                    Some(ValueReceive::List(keys)) => keys
                        .into_iter()
                        .map(|k| {
                            k.try_into_string().map_err(|v| {
                                BoltError::protocol_error(format!(
                                    "RUN success field name was not a string: {v:?}"
                                ))
                            })
                        })
                        .collect::<Result<Vec<_>>>()?,
                    _ => {
                        return Err(BoltError::protocol_error(
                            "RUN success did not contain the result's field names",
                        ))
                    }
                };
                let qid = match meta.remove("qid") {
                    Some(ValueReceive::Integer(qid)) => qid,
                    Some(v) => {
                        return Err(BoltError::protocol_error(format!(
                            "RUN success qid was not an integer: {v:?}"
                        )))
                    }
                    None => -1,
                };
                let t_first = meta.remove("t_first").and_then(|v| v.try_into_int().ok());
                {
                    let s = self.streams.get_unsafe_mut(stream)?;
                    s.keys = Arc::new(keys);
                    s.qid = qid;
                    s.t_first = t_first;
                }
                if qid > -1 {
                    self.last_qid = qid;
                }
                self.streams.attach(stream);
                Ok(())
            }
            ResponseHandler::Commit => {
                if let Some(ValueReceive::String(bookmark)) = meta.remove("bookmark") {
                    if !bookmark.is_empty() {
                        self.bookmark = Some(bookmark);
                    }
                }
                Ok(())
            }
            ResponseHandler::Rollback => Ok(()),
            ResponseHandler::Pull { stream } | ResponseHandler::Discard { stream } => {
                self.on_stream_success(stream, meta)
            }
            ResponseHandler::Reset => {
                self.state = ConnectionState::Ready;
                Ok(())
            }
            ResponseHandler::Route => {
                self.routing_table = Some(RoutingTable::from_meta(meta)?);
                Ok(())
            }
        }
    }

    fn on_hello_success(&mut self, mut meta: BoltMeta) {
        match meta.remove(SERVER_AGENT_KEY) {
            Some(ValueReceive::String(agent)) => {
                mem::swap(&mut *self.server_agent.borrow_mut(), &mut Arc::new(agent));
            }
            Some(value) => {
                conn_info!(self, "server sent unexpected server agent type {value:?}");
                meta.insert(SERVER_AGENT_KEY.into(), value);
            }
            None => {}
        }
        if let Some(ValueReceive::String(connection_id)) = meta.get("connection_id") {
            self.connection_id = connection_id.clone();
        }
        self.initialize_read_timeout_hint(&meta);
        mem::swap(&mut *self.meta.borrow_mut(), &mut meta);
    }

    /// Applies `hints.connection.recv_timeout_seconds` from the `HELLO`
    /// response. Only strictly positive integers count; everything else is
    /// logged and ignored.
    fn initialize_read_timeout_hint(&mut self, meta: &BoltMeta) {
        let Some(hints) = meta.get(HINTS_KEY) else {
            return;
        };
        let hints = match hints {
            ValueReceive::Map(hints) => hints,
            value => {
                conn_info!(self, "server sent unexpected {HINTS_KEY} type {value:?}");
                return;
            }
        };
        match hints.get(RECV_TIMEOUT_KEY) {
            None => {}
            Some(ValueReceive::Integer(timeout)) if *timeout > 0 => {
                self.read_timeout = Some(Duration::from_secs(*timeout as u64));
            }
            Some(ValueReceive::Integer(timeout)) => {
                conn_info!(
                    self,
                    "invalid {RECV_TIMEOUT_KEY} integer value {timeout}, ignoring hint; \
                     only strictly positive values are accepted"
                );
            }
            Some(value) => {
                conn_info!(
                    self,
                    "invalid {RECV_TIMEOUT_KEY} value {value:?}, ignoring hint; \
                     only strictly positive integer values are accepted"
                );
            }
        }
    }

    fn on_stream_success(&mut self, stream: StreamHandle, mut meta: BoltMeta) -> Result<()> {
        let has_more = matches!(meta.remove("has_more"), Some(ValueReceive::Boolean(true)));
        let t_first = {
            let s = self.streams.get_unsafe_mut(stream)?;
            if s.discarding {
                s.drop_buffered_records();
            }
            if has_more {
                s.end_of_batch = true;
                return Ok(());
            }
            s.t_first
        };

        let mut summary = Summary::parse(meta);
        summary.result_available_after = t_first;
        summary.server_agent = (**self.server_agent.borrow()).clone();
        summary.server_name = self.server_name.clone();
        summary.protocol_version = self.version();
        if let Some(bookmark) = &summary.bookmark {
            if !bookmark.is_empty() {
                self.bookmark = Some(bookmark.clone());
            }
        }

        self.streams.get_unsafe_mut(stream)?.summary = Some(Arc::new(summary));
        self.streams.remove(stream);
        self.check_streams();
        Ok(())
    }

    fn on_record(&mut self, handler: ResponseHandler, values: Vec<ValueReceive>) -> Result<()> {
        match handler {
            ResponseHandler::Pull { stream } => {
                let s = self.streams.get_unsafe_mut(stream)?;
                if s.discarding {
                    s.drop_buffered_records();
                } else {
                    let record = Record::new(Arc::clone(&s.keys), values);
                    s.buffer.push_back(record);
                }
                // More records may follow before the terminating response.
                self.queue.push_front_handler(handler);
                Ok(())
            }
            handler => Err(BoltError::protocol_error(format!(
                "unexpected RECORD in response to {}",
                handler.request_name()
            ))),
        }
    }

    fn on_ignored(&mut self, handler: ResponseHandler) {
        match handler {
            ResponseHandler::Pull { stream } => {
                self.interrupt_stream(stream, "stream interrupted while pulling results");
            }
            ResponseHandler::Discard { stream } => {
                self.interrupt_stream(stream, "stream interrupted while discarding results");
            }
            ResponseHandler::Reset => {
                self.state = ConnectionState::Dead;
            }
            handler => {
                conn_debug!(self, "{} was ignored", handler.request_name());
            }
        }
    }

    fn interrupt_stream(&mut self, stream: StreamHandle, reason: &str) {
        if let Ok(s) = self.streams.get_unsafe_mut(stream) {
            s.error = Some(BoltError::invalid_state(reason));
        }
        self.streams.remove(stream);
        self.check_streams();
    }

    fn on_failure(&mut self, handler: ResponseHandler, error: ServerError) {
        if handler.is_reset() {
            // The reset exchange failed, there is no recovering from that.
            self.state = ConnectionState::Dead;
            return;
        }
        let fatal = error.is_fatal();
        let error = error.into_error();
        match handler {
            ResponseHandler::Pull { stream } | ResponseHandler::Discard { stream } => {
                if let Ok(s) = self.streams.get_unsafe_mut(stream) {
                    s.error = Some(error.clone());
                }
            }
            _ => {}
        }
        self.set_error(&error, fatal);
    }

    // ==========================
    // Stream multiplexing plumbing
    // ==========================

    fn run_inner(
        &mut self,
        deadline: Option<Instant>,
        command: Command,
        extra: HashMap<String, ValueSend>,
    ) -> Result<StreamHandle> {
        // A previous stream has to leave the wire first: consume the
        // auto-commit stream entirely, pause a transaction stream.
        if self.state == ConnectionState::Streaming {
            self.buffer_current(deadline)?;
            self.check_sticky()?;
        } else if self.state == ConnectionState::StreamingTx {
            self.pause_current(deadline)?;
            self.check_sticky()?;
        }

        self.assert_state(&[
            ConnectionState::Tx,
            ConnectionState::Ready,
            ConnectionState::StreamingTx,
        ])?;

        let fetch_size = normalize_fetch_size(command.fetch_size);
        let stream = self.streams.reserve(Stream::new(fetch_size));

        let empty_params = HashMap::new();
        let parameters = command.parameters.unwrap_or(&empty_params);
        self.append_message(
            "RUN",
            MSG_RUN,
            &[
                FieldRef::String(command.cypher),
                FieldRef::Map(parameters),
                FieldRef::Map(&extra),
            ],
            Some(ResponseHandler::Run { stream }),
        )?;
        self.append_pull(stream)?;
        self.send(deadline)?;

        // Only the RUN response is awaited here; the PULL responses are
        // read as the caller iterates (RESET deals with them otherwise).
        self.receive_one(deadline)?;
        self.check_sticky()?;

        if self.state == ConnectionState::Ready {
            self.state = ConnectionState::Streaming;
        } else if self.state == ConnectionState::Tx {
            self.state = ConnectionState::StreamingTx;
        }
        Ok(stream)
    }

    /// `qid == -1` addresses "the most recently run query" implicitly, so
    /// the entry is omitted unless the target differs from it.
    fn can_omit_qid(&self, qid: i64) -> bool {
        qid == -1 || qid == self.last_qid
    }

    fn append_pull(&mut self, stream: StreamHandle) -> Result<()> {
        let (fetch_size, qid) = {
            let s = self.streams.get_unsafe(stream)?;
            (s.fetch_size, s.qid)
        };
        let mut extra: HashMap<String, ValueSend> = HashMap::with_capacity(2);
        extra.insert("n".into(), fetch_size.into());
        if self.state == ConnectionState::StreamingTx && !self.can_omit_qid(qid) {
            extra.insert("qid".into(), qid.into());
        }
        self.append_message(
            "PULL",
            MSG_PULL,
            &[FieldRef::Map(&extra)],
            Some(ResponseHandler::Pull { stream }),
        )
    }

    fn append_discard(&mut self, stream: StreamHandle) -> Result<()> {
        let (fetch_size, qid) = {
            let s = self.streams.get_unsafe(stream)?;
            (s.fetch_size, s.qid)
        };
        let mut extra: HashMap<String, ValueSend> = HashMap::with_capacity(2);
        extra.insert("n".into(), fetch_size.into());
        if self.state == ConnectionState::StreamingTx && !self.can_omit_qid(qid) {
            extra.insert("qid".into(), qid.into());
        }
        self.append_message(
            "DISCARD",
            MSG_DISCARD,
            &[FieldRef::Map(&extra)],
            Some(ResponseHandler::Discard { stream }),
        )
    }

    /// Pulls all records of the current stream into its buffer.
    fn buffer_current(&mut self, deadline: Option<Instant>) -> Result<()> {
        let Some(stream) = self.streams.current_handle() else {
            return Ok(());
        };
        loop {
            self.receive_all(deadline)?;
            if self.err.is_some() {
                return Ok(());
            }
            {
                let s = self.streams.get_unsafe(stream)?;
                if s.is_terminated() {
                    return Ok(());
                }
                if !s.end_of_batch {
                    return Err(BoltError::protocol_error(
                        "there should be more results to pull",
                    ));
                }
            }
            {
                let s = self.streams.get_unsafe_mut(stream)?;
                s.end_of_batch = false;
                s.fetch_size = -1;
            }
            self.append_pull(stream)?;
            self.send(deadline)?;
            if self.err.is_some() {
                return Ok(());
            }
        }
    }

    /// Receives the current stream's in-flight batch to completion, then
    /// detaches it as non-current. The stream stays in the registry.
    fn pause_current(&mut self, deadline: Option<Instant>) -> Result<()> {
        let Some(stream) = self.streams.current_handle() else {
            return Ok(());
        };
        self.receive_all(deadline)?;
        if self.err.is_some() {
            return Ok(());
        }
        let s = self.streams.get_unsafe(stream)?;
        if s.is_terminated() {
            return Ok(());
        }
        if s.end_of_batch {
            self.streams.pause();
        }
        Ok(())
    }

    /// Makes the stream current again and requests its next batch.
    fn resume_stream(&mut self, deadline: Option<Instant>, stream: StreamHandle) -> Result<()> {
        self.streams.resume(stream);
        self.streams.get_unsafe_mut(stream)?.end_of_batch = false;
        self.append_pull(stream)?;
        self.send(deadline)
    }

    /// Asks the server to drop the rest of the current stream, repeating
    /// `DISCARD` across batch boundaries until `has_more` is false.
    fn discard_current(&mut self, deadline: Option<Instant>) -> Result<()> {
        if !self.state.is_streaming() {
            return Ok(());
        }
        let Some(stream) = self.streams.current_handle() else {
            return Ok(());
        };
        // The pull response handler drops records instead of buffering.
        self.streams.get_unsafe_mut(stream)?.discarding = true;
        loop {
            self.receive_all(deadline)?;
            if self.err.is_some() {
                return Ok(());
            }
            {
                let s = self.streams.get_unsafe(stream)?;
                if s.is_terminated() {
                    return Ok(());
                }
            }
            {
                let s = self.streams.get_unsafe_mut(stream)?;
                s.end_of_batch = false;
                s.fetch_size = -1;
            }
            self.append_discard(stream)?;
            self.send(deadline)?;
            if self.err.is_some() {
                return Ok(());
            }
        }
    }

    fn discard_all_streams(&mut self, deadline: Option<Instant>) -> Result<()> {
        if !self.state.is_streaming() {
            return Ok(());
        }
        self.discard_current(deadline)?;
        self.streams.reset();
        self.check_streams();
        Ok(())
    }

    /// Leaves the streaming states once the last stream is gone.
    fn check_streams(&mut self) {
        if self.streams.live_count() == 0 {
            match self.state {
                ConnectionState::StreamingTx => self.state = ConnectionState::Tx,
                ConnectionState::Streaming => self.state = ConnectionState::Ready,
                _ => {}
            }
        }
    }

    // ==========
    // Guard rails
    // ==========

    /// Must NOT touch `state` or the sticky error: state misuse is the
    /// caller's bug and doesn't invalidate the connection.
    fn assert_state(&self, allowed: &[ConnectionState]) -> Result<()> {
        // Forward a prior error instead; it is probably the root cause of
        // the state mismatch (a failed RUN followed by COMMIT would
        // otherwise report a confusing state error). Not logged.
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        if allowed.contains(&self.state) {
            return Ok(());
        }
        let err = BoltError::invalid_state(format!(
            "invalid connection state {:?}, expected one of {:?}",
            self.state, allowed
        ));
        conn_error!(self, "{err}");
        Err(err)
    }

    /// Must NOT touch `state` or the sticky error either.
    fn assert_tx_handle(&self, tx: TxHandle) -> Result<()> {
        if self.tx_id != tx.0 {
            let err = BoltError::invalid_state("invalid transaction handle");
            conn_error!(self, "{err}");
            return Err(err);
        }
        Ok(())
    }

    fn check_sticky(&self) -> Result<()> {
        match &self.err {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Records the error. The first error wins; a fatal error escalates
    /// the state to `Dead` (and replaces a recoverable sticky error). The
    /// current stream, if any, is detached with the error.
    fn set_error(&mut self, err: &BoltError, fatal: bool) {
        if self.err.is_none() {
            self.err = Some(err.clone());
            self.state = ConnectionState::Failed;
        }
        if fatal {
            let sticky_is_fatal = self.err.as_ref().map(BoltError::is_fatal).unwrap_or(false);
            if !sticky_is_fatal {
                self.err = Some(err.clone());
            }
            self.state = ConnectionState::Dead;
        }

        if self.streams.current_handle().is_some() {
            self.streams.detach_current(Some(err.clone()));
            self.check_streams();
        }

        // Client errors tend to contain user cypher, keep them out of the
        // error log.
        match err {
            BoltError::ServerError { error } if error.classification() == "ClientError" => {
                conn_debug!(self, "{err}");
            }
            _ => conn_error!(self, "{err}"),
        }
    }

    fn check_notification_filter_support(&self, filter: &NotificationFilter) -> Result<()> {
        if filter.is_default() || self.minor >= MIN_MINOR_NOTIFICATION_FILTER {
            return Ok(());
        }
        Err(BoltError::InvalidConfig {
            message: format!(
                "notification filtering requires Bolt 5.{MIN_MINOR_NOTIFICATION_FILTER} or \
                 newer, negotiated 5.{}",
                self.minor
            ),
        })
    }

    // ================
    // Message encoding
    // ================

    /// Composes the `BEGIN`/auto-commit `RUN` extras: only present fields
    /// make it into the map.
    fn build_tx_meta(&self, config: &TxConfig) -> HashMap<String, ValueSend> {
        let mut meta: HashMap<String, ValueSend> = HashMap::new();
        if config.mode == AccessMode::Read {
            meta.insert("mode".into(), "r".into());
        }
        if let Some(bookmarks) = config.bookmarks {
            if !bookmarks.is_empty() {
                meta.insert(
                    "bookmarks".into(),
                    ValueSend::List(bookmarks.iter().map(|b| b.as_str().into()).collect()),
                );
            }
        }
        if let Some(timeout) = config.tx_timeout {
            let ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
            if ms > 0 {
                meta.insert("tx_timeout".into(), ms.into());
            }
        }
        if let Some(tx_metadata) = config.tx_metadata {
            if !tx_metadata.is_empty() {
                meta.insert("tx_metadata".into(), ValueSend::Map(tx_metadata.clone()));
            }
        }
        if let Some(database) = &self.database {
            meta.insert("db".into(), database.as_str().into());
        }
        if let Some(impersonated_user) = config.impersonated_user {
            meta.insert("imp_user".into(), impersonated_user.into());
        }
        config.notification_filter.write_to_meta(&mut meta);
        meta
    }

    fn append_message(
        &mut self,
        name: &'static str,
        tag: u8,
        fields: &[FieldRef],
        handler: Option<ResponseHandler>,
    ) -> Result<()> {
        let mut message_buff = Vec::new();
        let mut serializer = PackStreamSerializerImpl::new(&mut message_buff);
        serializer.write_struct_header(tag, fields.len() as u8)?;
        for field in fields {
            write_field(&mut serializer, field)?;
        }

        if log_enabled!(Level::Debug) {
            let mut dbg_serializer = PackStreamSerializerDebugImpl::new();
            let rendered = fields
                .iter()
                .map(|field| {
                    write_field_dbg(&mut dbg_serializer, field);
                    dbg_serializer.flush()
                })
                .join(" ");
            match rendered.is_empty() {
                true => conn_debug!(self, "C: {name}"),
                false => conn_debug!(self, "C: {name} {rendered}"),
            }
        }

        self.queue.append(message_buff, handler);
        Ok(())
    }
}

/// Request payload fields, borrowed from the caller until encoded.
enum FieldRef<'a> {
    String(&'a str),
    Map(&'a HashMap<String, ValueSend>),
    StringList(&'a [String]),
}

fn write_field(
    serializer: &mut PackStreamSerializerImpl<impl Write>,
    field: &FieldRef,
) -> std::result::Result<(), PackStreamSerializeError> {
    match field {
        FieldRef::String(s) => serializer.write_string(s),
        FieldRef::Map(map) => {
            serializer.write_dict_header(map.len() as u64)?;
            for (k, v) in *map {
                serializer.write_string(k)?;
                write_value(serializer, v)?;
            }
            Ok(())
        }
        FieldRef::StringList(list) => {
            serializer.write_list_header(list.len() as u64)?;
            for s in *list {
                serializer.write_string(s)?;
            }
            Ok(())
        }
    }
}

/// Debug rendering of a request field; auth secrets never reach the log.
fn write_field_dbg(serializer: &mut PackStreamSerializerDebugImpl, field: &FieldRef) {
    match field {
        FieldRef::String(s) => serializer.write_string(s).unwrap(),
        FieldRef::Map(map) => {
            serializer.write_dict_header(map.len() as u64).unwrap();
            for (k, v) in *map {
                serializer.write_string(k).unwrap();
                if k == "credentials" {
                    serializer.write_string("**********").unwrap();
                } else {
                    write_value(serializer, v).unwrap();
                }
            }
        }
        FieldRef::StringList(list) => {
            serializer.write_list_header(list.len() as u64).unwrap();
            for s in *list {
                serializer.write_string(s).unwrap();
            }
        }
    }
}

pub(crate) fn normalize_fetch_size(fetch_size: i64) -> i64 {
    if fetch_size < 0 {
        return -1;
    }
    if fetch_size == 0 {
        return DEFAULT_FETCH_SIZE;
    }
    fetch_size
}

impl<RW: Read + Write> Debug for Connection<RW> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("err", &self.err)
            .field("queue", &self.queue)
            .field("last_qid", &self.last_qid)
            .finish()
    }
}

impl<RW: Read + Write> Drop for Connection<RW> {
    fn drop(&mut self) {
        self.close();
    }
}
