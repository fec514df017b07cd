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

//! Drives the connection against scripted server responses fed through an
//! in-memory stream, and inspects the requests it put on the wire.

use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::time::Duration;

use rstest::rstest;

use super::*;
use crate::value;
use crate::value::ValueSend;

// ===========
// Test server
// ===========

struct StubStream {
    input: io::Cursor<Vec<u8>>,
    sink: Rc<RefCell<Vec<u8>>>,
}

impl Read for StubStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for StubStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Builds the byte stream a scripted server would send.
#[derive(Default)]
struct ServerScript {
    buff: Vec<u8>,
}

impl ServerScript {
    fn handshake(minor: u8) -> Self {
        let script = Self::default().success(hello_meta());
        match minor {
            0 => script,
            _ => script.success(value!({})),
        }
    }

    fn message(mut self, tag: u8, fields: &[ValueSend]) -> Self {
        let mut payload = Vec::new();
        let mut serializer = PackStreamSerializerImpl::new(&mut payload);
        serializer
            .write_struct_header(tag, fields.len() as u8)
            .unwrap();
        for field in fields {
            write_value(&mut serializer, field).unwrap();
        }
        for chunk in Chunker::new(&payload) {
            self.buff.extend_from_slice(&chunk);
        }
        self
    }

    fn success(self, meta: ValueSend) -> Self {
        self.message(MSG_SUCCESS, &[meta])
    }

    fn record(self, values: ValueSend) -> Self {
        self.message(MSG_RECORD, &[values])
    }

    fn failure(self, code: &str, message: &str) -> Self {
        let meta = value!({"code": code, "message": message});
        self.message(MSG_FAILURE, &[meta])
    }

    fn ignored(self) -> Self {
        self.message(MSG_IGNORED, &[])
    }
}

fn hello_meta() -> ValueSend {
    value!({"server": "Neo4j/5.23.0", "connection_id": "bolt-123"})
}

fn new_connection(
    minor: u8,
    script: ServerScript,
) -> (Connection<StubStream>, Rc<RefCell<Vec<u8>>>) {
    let sink = Rc::new(RefCell::new(Vec::new()));
    let stream = StubStream {
        input: io::Cursor::new(script.buff),
        sink: Rc::clone(&sink),
    };
    let connection = Connection::new(stream, "localhost:7687", minor);
    (connection, sink)
}

fn do_connect(connection: &mut Connection<StubStream>) -> Result<()> {
    let auth = AuthToken::new_basic_auth("neo4j", "pass");
    let filter = NotificationFilter::default();
    connection.connect(
        None,
        HelloConfig {
            user_agent: "test-agent/0.0",
            auth: &auth,
            routing_context: None,
            notification_filter: &filter,
        },
    )
}

fn connected(
    minor: u8,
    script: ServerScript,
) -> (Connection<StubStream>, Rc<RefCell<Vec<u8>>>) {
    let (mut connection, sink) = new_connection(minor, script);
    do_connect(&mut connection).unwrap();
    (connection, sink)
}

fn command(cypher: &str, fetch_size: i64) -> Command {
    Command {
        cypher,
        parameters: None,
        fetch_size,
    }
}

/// Dechunks and decodes every request the connection wrote.
fn client_messages(sink: &Rc<RefCell<Vec<u8>>>) -> Vec<BoltMessage<ValueReceive>> {
    let written = sink.borrow();
    let mut bytes = written.as_slice();
    let mut messages = Vec::new();
    while !bytes.is_empty() {
        {
            let mut dechunker = Dechunker::new(&mut bytes);
            let message = BoltMessage::load(&mut dechunker, |r| {
                let mut deserializer = PackStreamDeserializerImpl::new(r);
                deserializer.load().map_err(Into::into)
            })
            .unwrap();
            messages.push(message);
        }
        // strip the message terminator
        assert!(bytes.len() >= 2);
        bytes = &bytes[2..];
    }
    messages
}

fn field_map(message: &BoltMessage<ValueReceive>, index: usize) -> BoltMeta {
    match &message.fields[index] {
        ValueReceive::Map(map) => map.clone(),
        v => panic!("expected map field, found {v:?}"),
    }
}

// =========
// Handshake
// =========

#[rstest]
fn test_connect_with_logon() {
    let (connection, sink) = connected(4, ServerScript::handshake(4));

    assert_eq!(connection.state, ConnectionState::Ready);
    assert_eq!(*connection.server_version(), "Neo4j/5.23.0");
    assert_eq!(connection.connection_id(), "bolt-123");
    assert_eq!(connection.version(), ProtocolVersion { major: 5, minor: 4 });

    let messages = client_messages(&sink);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].tag, MSG_HELLO);
    assert_eq!(messages[1].tag, MSG_LOGON);
    let extra = field_map(&messages[0], 0);
    assert_eq!(
        extra.get("user_agent"),
        Some(&ValueReceive::String("test-agent/0.0".into()))
    );
    assert!(!extra.contains_key("credentials"));
    let auth = field_map(&messages[1], 0);
    assert_eq!(auth.get("scheme"), Some(&ValueReceive::String("basic".into())));
}

#[rstest]
fn test_connect_minor_zero_folds_auth_into_hello() {
    let (connection, sink) = connected(0, ServerScript::handshake(0));

    assert_eq!(connection.state, ConnectionState::Ready);
    let messages = client_messages(&sink);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].tag, MSG_HELLO);
    let extra = field_map(&messages[0], 0);
    // auth keys merged in, without overwriting what hello already carries
    assert_eq!(extra.get("scheme"), Some(&ValueReceive::String("basic".into())));
    assert_eq!(
        extra.get("credentials"),
        Some(&ValueReceive::String("pass".into()))
    );
    assert_eq!(
        extra.get("user_agent"),
        Some(&ValueReceive::String("test-agent/0.0".into()))
    );
}

#[rstest]
fn test_connect_gated_by_state() {
    let (mut connection, _sink) = connected(4, ServerScript::handshake(4));
    let res = do_connect(&mut connection);
    assert!(matches!(res, Err(BoltError::InvalidState { .. })));
    // state misuse is not sticky
    assert!(connection.err.is_none());
    assert_eq!(connection.state, ConnectionState::Ready);
}

#[rstest]
fn test_notification_filter_rejected_below_5x2() {
    let (mut connection, _sink) = new_connection(0, ServerScript::default());
    let auth = AuthToken::new_basic_auth("neo4j", "pass");
    let filter = NotificationFilter {
        minimum_severity: Some(notification::MinimumSeverity::Warning),
        disabled_categories: None,
    };
    let res = connection.connect(
        None,
        HelloConfig {
            user_agent: "test-agent/0.0",
            auth: &auth,
            routing_context: None,
            notification_filter: &filter,
        },
    );
    assert!(matches!(res, Err(BoltError::InvalidConfig { .. })));
}

// ==================
// Read timeout hints
// ==================

#[rstest]
fn test_read_timeout_hint_applied() {
    let script = ServerScript::default()
        .success(value!({
            "server": "Neo4j/5.23.0",
            "connection_id": "bolt-123",
            "hints": {"connection.recv_timeout_seconds": 30}
        }))
        .success(value!({}));
    let (mut connection, _sink) = new_connection(4, script);
    do_connect(&mut connection).unwrap();
    assert_eq!(connection.read_timeout, Some(Duration::from_secs(30)));
}

#[rstest]
#[case(value!("30"))]
#[case(value!(-1))]
#[case(value!(0))]
fn test_invalid_read_timeout_hint_ignored(#[case] hint: ValueSend) {
    let mut hints = std::collections::HashMap::new();
    hints.insert(String::from("connection.recv_timeout_seconds"), hint);
    let mut meta = std::collections::HashMap::new();
    meta.insert(String::from("server"), value!("Neo4j/5.23.0"));
    meta.insert(String::from("connection_id"), value!("bolt-123"));
    meta.insert(String::from("hints"), ValueSend::Map(hints));
    let script = ServerScript::default()
        .success(ValueSend::Map(meta))
        .success(value!({}));
    let (mut connection, _sink) = new_connection(4, script);
    do_connect(&mut connection).unwrap();
    assert_eq!(connection.read_timeout, None);
}

// =================
// Happy auto-commit
// =================

#[rstest]
fn test_happy_auto_commit() {
    let script = ServerScript::handshake(4)
        .success(value!({"fields": ["x"], "t_first": 1}))
        .record(value!([1]))
        .success(value!({
            "bookmark": "bm:1",
            "has_more": false,
            "type": "r",
            "db": "neo4j",
            "t_last": 2
        }));
    let (mut connection, sink) = connected(4, script);

    let stream = connection
        .run(None, command("RETURN 1 AS x", 1000), &TxConfig::default())
        .unwrap();
    assert_eq!(connection.state, ConnectionState::Streaming);
    assert_eq!(*connection.keys(stream).unwrap(), vec![String::from("x")]);
    // everything was flushed, only the PULL response is outstanding
    assert!(!connection.has_buffered_message());
    assert!(connection.expects_reply());
    assert_eq!(connection.expected_reply_len(), 1);

    match connection.next(None, stream).unwrap() {
        StreamEvent::Record(record) => {
            assert_eq!(record.value("x"), Some(&ValueReceive::Integer(1)));
        }
        event => panic!("expected record, got {event:?}"),
    }
    let summary = match connection.next(None, stream).unwrap() {
        StreamEvent::Summary(summary) => summary,
        event => panic!("expected summary, got {event:?}"),
    };

    assert_eq!(connection.state, ConnectionState::Ready);
    assert_eq!(connection.bookmark(), Some("bm:1"));
    assert_eq!(summary.bookmark.as_deref(), Some("bm:1"));
    assert_eq!(summary.result_available_after, Some(1));
    assert_eq!(summary.result_consumed_after, Some(2));
    assert_eq!(summary.server_agent, "Neo4j/5.23.0");
    assert_eq!(summary.server_name, "localhost:7687");
    assert_eq!(summary.database.as_deref(), Some("neo4j"));

    let messages = client_messages(&sink);
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2].tag, MSG_RUN);
    assert_eq!(messages[3].tag, MSG_PULL);
    let pull_extra = field_map(&messages[3], 0);
    assert_eq!(pull_extra.get("n"), Some(&ValueReceive::Integer(1000)));
    assert!(!pull_extra.contains_key("qid"));
}

// ==============================
// Interleaved transaction streams
// ==============================

#[rstest]
fn test_tx_with_two_interleaved_streams() {
    let script = ServerScript::handshake(4)
        .success(value!({})) // BEGIN
        .success(value!({"fields": ["a"], "qid": 0, "t_first": 1})) // RUN Q1
        .record(value!([1]))
        .success(value!({"has_more": true})) // batch of A ends
        .success(value!({"fields": ["b"], "qid": 1, "t_first": 1})) // RUN Q2
        .record(value!([2]))
        .success(value!({"has_more": true})) // batch of B ends
        .record(value!([3]))
        .success(value!({"has_more": false, "t_last": 2})) // A terminates
        .success(value!({"has_more": false, "t_last": 2})) // B terminates
        .success(value!({"bookmark": "bm:tx"})); // COMMIT
    let (mut connection, sink) = connected(4, script);

    let tx = connection.tx_begin(None, &TxConfig::default()).unwrap();
    assert_eq!(connection.state, ConnectionState::Tx);

    let stream_a = connection.run_tx(None, tx, command("Q1", 1)).unwrap();
    assert_eq!(connection.state, ConnectionState::StreamingTx);
    assert_eq!(connection.last_qid, 0);

    match connection.next(None, stream_a).unwrap() {
        StreamEvent::Record(record) => assert_eq!(record.values, vec![ValueReceive::Integer(1)]),
        event => panic!("expected record, got {event:?}"),
    }

    let stream_b = connection.run_tx(None, tx, command("Q2", 1)).unwrap();
    assert_eq!(connection.last_qid, 1);
    assert!(connection.streams.is_current(stream_b));

    // reading the paused stream resumes it with an explicit qid
    match connection.next(None, stream_a).unwrap() {
        StreamEvent::Record(record) => assert_eq!(record.values, vec![ValueReceive::Integer(3)]),
        event => panic!("expected record, got {event:?}"),
    }
    assert!(matches!(
        connection.next(None, stream_a).unwrap(),
        StreamEvent::Summary(_)
    ));

    // stream B was paused in between, its first record got buffered
    match connection.next(None, stream_b).unwrap() {
        StreamEvent::Record(record) => assert_eq!(record.values, vec![ValueReceive::Integer(2)]),
        event => panic!("expected record, got {event:?}"),
    }
    assert!(matches!(
        connection.next(None, stream_b).unwrap(),
        StreamEvent::Summary(_)
    ));

    connection.tx_commit(None, tx).unwrap();
    assert_eq!(connection.state, ConnectionState::Ready);
    assert_eq!(connection.bookmark(), Some("bm:tx"));

    let messages = client_messages(&sink);
    let pulls: Vec<_> = messages
        .iter()
        .filter(|m| m.tag == MSG_PULL)
        .collect();
    assert_eq!(pulls.len(), 4);
    // resuming A targets qid 0 explicitly (A.qid != last_qid)
    let resume_a_extra = field_map(pulls[2], 0);
    assert_eq!(resume_a_extra.get("qid"), Some(&ValueReceive::Integer(0)));
    // resuming B can omit the qid (B.qid == last_qid)
    let resume_b_extra = field_map(pulls[3], 0);
    assert!(!resume_b_extra.contains_key("qid"));
}

// =============
// Failure modes
// =============

#[rstest]
fn test_recoverable_client_error() {
    let script = ServerScript::handshake(4)
        .failure("Neo.ClientError.Statement.SyntaxError", "no such syntax")
        .ignored() // the pipelined PULL
        .success(value!({})); // RESET
    let (mut connection, sink) = connected(4, script);

    let err = connection
        .run(None, command("INVALID", 1000), &TxConfig::default())
        .unwrap_err();
    match &err {
        BoltError::ServerError { error } => {
            assert_eq!(error.code(), "Neo.ClientError.Statement.SyntaxError");
            assert_eq!(error.classification(), "ClientError");
        }
        err => panic!("expected server error, got {err:?}"),
    }
    assert!(connection.has_failed());
    assert!(connection.is_alive());
    assert_eq!(connection.state, ConnectionState::Failed);

    // the sticky error dominates and produces no new wire traffic
    let written_before = sink.borrow().len();
    let err = connection
        .run(None, command("RETURN 1", 1000), &TxConfig::default())
        .unwrap_err();
    assert!(matches!(err, BoltError::ServerError { .. }));
    assert_eq!(sink.borrow().len(), written_before);

    connection.reset(None);
    assert_eq!(connection.state, ConnectionState::Ready);
    assert!(connection.err.is_none());
    assert!(!connection.has_failed());
    assert_eq!(connection.streams.live_count(), 0);
    assert_eq!(connection.bookmark(), None);
    assert_eq!(connection.last_qid, -1);

    let messages = client_messages(&sink);
    assert_eq!(messages.last().unwrap().tag, MSG_RESET);
}

#[rstest]
fn test_reset_from_ready_skips_the_wire() {
    let (mut connection, sink) = connected(4, ServerScript::handshake(4));
    let written_before = sink.borrow().len();

    connection.reset(None);
    connection.reset(None);

    assert_eq!(connection.state, ConnectionState::Ready);
    assert!(connection.err.is_none());
    assert_eq!(sink.borrow().len(), written_before);
}

#[rstest]
fn test_fatal_transient_error() {
    let script = ServerScript::handshake(4).failure(
        "Neo.TransientError.General.DatabaseUnavailable",
        "database is unavailable",
    );
    let (mut connection, sink) = connected(4, script);

    let err = connection
        .run(None, command("RETURN 1", 1000), &TxConfig::default())
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(connection.state, ConnectionState::Dead);
    assert!(!connection.is_alive());

    // reset takes the dead branch: no wire traffic
    let written_before = sink.borrow().len();
    connection.reset(None);
    assert_eq!(connection.state, ConnectionState::Dead);
    assert_eq!(sink.borrow().len(), written_before);

    // close doesn't try to say goodbye to a dead connection
    connection.close();
    assert_eq!(connection.state, ConnectionState::Dead);
    assert_eq!(sink.borrow().len(), written_before);
}

#[rstest]
fn test_unknown_response_message_is_fatal() {
    let script = ServerScript::handshake(4).message(0x55, &[]);
    let (mut connection, _sink) = connected(4, script);

    let err = connection
        .run(None, command("RETURN 1", 1000), &TxConfig::default())
        .unwrap_err();
    assert!(matches!(err, BoltError::ProtocolError { .. }));
    assert_eq!(connection.state, ConnectionState::Dead);
}

#[rstest]
fn test_commit_failure_is_marked_during_commit() {
    // script ends after BEGIN: the COMMIT response read hits EOF
    let script = ServerScript::handshake(4).success(value!({}));
    let (mut connection, _sink) = connected(4, script);

    let tx = connection.tx_begin(None, &TxConfig::default()).unwrap();
    let err = connection.tx_commit(None, tx).unwrap_err();
    match err {
        BoltError::Disconnect { during_commit, .. } => assert!(during_commit),
        err => panic!("expected disconnect, got {err:?}"),
    }
    assert_eq!(connection.state, ConnectionState::Dead);
}

#[rstest]
fn test_invalid_tx_handle_is_not_sticky() {
    let script = ServerScript::handshake(4).success(value!({}));
    let (mut connection, _sink) = connected(4, script);
    let _tx = connection.tx_begin(None, &TxConfig::default()).unwrap();

    let err = connection.tx_commit(None, TxHandle(999)).unwrap_err();
    assert!(matches!(err, BoltError::InvalidState { .. }));
    assert!(connection.err.is_none());
    assert_eq!(connection.state, ConnectionState::Tx);
}

// ======================
// Discard across batches
// ======================

#[rstest]
fn test_consume_discards_across_batches() {
    let script = ServerScript::handshake(4)
        .success(value!({"fields": ["x"]})) // RUN
        .record(value!([1]))
        .success(value!({"has_more": true})) // PULL batch ends
        .success(value!({"has_more": true})) // first DISCARD crosses a batch
        .success(value!({"has_more": false, "bookmark": "bm:2"})); // second DISCARD
    let (mut connection, sink) = connected(4, script);

    let stream = connection
        .run(None, command("UNWIND range(1, 10) AS x RETURN x", 1), &TxConfig::default())
        .unwrap();
    let summary = connection.consume(None, stream).unwrap();

    assert_eq!(summary.bookmark.as_deref(), Some("bm:2"));
    assert_eq!(connection.bookmark(), Some("bm:2"));
    assert_eq!(connection.state, ConnectionState::Ready);
    assert_eq!(connection.streams.live_count(), 0);

    let messages = client_messages(&sink);
    let discards: Vec<_> = messages
        .iter()
        .filter(|m| m.tag == MSG_DISCARD)
        .collect();
    assert_eq!(discards.len(), 2);
    for discard in discards {
        let extra = field_map(discard, 0);
        assert_eq!(extra.get("n"), Some(&ValueReceive::Integer(-1)));
    }

    // records discarded server-side never reach the caller again
    assert!(matches!(
        connection.next(None, stream).unwrap(),
        StreamEvent::Summary(_)
    ));
}

// ====================
// Stream multiplexing
// ====================

#[rstest]
fn test_second_run_buffers_auto_commit_stream() {
    let script = ServerScript::handshake(4)
        .success(value!({"fields": ["x"]})) // RUN Q1
        .record(value!([1]))
        .success(value!({"has_more": true}))
        .record(value!([2]))
        .success(value!({"has_more": false})) // buffering pulls the rest
        .success(value!({"fields": ["y"]})); // RUN Q2
    let (mut connection, _sink) = connected(4, script);

    let stream_1 = connection
        .run(None, command("Q1", 1), &TxConfig::default())
        .unwrap();
    let stream_2 = connection
        .run(None, command("Q2", 1), &TxConfig::default())
        .unwrap();

    // auto-commit never holds more than one open stream
    assert_eq!(connection.streams.live_count(), 1);
    assert!(connection.streams.is_current(stream_2));

    // the buffered stream replays without wire traffic
    match connection.next(None, stream_1).unwrap() {
        StreamEvent::Record(record) => assert_eq!(record.values, vec![ValueReceive::Integer(1)]),
        event => panic!("expected record, got {event:?}"),
    }
    match connection.next(None, stream_1).unwrap() {
        StreamEvent::Record(record) => assert_eq!(record.values, vec![ValueReceive::Integer(2)]),
        event => panic!("expected record, got {event:?}"),
    }
    assert!(matches!(
        connection.next(None, stream_1).unwrap(),
        StreamEvent::Summary(_)
    ));
}

#[rstest]
fn test_reset_invalidates_streams_but_keeps_terminal_reads() {
    let script = ServerScript::handshake(4)
        .success(value!({})) // BEGIN
        .success(value!({"fields": ["a"], "qid": 0})) // RUN Q1
        .record(value!([1]))
        .success(value!({"has_more": true})) // pausing A
        .success(value!({"fields": ["b"], "qid": 1})) // RUN Q2
        .ignored() // B's PULL, interrupted by RESET
        .success(value!({})); // RESET
    let (mut connection, _sink) = connected(4, script);

    let tx = connection.tx_begin(None, &TxConfig::default()).unwrap();
    let stream_a = connection.run_tx(None, tx, command("Q1", 1)).unwrap();
    match connection.next(None, stream_a).unwrap() {
        StreamEvent::Record(_) => {}
        event => panic!("expected record, got {event:?}"),
    }
    let stream_b = connection.run_tx(None, tx, command("Q2", 1)).unwrap();

    connection.reset(None);
    assert_eq!(connection.state, ConnectionState::Ready);

    // keys stay readable on any handle the connection issued
    assert_eq!(*connection.keys(stream_a).unwrap(), vec![String::from("a")]);

    // A was paused mid-stream: operations needing the wire now fail
    let err = connection.next(None, stream_a).unwrap_err();
    assert!(matches!(err, BoltError::InvalidState { .. }));

    // B's pull was ignored during the drain: its terminal error persists
    let err = connection.next(None, stream_b).unwrap_err();
    assert!(matches!(err, BoltError::InvalidState { .. }));
    assert!(format!("{err}").contains("interrupted"));
}

#[rstest]
fn test_tx_begin_buffers_open_auto_commit_stream() {
    let script = ServerScript::handshake(4)
        .success(value!({"fields": ["x"]})) // RUN
        .record(value!([1]))
        .success(value!({"has_more": false}))
        .success(value!({})); // BEGIN
    let (mut connection, _sink) = connected(4, script);

    let stream = connection
        .run(None, command("Q", 1000), &TxConfig::default())
        .unwrap();
    let _tx = connection.tx_begin(None, &TxConfig::default()).unwrap();
    assert_eq!(connection.state, ConnectionState::Tx);

    // buffered before the tx began; records survive the registry reset
    match connection.next(None, stream).unwrap() {
        StreamEvent::Record(record) => assert_eq!(record.values, vec![ValueReceive::Integer(1)]),
        event => panic!("expected record, got {event:?}"),
    }
    assert!(matches!(
        connection.next(None, stream).unwrap(),
        StreamEvent::Summary(_)
    ));
}

// =======
// Routing
// =======

#[rstest]
fn test_get_routing_table() {
    let script = ServerScript::handshake(4).success(value!({
        "rt": {
            "ttl": 300,
            "db": "neo4j",
            "servers": [
                {"role": "ROUTE", "addresses": ["router:7687"]},
                {"role": "READ", "addresses": ["reader:7687"]},
                {"role": "WRITE", "addresses": ["writer:7687"]}
            ]
        }
    }));
    let (mut connection, sink) = connected(4, script);

    let context = crate::value_map!({"address": "localhost:7687"});
    let bookmarks = vec![String::from("bm:1")];
    let table = connection
        .get_routing_table(None, &context, Some(&bookmarks), Some("neo4j"), None)
        .unwrap();

    assert_eq!(table.ttl, 300);
    assert_eq!(table.database.as_deref(), Some("neo4j"));
    assert_eq!(table.writers, vec!["writer:7687"]);
    assert_eq!(connection.state, ConnectionState::Ready);

    let messages = client_messages(&sink);
    let route = messages.last().unwrap();
    assert_eq!(route.tag, MSG_ROUTE);
    assert_eq!(route.fields.len(), 3);
    assert_eq!(
        route.fields[1],
        ValueReceive::List(vec![ValueReceive::String("bm:1".into())])
    );
    let extra = field_map(route, 2);
    assert_eq!(extra.get("db"), Some(&ValueReceive::String("neo4j".into())));
}

// ==============
// Close and drop
// ==============

#[rstest]
fn test_close_is_idempotent() {
    let (mut connection, sink) = connected(4, ServerScript::handshake(4));

    connection.close();
    assert_eq!(connection.state, ConnectionState::Dead);
    assert!(!connection.is_alive());
    let written_after_first = sink.borrow().len();

    connection.close();
    assert_eq!(sink.borrow().len(), written_after_first);

    let goodbyes = client_messages(&sink)
        .iter()
        .filter(|m| m.tag == MSG_GOODBYE)
        .count();
    assert_eq!(goodbyes, 1);

    // gated operations short-circuit on the dead connection
    let err = connection
        .run(None, command("RETURN 1", 1000), &TxConfig::default())
        .unwrap_err();
    assert!(matches!(err, BoltError::InvalidState { .. }));
}

#[rstest]
fn test_drop_says_goodbye() {
    let (connection, sink) = connected(4, ServerScript::handshake(4));
    drop(connection);
    let messages = client_messages(&sink);
    assert_eq!(messages.last().unwrap().tag, MSG_GOODBYE);
}

// ===================
// Meta map composition
// ===================

#[rstest]
#[case(-7, -1)]
#[case(-1, -1)]
#[case(0, DEFAULT_FETCH_SIZE)]
#[case(1, 1)]
#[case(7000, 7000)]
fn test_normalize_fetch_size(#[case] input: i64, #[case] expected: i64) {
    assert_eq!(normalize_fetch_size(input), expected);
}

#[rstest]
fn test_tx_meta_omits_absent_fields() {
    let (connection, _sink) = new_connection(4, ServerScript::default());
    let meta = connection.build_tx_meta(&TxConfig::default());
    assert!(meta.is_empty());
}

#[rstest]
fn test_tx_meta_composition() {
    let (mut connection, _sink) = new_connection(4, ServerScript::default());
    connection.select_database(Some(String::from("mydb")));

    let bookmarks = vec![String::from("bm:1"), String::from("bm:2")];
    let tx_metadata = crate::value_map!({"requester": "tests"});
    let config = TxConfig {
        mode: AccessMode::Read,
        bookmarks: Some(&bookmarks),
        tx_timeout: Some(Duration::from_millis(1500)),
        tx_metadata: Some(&tx_metadata),
        impersonated_user: Some("bob"),
        notification_filter: NotificationFilter::default(),
    };
    let meta = connection.build_tx_meta(&config);

    assert_eq!(meta.get("mode"), Some(&ValueSend::String("r".into())));
    assert_eq!(
        meta.get("bookmarks"),
        Some(&ValueSend::List(vec!["bm:1".into(), "bm:2".into()]))
    );
    assert_eq!(meta.get("tx_timeout"), Some(&ValueSend::Integer(1500)));
    assert_eq!(
        meta.get("tx_metadata"),
        Some(&ValueSend::Map(tx_metadata.clone()))
    );
    assert_eq!(meta.get("db"), Some(&ValueSend::String("mydb".into())));
    assert_eq!(meta.get("imp_user"), Some(&ValueSend::String("bob".into())));
    assert_eq!(meta.len(), 6);
}

#[rstest]
#[case(Duration::ZERO)]
#[case(Duration::from_nanos(1))]
fn test_tx_meta_drops_non_positive_timeout(#[case] timeout: Duration) {
    let (connection, _sink) = new_connection(4, ServerScript::default());
    let config = TxConfig {
        tx_timeout: Some(timeout),
        ..Default::default()
    };
    assert!(!connection.build_tx_meta(&config).contains_key("tx_timeout"));
}

#[rstest]
fn test_tx_meta_encoding_round_trips() {
    let (mut connection, _sink) = new_connection(4, ServerScript::default());
    connection.select_database(Some(String::from("mydb")));
    let bookmarks = vec![String::from("bm:1")];
    let config = TxConfig {
        mode: AccessMode::Read,
        bookmarks: Some(&bookmarks),
        tx_timeout: Some(Duration::from_millis(250)),
        ..Default::default()
    };
    let meta = connection.build_tx_meta(&config);

    let mut encoded = Vec::new();
    let mut serializer = PackStreamSerializerImpl::new(&mut encoded);
    write_value(&mut serializer, &ValueSend::Map(meta.clone())).unwrap();

    let mut reader = encoded.as_slice();
    let mut deserializer = PackStreamDeserializerImpl::new(&mut reader);
    let decoded = deserializer.load().unwrap();
    assert_eq!(decoded, ValueReceive::from(ValueSend::Map(meta)));
}
