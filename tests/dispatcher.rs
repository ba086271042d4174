//! End-to-end dispatcher tests over an in-memory duplex stream.
//!
//! The far end of the duplex pair plays the backend: it reads the request
//! bytes off the wire, then writes reply frames back.
use std::time::Duration;

use bytes::BytesMut;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
    sync::mpsc::{self, UnboundedReceiver},
    time::timeout,
};

use pgpipe::{
    Dispatcher, DispatcherConfig, Either, Error, ErrorKind, Frame, Notification, ParseError,
    frontend,
    parser::{
        self, flow,
        stream::{StreamParseExt, single},
    },
};

type Event = Either<Error, Notification>;

fn setup() -> (Dispatcher, DuplexStream, UnboundedReceiver<Event>) {
    setup_with(DispatcherConfig::default())
}

fn setup_with(config: DispatcherConfig) -> (Dispatcher, DuplexStream, UnboundedReceiver<Event>) {
    let (client, server) = tokio::io::duplex(4096);
    let (events, event_rx) = mpsc::unbounded_channel();
    let dispatcher = Dispatcher::with_config(
        client,
        move |event| {
            let _ = events.send(event);
        },
        config,
    );
    (dispatcher, server, event_rx)
}

fn query(sql: &'static str) -> impl FnOnce(&mut BytesMut) + Send + 'static {
    move |buf| frontend::write(frontend::Query { sql }, buf)
}

/// Wire size of a `Query` message.
fn query_len(sql: &str) -> usize {
    1 + 4 + sql.len() + 1
}

async fn read_request(server: &mut DuplexStream, len: usize) {
    let mut buf = vec![0u8; len];
    timeout(Duration::from_secs(5), server.read_exact(&mut buf))
        .await
        .expect("timed out reading request")
        .expect("request read failed");
}

async fn send_frame(server: &mut DuplexStream, tag: u8, payload: &[u8]) {
    let mut buf = BytesMut::new();
    Frame::new(tag, payload.to_vec()).write(&mut buf);
    server.write_all(&buf).await.expect("reply write failed");
}

async fn resolve<R>(submit: pgpipe::Submit<R>) -> Result<R, Error> {
    timeout(Duration::from_secs(5), submit)
        .await
        .expect("timed out awaiting submission")
}

fn transport_message(err: &Error) -> &str {
    match err.kind() {
        ErrorKind::Transport(transport) => transport.message(),
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn command_complete_then_ready_for_query() {
    let (dispatcher, mut server, _events) = setup();

    let first = dispatcher.submit(query("SELECT 1"), flow::rows_affected());
    let second = dispatcher.submit(query(""), single(parser::ready_for_query));

    read_request(&mut server, query_len("SELECT 1") + query_len("")).await;
    send_frame(&mut server, b'C', b"SELECT 1\0").await;
    send_frame(&mut server, b'Z', b"I").await;

    assert_eq!(resolve(first).await.unwrap(), 1);
    resolve(second).await.unwrap();
}

#[tokio::test]
async fn empty_query_counts_as_zero() {
    let (dispatcher, mut server, _events) = setup();

    let affected = dispatcher.submit(
        query(""),
        flow::rows_affected().then(|n| single(parser::ready_for_query).map(move |()| n)),
    );

    read_request(&mut server, query_len("")).await;
    send_frame(&mut server, b'I', b"").await;
    send_frame(&mut server, b'Z', b"I").await;

    assert_eq!(resolve(affected).await.unwrap(), 0);
}

#[tokio::test]
async fn data_rows_fold_into_result() {
    let (dispatcher, mut server, _events) = setup();

    let rows = dispatcher.submit(
        query("SELECT tag FROM t"),
        flow::rows(
            |row| match row.get(0) {
                Some(Some(value)) => Ok(String::from_utf8_lossy(value).into_owned()),
                _ => Err(ParseError::new("expected one column")),
            },
            Vec::new(),
            |acc: &mut Vec<String>, value| acc.push(value),
        ),
    );

    read_request(&mut server, query_len("SELECT tag FROM t")).await;
    send_frame(&mut server, b'D', b"\x00\x01\x00\x00\x00\x01A").await;
    send_frame(&mut server, b'C', b"SELECT 1\0").await;

    assert_eq!(resolve(rows).await.unwrap(), vec!["A".to_string()]);
}

#[tokio::test]
async fn error_response_resolves_pending_request() {
    let (dispatcher, mut server, _events) = setup();

    let affected = dispatcher.submit(query("SELECT boom()"), flow::rows_affected());

    read_request(&mut server, query_len("SELECT boom()")).await;
    send_frame(&mut server, b'E', b"SERROR\0Moops\0\0").await;

    let err = resolve(affected).await.unwrap_err();
    match err.kind() {
        ErrorKind::Backend(backend) => {
            assert_eq!(backend.severity.as_str(), "ERROR");
            assert_eq!(backend.message.as_str(), "oops");
        }
        other => panic!("expected backend error, got {other:?}"),
    }
}

#[tokio::test]
async fn notification_without_pending_request_reaches_sink() {
    let (_dispatcher, mut server, mut events) = setup();

    send_frame(&mut server, b'A', b"\x00\x00\x00\x01ch\x00\x00").await;

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out awaiting sink event")
        .expect("sink closed");
    match event {
        Either::Right(notification) => {
            assert_eq!(notification.pid, 1);
            assert_eq!(notification.channel.as_str(), "ch");
            assert_eq!(notification.payload.as_str(), "");
        }
        Either::Left(err) => panic!("unexpected error event: {err:?}"),
    }
}

#[tokio::test]
async fn transport_error_fans_out_to_all_pending() {
    let (dispatcher, mut server, _events) = setup();

    let first = dispatcher.submit(query("SELECT 1"), flow::handshake());
    let second = dispatcher.submit(query("SELECT 2"), flow::rows_affected());

    read_request(&mut server, query_len("SELECT 1") + query_len("SELECT 2")).await;
    // first request consumes the authentication reply, then the peer dies
    send_frame(&mut server, b'R', b"\x00\x00\x00\x00").await;
    drop(server);

    let first = resolve(first).await.unwrap_err();
    let second = resolve(second).await.unwrap_err();
    assert_eq!(transport_message(&first), "connection closed by peer");
    assert_eq!(transport_message(&second), "connection closed by peer");

    // and to every later submission as well
    let late = resolve(dispatcher.submit(query("SELECT 3"), flow::rows_affected()))
        .await
        .unwrap_err();
    assert_eq!(transport_message(&late), "connection closed by peer");
}

#[tokio::test]
async fn replies_resolve_in_submission_order() {
    let (dispatcher, mut server, _events) = setup();

    let submits: Vec<_> = (0..3)
        .map(|_| dispatcher.submit(query("UPDATE t"), flow::rows_affected()))
        .collect();

    read_request(&mut server, query_len("UPDATE t") * 3).await;
    send_frame(&mut server, b'C', b"UPDATE 1\0").await;
    send_frame(&mut server, b'C', b"UPDATE 2\0").await;
    send_frame(&mut server, b'C', b"UPDATE 3\0").await;

    let mut results = Vec::new();
    for submit in submits {
        results.push(resolve(submit).await.unwrap());
    }
    assert_eq!(results, vec![1, 2, 3]);
}

#[tokio::test]
async fn notification_between_reply_frames_does_not_disturb_request() {
    let (dispatcher, mut server, mut events) = setup();

    let rows = dispatcher.submit(
        query("SELECT tag FROM t"),
        flow::rows(
            |row| Ok(row.get(0).and_then(|v| v.map(<[u8]>::to_vec))),
            Vec::new(),
            |acc: &mut Vec<_>, value| acc.push(value),
        ),
    );

    read_request(&mut server, query_len("SELECT tag FROM t")).await;
    send_frame(&mut server, b'D', b"\x00\x01\x00\x00\x00\x01A").await;
    send_frame(&mut server, b'A', b"\x00\x00\x00\x07ping\x00\x00").await;
    send_frame(&mut server, b'D', b"\x00\x01\x00\x00\x00\x01B").await;
    send_frame(&mut server, b'C', b"SELECT 2\0").await;

    let rows = resolve(rows).await.unwrap();
    assert_eq!(rows, vec![Some(b"A".to_vec()), Some(b"B".to_vec())]);

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out awaiting sink event")
        .expect("sink closed");
    match event {
        Either::Right(notification) => assert_eq!(notification.channel.as_str(), "ping"),
        Either::Left(err) => panic!("unexpected error event: {err:?}"),
    }
    assert!(events.try_recv().is_err(), "notification delivered twice");
}

#[tokio::test]
async fn stop_resolves_outstanding_and_rejects_new() {
    let (dispatcher, mut server, _events) = setup();

    let pending = dispatcher.submit(query("SELECT pg_sleep(60)"), flow::rows_affected());
    read_request(&mut server, query_len("SELECT pg_sleep(60)")).await;

    dispatcher.stop().await;
    assert!(dispatcher.is_stopped());

    let err = resolve(pending).await.unwrap_err();
    assert_eq!(transport_message(&err), "dispatcher stopped");

    let late = resolve(dispatcher.submit(query("SELECT 1"), flow::rows_affected()))
        .await
        .unwrap_err();
    assert_eq!(transport_message(&late), "dispatcher stopped");

    // stop is idempotent
    dispatcher.stop().await;
}

#[tokio::test]
async fn malformed_length_is_fatal() {
    let (dispatcher, mut server, mut events) = setup();

    let pending = dispatcher.submit(query("SELECT 1"), flow::rows_affected());
    read_request(&mut server, query_len("SELECT 1")).await;

    // length 3 is below the minimum of 4
    server.write_all(b"C\x00\x00\x00\x03").await.unwrap();

    let err = resolve(pending).await.unwrap_err();
    assert_eq!(transport_message(&err), "malformed frame length: 3");

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out awaiting sink event")
        .expect("sink closed");
    match event {
        Either::Left(err) => assert!(matches!(err.kind(), ErrorKind::Protocol(_))),
        Either::Right(notification) => panic!("unexpected notification: {notification:?}"),
    }
}

#[tokio::test]
async fn unexpected_tag_reported_when_strict() {
    let (_dispatcher, mut server, mut events) = setup();

    // 'Z' with no processor pending is a protocol violation
    send_frame(&mut server, b'Z', b"I").await;

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out awaiting sink event")
        .expect("sink closed");
    match event {
        Either::Left(err) => match err.kind() {
            ErrorKind::Protocol(protocol) => {
                assert_eq!(protocol.to_string(), "unexpected message: tag='Z'");
            }
            other => panic!("expected protocol error, got {other:?}"),
        },
        Either::Right(notification) => panic!("unexpected notification: {notification:?}"),
    }
}

#[tokio::test]
async fn unexpected_tag_dropped_when_lenient() {
    let (dispatcher, mut server, mut events) =
        setup_with(DispatcherConfig::default().strict_protocol(false));

    send_frame(&mut server, b'Z', b"I").await;

    // a later request still works, and the stray frame produced no event
    let affected = dispatcher.submit(query("SELECT 1"), flow::rows_affected());
    read_request(&mut server, query_len("SELECT 1")).await;
    send_frame(&mut server, b'C', b"SELECT 1\0").await;
    assert_eq!(resolve(affected).await.unwrap(), 1);

    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn stray_error_response_reaches_sink() {
    let (_dispatcher, mut server, mut events) = setup();

    send_frame(&mut server, b'E', b"SFATAL\0C57P01\0Mbye\0\0").await;

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out awaiting sink event")
        .expect("sink closed");
    match event {
        Either::Left(err) => match err.kind() {
            ErrorKind::Backend(backend) => {
                assert_eq!(backend.severity.as_str(), "FATAL");
                assert_eq!(backend.code.as_str(), "57P01");
            }
            other => panic!("expected backend error, got {other:?}"),
        },
        Either::Right(notification) => panic!("unexpected notification: {notification:?}"),
    }
}

#[tokio::test]
async fn eof_mid_header_is_a_transport_error() {
    let (dispatcher, mut server, _events) = setup();

    let pending = dispatcher.submit(query("SELECT 1"), flow::rows_affected());
    read_request(&mut server, query_len("SELECT 1")).await;

    // only 2 of the 5 tag+length header bytes arrive before the peer dies
    server.write_all(b"C\x00").await.unwrap();
    drop(server);

    let err = resolve(pending).await.unwrap_err();
    assert_eq!(transport_message(&err), "connection closed by peer");
}

#[tokio::test]
async fn eof_mid_payload_is_a_transport_error() {
    let (dispatcher, mut server, _events) = setup();

    let pending = dispatcher.submit(query("SELECT 1"), flow::rows_affected());
    read_request(&mut server, query_len("SELECT 1")).await;

    // header promises 9 payload bytes, the peer dies after 3
    server.write_all(b"C\x00\x00\x00\x0dSEL").await.unwrap();
    drop(server);

    let err = resolve(pending).await.unwrap_err();
    assert_eq!(transport_message(&err), "connection closed by peer");
}

#[tokio::test]
async fn bounded_outbound_queue_still_delivers() {
    let (dispatcher, mut server, _events) =
        setup_with(DispatcherConfig::default().outbound_queue_depth(1));

    let submits: Vec<_> = (0..4)
        .map(|_| dispatcher.submit(query("UPDATE t"), flow::rows_affected()))
        .collect();

    read_request(&mut server, query_len("UPDATE t") * 4).await;
    for n in 1..=4u64 {
        let tag = format!("UPDATE {n}\0");
        send_frame(&mut server, b'C', tag.as_bytes()).await;
    }

    let mut results = Vec::new();
    for submit in submits {
        results.push(resolve(submit).await.unwrap());
    }
    assert_eq!(results, vec![1, 2, 3, 4]);
}
