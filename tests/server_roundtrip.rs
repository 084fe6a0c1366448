// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! End-to-end exercise of the IPROTO front-end: real `TcpStream`s, a real
//! accept loop, a real worker pool, talking through the same pieces
//! `main.rs` wires together.

use std::sync::Arc;

use rmpv::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use vydb_core::access::UserCache;
use vydb_core::handlers::storage::NullStorageEngine;
use vydb_core::handlers::{self};
use vydb_core::iproto::codec::encode_frame;
use vydb_core::iproto::queue::{QueuedRequest, RequestQueue, WorkerPool};
use vydb_core::iproto::session::{ReplyRegistry, SessionRegistry};
use vydb_core::iproto::wire::{GREETING_SIZE, IprotoKey, RequestType};
use vydb_core::iproto::{Connection, ConnectionError};

struct TestServer {
    addr: std::net::SocketAddr,
}

/// Spins up one accept loop + one single worker task against an ephemeral
/// port, wired exactly like `main.rs`. Runs for the lifetime of the test
/// process (no shutdown handle needed for these short-lived tests).
async fn spawn_server() -> TestServer {
    let user_cache = Arc::new(UserCache::new(32));
    let engine: Arc<dyn vydb_core::handlers::storage::StorageEngine> = Arc::new(NullStorageEngine);
    let (queue, rx) = RequestQueue::new(64);
    let sessions = Arc::new(SessionRegistry::new());
    let replies = Arc::new(ReplyRegistry::new());

    let processor_cache = user_cache.clone();
    let processor_engine = engine.clone();
    let processor_sessions = sessions.clone();
    let processor_replies = replies.clone();
    let _pool = WorkerPool::spawn(
        1,
        rx,
        Arc::new(move |item: QueuedRequest| {
            let cache = processor_cache.clone();
            let engine = processor_engine.clone();
            let sessions = processor_sessions.clone();
            let replies = processor_replies.clone();
            Box::pin(async move {
                let Some(session) = sessions.get(item.conn_id) else {
                    return;
                };
                let conn_id = item.conn_id;
                let reply = handlers::process(&cache, &session, engine.as_ref(), &item.request);
                replies.write_reply(conn_id, reply).await;
            })
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        loop {
            let Ok((stream, _peer)) = listener.accept().await else {
                break;
            };
            let (conn_id, session) = sessions.register(0, rand::random::<u64>());
            let queue = queue.clone();
            let sessions = sessions.clone();
            let replies = replies.clone();

            tokio::spawn(async move {
                let mut conn = Connection::new(conn_id, session, stream, 16 * 1024);
                replies.register(conn_id, conn.writer_handle());
                if conn.handshake("vydb-test", "vydb-test").await.is_err() {
                    sessions.forget(conn_id);
                    replies.forget(conn_id);
                    return;
                }
                loop {
                    match conn.read_and_enqueue(&queue).await {
                        Ok(()) => {}
                        Err(ConnectionError::Eof) => break,
                        Err(_) => break,
                    }
                }
                conn.shutdown().await;
                sessions.forget(conn_id);
                replies.forget(conn_id);
            });
        }
    });

    TestServer { addr }
}

async fn read_greeting(stream: &mut TcpStream) {
    let mut greeting = [0u8; GREETING_SIZE];
    stream.read_exact(&mut greeting).await.expect("greeting");
}

/// Replies aren't requests (their type code can carry `IPROTO_TYPE_ERROR`,
/// which `try_decode_frame` rejects), so frame-level parsing is
/// reimplemented here rather than reused from the codec.
fn try_parse_reply(buf: &[u8]) -> Option<(Value, Option<Value>)> {
    let mut cursor = std::io::Cursor::new(buf);
    let length = match rmpv::decode::read_value(&mut cursor) {
        Ok(Value::Integer(n)) => n.as_u64()? as usize,
        _ => return None,
    };
    let prefix_len = cursor.position() as usize;
    let frame_end = prefix_len + length;
    if buf.len() < frame_end {
        return None;
    }
    let mut body_cursor = std::io::Cursor::new(&buf[prefix_len..frame_end]);
    let header = rmpv::decode::read_value(&mut body_cursor).ok()?;
    let body = if (body_cursor.position() as usize) < length {
        rmpv::decode::read_value(&mut body_cursor).ok()
    } else {
        None
    };
    Some((header, body))
}

async fn read_reply(stream: &mut TcpStream) -> (Value, Option<Value>) {
    let mut acc = Vec::new();
    loop {
        if let Some(parsed) = try_parse_reply(&acc) {
            return parsed;
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.expect("read reply");
        assert!(n > 0, "connection closed before a full reply arrived");
        acc.extend_from_slice(&chunk[..n]);
    }
}

fn find_key(map: &Value, key: IprotoKey) -> Option<Value> {
    map.as_map()?
        .iter()
        .find(|(k, _)| k.as_u64() == Some(key.code() as u64))
        .map(|(_, v)| v.clone())
}

fn ping_request(sync: u64) -> Vec<u8> {
    let header = Value::Map(vec![
        (Value::from(IprotoKey::RequestType.code()), Value::from(RequestType::Ping.code())),
        (Value::from(IprotoKey::Sync.code()), Value::from(sync)),
    ]);
    encode_frame(&header, None)
}

fn auth_request(sync: u64, user_name: &str) -> Vec<u8> {
    let header = Value::Map(vec![
        (Value::from(IprotoKey::RequestType.code()), Value::from(RequestType::Auth.code())),
        (Value::from(IprotoKey::Sync.code()), Value::from(sync)),
    ]);
    let body = Value::Map(vec![(Value::from(IprotoKey::UserName.code()), Value::from(user_name))]);
    encode_frame(&header, Some(&body))
}

fn select_request(sync: u64, space_id: u64) -> Vec<u8> {
    let header = Value::Map(vec![
        (Value::from(IprotoKey::RequestType.code()), Value::from(RequestType::Select.code())),
        (Value::from(IprotoKey::Sync.code()), Value::from(sync)),
    ]);
    let body = Value::Map(vec![
        (Value::from(IprotoKey::SpaceId.code()), Value::from(space_id)),
        (Value::from(IprotoKey::Key.code()), Value::Array(vec![])),
    ]);
    encode_frame(&header, Some(&body))
}

#[tokio::test]
async fn ping_roundtrips_to_an_ok_reply() {
    let server = spawn_server().await;
    let mut stream = TcpStream::connect(server.addr).await.expect("connect");
    read_greeting(&mut stream).await;

    stream.write_all(&ping_request(1)).await.expect("send ping");
    let (header, _body) = read_reply(&mut stream).await;

    let request_type = find_key(&header, IprotoKey::RequestType).expect("request_type key");
    assert_eq!(request_type.as_u64(), Some(RequestType::Ok.code() as u64));
    let sync = find_key(&header, IprotoKey::Sync).expect("sync key");
    assert_eq!(sync.as_u64(), Some(1));
}

#[tokio::test]
async fn guest_select_is_denied_then_admin_select_reports_missing_space() {
    let server = spawn_server().await;
    let mut stream = TcpStream::connect(server.addr).await.expect("connect");
    read_greeting(&mut stream).await;

    // Guest has no privileges: selecting anything is an access error.
    stream.write_all(&select_request(1, 280)).await.expect("send select");
    let (header, _body) = read_reply(&mut stream).await;
    let request_type = find_key(&header, IprotoKey::RequestType).expect("request_type key").as_u64().unwrap();
    assert_eq!(request_type & vydb_core::iproto::wire::IPROTO_TYPE_ERROR, vydb_core::iproto::wire::IPROTO_TYPE_ERROR);

    // AUTH as admin (bootstrap password hash is all-zero, the default
    // when no password field is sent).
    stream.write_all(&auth_request(2, "admin")).await.expect("send auth");
    let (header, _body) = read_reply(&mut stream).await;
    let request_type = find_key(&header, IprotoKey::RequestType).expect("request_type key");
    assert_eq!(request_type.as_u64(), Some(RequestType::Ok.code() as u64));

    // Admin has universal access but the storage engine is a null stub:
    // the request now fails for a different reason, "no such space".
    stream.write_all(&select_request(3, 280)).await.expect("send select");
    let (header, body) = read_reply(&mut stream).await;
    let request_type = find_key(&header, IprotoKey::RequestType).expect("request_type key").as_u64().unwrap();
    assert_eq!(request_type & vydb_core::iproto::wire::IPROTO_TYPE_ERROR, vydb_core::iproto::wire::IPROTO_TYPE_ERROR);
    let message = body
        .and_then(|b| find_key(&b, IprotoKey::Error))
        .and_then(|v| v.as_str().map(str::to_string))
        .expect("error message");
    assert!(message.contains("280"), "expected space id in message, got {message:?}");
}

#[tokio::test]
async fn two_connections_get_independent_sessions() {
    let server = spawn_server().await;
    let mut a = TcpStream::connect(server.addr).await.expect("connect a");
    let mut b = TcpStream::connect(server.addr).await.expect("connect b");
    read_greeting(&mut a).await;
    read_greeting(&mut b).await;

    // a authenticates as admin; b stays guest.
    a.write_all(&auth_request(1, "admin")).await.expect("auth a");
    let (header, _) = read_reply(&mut a).await;
    assert_eq!(
        find_key(&header, IprotoKey::RequestType).and_then(|v| v.as_u64()),
        Some(RequestType::Ok.code() as u64)
    );

    b.write_all(&select_request(1, 280)).await.expect("select b");
    let (header, _) = read_reply(&mut b).await;
    let request_type = find_key(&header, IprotoKey::RequestType).expect("request_type key").as_u64().unwrap();
    assert_eq!(request_type & vydb_core::iproto::wire::IPROTO_TYPE_ERROR, vydb_core::iproto::wire::IPROTO_TYPE_ERROR);
}
