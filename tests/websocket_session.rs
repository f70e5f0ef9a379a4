//! Integration tests for WebSocket sessions, the scheduler and the RPC layer.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::net::TcpListener;

use wirelink::config::{ClientConfig, ReconnectConfig};
use wirelink::http::headers::HeaderSet;
use wirelink::lifecycle::SocketCallbacks;
use wirelink::rpc::{Registry, RpcChannel, RpcError};
use wirelink::ws::frame::{close_payload, parse_close_payload, CloseCode, OpCode};
use wirelink::ws::{InboxEvent, SessionState, WebSocket, WebSocketError};
use wirelink::{HttpClient, Request, Scheduler};

mod common;
use common::{accept_raw, client, fast_close_client, server_frame, start_echo_server, start_mock_server, start_ws_server, Reply};

async fn recv(ws: &WebSocket) -> InboxEvent {
    tokio::time::timeout(Duration::from_secs(5), ws.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("session already reported its disconnect")
}

/// Tick `scheduler` until `ready` yields a value.
async fn tick_until<T>(scheduler: &mut Scheduler, mut ready: impl FnMut() -> Option<T>) -> T {
    for _ in 0..500 {
        scheduler.tick();
        if let Some(value) = ready() {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_echo_text_and_binary() {
    let addr = start_echo_server().await;
    let client = client();
    let ws = WebSocket::connect(&client, &format!("ws://{}/echo", addr), HeaderSet::new())
        .await
        .unwrap();
    assert!(ws.is_open());

    ws.send_text("hello").unwrap();
    assert_eq!(recv(&ws).await, InboxEvent::Text("hello".to_string()));

    let blob: Vec<u8> = (0..=255).cycle().take(70_000).collect();
    ws.send_binary(blob.clone()).unwrap();
    assert_eq!(recv(&ws).await, InboxEvent::Binary(blob));

    assert!(ws.close(Some(CloseCode::NORMAL), "done"));
    assert_eq!(ws.closed().await, SessionState::Closed);
    assert!(matches!(ws.send_text("late"), Err(WebSocketError::NotOpen(_))));
}

#[tokio::test]
async fn test_http_url_is_upgraded_to_ws() {
    let addr = start_echo_server().await;
    let ws = WebSocket::connect(&client(), &format!("http://{}/", addr), HeaderSet::new())
        .await
        .unwrap();
    assert_eq!(ws.url().scheme(), "ws");
}

#[tokio::test]
async fn test_handshake_request_and_fragmented_message() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/chat", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let mut peer = accept_raw(&listener, None).await;
        let headers = &peer.request.headers;
        assert_eq!(peer.request.path(), "/chat");
        assert_eq!(headers.get("Upgrade"), "websocket");
        assert_eq!(headers.get("Sec-WebSocket-Version"), "13");
        assert_eq!(headers.get("X-Token"), "secret");
        assert!(!headers.contains("Accept-Encoding"));

        peer.write(&server_frame(OpCode::Text, false, b"Hel")).await;
        peer.write(&server_frame(OpCode::Continuation, false, b"lo, ")).await;
        // Control frames may arrive between fragments.
        peer.write(&server_frame(OpCode::Ping, true, b"mid")).await;
        peer.write(&server_frame(OpCode::Continuation, true, b"world")).await;

        let (opcode, fin, payload) = peer.read_frame().await.unwrap();
        assert_eq!(opcode, OpCode::Pong);
        assert!(fin);
        assert_eq!(payload, b"mid");
        peer
    });

    let mut headers = HeaderSet::new();
    headers.set("X-Token", "secret");
    let ws = WebSocket::connect(&client(), &url, headers).await.unwrap();
    assert_eq!(recv(&ws).await, InboxEvent::Text("Hello, world".to_string()));
    server.await.unwrap();
}

#[tokio::test]
async fn test_accept_mismatch_is_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let _peer = accept_raw(&listener, Some("bm90IHRoZSByaWdodCBrZXk=")).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    let err = WebSocket::connect(&client(), &url, HeaderSet::new()).await.unwrap_err();
    assert!(matches!(err, WebSocketError::AcceptMismatch { .. }));
}

#[tokio::test]
async fn test_non_upgrade_response_is_rejected() {
    let server = start_mock_server(|_| Reply::status(403, "Forbidden")).await;
    let err = WebSocket::connect(&client(), &server.url("/"), HeaderSet::new())
        .await
        .unwrap_err();
    assert!(matches!(err, WebSocketError::HandshakeRejected(_)));
}

#[tokio::test]
async fn test_close_is_sent_once() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let mut peer = accept_raw(&listener, None).await;
        let (opcode, _, payload) = peer.read_frame().await.unwrap();
        assert_eq!(opcode, OpCode::Text);
        assert_eq!(payload, b"last words");

        let (opcode, _, payload) = peer.read_frame().await.unwrap();
        assert_eq!(opcode, OpCode::Close);
        assert_eq!(parse_close_payload(&payload), (Some(CloseCode::NORMAL), "bye".to_string()));
        peer.write(&server_frame(OpCode::Close, true, &close_payload(Some(CloseCode::NORMAL), ""))).await;

        let mut closes = 1;
        while let Some((opcode, _, _)) = peer.read_frame().await {
            if opcode == OpCode::Close {
                closes += 1;
            }
        }
        closes
    });

    let ws = WebSocket::connect(&fast_close_client(), &url, HeaderSet::new()).await.unwrap();
    ws.send_text("last words").unwrap();
    assert!(ws.close(Some(CloseCode::NORMAL), "bye"));
    assert!(!ws.close(Some(CloseCode::GOING_AWAY), "again"));

    assert_eq!(ws.closed().await, SessionState::Closed);
    assert!(!ws.close(None, ""));
    assert_eq!(ws.close_frame().unwrap().code, Some(CloseCode::NORMAL));

    // The transport ends once the session is closed.
    drop(ws);
    let closes = tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert_eq!(closes, 1);
}

#[tokio::test]
async fn test_peer_close_is_echoed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let mut peer = accept_raw(&listener, None).await;
        peer.write(&server_frame(OpCode::Text, true, b"before close")).await;
        peer.write(&server_frame(OpCode::Close, true, &close_payload(Some(CloseCode::GOING_AWAY), "restart")))
            .await;
        let (opcode, _, payload) = peer.read_frame().await.unwrap();
        assert_eq!(opcode, OpCode::Close);
        parse_close_payload(&payload).0
    });

    let ws = WebSocket::connect(&fast_close_client(), &url, HeaderSet::new()).await.unwrap();
    let echoed = server.await.unwrap();
    assert_eq!(echoed, Some(CloseCode::GOING_AWAY));

    assert_eq!(ws.closed().await, SessionState::Closed);
    assert_eq!(recv(&ws).await, InboxEvent::Text("before close".to_string()));
    assert_eq!(
        recv(&ws).await,
        InboxEvent::Disconnected {
            clean: true,
            code: Some(CloseCode::GOING_AWAY),
            reason: "restart".to_string(),
        }
    );
    assert!(ws.recv().await.is_none());
}

#[tokio::test]
async fn test_protocol_violation_breaks_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());

    tokio::spawn(async move {
        let mut peer = accept_raw(&listener, None).await;
        // Continuation without a message in progress.
        peer.write(&server_frame(OpCode::Continuation, true, b"stray")).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let ws = WebSocket::connect(&client(), &url, HeaderSet::new()).await.unwrap();
    let state = tokio::time::timeout(Duration::from_secs(5), ws.closed()).await.unwrap();
    assert_eq!(state, SessionState::Broken);
    assert!(matches!(recv(&ws).await, InboxEvent::Disconnected { clean: false, .. }));
}

/// Connect to a raw peer that runs `script`, then wait for the session to end.
async fn session_end_against<F, Fut>(client: HttpClient, script: F) -> (SessionState, InboxEvent)
where
    F: FnOnce(common::RawPeer) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let peer = accept_raw(&listener, None).await;
        script(peer).await;
    });

    let ws = WebSocket::connect(&client, &url, HeaderSet::new()).await.unwrap();
    let state = tokio::time::timeout(Duration::from_secs(5), ws.closed()).await.unwrap();
    (state, recv(&ws).await)
}

#[tokio::test]
async fn test_oversized_fragmented_message_breaks_session() {
    let mut config = ClientConfig::default();
    config.websocket.max_message_bytes = 16;
    let client = HttpClient::new(config).unwrap();

    let (state, event) = session_end_against(client, |mut peer| async move {
        // Each fragment fits, the reassembled message does not.
        peer.write(&server_frame(OpCode::Text, false, b"0123456789")).await;
        peer.write(&server_frame(OpCode::Continuation, true, b"0123456789")).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
    })
    .await;

    assert_eq!(state, SessionState::Broken);
    assert!(matches!(event, InboxEvent::Disconnected { clean: false, .. }));
}

#[tokio::test]
async fn test_invalid_utf8_text_breaks_session() {
    let (state, event) = session_end_against(client(), |mut peer| async move {
        peer.write(&server_frame(OpCode::Text, true, &[0xc3, 0x28, 0xff])).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
    })
    .await;

    assert_eq!(state, SessionState::Broken);
    assert!(matches!(event, InboxEvent::Disconnected { clean: false, .. }));
}

#[tokio::test]
async fn test_close_without_status_gets_empty_reply() {
    for payload in [Vec::new(), close_payload(Some(CloseCode::NO_STATUS), "")] {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let mut peer = accept_raw(&listener, None).await;
            peer.write(&server_frame(OpCode::Close, true, &payload)).await;
            peer.read_frame().await.unwrap()
        });

        let ws = WebSocket::connect(&fast_close_client(), &url, HeaderSet::new()).await.unwrap();
        let (opcode, fin, reply) = server.await.unwrap();
        assert_eq!(opcode, OpCode::Close);
        assert!(fin);
        assert!(reply.is_empty());

        assert_eq!(tokio::time::timeout(Duration::from_secs(5), ws.closed()).await.unwrap(), SessionState::Closed);
    }
}

fn quick_reconnect(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        enabled: true,
        max_attempts,
        base_delay_ms: 50,
        max_delay_ms: 200,
    }
}

#[tokio::test]
async fn test_connect_with_retry_backs_off_until_accepted() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut stream = tokio::io::BufReader::new(&mut socket);
        wirelink::http::inbound::read_request(&mut stream).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(
            &mut socket,
            b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();
        drop(socket);

        let mut peer = accept_raw(&listener, None).await;
        peer.write(&server_frame(OpCode::Text, true, b"second time lucky")).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let started = Instant::now();
    let ws = WebSocket::connect_with_retry(&client(), &url, HeaderSet::new(), &quick_reconnect(3))
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(recv(&ws).await, InboxEvent::Text("second time lucky".to_string()));
}

#[tokio::test]
async fn test_connect_with_retry_gives_up() {
    let server = start_mock_server(|_| Reply::status(503, "Service Unavailable")).await;

    let err = WebSocket::connect_with_retry(&client(), &server.url("/"), HeaderSet::new(), &quick_reconnect(2))
        .await
        .unwrap_err();
    assert!(matches!(err, WebSocketError::HandshakeRejected(_)));
    assert_eq!(server.requests().len(), 2);

    let mut disabled = quick_reconnect(5);
    disabled.enabled = false;
    WebSocket::connect_with_retry(&client(), &server.url("/"), HeaderSet::new(), &disabled)
        .await
        .unwrap_err();
    assert_eq!(server.requests().len(), 3);
}

#[tokio::test]
async fn test_connect_with_retry_rejects_bad_url_at_once() {
    let patient = ReconnectConfig {
        enabled: true,
        max_attempts: 10,
        base_delay_ms: 60_000,
        max_delay_ms: 60_000,
    };
    let result = tokio::time::timeout(
        Duration::from_secs(1),
        WebSocket::connect_with_retry(&client(), "ftp://example.com/", HeaderSet::new(), &patient),
    )
    .await
    .unwrap();
    assert!(matches!(result, Err(WebSocketError::InvalidUrl(_))));
}

#[tokio::test]
async fn test_scheduler_reconnects_broken_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        // First session: the transport drops without a closing handshake.
        let first = accept_raw(&listener, None).await;
        drop(first);

        let mut second = accept_raw(&listener, None).await;
        second.write(&server_frame(OpCode::Text, true, b"welcome back")).await;
        loop {
            match second.read_frame().await {
                Some((OpCode::Close, _, payload)) => return parse_close_payload(&payload).0,
                Some(_) => continue,
                None => return None,
            }
        }
    });

    let mut config = ClientConfig::default();
    config.reconnect = quick_reconnect(3);
    config.websocket.close_timeout_secs = 1;
    let client = HttpClient::new(config).unwrap();
    let ws = WebSocket::connect(&client, &url, HeaderSet::new()).await.unwrap();

    let texts = Arc::new(Mutex::new(Vec::new()));
    let disconnects = Arc::new(Mutex::new(Vec::new()));
    let reconnects = Arc::new(Mutex::new(0));
    let (seen, ended, redialed) = (Arc::clone(&texts), Arc::clone(&disconnects), Arc::clone(&reconnects));

    let mut scheduler = Scheduler::new(&client.config().scheduler);
    scheduler.add_reconnecting_socket(
        &client,
        ws.clone(),
        HeaderSet::new(),
        SocketCallbacks::new()
            .text(move |_, text| seen.lock().unwrap().push(text))
            .disconnect(move |_, clean, _, _| ended.lock().unwrap().push(clean))
            .reconnect(move |socket| {
                assert!(socket.is_open());
                *redialed.lock().unwrap() += 1;
            }),
    );

    tick_until(&mut scheduler, || (!texts.lock().unwrap().is_empty()).then_some(())).await;
    assert_eq!(*texts.lock().unwrap(), vec!["welcome back".to_string()]);
    assert_eq!(*disconnects.lock().unwrap(), vec![false]);
    assert_eq!(*reconnects.lock().unwrap(), 1);
    assert_eq!(ws.state(), SessionState::Broken);
    assert_eq!(scheduler.socket_count(), 1);

    // Quit hooks close the replacement session, not the broken one.
    scheduler.shutdown();
    let code = tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert_eq!(code, Some(CloseCode::GOING_AWAY));
}

#[tokio::test]
async fn test_ping_payload_limit() {
    let addr = start_echo_server().await;
    let ws = WebSocket::connect(&client(), &format!("ws://{}/", addr), HeaderSet::new())
        .await
        .unwrap();
    assert!(ws.ping(vec![0u8; 125]).is_ok());
    assert!(matches!(ws.ping(vec![0u8; 126]), Err(WebSocketError::FrameTooLarge { .. })));
}

#[tokio::test]
async fn test_scheduler_delivers_events_and_completions() {
    let addr = start_echo_server().await;
    let server = start_mock_server(|_| Reply::ok("done")).await;
    let client = client();
    let mut scheduler = Scheduler::new(&client.config().scheduler);

    let ws = WebSocket::connect(&client, &format!("ws://{}/", addr), HeaderSet::new())
        .await
        .unwrap();
    let texts = Arc::new(Mutex::new(Vec::new()));
    let disconnects = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&texts);
    let ended = Arc::clone(&disconnects);
    scheduler.add_socket(
        ws.clone(),
        SocketCallbacks::new()
            .text(move |_, text| seen.lock().unwrap().push(text))
            .disconnect(move |_, clean, _, _| ended.lock().unwrap().push(clean)),
    );

    let status = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&status);
    scheduler.send(&client, Request::get(&server.url("/")).unwrap(), move |result| {
        *slot.lock().unwrap() = result.ok().map(|r| r.status);
    });
    assert_eq!(scheduler.pending_requests(), 1);

    ws.send_text("one").unwrap();
    ws.send_text("two").unwrap();

    tick_until(&mut scheduler, || (texts.lock().unwrap().len() == 2).then_some(())).await;
    tick_until(&mut scheduler, || *status.lock().unwrap()).await;
    assert_eq!(*texts.lock().unwrap(), vec!["one".to_string(), "two".to_string()]);
    assert_eq!(scheduler.pending_requests(), 0);

    // Quit hooks close registered sockets with Going Away.
    assert_eq!(scheduler.shutdown(), 0);
    assert_eq!(tokio::time::timeout(Duration::from_secs(5), ws.closed()).await.unwrap(), SessionState::Closed);
    tick_until(&mut scheduler, || disconnects.lock().unwrap().first().copied()).await;
    assert_eq!(*disconnects.lock().unwrap(), vec![true]);
    assert!(scheduler.is_idle());
}

fn rpc_server_reply(text: &str) -> Vec<String> {
    let msg: Value = serde_json::from_str(text).unwrap();
    let id = msg["id"].clone();
    match (msg["name"].as_str().unwrap(), msg["type"].as_str().unwrap()) {
        ("add", "fn") => {
            let sum = msg["args"][0].as_i64().unwrap() + msg["args"][1].as_i64().unwrap();
            vec![json!({"name": "return", "type": "ev", "id": "r", "args": ["add", id, true, sum]}).to_string()]
        }
        ("fail", "fn") => {
            vec![json!({"name": "return", "type": "ev", "id": "r", "args": ["fail", id, false, "nope"]}).to_string()]
        }
        ("hello", "ev") => {
            vec![json!({"name": "double", "type": "fn", "id": "c1", "args": [21]}).to_string()]
        }
        ("return", _) => {
            vec![json!({"name": "doubled", "type": "ev", "id": "e1", "args": [msg["args"][3]]}).to_string()]
        }
        _ => Vec::new(),
    }
}

#[tokio::test]
async fn test_rpc_round_trips() {
    let welcome = json!({"name": "welcome", "type": "ev", "id": "w", "args": ["user-7"]}).to_string();
    let addr = start_ws_server(vec![welcome], rpc_server_reply).await;
    let client = client();
    let ws = WebSocket::connect(&client, &format!("ws://{}/rpc", addr), HeaderSet::new())
        .await
        .unwrap();
    let channel = RpcChannel::new(ws.clone());

    let doubled = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&doubled);
    let mut registry = Registry::new();
    registry
        .on_function("double", |msg| {
            let n: i64 = msg.arg(0).map_err(|e| e.to_string())?;
            Ok(json!(n * 2))
        })
        .on_event("doubled", move |msg| {
            *slot.lock().unwrap() = msg.arg::<i64>(0).ok();
        });

    let mut scheduler = Scheduler::new(&client.config().scheduler);
    scheduler.add_socket(ws.clone(), channel.listener(registry));

    let uid = tick_until(&mut scheduler, || channel.uid()).await;
    assert_eq!(uid, "user-7");

    let mut call = channel.request("add", vec![json!(2), json!(3)]).unwrap();
    let result = tick_until(&mut scheduler, || call.try_take()).await;
    assert_eq!(result.unwrap(), json!(5));

    let mut call = channel.request("fail", vec![]).unwrap();
    let result = tick_until(&mut scheduler, || call.try_take()).await;
    assert!(matches!(result, Err(RpcError::Remote(reason)) if reason == "nope"));

    // Server calls back into the registry; its answer comes back as an event.
    channel.send("hello", vec![]).unwrap();
    let value = tick_until(&mut scheduler, || *doubled.lock().unwrap()).await;
    assert_eq!(value, 42);

    // Unanswered calls fail once the session ends.
    let mut call = channel.request("ignored", vec![]).unwrap();
    assert_eq!(channel.pending_calls(), 1);
    ws.close(Some(CloseCode::NORMAL), "");
    let result = tick_until(&mut scheduler, || call.try_take()).await;
    assert!(matches!(result, Err(RpcError::Dropped)));
    assert_eq!(channel.pending_calls(), 0);
}
