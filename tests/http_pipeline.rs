//! Integration tests for the request/response pipeline against raw mock servers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

use wirelink::compression;
use wirelink::{HttpError, Request};

mod common;
use common::{client, start_mock_server, Reply};

#[tokio::test]
async fn test_content_length_response() {
    let server = start_mock_server(|_| Reply::ok("hello").header("X-Trace", "abc")).await;
    let client = client();

    let response = client.get(&server.url("/greeting")).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.message, "OK");
    assert_eq!(response.text(), "hello");
    assert_eq!(response.headers.get("x-trace"), "abc");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].target, "/greeting");
    assert_eq!(requests[0].headers.get("Host"), server.addr.to_string());
    assert!(requests[0].headers.get("User-Agent").starts_with("wirelink/"));
    assert_eq!(requests[0].headers.get("Accept-Encoding"), "gzip");
}

#[tokio::test]
async fn test_chunked_response_with_extension_and_trailer() {
    let server = start_mock_server(|_| {
        Reply::raw(
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
             5\r\nhello\r\n6;name=value\r\n world\r\n0\r\nX-Checksum: 42\r\n\r\n",
        )
    })
    .await;
    let client = client();

    let response = client.get(&server.url("/chunked")).await.unwrap();
    assert_eq!(response.text(), "hello world");
    assert_eq!(response.headers.get("X-Checksum"), "42");

    // The connection is still usable after a chunked body.
    let again = client.get(&server.url("/chunked")).await.unwrap();
    assert_eq!(again.text(), "hello world");
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_gzip_body_is_inflated() {
    let packed = compression::compress(b"squeezed payload").unwrap();
    let server = start_mock_server(move |_| Reply::ok(packed.clone()).header("Content-Encoding", "gzip")).await;
    let client = client();

    let response = client.get(&server.url("/gz")).await.unwrap();
    assert_eq!(response.body, b"squeezed payload");
}

#[tokio::test]
async fn test_gzip_not_requested_when_disabled() {
    let server = start_mock_server(|_| Reply::ok("plain")).await;
    let client = client();

    let request = Request::get(&server.url("/")).unwrap().accept_gzip(false);
    client.execute(request).await.unwrap();
    assert!(!server.requests()[0].headers.contains("Accept-Encoding"));
}

#[tokio::test]
async fn test_redirect_post_becomes_get() {
    let server = start_mock_server(|req| match req.path() {
        "/submit" => Reply::redirect(302, "/done"),
        _ => Reply::ok(format!("{} {}", req.method, req.body.len())),
    })
    .await;
    let client = client();

    let response = client.post(&server.url("/submit"), "payload").await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "GET 0");
    assert_eq!(response.url.path(), "/done");

    let requests = server.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].body, b"payload");
    assert!(!requests[1].headers.contains("Content-Length"));
}

#[tokio::test]
async fn test_307_keeps_method_and_body() {
    let server = start_mock_server(|req| match req.path() {
        "/old" => Reply::redirect(307, "/new"),
        _ => Reply::ok(req.body.clone()),
    })
    .await;
    let client = client();

    let response = client.post(&server.url("/old"), "keep me").await.unwrap();
    assert_eq!(response.text(), "keep me");

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].method, "POST");
    assert_eq!(requests[1].path(), "/new");
}

#[tokio::test]
async fn test_redirect_limit_returns_last_redirect() {
    let server = start_mock_server(|_| Reply::redirect(302, "/loop")).await;
    let client = client();

    let request = Request::get(&server.url("/loop")).unwrap().max_redirects(3);
    let response = client.execute(request).await.unwrap();
    assert_eq!(response.status, 302);
    assert_eq!(server.requests().len(), 3);
}

#[tokio::test]
async fn test_cookies_round_trip() {
    let server = start_mock_server(|req| match req.path() {
        "/login" => Reply::ok("welcome")
            .header("Set-Cookie", "session=abc123; Path=/")
            .header("Set-Cookie", "theme=dark; Path=/prefs"),
        _ => Reply::ok(req.headers.get("Cookie").to_string()),
    })
    .await;
    let client = client();

    client.get(&server.url("/login")).await.unwrap();
    assert_eq!(client.cookies().len(), 2);

    let home = client.get(&server.url("/home")).await.unwrap();
    assert_eq!(home.text(), "session=abc123");

    let prefs = client.get(&server.url("/prefs/colors")).await.unwrap();
    assert_eq!(prefs.text(), "theme=dark; session=abc123");

    let request = Request::get(&server.url("/home")).unwrap().enable_cookies(false);
    let anonymous = client.execute(request).await.unwrap();
    assert_eq!(anonymous.text(), "");
}

#[tokio::test]
async fn test_etag_revalidation() {
    let server = start_mock_server(|req| {
        if req.headers.get("If-None-Match") == "\"v1\"" {
            Reply::status(304, "Not Modified")
        } else {
            Reply::ok("fresh").header("ETag", "\"v1\"")
        }
    })
    .await;
    let client = client();
    let url = server.url("/resource");

    let first = client.execute(Request::get(&url).unwrap().use_cache(true)).await.unwrap();
    assert_eq!(first.status, 200);
    assert_eq!(client.etags().len(), 1);

    let second = client.execute(Request::get(&url).unwrap().use_cache(true)).await.unwrap();
    assert_eq!(second.status, 304);
    assert!(second.body.is_empty());

    // Without the cache flag no validator is sent.
    let third = client.execute(Request::get(&url).unwrap().use_cache(false)).await.unwrap();
    assert_eq!(third.status, 200);
}

#[tokio::test]
async fn test_keep_alive_connection_is_reused() {
    let server = start_mock_server(|_| Reply::ok("pong")).await;
    let client = client();

    for _ in 0..3 {
        let response = client.get(&server.url("/ping")).await.unwrap();
        assert_eq!(response.text(), "pong");
    }
    assert_eq!(server.connection_count(), 1);
    assert_eq!(client.pool().idle_count(), 1);

    client.shutdown();
    assert_eq!(client.pool().idle_count(), 0);
}

#[tokio::test]
async fn test_connection_close_is_not_pooled() {
    let server = start_mock_server(|_| Reply::ok("bye").close()).await;
    let client = client();

    client.get(&server.url("/")).await.unwrap();
    assert_eq!(client.pool().idle_count(), 0);
    client.get(&server.url("/")).await.unwrap();
    assert_eq!(server.connection_count(), 2);
}

#[tokio::test]
async fn test_retry_after_stale_pooled_connection() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    // Keep-alive reply, then the server silently drops the socket.
    let server = start_mock_server(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Reply::ok("ok").hangup()
    })
    .await;
    let client = client();

    client.get(&server.url("/first")).await.unwrap();
    assert_eq!(client.pool().idle_count(), 1);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = client.get(&server.url("/second")).await.unwrap();
    assert_eq!(response.text(), "ok");
    assert_eq!(server.connection_count(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_truncated_responses_exhaust_attempts() {
    let server = start_mock_server(|_| Reply::raw("HTTP/1.1 200 OK\r\nContent-Le").hangup()).await;
    let client = client();

    let request = Request::get(&server.url("/")).unwrap().max_redirects(2);
    let err = client.execute(request).await.unwrap_err();
    match err {
        HttpError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 2);
            assert!(last.is_retryable());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_timeout() {
    let server = start_mock_server(|_| Reply::ok("late").delay(Duration::from_secs(2))).await;
    let client = client();

    let request = Request::get(&server.url("/slow")).unwrap().timeout(Duration::from_millis(200));
    let err = client.execute(request).await.unwrap_err();
    assert!(matches!(err, HttpError::Timeout(_)));
    assert_eq!(client.pool().idle_count(), 0);
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client().get(&format!("http://{}/", addr)).await.unwrap_err();
    assert!(matches!(err, HttpError::Connect { .. }));
}

#[tokio::test]
async fn test_basic_auth_from_userinfo() {
    let server = start_mock_server(|req| Reply::ok(req.headers.get("Authorization").to_string())).await;
    let client = client();

    let url = format!("http://alice:s%3Dcret@{}/private", server.addr);
    let response = client.get(&url).await.unwrap();
    // base64("alice:s=cret")
    assert_eq!(response.text(), "Basic YWxpY2U6cz1jcmV0");
}

#[tokio::test]
async fn test_send_reports_progress() {
    let server = start_mock_server(|req| Reply::ok(vec![b'x'; 50_000]).header("X-Got", &req.body.len().to_string())).await;
    let client = client();

    let pending = client.send(Request::post(&server.url("/upload"), vec![7u8; 20_000]).unwrap());
    let id = pending.id();

    let response = tokio::time::timeout(Duration::from_secs(5), async {
        let mut pending = pending;
        loop {
            if let Some(result) = pending.try_take() {
                assert!(pending.is_done());
                assert_eq!(pending.progress(), 1.0);
                assert_eq!(pending.upload_progress(), 1.0);
                break result;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(response.body.len(), 50_000);
    assert_eq!(response.headers.get("X-Got"), "20000");
    assert!(!id.is_nil());
}

#[tokio::test]
async fn test_cancel_pending_request() {
    let server = start_mock_server(|_| Reply::ok("never").delay(Duration::from_secs(5))).await;
    let client = client();

    let pending = client.send(Request::get(&server.url("/")).unwrap());
    tokio::time::sleep(Duration::from_millis(100)).await;
    pending.cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), pending.wait()).await.unwrap();
    assert!(matches!(result, Err(HttpError::Cancelled)));
}

#[tokio::test]
async fn test_body_sink_receives_raw_body() {
    let packed = compression::compress(b"stay packed").unwrap();
    let expected = packed.clone();
    let server = start_mock_server(move |_| Reply::ok(packed.clone()).header("Content-Encoding", "gzip")).await;
    let client = client();

    let (writer, mut reader) = tokio::io::duplex(64 * 1024);
    let request = Request::get(&server.url("/file")).unwrap().body_sink(Box::new(writer));
    let response = client.execute(request).await.unwrap();
    assert!(response.body.is_empty());

    let mut streamed = vec![0u8; expected.len()];
    reader.read_exact(&mut streamed).await.unwrap();
    assert_eq!(streamed, expected);
}

#[tokio::test]
async fn test_retried_attempt_leaves_sink_clean() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let server = start_mock_server(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Reply::raw("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n").hangup()
        } else {
            Reply::ok("hello world")
        }
    })
    .await;
    let client = client();

    let (writer, mut reader) = tokio::io::duplex(64 * 1024);
    let request = Request::get(&server.url("/file")).unwrap().body_sink(Box::new(writer));
    let response = client.execute(request).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let mut streamed = Vec::new();
    reader.read_to_end(&mut streamed).await.unwrap();
    assert_eq!(streamed, b"hello world");
}

#[tokio::test]
async fn test_redirect_body_not_written_to_sink() {
    let server = start_mock_server(|req| match req.path() {
        "/old" => Reply::redirect(302, "/new").body("moved"),
        _ => Reply::ok("final"),
    })
    .await;
    let client = client();

    let (writer, mut reader) = tokio::io::duplex(64 * 1024);
    let request = Request::get(&server.url("/old")).unwrap().body_sink(Box::new(writer));
    client.execute(request).await.unwrap();

    let mut streamed = Vec::new();
    reader.read_to_end(&mut streamed).await.unwrap();
    assert_eq!(streamed, b"final");
}

#[tokio::test]
async fn test_sink_failure_is_not_retried() {
    let server = start_mock_server(|_| Reply::ok("payload")).await;
    let client = client();

    let (writer, reader) = tokio::io::duplex(64);
    drop(reader);
    let request = Request::get(&server.url("/")).unwrap().body_sink(Box::new(writer));
    let err = client.execute(request).await.unwrap_err();
    assert!(matches!(err, HttpError::Sink(_)));
    assert_eq!(server.requests().len(), 1);
}
