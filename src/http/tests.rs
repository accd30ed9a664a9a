use super::config::HttpConfig;
use crate::common::{EchoClient, spawn_test_server};
use crate::http::HttpEchoClient;
use bytes::Bytes;
use http::{Request, StatusCode};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Writes `request` on a fresh connection and reads until the server closes it
async fn exchange(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    stream.flush().await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

fn json_body(response: &str) -> Value {
    let (_, body) = response.split_once("\r\n\r\n").unwrap();
    serde_json::from_str(body).unwrap()
}

#[tokio::test]
async fn test_raw_get_is_reflected() {
    let (_handle, addr, shutdown) = spawn_test_server(HttpConfig::default()).await.unwrap();

    let response = exchange(
        addr,
        b"GET /foo?x=1&x=2 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Content-Type: application/json\r\n"));
    assert!(response.contains("Connection: close\r\n"));
    assert!(response.ends_with("}\n"));
    assert_eq!(
        json_body(&response),
        json!({
            "method": "GET",
            "url": "/foo?x=1&x=2",
            "path": "/foo",
            "headers": {"Host": "localhost", "Connection": "close"},
            "args": {"x": ["1", "2"]}
        })
    );

    let _ = shutdown.send(());
}

#[tokio::test]
async fn test_chunked_request_body() {
    let (_handle, addr, shutdown) = spawn_test_server(HttpConfig::default()).await.unwrap();

    let response = exchange(
        addr,
        b"POST /c HTTP/1.1\r\nHost: h\r\nConnection: close\r\nTransfer-Encoding: chunked\r\n\r\n\
          3\r\n[1,\r\n3\r\n2,3\r\n1\r\n]\r\n0\r\n\r\n",
    )
    .await;

    let body = json_body(&response);
    assert_eq!(body["body"], "[1,2,3]");
    assert_eq!(body["json"], json!([1, 2, 3]));

    let _ = shutdown.send(());
}

#[tokio::test]
async fn test_expect_continue_gets_interim_response() {
    let (_handle, addr, shutdown) = spawn_test_server(HttpConfig::default()).await.unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"PUT / HTTP/1.1\r\nHost: h\r\nExpect: 100-continue\r\n\
              Content-Length: 4\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();

    let mut interim = vec![0u8; 25];
    stream.read_exact(&mut interim).await.unwrap();
    assert_eq!(&interim[..], b"HTTP/1.1 100 Continue\r\n\r\n");

    stream.write_all(b"true").await.unwrap();
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    let rest = String::from_utf8_lossy(&rest);
    assert!(rest.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(json_body(&rest)["json"], json!(true));

    let _ = shutdown.send(());
}

#[tokio::test]
async fn test_malformed_request_gets_bad_request() {
    let (_handle, addr, shutdown) = spawn_test_server(HttpConfig::default()).await.unwrap();

    let response = exchange(addr, b"NOT A REQUEST\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(response.contains("Connection: close\r\n"));

    let response = exchange(addr, b"POST / HTTP/1.1\r\nContent-Length: abc\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));

    let _ = shutdown.send(());
}

#[tokio::test]
async fn test_oversized_head_is_rejected() {
    let config = HttpConfig {
        max_header_bytes: 256,
        ..Default::default()
    };
    let (_handle, addr, shutdown) = spawn_test_server(config).await.unwrap();

    let request = format!(
        "GET / HTTP/1.1\r\nHost: h\r\nX-Big: {}\r\n\r\n",
        "a".repeat(300)
    );
    let response = exchange(addr, request.as_bytes()).await;
    assert!(response.starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"));
    assert!(response.contains("Connection: close\r\n"));

    let response = exchange(addr, b"GET / HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));

    let _ = shutdown.send(());
}

#[tokio::test]
async fn test_truncated_body_is_reflected_best_effort() {
    let (_handle, addr, shutdown) = spawn_test_server(HttpConfig::default()).await.unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"POST /partial HTTP/1.1\r\nHost: h\r\nContent-Length: 10\r\n\r\nhello")
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    let response = String::from_utf8_lossy(&response);

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    let body = json_body(&response);
    assert_eq!(body["body"], "hello");
    assert!(body.get("json").is_none());

    let _ = shutdown.send(());
}

#[tokio::test]
async fn test_head_has_length_but_no_body() {
    let (_handle, addr, shutdown) = spawn_test_server(HttpConfig::default()).await.unwrap();

    let mut client = HttpEchoClient::connect(addr).await.unwrap();
    let head = client
        .send(Request::head("/h").body(Bytes::new()).unwrap())
        .await
        .unwrap();
    assert_eq!(head.status(), StatusCode::OK);
    assert!(head.body().is_empty());
    let advertised: usize = head.headers()["content-length"].to_str().unwrap().parse().unwrap();
    assert!(advertised > 0);

    // The connection is still usable after a bodiless response
    let echo = client
        .reflect(Request::get("/after").body(Bytes::new()).unwrap())
        .await
        .unwrap();
    assert_eq!(echo.path, "/after");

    let _ = shutdown.send(());
}

#[tokio::test]
async fn test_http10_closes_without_keep_alive() {
    let (_handle, addr, shutdown) = spawn_test_server(HttpConfig::default()).await.unwrap();

    let response = exchange(addr, b"GET /old HTTP/1.0\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(json_body(&response)["path"], "/old");

    let _ = shutdown.send(());
}

#[tokio::test]
async fn test_keep_alive_serves_pipelined_requests() {
    let (_handle, addr, shutdown) = spawn_test_server(HttpConfig::default()).await.unwrap();

    let response = exchange(
        addr,
        b"GET /one HTTP/1.1\r\nHost: h\r\n\r\n\
          GET /two HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert_eq!(response.matches("HTTP/1.1 200 OK").count(), 2);
    assert!(response.contains("\"path\":\"/one\""));
    assert!(response.contains("\"path\":\"/two\""));

    let _ = shutdown.send(());
}

#[tokio::test]
async fn test_read_timeout_closes_idle_connection() {
    let config = HttpConfig {
        read_timeout: Some(Duration::from_millis(100)),
        ..Default::default()
    };
    let (_handle, addr, shutdown) = spawn_test_server(config).await.unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);

    let _ = shutdown.send(());
}

#[tokio::test]
async fn test_connection_limit_drops_extra_connections() {
    let config = HttpConfig {
        max_connections: Some(1),
        ..Default::default()
    };
    let (_handle, addr, shutdown) = spawn_test_server(config).await.unwrap();

    // Hold the only slot with a live keep-alive connection
    let mut first = HttpEchoClient::connect(addr).await.unwrap();
    first
        .reflect(Request::get("/").body(Bytes::new()).unwrap())
        .await
        .unwrap();

    let mut second = TcpStream::connect(addr).await.unwrap();
    let _ = second.write_all(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n").await;
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(5), second.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);

    let _ = shutdown.send(());
}
