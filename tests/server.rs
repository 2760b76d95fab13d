//! End-to-end exchanges over the tokio transport.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use frontline::config::EngineConfig;
use frontline::context::{DefaultContext, DefaultContextFactory, RequestContext};
use frontline::dispatch::Engine;
use frontline::http::StatusCode;
use frontline::router::{Flow, HandlerError, Router};
use frontline::server::Server;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

struct TestServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn start() -> TestServer {
    let config = EngineConfig {
        resource_root: concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures").into(),
        ..EngineConfig::default()
    };
    let router = Arc::new(Router::new(Arc::new(config)));
    router
        .get("/hello/${name}")
        .save(|ctx: &mut DefaultContext| {
            let name = ctx.request().path_param("name").unwrap_or("").to_owned();
            ctx.response_mut().send_plain_text(format!("Hello, {name}!"));
            Ok(Flow::Continue)
        })
        .unwrap();
    router
        .get("/boom")
        .save(|_ctx: &mut DefaultContext| -> frontline::router::HandlerResult {
            Err(HandlerError::msg("secret detail"))
        })
        .unwrap();
    router
        .get("/taken")
        .save(|_ctx: &mut DefaultContext| -> frontline::router::HandlerResult {
            Err(HandlerError::public(StatusCode::Conflict, "taken"))
        })
        .unwrap();
    router.redirect("/old").to("/hello/old").unwrap();
    router.dir("/one").classpath("oneDir").save().unwrap();

    let engine = Arc::new(Engine::new(router, DefaultContextFactory));
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(server.run_until(engine, async move {
        let _ = stopped.await;
    }));

    TestServer {
        addr,
        stop: Some(stop),
    }
}

async fn send(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("server answered in time")
        .unwrap();
    String::from_utf8_lossy(&out).into_owned()
}

fn get(path: &str) -> String {
    format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
}

#[tokio::test]
async fn route_with_params() {
    let server = start().await;
    let response = send(server.addr, &get("/hello/world")).await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.contains("Content-Length: 13\r\n"), "{response}");
    assert!(response.ends_with("Hello, world!"), "{response}");
}

#[tokio::test]
async fn private_errors_are_generic() {
    let server = start().await;
    let response = send(
        server.addr,
        "GET /boom HTTP/1.1\r\nHost: localhost\r\nAccept: application/json\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"), "{response}");
    assert!(response.ends_with(r#"{"error":"An error occurred."}"#), "{response}");
    assert!(!response.contains("secret detail"));
}

#[tokio::test]
async fn public_errors_keep_their_status() {
    let server = start().await;
    let response = send(server.addr, &get("/taken")).await;
    assert!(response.starts_with("HTTP/1.1 409 Conflict\r\n"), "{response}");
    assert!(response.ends_with("\r\n\r\ntaken"), "{response}");
}

#[tokio::test]
async fn static_files_and_directory_roots() {
    let server = start().await;
    let response = send(server.addr, &get("/one/dir2/file3.txt")).await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.contains("Cache-Control: public, max-age=3600\r\n"), "{response}");
    assert!(response.ends_with("file content 3"), "{response}");

    let response = send(server.addr, &get("/one")).await;
    assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"), "{response}");
}

#[tokio::test]
async fn head_has_no_body() {
    let server = start().await;
    let response = send(
        server.addr,
        "HEAD /one/file2.txt HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.ends_with("Content-Length: 14\r\n\r\n"), "{response}");
}

#[tokio::test]
async fn redirect_rule() {
    let server = start().await;
    let response = send(server.addr, &get("/old")).await;
    assert!(response.starts_with("HTTP/1.1 301 Moved Permanently\r\n"), "{response}");
    assert!(response.contains("Location: /hello/old\r\n"), "{response}");
}

#[tokio::test]
async fn keep_alive_serves_pipelined_requests() {
    let server = start().await;
    let raw = "GET /hello/a HTTP/1.1\r\nHost: localhost\r\n\r\n\
               GET /hello/b HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
    let response = send(server.addr, raw).await;
    assert_eq!(response.matches("HTTP/1.1 200 OK").count(), 2, "{response}");
    assert!(response.contains("Hello, a!"));
    assert!(response.ends_with("Hello, b!"));
}
