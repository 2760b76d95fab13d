//! Async TCP transport using Tokio.
//!
//! Accepts TCP connections, parses HTTP/1.1 requests and hands each one to the
//! dispatch [`Engine`] as a [`BufferedExchange`]. Dispatch is synchronous, so it
//! runs on the blocking pool; the buffered response is serialized once it
//! returns. Persistent connections (keep-alive) are supported.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::context::ContextFactory;
use crate::dispatch::Engine;
use crate::http::{
    BufferedExchange, Method, StatusCode,
    request::{Request, RequestError},
    response::Response,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The HTTP/1.1 transport of the dispatch engine.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use frontline::config::EngineConfig;
/// use frontline::context::DefaultContextFactory;
/// use frontline::dispatch::Engine;
/// use frontline::router::Router;
/// use frontline::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let router = Arc::new(Router::new(Arc::new(EngineConfig::default())));
///     let engine = Arc::new(Engine::new(router, DefaultContextFactory));
///     Server::bind("127.0.0.1:8080").await?.run(engine).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections and dispatches their requests to `engine` until
    /// the process is terminated.
    pub async fn run<F: ContextFactory>(self, engine: Arc<Engine<F>>) -> Result<(), ServerError> {
        self.run_until(engine, std::future::pending()).await
    }

    /// Like [`run`](Self::run), but stops accepting connections once
    /// `shutdown` resolves. Connections already accepted finish on their own.
    pub async fn run_until<F, S>(self, engine: Arc<Engine<F>>, shutdown: S) -> Result<(), ServerError>
    where
        F: ContextFactory,
        S: Future<Output = ()> + Send,
    {
        info!(address = %self.local_addr, "frontline listening");
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!(address = %self.local_addr, "shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            debug!(peer = %peer_addr, "connection accepted");
            let engine = Arc::clone(&engine);
            let authority = self.local_addr.to_string();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, authority, engine).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection or signals
/// `Connection: close`.
async fn handle_connection<F: ContextFactory>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    authority: String,
    engine: Arc<Engine<F>>,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        // Pipelined requests may already be buffered.
        if buf.is_empty() || matches!(Request::parse(&buf), Err(RequestError::Incomplete)) {
            let bytes_read = stream.read_buf(&mut buf).await?;
            if bytes_read == 0 {
                debug!(peer = %peer_addr, "connection closed by peer");
                break;
            }
        }

        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large, sending 413");
            let response = Response::plain(StatusCode::PayloadTooLarge, "Request entity too large")
                .keep_alive(false);
            stream.write_all(&response.into_bytes()).await?;
            break;
        }

        let (mut request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => continue,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                let response = Response::plain(StatusCode::BadRequest, format!("Bad Request: {e}"))
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        // Wait for the full body to arrive if Content-Length is set.
        let content_length = request.content_length().unwrap_or(0);
        let total_needed = body_offset + content_length;
        if buf.len() < total_needed {
            let bytes_read = stream.read_buf(&mut buf).await?;
            if bytes_read == 0 {
                debug!(peer = %peer_addr, "connection closed mid-body");
                break;
            }
            continue;
        }
        request.truncate_body(content_length);

        let keep_alive = request.is_keep_alive();
        let include_body = request.method() != &Method::Head;
        let exchange = Arc::new(BufferedExchange::from_request(&request, "http", &authority));

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = match dispatch(&engine, Arc::clone(&exchange)).await {
            Ok(()) => exchange.to_response(keep_alive, include_body),
            Err(e) => {
                error!(peer = %peer_addr, error = %e, "dispatch task failed");
                Response::plain(StatusCode::InternalServerError, "Internal Server Error")
                    .keep_alive(keep_alive)
            }
        };
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        // Drop the consumed request bytes from the buffer.
        let _ = buf.split_to(total_needed);

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}

/// Runs the engine on the blocking pool. Dispatch errors were already turned
/// into a response by the engine; only a lost task is reported.
async fn dispatch<F: ContextFactory>(
    engine: &Arc<Engine<F>>,
    exchange: Arc<BufferedExchange>,
) -> Result<(), tokio::task::JoinError> {
    let engine = Arc::clone(engine);
    tokio::task::spawn_blocking(move || {
        if let Err(e) = engine.handle(exchange) {
            warn!(error = %e, "exchange finished with a dispatch error");
        }
    })
    .await
}
