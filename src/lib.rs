//! # frontline
//!
//! A request-dispatch engine: route matching, static resources, a
//! request-scoped context, a front-controller state machine and
//! exception-to-response translation, with a small tokio HTTP/1.1 transport.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use frontline::config::EngineConfig;
//! use frontline::context::{DefaultContext, DefaultContextFactory, RequestContext};
//! use frontline::dispatch::Engine;
//! use frontline::router::{Flow, Router};
//! use frontline::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let router = Arc::new(Router::new(Arc::new(EngineConfig::default())));
//!     router.get("/users/${id:<N>}").save(|ctx: &mut DefaultContext| {
//!         let id = ctx.request().path_param("id").unwrap_or_default().to_owned();
//!         ctx.response_mut().send_plain_text(format!("user {id}"));
//!         Ok(Flow::Continue)
//!     })?;
//!
//!     let engine = Arc::new(Engine::new(router, DefaultContextFactory));
//!     Server::bind("127.0.0.1:8080").await?.run(engine).await?;
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod config;
pub mod context;
pub mod dictionary;
pub mod dispatch;
pub mod filters;
pub mod http;
pub mod router;
pub mod server;
pub mod statics;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::EngineConfig;
pub use context::{DefaultContext, DefaultContextFactory, RequestContext};
pub use dispatch::{DispatchError, Engine};
pub use http::{BufferedExchange, Exchange, Headers, Method, StatusCode};
pub use router::{Flow, HandlerError, HandlerResult, Router};
pub use server::{Server, ServerError};
