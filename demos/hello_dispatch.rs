//! A small application on the tokio transport.
//!
//! ```text
//! cargo run --example hello_dispatch
//! curl -i localhost:8080/hello/world
//! curl -i localhost:8080/users/abc           # 404 with a custom message
//! curl -i localhost:8080/fail -H 'Accept: application/json'
//! curl -i localhost:8080/files/file2.txt
//! ```
//!
//! Set `FRONTLINE_CONFIG` to a TOML file to override the engine configuration.

use std::sync::Arc;

use frontline::bootstrap::{Bootstrap, CorePlugin};
use frontline::config::EngineConfig;
use frontline::context::{DefaultContext, DefaultContextFactory, RequestContext};
use frontline::dispatch::Engine;
use frontline::filters::{self, Cors};
use frontline::http::StatusCode;
use frontline::router::{Flow, HandlerError, NotFound, Router};
use frontline::server::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn routes(router: &Router<DefaultContext>) -> Result<(), Box<dyn std::error::Error>> {
    filters::request_logging(router)?;
    router.cors(Cors::new())?;

    router.get("/hello/${name}").save(|ctx: &mut DefaultContext| {
        let name = ctx.request().path_param("name").unwrap_or("stranger").to_owned();
        ctx.response_mut().send_plain_text(format!("Hello, {name}!"));
        Ok(Flow::Continue)
    })?;

    router.get("/users/${id}").save(|ctx: &mut DefaultContext| {
        let id: u32 = match ctx.request().path_param("id").map(str::parse) {
            Some(Ok(id)) => id,
            _ => return Ok(Flow::NotFound(NotFound::new().message("No such user"))),
        };
        ctx.response_mut().send_json(&serde_json::json!({ "id": id }))?;
        Ok(Flow::Continue)
    })?;

    router.get("/fail").save(|_ctx: &mut DefaultContext| {
        Err(HandlerError::public(StatusCode::Conflict, "Something is already there"))
    })?;

    router.redirect("/greet/${name}").to("/hello/${name}")?;
    router.dir("/files").classpath("oneDir").save()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "frontline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let core = match std::env::var("FRONTLINE_CONFIG") {
        Ok(path) => CorePlugin::load(path)?,
        Err(_) => CorePlugin::new(EngineConfig {
            resource_root: concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures").into(),
            ..EngineConfig::default()
        }),
    };
    let services = Bootstrap::new().plugin(core).init()?;
    let engine = Arc::new(Engine::from_services(&services, DefaultContextFactory)?);
    routes(engine.router())?;

    let server = Server::bind("127.0.0.1:8080").await?;
    tracing::info!(address = %server.local_addr(), "hello_dispatch ready");
    server
        .run_until(engine, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
