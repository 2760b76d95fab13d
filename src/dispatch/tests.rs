use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;

use super::*;
use crate::config::EngineConfig;
use crate::context::{DefaultContext, DefaultContextFactory};
use crate::dictionary::DefaultDictionary;
use crate::filters::Cors;
use crate::http::{BufferedExchange, ExchangeError, Headers, Method};
use crate::router::FlashKind;

type TestEngine = Engine<DefaultContextFactory>;

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn engine_with(config: EngineConfig) -> TestEngine {
    Engine::new(Arc::new(Router::new(Arc::new(config))), DefaultContextFactory)
}

fn engine() -> TestEngine {
    engine_with(EngineConfig {
        resource_root: fixtures(),
        ..EngineConfig::default()
    })
}

fn send(
    engine: &TestEngine,
    exchange: BufferedExchange,
) -> (Result<(), DispatchError>, Arc<BufferedExchange>) {
    let exchange = Arc::new(exchange);
    let result = engine.handle(exchange.clone());
    (result, exchange)
}

fn get(engine: &TestEngine, path: &str) -> (Result<(), DispatchError>, Arc<BufferedExchange>) {
    send(engine, request(Method::Get, path))
}

fn request(method: Method, path: &str) -> BufferedExchange {
    BufferedExchange::new(method, format!("http://localhost{path}"))
}

fn text(body: &'static str) -> impl Fn(&mut DefaultContext) -> HandlerResult + Send + Sync {
    move |ctx: &mut DefaultContext| {
        ctx.response_mut().send_plain_text(body);
        Ok(Flow::Continue)
    }
}

#[test]
fn serves_a_route_and_ends_once() {
    let engine = engine();
    engine.router().get("/hello").save(text("hi")).unwrap();

    let (result, exchange) = get(&engine, "/hello");
    result.unwrap();
    assert_eq!(exchange.status(), StatusCode::Ok);
    assert_eq!(exchange.body_string(), "hi");
    assert_eq!(exchange.end_calls(), 1);
}

#[test]
fn directory_resource_serves_files_and_forbids_its_root() {
    let engine = engine();
    engine.router().dir("/one").classpath("/oneDir").save().unwrap();

    let (result, exchange) = get(&engine, "/one/image2.jpg");
    result.unwrap();
    assert_eq!(exchange.status(), StatusCode::Ok);
    assert_eq!(exchange.response_header("content-type").as_deref(), Some("image/jpeg"));
    assert_eq!(&exchange.body()[..2], b"\xFF\xD8");

    let (_, exchange) = get(&engine, "/one/dir2/file3.txt");
    assert_eq!(exchange.body_string(), "file content 3");

    for root in ["/one", "/one/", "/one/dir2"] {
        let (result, exchange) = get(&engine, root);
        result.unwrap();
        assert_eq!(exchange.status(), StatusCode::Forbidden, "{root}");
        assert_eq!(exchange.end_calls(), 1);
    }

    let (_, exchange) = get(&engine, "/one/missing.txt");
    assert_eq!(exchange.status(), StatusCode::NotFound);
}

#[test]
fn file_resource_wins_over_routes_in_any_order() {
    let engine = engine();
    let router = engine.router();
    router.get("/route3").save(text("route3")).unwrap();
    router.file("/route3").classpath("/oneDir/file2.txt").save().unwrap();
    router.get("/route3").save(text("route3 again")).unwrap();

    let (result, exchange) = get(&engine, "/route3");
    result.unwrap();
    assert_eq!(exchange.body_string(), "file content 2");

    // a POST is not a static resource request
    let (_, exchange) = send(&engine, request(Method::Post, "/route3"));
    assert_eq!(exchange.status(), StatusCode::NotFound);
}

#[test]
fn exact_file_beats_directory_and_later_resource_of_same_kind_wins() {
    let engine = engine();
    let router = engine.router();
    router.dir("/one").classpath("/oneDir").save().unwrap();
    router.file("/one/file2.txt").classpath("/oneDir/dir2/file3.txt").save().unwrap();

    let (_, exchange) = get(&engine, "/one/file2.txt");
    assert_eq!(exchange.body_string(), "file content 3");

    router.file("/f").classpath("/oneDir/file2.txt").save().unwrap();
    router.file("/f").classpath("/oneDir/dir2/file3.txt").save().unwrap();
    let (_, exchange) = get(&engine, "/f");
    assert_eq!(exchange.body_string(), "file content 3");
}

#[test]
fn head_is_served_by_static_resources() {
    let engine = engine();
    engine.router().file("/file").classpath("/oneDir/file2.txt").save().unwrap();
    let (result, exchange) = send(&engine, request(Method::Head, "/file"));
    result.unwrap();
    assert_eq!(exchange.status(), StatusCode::Ok);
    assert!(exchange.response_header("cache-control").is_some());
}

#[test]
fn private_error_hides_details() {
    let engine = engine();
    engine
        .router()
        .get("/fail")
        .save(|_ctx: &mut DefaultContext| -> HandlerResult {
            Err(HandlerError::private(io::Error::other("database password is hunter2")))
        })
        .unwrap();

    let formats = [
        ("application/json", r#"{"error":"An error occurred."}"#),
        ("application/xml", "<response><error>An error occurred.</error></response>"),
        ("text/html", "<pre>An error occurred.</pre>"),
        ("text/plain", "An error occurred."),
    ];
    for (accept, expected) in formats {
        let (result, exchange) =
            send(&engine, request(Method::Get, "/fail").with_header("Accept", accept));
        result.unwrap();
        assert_eq!(exchange.status(), StatusCode::InternalServerError);
        assert_eq!(exchange.body_string(), expected);
        assert!(!exchange.body_string().contains("hunter2"));
        assert!(!exchange.body_string().contains("Debug info"));
        assert_eq!(exchange.end_calls(), 1);
    }
}

#[test]
fn debug_mode_appends_the_error_chain() {
    let engine = engine_with(EngineConfig {
        debug_enabled: true,
        ..EngineConfig::default()
    });
    engine
        .router()
        .get("/fail")
        .save(|_ctx: &mut DefaultContext| -> HandlerResult {
            Err(io::Error::other("disk full").into())
        })
        .unwrap();

    let (_, exchange) = get(&engine, "/fail");
    assert_eq!(
        exchange.body_string(),
        "An error occurred.\n\nDebug info :\n\ndisk full"
    );
}

#[test]
fn public_error_keeps_status_and_message() {
    let engine = engine();
    engine
        .router()
        .post("/users")
        .save(|ctx: &mut DefaultContext| {
            ctx.response_mut().send_plain_text("partial output");
            Err(HandlerError::public(StatusCode::Conflict, "User already exists"))
        })
        .unwrap();

    let (result, exchange) = send(
        &engine,
        request(Method::Post, "/users").with_header("Accept", "application/json"),
    );
    result.unwrap();
    assert_eq!(exchange.status(), StatusCode::Conflict);
    assert_eq!(exchange.body_string(), r#"{"error":"User already exists"}"#);
}

#[test]
fn panics_become_internal_errors() {
    let engine = engine();
    engine
        .router()
        .get("/panic")
        .save(|_ctx: &mut DefaultContext| -> HandlerResult { panic!("kaboom") })
        .unwrap();

    let (result, exchange) = get(&engine, "/panic");
    result.unwrap();
    assert_eq!(exchange.status(), StatusCode::InternalServerError);
    assert_eq!(exchange.body_string(), "An error occurred.");
}

#[test]
fn forward_to_unknown_path_is_not_found() {
    let engine = engine();
    engine
        .router()
        .get("/start")
        .save(|_ctx: &mut DefaultContext| Ok(Flow::forward("/other")))
        .unwrap();

    let (result, exchange) = get(&engine, "/start");
    result.unwrap();
    assert_eq!(exchange.status(), StatusCode::NotFound);
    assert_eq!(exchange.body_string(), "Not found");
    assert_eq!(exchange.end_calls(), 1);
}

#[test]
fn forward_reroutes_and_records_variables() {
    let engine = engine();
    let router = engine.router();
    router
        .get("/start")
        .save(|ctx: &mut DefaultContext| {
            ctx.response_mut().send_plain_text("dropped");
            Ok(Flow::Forward(Forward::to("//target?x=1").message("hello")))
        })
        .unwrap();
    router
        .get("/target")
        .save(|ctx: &mut DefaultContext| {
            let body = format!(
                "{}|{}|{}|{}|{}",
                ctx.variables().forward_message().unwrap_or(""),
                ctx.variables().forward_url().unwrap_or(""),
                ctx.request().original_full_url(),
                ctx.request().query_param("x").unwrap_or(""),
                ctx.variables().forwarded_count(),
            );
            ctx.response_mut().send_plain_text(body);
            Ok(Flow::Continue)
        })
        .unwrap();

    let (result, exchange) = get(&engine, "/start");
    result.unwrap();
    assert_eq!(
        exchange.body_string(),
        "hello|http://localhost/target?x=1|http://localhost/start|1|1"
    );
}

#[test]
fn forward_can_keep_the_response() {
    let engine = engine();
    let router = engine.router();
    router
        .get("/a")
        .save(|ctx: &mut DefaultContext| {
            ctx.response_mut().send_plain_text("a,");
            Ok(Flow::Forward(Forward::to("/b").keep_response()))
        })
        .unwrap();
    router.get("/b").save(text("b")).unwrap();

    let (_, exchange) = get(&engine, "/a");
    assert_eq!(exchange.body_string(), "a,b");
}

#[test]
fn forward_target_with_a_url_in_its_query_stays_relative() {
    let engine = engine();
    let router = engine.router();
    router
        .get("/start")
        .save(|_ctx: &mut DefaultContext| Ok(Flow::forward("/target?next=http://example.com/x")))
        .unwrap();
    router
        .get("/target")
        .save(|ctx: &mut DefaultContext| {
            let next = ctx.request().query_param("next").unwrap_or("").to_owned();
            ctx.response_mut().send_plain_text(format!("target {next}"));
            Ok(Flow::Continue)
        })
        .unwrap();

    let (result, exchange) = get(&engine, "/start");
    result.unwrap();
    assert_eq!(exchange.status(), StatusCode::Ok);
    assert_eq!(exchange.body_string(), "target http://example.com/x");
}

#[test]
fn forward_target_with_a_scheme_is_absolute() {
    let current = Url::parse("http://localhost:8080/start").unwrap();
    let absolute = resolve_forward_url(&current, "https://example.com/target").unwrap();
    assert_eq!(absolute.as_str(), "https://example.com/target");
    let relative = resolve_forward_url(&current, "target?x=1").unwrap();
    assert_eq!(relative.as_str(), "http://localhost:8080/target?x=1");
}

#[test]
fn forward_limit_is_exact() {
    for max in [0_u32, 1, 2, 5] {
        let engine = engine_with(EngineConfig {
            route_forwarding_max: max,
            ..EngineConfig::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        engine
            .router()
            .get("/loop")
            .save(move |_ctx: &mut DefaultContext| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Flow::forward("/loop"))
            })
            .unwrap();

        let (result, exchange) = get(&engine, "/loop");
        assert!(
            matches!(result, Err(DispatchError::ForwardLimitExceeded { max: m, .. }) if m == max)
        );
        assert_eq!(calls.load(Ordering::SeqCst), max as usize + 1);
        assert_eq!(exchange.status(), StatusCode::InternalServerError);
        assert_eq!(exchange.end_calls(), 1);
    }
}

#[test]
fn redirect_resets_and_carries_the_flash_message() {
    let engine = engine();
    engine
        .router()
        .get("/private")
        .save(|ctx: &mut DefaultContext| {
            ctx.response_mut().set_cookie("session", "abc");
            ctx.response_mut().send_plain_text("not for you");
            Ok(Flow::Redirect(
                Redirect::to("/login").flash(FlashKind::Warning, "please log in"),
            ))
        })
        .unwrap();

    let (result, exchange) = get(&engine, "/private");
    result.unwrap();
    assert_eq!(exchange.status(), StatusCode::Found);
    assert_eq!(
        exchange.response_header("location").as_deref(),
        Some("/login?flash=warning%3Aplease+log+in")
    );
    assert_eq!(
        exchange.response_header("set-cookie").as_deref(),
        Some("session=abc; Path=/")
    );
    assert_eq!(exchange.body_string(), "");
    assert_eq!(exchange.end_calls(), 1);
}

#[test]
fn redirect_after_headers_sent_is_ignored() {
    let engine = engine();
    engine
        .router()
        .get("/streaming")
        .save(|ctx: &mut DefaultContext| {
            ctx.response_mut().send_plain_text("already sent");
            ctx.response_mut().flush(false)?;
            Ok(Flow::redirect("/elsewhere"))
        })
        .unwrap();

    let (result, exchange) = get(&engine, "/streaming");
    result.unwrap();
    assert_eq!(exchange.status(), StatusCode::Ok);
    assert!(exchange.response_header("location").is_none());
    assert_eq!(exchange.body_string(), "already sent");
    assert_eq!(exchange.end_calls(), 1);
}

#[test]
fn redirect_rules_replace_placeholders() {
    let engine = engine();
    let router = engine.router();
    router.redirect("/old/${id}").to("/new/${id}").unwrap();
    router.redirect("/tmp/*{rest}").temporarily().to("/archive/*{rest}").unwrap();

    let (_, exchange) = get(&engine, "/old/5");
    assert_eq!(exchange.status(), StatusCode::MovedPermanently);
    assert_eq!(exchange.response_header("location").as_deref(), Some("/new/5"));

    let (_, exchange) = get(&engine, "/tmp/a/b");
    assert_eq!(exchange.status(), StatusCode::Found);
    assert_eq!(exchange.response_header("location").as_deref(), Some("/archive/a/b"));
}

#[test]
fn skip_remaining_stops_the_chain() {
    let engine = engine();
    let router = engine.router();
    router
        .before(|ctx: &mut DefaultContext| {
            if ctx.request().query_param("stop").is_some() {
                ctx.response_mut().send_plain_text("stopped");
                return Ok(Flow::SkipRemaining);
            }
            Ok(Flow::Continue)
        })
        .unwrap();
    router.get("/chain").save(text("main")).unwrap();
    router.after(text("+after")).unwrap();

    let (_, exchange) = get(&engine, "/chain");
    assert_eq!(exchange.body_string(), "main+after");

    let (_, exchange) = get(&engine, "/chain?stop=1");
    assert_eq!(exchange.body_string(), "stopped");
    assert_eq!(exchange.end_calls(), 1);
}

#[test]
fn filters_run_by_position_then_registration() {
    let engine = engine();
    let router = engine.router();
    router.get("/x").save(text("M")).unwrap();
    router.all("/x").pos(-5).save(text("2")).unwrap();
    router.all("/x").pos(-50).save(text("1")).unwrap();
    router.all("/x").pos(-5).save(text("3")).unwrap();
    router.all("/x").pos(20).save(text("5")).unwrap();
    router.all("/x").pos(2).save(text("4")).unwrap();

    let (_, exchange) = get(&engine, "/x");
    assert_eq!(exchange.body_string(), "123M45");
}

#[test]
fn handler_match_and_routing_result_are_visible() {
    let engine = engine();
    engine
        .router()
        .get("/users/${id:<N>}")
        .id("user")
        .save(|ctx: &mut DefaultContext| {
            let route_id = ctx
                .variables()
                .route_handler_match()
                .and_then(|m| m.route_id().map(str::to_owned))
                .unwrap_or_default();
            let path = ctx
                .variables()
                .routing_result()
                .map(|r| r.path().to_owned())
                .unwrap_or_default();
            let id = ctx.request().path_param("id").unwrap_or("").to_owned();
            ctx.response_mut().send_plain_text(format!("{route_id} {path} {id}"));
            Ok(Flow::Continue)
        })
        .unwrap();

    let (_, exchange) = get(&engine, "/users/42");
    assert_eq!(exchange.body_string(), "user /users/${id:<N>} 42");
}

#[test]
fn custom_not_found_receives_the_public_message() {
    let engine = engine();
    let router = engine.router();
    router
        .get("/users/${id}")
        .save(|_ctx: &mut DefaultContext| {
            Ok(Flow::NotFound(NotFound::new().message("No such user")))
        })
        .unwrap();
    router
        .not_found(|ctx: &mut DefaultContext| {
            let message = ctx.variables().not_found_message().unwrap_or("nothing").to_owned();
            let flagged = ctx.variables().is_not_found_route();
            ctx.response_mut().send_plain_text(format!("{message} {flagged}"));
            Ok(Flow::Continue)
        })
        .unwrap();

    let (_, exchange) = get(&engine, "/users/7");
    assert_eq!(exchange.status(), StatusCode::NotFound);
    assert_eq!(exchange.body_string(), "No such user true");

    let (_, exchange) = get(&engine, "/nowhere");
    assert_eq!(exchange.body_string(), "nothing true");
}

#[test]
fn default_not_found_is_negotiated_and_localized() {
    let engine = engine().with_dictionary(Arc::new(
        DefaultDictionary::new().with(MessageKey::RouteNotFound, "Introuvable"),
    ));
    let (result, exchange) = send(
        &engine,
        request(Method::Get, "/missing").with_header("Accept", "application/json"),
    );
    result.unwrap();
    assert_eq!(exchange.status(), StatusCode::NotFound);
    assert_eq!(exchange.body_string(), r#"{"error":"Introuvable"}"#);

    // registered once, reused afterwards
    let routes = engine.router().len();
    get(&engine, "/missing-again").0.unwrap();
    assert_eq!(engine.router().len(), routes);
}

#[test]
fn after_filter_output_counts_in_the_not_found_length() {
    let engine = engine();
    engine.router().after(text("!")).unwrap();

    let (result, exchange) = get(&engine, "/missing");
    result.unwrap();
    assert_eq!(exchange.status(), StatusCode::NotFound);
    assert_eq!(exchange.body_string(), "Not found!");
    assert_eq!(exchange.response_header("content-length").as_deref(), Some("10"));
}

#[test]
fn concurrent_first_misses_all_get_the_default_not_found() {
    for _ in 0..20 {
        let engine = Arc::new(engine());
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    let (result, exchange) = get(&engine, "/missing");
                    (result.is_ok(), exchange.status())
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), (true, StatusCode::NotFound));
        }
        assert_eq!(engine.router().len(), 1);
    }
}

#[test]
fn not_found_inside_not_found_chain_is_a_404_error() {
    let engine = engine();
    engine
        .router()
        .not_found(|_ctx: &mut DefaultContext| Ok(Flow::not_found()))
        .unwrap();

    let (result, exchange) = get(&engine, "/missing");
    result.unwrap();
    assert_eq!(exchange.status(), StatusCode::NotFound);
    assert_eq!(exchange.body_string(), "Not found");
    assert_eq!(exchange.end_calls(), 1);
}

#[test]
fn missing_not_found_route_after_default_registration_is_fatal() {
    let engine = engine();
    get(&engine, "/first-miss").0.unwrap();
    engine.router().remove_all_routes();

    let (result, exchange) = get(&engine, "/second-miss");
    assert!(matches!(result, Err(DispatchError::NotFoundRouteMissing)));
    assert_eq!(exchange.status(), StatusCode::InternalServerError);
    assert_eq!(exchange.end_calls(), 1);
}

#[test]
fn custom_exception_handler_sees_the_original_route() {
    let engine = engine();
    let router = engine.router();
    router
        .get("/boom/${id}")
        .save(|_ctx: &mut DefaultContext| -> HandlerResult {
            Err(HandlerError::public(StatusCode::Conflict, "taken"))
        })
        .unwrap();
    router
        .exception(|ctx: &mut DefaultContext| {
            let vars = ctx.variables();
            let body = format!(
                "{} @ {} {}",
                vars.exception().map(|e| e.message()).unwrap_or_default(),
                vars.original_routing_result().map(|r| r.path().to_owned()).unwrap_or_default(),
                vars.is_exception_handling(),
            );
            ctx.response_mut().send_plain_text(body);
            Ok(Flow::Continue)
        })
        .unwrap();

    let (result, exchange) = get(&engine, "/boom/1");
    result.unwrap();
    assert_eq!(exchange.status(), StatusCode::Conflict);
    assert_eq!(exchange.body_string(), "taken @ /boom/${id} true");
    assert_eq!(exchange.end_calls(), 1);
}

#[test]
fn failing_exception_handler_falls_back_to_the_default() {
    let engine = engine();
    let router = engine.router();
    router
        .get("/boom")
        .save(|_ctx: &mut DefaultContext| -> HandlerResult { Err(HandlerError::msg("db down")) })
        .unwrap();
    router
        .exception(|ctx: &mut DefaultContext| -> HandlerResult {
            ctx.response_mut().send_plain_text("half written");
            Err(HandlerError::msg("exception handler broke"))
        })
        .unwrap();

    let (result, exchange) = get(&engine, "/boom");
    result.unwrap();
    assert_eq!(exchange.status(), StatusCode::InternalServerError);
    assert_eq!(exchange.body_string(), "An error occurred.");
    assert_eq!(exchange.end_calls(), 1);
}

#[test]
fn error_without_reset_keeps_buffered_output() {
    let engine = engine();
    engine
        .router()
        .get("/keep")
        .save(|ctx: &mut DefaultContext| -> HandlerResult {
            ctx.response_mut().send_plain_text("kept;");
            Err(HandlerError::public(StatusCode::BadRequest, "bad").without_reset())
        })
        .unwrap();

    let (_, exchange) = get(&engine, "/keep");
    assert_eq!(exchange.status(), StatusCode::BadRequest);
    assert_eq!(exchange.body_string(), "kept;bad");
}

#[test]
fn encoded_traversal_yields_an_internal_error() {
    let engine = engine();
    engine.router().dir("/one/*{file}").classpath("/oneDir").save().unwrap();

    let (result, exchange) = get(&engine, "/one/..%2F..%2FCargo.toml");
    result.unwrap();
    assert_eq!(exchange.status(), StatusCode::InternalServerError);
    assert_eq!(exchange.body_string(), "An error occurred.");
}

#[test]
fn generated_resource_is_generated_once() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_with(EngineConfig {
        app_root: tmp.path().to_path_buf(),
        ..EngineConfig::default()
    });
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    engine
        .router()
        .dir("/generated/*{name}")
        .path_relative("generated")
        .save_generator(move |ctx: &mut DefaultContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            let name = ctx.request().path_param("name").unwrap_or("").to_owned();
            ctx.response_mut().send_plain_text(format!("content of {name}"));
            Ok(Flow::Continue)
        })
        .unwrap();

    for _ in 0..3 {
        let (result, exchange) = get(&engine, "/generated/report.txt");
        result.unwrap();
        assert_eq!(exchange.body_string(), "content of report.txt");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(tmp.path().join("generated/report.txt").is_file());
}

#[test]
fn cors_preflight_without_route() {
    let engine = engine();
    engine.router().cors(Cors::new()).unwrap();

    let (result, exchange) = send(
        &engine,
        request(Method::Options, "/api/items").with_header("Origin", "https://a.com"),
    );
    result.unwrap();
    assert_eq!(exchange.status(), StatusCode::NoContent);
    assert_eq!(
        exchange.response_header("access-control-allow-origin").as_deref(),
        Some("*")
    );
}

#[test]
fn routes_added_by_a_running_handler_serve_later_requests() {
    let engine = engine();
    let router = Arc::clone(engine.router());
    engine
        .router()
        .get("/install")
        .save(move |_ctx: &mut DefaultContext| {
            router.get("/installed").save(text("new route"))?;
            Ok(Flow::Continue)
        })
        .unwrap();

    assert_eq!(get(&engine, "/installed").1.status(), StatusCode::NotFound);
    get(&engine, "/install").0.unwrap();
    assert_eq!(get(&engine, "/installed").1.body_string(), "new route");
}

#[test]
fn concurrent_exchanges_do_not_share_variables() {
    let engine = Arc::new(engine());
    engine
        .router()
        .get("/echo/${n}")
        .save(|ctx: &mut DefaultContext| {
            let n = ctx.request().path_param("n").unwrap_or("").to_owned();
            ctx.variables_mut()
                .set(VariableKey::ForwardMessage, Variable::Text(n.clone()));
            std::thread::yield_now();
            let seen = ctx.variables().forward_message().unwrap_or("").to_owned();
            ctx.response_mut().send_plain_text(format!("{n}={seen}"));
            Ok(Flow::Continue)
        })
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                let (result, exchange) = get(&engine, &format!("/echo/{n}"));
                result.unwrap();
                assert_eq!(exchange.body_string(), format!("{n}={n}"));
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

/// Accepts headers but fails every body write.
struct BrokenPipe {
    inner: BufferedExchange,
}

impl Exchange for BrokenPipe {
    fn method(&self) -> Method {
        self.inner.method()
    }

    fn full_url(&self) -> String {
        self.inner.full_url()
    }

    fn request_headers(&self) -> Headers {
        self.inner.request_headers()
    }

    fn request_body(&self) -> Bytes {
        self.inner.request_body()
    }

    fn set_status(&self, status: StatusCode) {
        self.inner.set_status(status);
    }

    fn set_header(&self, name: &str, values: &[String]) {
        self.inner.set_header(name, values);
    }

    fn write_bytes(&self, _bytes: &[u8]) -> Result<(), ExchangeError> {
        Err(ExchangeError::Io(io::Error::other("broken pipe")))
    }

    fn end(&self) {
        self.inner.end();
    }

    fn is_headers_sent(&self) -> bool {
        self.inner.is_headers_sent()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[test]
fn unwritable_error_response_falls_to_last_resort() {
    let engine = engine();
    engine
        .router()
        .get("/fail")
        .save(|_ctx: &mut DefaultContext| -> HandlerResult { Err(HandlerError::msg("nope")) })
        .unwrap();

    let exchange = Arc::new(BrokenPipe {
        inner: request(Method::Get, "/fail"),
    });
    let result = engine.handle(exchange.clone());
    assert!(matches!(result, Err(DispatchError::LastResort(_))));
    assert_eq!(exchange.inner.status(), StatusCode::InternalServerError);
    assert_eq!(exchange.inner.end_calls(), 1);
}

#[test]
fn every_flow_ends_the_response_exactly_once() {
    let engine = engine();
    let router = engine.router();
    router.get("/continue").save(text("ok")).unwrap();
    router
        .get("/skip")
        .save(|_ctx: &mut DefaultContext| Ok(Flow::SkipRemaining))
        .unwrap();
    router
        .get("/forward")
        .save(|_ctx: &mut DefaultContext| Ok(Flow::forward("/continue")))
        .unwrap();
    router
        .get("/redirect")
        .save(|_ctx: &mut DefaultContext| Ok(Flow::redirect("/continue")))
        .unwrap();
    router
        .get("/not-found")
        .save(|_ctx: &mut DefaultContext| Ok(Flow::not_found()))
        .unwrap();
    router
        .get("/error")
        .save(|_ctx: &mut DefaultContext| -> HandlerResult { Err(HandlerError::msg("x")) })
        .unwrap();
    router
        .get("/ended")
        .save(|ctx: &mut DefaultContext| {
            ctx.response_mut().send_plain_text("done");
            ctx.response_mut().end();
            Ok(Flow::Continue)
        })
        .unwrap();
    router.after(text("late")).unwrap();

    for path in [
        "/continue",
        "/skip",
        "/forward",
        "/redirect",
        "/not-found",
        "/error",
        "/ended",
        "/unknown",
    ] {
        let (_, exchange) = get(&engine, path);
        assert_eq!(exchange.end_calls(), 1, "{path}");
    }
}
