//! Minimal wirehttp server.
//!
//! ```text
//! cargo run --example hello_world                 # plain HTTP on :8080
//! cargo run --example hello_world -- server.toml  # settings from a TOML file
//! ```
//!
//! Set `RUST_LOG=wirehttp=debug` to see per-connection logging.

use serde::Serialize;
use tracing_subscriber::EnvFilter;
use wirehttp::config::Config;
use wirehttp::http::{Method, Request, Response, StatusCode};
use wirehttp::middleware::LoggerMiddleware;
use wirehttp::router::RouteHandler;
use wirehttp::server::HttpServer;

#[derive(Serialize)]
struct Greeting<'a> {
    message: &'a str,
    name: &'a str,
}

struct Health;

impl RouteHandler for Health {
    fn handle(&self, _request: &Request, response: &mut Response) {
        response.set_body("ok");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let mut server = HttpServer::new(config)?;
    server.add_middleware(LoggerMiddleware);

    server.get("/", |_req, resp| {
        resp.set_body("Hello, World!");
    });

    server.add_handler(Method::Get, "/health", Health);

    server.add_route(Method::Get, "/hello/:name", |req, resp| {
        let greeting = Greeting {
            message: "hello",
            name: req.path_param("param1").unwrap_or_default(),
        };
        if resp.set_json(&greeting).is_err() {
            resp.set_status(StatusCode::InternalServerError);
        }
    });

    server.post("/echo", |req, resp| {
        resp.set_content_type("application/octet-stream");
        resp.set_body(req.body().to_vec());
    });

    if let Some(sessions) = server.session_manager() {
        server.get("/visits", move |req, resp| {
            let mut session = sessions.get_session(req, resp);
            let visits = session
                .get("visits")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
                + 1;
            session.set("visits", visits.to_string());
            sessions.update_session(&session);
            resp.set_body(format!("visit #{visits}"));
        });
    }

    server.start()?;
    Ok(())
}
