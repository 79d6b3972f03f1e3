//! # wirehttp
//!
//! An embeddable HTTP/1.1 request engine: an incremental request parser, an
//! exact and `:param` pattern router, a before/after middleware chain, and
//! in-process TLS termination over rustls, all driven by a Tokio listener.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wirehttp::config::Config;
//! use wirehttp::server::HttpServer;
//! use wirehttp::middleware::LoggerMiddleware;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = HttpServer::new(Config::default())?;
//!     server.add_middleware(LoggerMiddleware);
//!     server.get("/", |_req, resp| resp.set_body("Hello, World!"));
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

// ── Protocol engine ───────────────────────────────────────────────────────────
pub mod http;
pub mod middleware;
pub mod router;
pub mod tls;
pub mod transport;

// ── Collaborators and orchestration ───────────────────────────────────────────
pub mod config;
pub mod server;
pub mod session;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::{Config, ConfigError};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use middleware::{Flow, Middleware, MiddlewareChain};
pub use router::{RouteHandler, Router};
pub use server::{HttpServer, ServerError};
