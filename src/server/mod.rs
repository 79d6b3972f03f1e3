//! Async TCP server using Tokio.
//!
//! [`HttpServer`] collects routes and middleware, then accepts connections
//! and gives each one its own task. A task owns its connection's TLS session,
//! parser and buffers outright, so requests on one connection are answered
//! strictly one after another while connections run in parallel.
//!
//! Routes, middleware and the TLS configuration are frozen when the server
//! starts and shared read-only by every task.

mod connection;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::http::{Method, Request, Response, StatusCode, Version};
use crate::middleware::{CorsMiddleware, Flow, Middleware, MiddlewareChain};
use crate::router::{RouteHandler, Router};
use crate::session::{MemorySessionStorage, SessionManager};
use crate::tls::{TlsConfigError, TlsSession, build_server_config};

use connection::Connection;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// How often expired sessions are swept from storage.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

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

    #[error("TLS configuration error: {0}")]
    Tls(#[from] TlsConfigError),
}

// State shared read-only by every connection task.
pub(crate) struct Shared {
    router: Router,
    middleware: MiddlewareChain,
    tls: Option<Arc<rustls::ServerConfig>>,
    max_request_bytes: usize,
}

impl Shared {
    // One full request cycle: before-hooks, routing, after-hooks.
    fn handle_request(&self, mut request: Request) -> Response {
        let keep_alive = request.is_keep_alive();

        let mut response = match self.middleware.run_before(&mut request) {
            Ok(Flow::RespondNow(response)) => {
                debug!(path = %request.path(), "middleware answered request");
                response
            }
            Ok(Flow::Continue) => self.dispatch(&mut request),
            Err(e) => {
                warn!(error = %e, path = %request.path(), "middleware aborted request");
                internal_error()
            }
        };

        if request.version() != Version::Unknown {
            response.set_version(request.version());
        }
        if !keep_alive {
            response.set_close_connection(true);
        }
        response
    }

    fn dispatch(&self, request: &mut Request) -> Response {
        let mut response = Response::new(StatusCode::Ok);
        if !self.router.dispatch(request, &mut response) {
            debug!(method = %request.method(), path = %request.path(), "no route matched");
            response = Response::new(StatusCode::NotFound).body("Not Found");
        }

        match self.middleware.run_after(&mut response) {
            Ok(()) => response,
            Err(e) => {
                warn!(error = %e, path = %request.path(), "middleware aborted response");
                internal_error()
            }
        }
    }
}

fn internal_error() -> Response {
    Response::new(StatusCode::InternalServerError).body("Internal Server Error")
}

/// The wirehttp HTTP server.
///
/// Build it from a [`Config`], register routes and middleware, then hand it a
/// listener.
///
/// # Examples
///
/// ```rust,no_run
/// use wirehttp::config::Config;
/// use wirehttp::server::HttpServer;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut server = HttpServer::new(Config::default())?;
///     server.get("/", |_req, resp| resp.set_body("Hello!"));
///     server.add_route(wirehttp::http::Method::Get, "/users/:id", |req, resp| {
///         resp.set_body(format!("user {}", req.path_param("param1").unwrap_or_default()));
///     });
///     server.run().await?;
///     Ok(())
/// }
/// ```
pub struct HttpServer {
    config: Config,
    router: Router,
    middleware: MiddlewareChain,
    sessions: Option<Arc<SessionManager>>,
    tls: Option<Arc<rustls::ServerConfig>>,
}

impl HttpServer {
    /// Creates a server from configuration.
    ///
    /// Builds the TLS configuration when `[tls] enabled`, installs the CORS
    /// middleware when `[cors] enabled`, and creates an in-memory session
    /// manager when `[session] enabled`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Tls`] if the certificate material cannot be
    /// loaded.
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let tls = if config.tls.enabled {
            Some(build_server_config(&config.tls)?)
        } else {
            None
        };

        let mut middleware = MiddlewareChain::new();
        if config.cors.enabled {
            middleware.add(Arc::new(CorsMiddleware::new(config.cors.clone())));
        }

        let sessions = config.session.enabled.then(|| {
            Arc::new(SessionManager::new(
                Arc::new(MemorySessionStorage::new()),
                config.session.max_age(),
            ))
        });

        Ok(Self {
            config,
            router: Router::new(),
            middleware,
            sessions,
            tls,
        })
    }

    /// Returns the configuration the server was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers an exact-match callback for `GET path`.
    pub fn get<F>(&mut self, path: &str, callback: F)
    where
        F: Fn(&Request, &mut Response) + Send + Sync + 'static,
    {
        self.route(Method::Get, path, callback);
    }

    /// Registers an exact-match callback for `POST path`.
    pub fn post<F>(&mut self, path: &str, callback: F)
    where
        F: Fn(&Request, &mut Response) + Send + Sync + 'static,
    {
        self.route(Method::Post, path, callback);
    }

    /// Registers an exact-match callback for `PUT path`.
    pub fn put<F>(&mut self, path: &str, callback: F)
    where
        F: Fn(&Request, &mut Response) + Send + Sync + 'static,
    {
        self.route(Method::Put, path, callback);
    }

    /// Registers an exact-match callback for `DELETE path`.
    pub fn delete<F>(&mut self, path: &str, callback: F)
    where
        F: Fn(&Request, &mut Response) + Send + Sync + 'static,
    {
        self.route(Method::Delete, path, callback);
    }

    /// Registers an exact-match callback.
    pub fn route<F>(&mut self, method: Method, path: &str, callback: F)
    where
        F: Fn(&Request, &mut Response) + Send + Sync + 'static,
    {
        self.router.register_callback(method, path, callback);
    }

    /// Registers a pattern callback such as `/users/:id`.
    pub fn add_route<F>(&mut self, method: Method, pattern: &str, callback: F)
    where
        F: Fn(&Request, &mut Response) + Send + Sync + 'static,
    {
        self.router.register_pattern_callback(method, pattern, callback);
    }

    /// Registers an exact-match object handler.
    pub fn add_handler(&mut self, method: Method, path: &str, handler: impl RouteHandler + 'static) {
        self.router.register_handler(method, path, handler);
    }

    /// Registers a pattern object handler.
    pub fn add_pattern_handler(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl RouteHandler + 'static,
    ) {
        self.router.register_pattern_handler(method, pattern, handler);
    }

    /// Appends a middleware. Hooks run in registration order.
    pub fn add_middleware(&mut self, middleware: impl Middleware + 'static) {
        self.middleware.add(Arc::new(middleware));
    }

    /// Replaces the session manager.
    pub fn set_session_manager(&mut self, sessions: Arc<SessionManager>) {
        self.sessions = Some(sessions);
    }

    /// Returns the session manager, for handlers to capture.
    pub fn session_manager(&self) -> Option<Arc<SessionManager>> {
        self.sessions.clone()
    }

    /// Binds `host:port` from the configuration and serves until the
    /// listener fails.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.config.listener.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.serve(listener).await
    }

    /// Builds a multi-threaded runtime with `listener.threads` workers and
    /// blocks the calling thread on [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the runtime cannot be created, or any
    /// error from [`run`](Self::run).
    pub fn start(self) -> Result<(), ServerError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.listener.threads.max(1))
            .enable_all()
            .build()?;
        runtime.block_on(self.run())
    }

    /// Accepts connections from `listener` until it fails.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the listener's address cannot be read.
    /// Individual accept failures are logged and skipped.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        let sessions = self.sessions.clone();
        let shared = self.into_shared();
        info!(
            address = %local_addr,
            tls = shared.tls.is_some(),
            routes = shared.router.len(),
            middleware = shared.middleware.len(),
            "wirehttp listening"
        );

        if let Some(sessions) = sessions {
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(SESSION_SWEEP_INTERVAL);
                loop {
                    ticker.tick().await;
                    sessions.clean_expired();
                }
            });
        }

        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let shared = Arc::clone(&shared);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, shared).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }

    pub(crate) fn into_shared(self) -> Arc<Shared> {
        Arc::new(Shared {
            router: self.router,
            middleware: self.middleware,
            tls: self.tls,
            max_request_bytes: self.config.listener.max_request_bytes,
        })
    }
}

/// Drives one connection: socket reads feed the [`Connection`], and whatever
/// it queues is written back before the next read.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    shared: Arc<Shared>,
) -> Result<(), std::io::Error> {
    let tls = match &shared.tls {
        Some(config) => match TlsSession::new(Arc::clone(config)) {
            Ok(session) => Some(session),
            Err(e) => {
                error!(peer = %peer_addr, error = %e, "failed to start TLS session");
                return Ok(());
            }
        },
        None => None,
    };

    let mut conn = Connection::new(shared, peer_addr, tls);
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let bytes_read = stream.read_buf(&mut buf).await?;
        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }

        let data = buf.split();
        conn.on_data(&data, SystemTime::now());

        let pending = conn.outbound().take();
        if !pending.is_empty() {
            stream.write_all(&pending).await?;
            stream.flush().await?;
        }

        if conn.is_closing() {
            debug!(peer = %peer_addr, "shutting down connection");
            stream.shutdown().await?;
            break;
        }
    }

    Ok(())
}
