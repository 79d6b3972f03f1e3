//! Middleware pipeline — ordered before/after hooks around dispatch.
//!
//! The chain owns every middleware; no middleware knows about any other.
//! [`MiddlewareChain::run_before`] walks the list in registration order and
//! stops early when a hook answers the request itself with
//! [`Flow::RespondNow`]. [`MiddlewareChain::run_after`] walks the same list in
//! the same order once a response exists.
//!
//! ## Core types
//!
//! - [`Middleware`] — trait implemented by all middleware.
//! - [`Flow`] — the outcome of a before-hook.
//! - [`MiddlewareChain`] — the ordered, append-only list and its driver.
//! - [`MiddlewareError`] — an unrecoverable hook failure (served as 500).
//! - [`LoggerMiddleware`] — built-in request/response logger.
//! - [`CorsMiddleware`] — cross-origin policy with preflight handling.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::http::{Request, Response};

pub mod cors;

pub use cors::{CorsConfig, CorsMiddleware};

/// Outcome of a before-hook.
#[derive(Debug)]
pub enum Flow {
    /// Keep going: run the next hook, then the router.
    Continue,
    /// Stop here and send this response. The router and every after-hook are skipped.
    RespondNow(Response),
}

/// An unrecoverable failure inside a hook.
#[derive(Debug, Error)]
#[error("middleware aborted: {message}")]
pub struct MiddlewareError {
    message: String,
}

impl MiddlewareError {
    /// Creates an error with a human-readable reason.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the reason.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The core trait for all middleware.
///
/// Both hooks default to doing nothing, so an implementation only overrides
/// the side it cares about. Middleware is shared by every connection, so any
/// configuration it carries must be read-only after construction.
///
/// # Examples
///
/// ```
/// use wirehttp::http::Response;
/// use wirehttp::middleware::{Middleware, MiddlewareError};
///
/// struct ServerHeader;
///
/// impl Middleware for ServerHeader {
///     fn after(&self, response: &mut Response) -> Result<(), MiddlewareError> {
///         response.add_header("Server", "wirehttp");
///         Ok(())
///     }
/// }
/// ```
pub trait Middleware: Send + Sync {
    /// Runs before routing. May inspect or modify the request, or answer it directly.
    fn before(&self, request: &mut Request) -> Result<Flow, MiddlewareError> {
        let _ = request;
        Ok(Flow::Continue)
    }

    /// Runs after the handler has produced `response`.
    fn after(&self, response: &mut Response) -> Result<(), MiddlewareError> {
        let _ = response;
        Ok(())
    }
}

/// Ordered, append-only middleware list.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use wirehttp::http::{Request, Response};
/// use wirehttp::middleware::{Flow, LoggerMiddleware, MiddlewareChain};
///
/// let mut chain = MiddlewareChain::new();
/// chain.add(Arc::new(LoggerMiddleware));
///
/// let mut request = Request::new();
/// assert!(matches!(chain.run_before(&mut request), Ok(Flow::Continue)));
/// ```
#[derive(Default, Clone)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware. Hooks run in the order middleware was added.
    pub fn add(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Returns the number of middleware in the chain.
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Returns `true` if the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Runs every before-hook in registration order.
    ///
    /// Returns the first [`Flow::RespondNow`] produced, or [`Flow::Continue`]
    /// if every hook let the request through.
    ///
    /// # Errors
    ///
    /// The first hook error aborts the chain and is returned as-is.
    pub fn run_before(&self, request: &mut Request) -> Result<Flow, MiddlewareError> {
        for middleware in &self.middlewares {
            if let Flow::RespondNow(response) = middleware.before(request)? {
                return Ok(Flow::RespondNow(response));
            }
        }
        Ok(Flow::Continue)
    }

    /// Runs every after-hook in registration order (not reversed).
    ///
    /// # Errors
    ///
    /// The first hook error aborts the chain and is returned as-is.
    pub fn run_after(&self, response: &mut Response) -> Result<(), MiddlewareError> {
        for middleware in &self.middlewares {
            middleware.after(response)?;
        }
        Ok(())
    }
}

/// Built-in middleware that logs each request and the status it produced.
///
/// The before-hook emits a `debug!` line with the method, path and protocol
/// version; the after-hook emits an `info!` line with the response status.
/// It never short-circuits.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn before(&self, request: &mut Request) -> Result<Flow, MiddlewareError> {
        debug!(
            method = %request.method(),
            path = %request.path(),
            version = %request.version(),
            "request received"
        );
        Ok(Flow::Continue)
    }

    fn after(&self, response: &mut Response) -> Result<(), MiddlewareError> {
        info!(
            status = response.status().as_u16(),
            bytes = response.body_bytes().len(),
            "response ready"
        );
        Ok(())
    }
}
