//! Cross-Origin Resource Sharing middleware.
//!
//! The before-hook answers every `OPTIONS` request itself: `204 No Content`
//! with the `Access-Control-*` headers when the `Origin` is allowed, `403
//! Forbidden` otherwise. The after-hook stamps the same headers on every
//! other response whenever an allow-list is configured.

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{Flow, Middleware, MiddlewareError};
use crate::http::{Method, Request, Response, StatusCode};

/// CORS policy.
///
/// An empty `allowed_origins` list, or one containing `"*"`, admits every
/// origin; otherwise origins must match an entry exactly.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CorsConfig {
    /// Enables the middleware when the server is built from configuration.
    pub enabled: bool,
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds.
    pub max_age: u32,
}

impl Default for CorsConfig {
    /// An empty policy: no lists, no credentials, one-hour preflight cache.
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: Vec::new(),
            allowed_methods: Vec::new(),
            allowed_headers: Vec::new(),
            allow_credentials: false,
            max_age: 3600,
        }
    }
}

impl CorsConfig {
    /// A permissive policy: every origin, the common methods and headers.
    ///
    /// | Setting          | Value                                        |
    /// |------------------|----------------------------------------------|
    /// | Allowed origins  | `*`                                          |
    /// | Allowed methods  | `GET`, `POST`, `PUT`, `DELETE`, `OPTIONS`    |
    /// | Allowed headers  | `Content-Type`, `Authorization`              |
    /// | Max age          | 3600                                         |
    pub fn permissive() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_owned()],
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            allowed_headers: vec!["Content-Type".to_owned(), "Authorization".to_owned()],
            ..Self::default()
        }
    }

    /// Adds an allowed origin.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    /// Adds an allowed method.
    #[must_use]
    pub fn allow_method(mut self, method: impl Into<String>) -> Self {
        self.allowed_methods.push(method.into());
        self
    }

    /// Adds an allowed request header.
    #[must_use]
    pub fn allow_header(mut self, header: impl Into<String>) -> Self {
        self.allowed_headers.push(header.into());
        self
    }

    /// Sets `Access-Control-Allow-Credentials`.
    #[must_use]
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    /// Sets `Access-Control-Max-Age`.
    #[must_use]
    pub fn max_age(mut self, seconds: u32) -> Self {
        self.max_age = seconds;
        self
    }

    fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

/// CORS middleware.
///
/// # Examples
///
/// ```
/// use wirehttp::middleware::{CorsConfig, CorsMiddleware};
///
/// let cors = CorsMiddleware::new(
///     CorsConfig::default()
///         .allow_origin("https://app.example.com")
///         .allow_method("GET")
///         .allow_header("Content-Type")
///         .allow_credentials(true),
/// );
/// assert!(cors.is_origin_allowed("https://app.example.com"));
/// assert!(!cors.is_origin_allowed("https://evil.example"));
/// ```
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    config: CorsConfig,
}

impl CorsMiddleware {
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    /// Returns the policy.
    pub fn config(&self) -> &CorsConfig {
        &self.config
    }

    /// Applies the allow-list to `origin`.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.config.allowed_origins.is_empty()
            || self.config.allows_any_origin()
            || self.config.allowed_origins.iter().any(|o| o == origin)
    }

    fn preflight(&self, request: &Request) -> Response {
        let origin = request.header("Origin").unwrap_or_default();

        if !self.is_origin_allowed(origin) {
            warn!(origin, "CORS preflight rejected: origin not allowed");
            return Response::new(StatusCode::Forbidden);
        }

        let mut response = Response::new(StatusCode::NoContent);
        self.add_cors_headers(&mut response, origin);
        info!(origin, "CORS preflight accepted");
        response
    }

    fn add_cors_headers(&self, response: &mut Response, origin: &str) {
        response.add_header("Access-Control-Allow-Origin", origin);

        if self.config.allow_credentials {
            response.add_header("Access-Control-Allow-Credentials", "true");
        }
        if !self.config.allowed_methods.is_empty() {
            response.add_header(
                "Access-Control-Allow-Methods",
                self.config.allowed_methods.join(", "),
            );
        }
        if !self.config.allowed_headers.is_empty() {
            response.add_header(
                "Access-Control-Allow-Headers",
                self.config.allowed_headers.join(", "),
            );
        }
        response.add_header("Access-Control-Max-Age", self.config.max_age.to_string());
    }
}

impl Middleware for CorsMiddleware {
    fn before(&self, request: &mut Request) -> Result<Flow, MiddlewareError> {
        if request.method() != Method::Options {
            return Ok(Flow::Continue);
        }
        debug!(path = %request.path(), "handling CORS preflight");
        Ok(Flow::RespondNow(self.preflight(request)))
    }

    /// Adds the CORS headers when an allow-list is configured. A wildcard
    /// list answers `*`; otherwise the first configured origin is echoed.
    fn after(&self, response: &mut Response) -> Result<(), MiddlewareError> {
        let Some(first) = self.config.allowed_origins.first() else {
            return Ok(());
        };
        let origin = if self.config.allows_any_origin() {
            "*"
        } else {
            first.as_str()
        };
        self.add_cors_headers(response, origin);
        Ok(())
    }
}
