//! Request routing — map a method and path to a handler.
//!
//! [`Router`] keeps two kinds of routes:
//!
//! | Kind     | Registered with                       | Example pattern      | Captured params        |
//! |----------|---------------------------------------|----------------------|------------------------|
//! | Exact    | `register_handler` / `register_callback` | `/users`          | *(none)*               |
//! | Pattern  | `register_pattern_handler` / `register_pattern_callback` | `/users/:id/:action` | `param1`, `param2` |
//!
//! Lookup order is fixed: exact object handlers, exact callbacks, pattern
//! object handlers in registration order, then pattern callbacks in
//! registration order. The first match wins. Overlapping patterns are not
//! detected.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::http::{Method, Request, Response};

/// An object-style route handler.
///
/// Useful when a handler carries its own state or groups related logic.
/// Handlers populate the supplied response in place.
///
/// # Examples
///
/// ```
/// use wirehttp::http::{Request, Response, StatusCode};
/// use wirehttp::router::RouteHandler;
///
/// struct Health;
///
/// impl RouteHandler for Health {
///     fn handle(&self, _request: &Request, response: &mut Response) {
///         response.set_status(StatusCode::Ok);
///         response.set_body("up");
///     }
/// }
/// ```
pub trait RouteHandler: Send + Sync {
    /// Handle `request`, writing the result into `response`.
    fn handle(&self, request: &Request, response: &mut Response);
}

/// Type-erased callback handler.
pub type HandlerCallback = Arc<dyn Fn(&Request, &mut Response) + Send + Sync + 'static>;

/// The closed set of handler shapes the router dispatches to.
#[derive(Clone)]
pub enum Handler {
    Object(Arc<dyn RouteHandler>),
    Callback(HandlerCallback),
}

impl Handler {
    /// Wraps an object handler.
    pub fn object(handler: impl RouteHandler + 'static) -> Self {
        Self::Object(Arc::new(handler))
    }

    /// Wraps a closure.
    pub fn callback<F>(callback: F) -> Self
    where
        F: Fn(&Request, &mut Response) + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(callback))
    }

    /// Invokes the handler.
    pub fn call(&self, request: &Request, response: &mut Response) {
        match self {
            Self::Object(handler) => handler.handle(request, response),
            Self::Callback(callback) => callback(request, response),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(_) => f.write_str("Handler::Object"),
            Self::Callback(_) => f.write_str("Handler::Callback"),
        }
    }
}

/// Exact-match lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub method: Method,
    pub path: String,
}

impl RouteKey {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }
}

// A single path segment, either a literal string or a capture (`:name`).
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Capture,
}

/// A compiled `:name` path pattern.
///
/// Compiled once at registration. Matching is anchored at both ends: the path
/// must have exactly as many `/`-separated segments as the pattern, literal
/// segments must be equal, and each capture takes one non-empty segment.
///
/// # Examples
///
/// ```
/// use wirehttp::router::PathPattern;
///
/// let pattern = PathPattern::compile("/users/:id/:action");
/// assert_eq!(pattern.captures("/users/42/ban"), Some(vec!["42", "ban"]));
/// assert_eq!(pattern.captures("/users/42"), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Compiles `pattern`. Segments starting with `:` become captures.
    pub fn compile(pattern: &str) -> Self {
        let segments = pattern
            .split('/')
            .map(|s| match s.strip_prefix(':') {
                Some(name) if !name.is_empty() => Segment::Capture,
                _ => Segment::Static(s.to_owned()),
            })
            .collect();
        Self { segments }
    }

    /// Returns the number of capture segments.
    pub fn capture_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Capture))
            .count()
    }

    /// Matches `path`, returning the captured values in order.
    pub fn captures<'p>(&self, path: &'p str) -> Option<Vec<&'p str>> {
        let mut parts = path.split('/');
        let mut captured = Vec::with_capacity(self.capture_count());

        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Static(literal) => {
                    if literal != part {
                        return None;
                    }
                }
                Segment::Capture => {
                    if part.is_empty() {
                        return None;
                    }
                    captured.push(part);
                }
            }
        }

        if parts.next().is_some() {
            return None;
        }
        Some(captured)
    }
}

// A registered pattern route.
struct PatternRoute<H> {
    method: Method,
    pattern: PathPattern,
    handler: H,
}

/// HTTP request router.
///
/// Built once before serving and read-only afterwards.
///
/// # Examples
///
/// ```
/// use wirehttp::http::{Method, Request, Response, StatusCode};
/// use wirehttp::router::Router;
///
/// let mut router = Router::new();
/// router.register_callback(Method::Get, "/ping", |_req, resp| {
///     resp.set_status(StatusCode::Ok);
///     resp.set_body("pong");
/// });
/// router.register_pattern_callback(Method::Get, "/users/:id", |req, resp| {
///     resp.set_status(StatusCode::Ok);
///     resp.set_body(req.path_param("param1").unwrap_or_default().to_owned());
/// });
/// assert_eq!(router.len(), 2);
/// ```
#[derive(Default)]
pub struct Router {
    handlers: HashMap<RouteKey, Arc<dyn RouteHandler>>,
    callbacks: HashMap<RouteKey, HandlerCallback>,
    pattern_handlers: Vec<PatternRoute<Arc<dyn RouteHandler>>>,
    pattern_callbacks: Vec<PatternRoute<HandlerCallback>>,
}

impl Router {
    /// Creates a router with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an exact route for either handler shape.
    pub fn register(&mut self, method: Method, path: &str, handler: Handler) {
        match handler {
            Handler::Object(h) => {
                self.handlers.insert(RouteKey::new(method, path), h);
            }
            Handler::Callback(cb) => {
                self.callbacks.insert(RouteKey::new(method, path), cb);
            }
        }
    }

    /// Registers a pattern route for either handler shape.
    pub fn register_pattern(&mut self, method: Method, pattern: &str, handler: Handler) {
        let pattern = PathPattern::compile(pattern);
        match handler {
            Handler::Object(handler) => self.pattern_handlers.push(PatternRoute {
                method,
                pattern,
                handler,
            }),
            Handler::Callback(handler) => self.pattern_callbacks.push(PatternRoute {
                method,
                pattern,
                handler,
            }),
        }
    }

    /// Registers an exact-match object handler. Re-registering a key replaces it.
    pub fn register_handler(
        &mut self,
        method: Method,
        path: &str,
        handler: impl RouteHandler + 'static,
    ) {
        self.register(method, path, Handler::object(handler));
    }

    /// Registers an exact-match callback. Re-registering a key replaces it.
    pub fn register_callback<F>(&mut self, method: Method, path: &str, callback: F)
    where
        F: Fn(&Request, &mut Response) + Send + Sync + 'static,
    {
        self.register(method, path, Handler::callback(callback));
    }

    /// Registers a pattern object handler, e.g. `/users/:id`.
    pub fn register_pattern_handler(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl RouteHandler + 'static,
    ) {
        self.register_pattern(method, pattern, Handler::object(handler));
    }

    /// Registers a pattern callback, e.g. `/users/:id`.
    pub fn register_pattern_callback<F>(&mut self, method: Method, pattern: &str, callback: F)
    where
        F: Fn(&Request, &mut Response) + Send + Sync + 'static,
    {
        self.register_pattern(method, pattern, Handler::callback(callback));
    }

    /// Returns the total number of registered routes.
    pub fn len(&self) -> usize {
        self.handlers.len()
            + self.callbacks.len()
            + self.pattern_handlers.len()
            + self.pattern_callbacks.len()
    }

    /// Returns `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatches `request` to the first matching handler.
    ///
    /// Pattern captures are written into the request's path parameters as
    /// `param1`, `param2`, … before the handler runs. Returns `false` without
    /// touching `response` when nothing matches.
    pub fn dispatch(&self, request: &mut Request, response: &mut Response) -> bool {
        let key = RouteKey::new(request.method(), request.path());

        if let Some(handler) = self.handlers.get(&key) {
            trace!(method = %key.method, path = %key.path, "exact handler matched");
            handler.handle(request, response);
            return true;
        }

        if let Some(callback) = self.callbacks.get(&key) {
            trace!(method = %key.method, path = %key.path, "exact callback matched");
            callback(request, response);
            return true;
        }

        if let Some(handler) = match_pattern(&self.pattern_handlers, request) {
            handler.handle(request, response);
            return true;
        }

        if let Some(callback) = match_pattern(&self.pattern_callbacks, request) {
            callback(request, response);
            return true;
        }

        false
    }
}

// Finds the first pattern route for the request's method and path, storing
// its captures on the request.
fn match_pattern<'r, H>(routes: &'r [PatternRoute<H>], request: &mut Request) -> Option<&'r H> {
    let method = request.method();
    let (route, captures) = routes.iter().find_map(|route| {
        if route.method != method {
            return None;
        }
        route
            .pattern
            .captures(request.path())
            .map(|c| (route, c.into_iter().map(str::to_owned).collect::<Vec<_>>()))
    })?;

    trace!(method = %method, path = %request.path(), "pattern route matched");
    for (i, value) in captures.into_iter().enumerate() {
        request.set_path_param(format!("param{}", i + 1), value);
    }
    Some(&route.handler)
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use bytes::BytesMut;

    use super::*;
    use crate::http::{RequestParser, StatusCode};

    fn make_request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(raw.as_bytes());
        parser.parse(&mut buf, SystemTime::now()).unwrap();
        parser.take_request()
    }

    fn route(router: &Router, method: &str, path: &str) -> (bool, Request, Response) {
        let mut request = make_request(method, path);
        let mut response = Response::default();
        let handled = router.dispatch(&mut request, &mut response);
        (handled, request, response)
    }

    fn respond_with(status: StatusCode) -> impl Fn(&Request, &mut Response) + Send + Sync {
        move |_req, resp| resp.set_status(status)
    }

    struct Fixed(StatusCode);

    impl RouteHandler for Fixed {
        fn handle(&self, _request: &Request, response: &mut Response) {
            response.set_status(self.0);
        }
    }

    // ── PathPattern ───────────────────────────────────────────────────────────

    #[test]
    fn pattern_literal_only() {
        let pat = PathPattern::compile("/users");
        assert_eq!(pat.captures("/users"), Some(vec![]));
        assert_eq!(pat.captures("/posts"), None);
        assert_eq!(pat.capture_count(), 0);
    }

    #[test]
    fn pattern_extracts_in_order() {
        let pat = PathPattern::compile("/users/:id/posts/:post_id");
        assert_eq!(pat.capture_count(), 2);
        assert_eq!(pat.captures("/users/7/posts/99"), Some(vec!["7", "99"]));
    }

    #[test]
    fn pattern_is_anchored_both_ends() {
        let pat = PathPattern::compile("/users/:id");
        assert_eq!(pat.captures("/users"), None);
        assert_eq!(pat.captures("/users/42/extra"), None);
        assert_eq!(pat.captures("/users/42/"), None);
        assert_eq!(pat.captures("/api/users/42"), None);
    }

    #[test]
    fn pattern_capture_needs_non_empty_segment() {
        let pat = PathPattern::compile("/users/:id");
        assert_eq!(pat.captures("/users/"), None);
    }

    #[test]
    fn pattern_wrong_static_segment() {
        let pat = PathPattern::compile("/users/:id");
        assert_eq!(pat.captures("/posts/42"), None);
    }

    // ── Router ────────────────────────────────────────────────────────────────

    #[test]
    fn router_starts_empty() {
        let router = Router::new();
        assert!(router.is_empty());
        assert_eq!(router.len(), 0);
    }

    #[test]
    fn empty_router_reports_unhandled() {
        let router = Router::new();
        let (handled, _, response) = route(&router, "GET", "/");
        assert!(!handled);
        assert_eq!(response.status(), StatusCode::Unknown);
    }

    #[test]
    fn exact_callback_matches_method_and_path() {
        let mut router = Router::new();
        router.register_callback(Method::Get, "/hello", respond_with(StatusCode::Ok));

        let (handled, _, response) = route(&router, "GET", "/hello");
        assert!(handled);
        assert_eq!(response.status(), StatusCode::Ok);

        assert!(!route(&router, "POST", "/hello").0);
        assert!(!route(&router, "GET", "/world").0);
    }

    #[test]
    fn exact_route_beats_pattern_route() {
        let mut router = Router::new();
        router.register_pattern_callback(Method::Get, "/:x", respond_with(StatusCode::Accepted));
        router.register_callback(Method::Get, "/a", respond_with(StatusCode::Ok));

        let (_, request, response) = route(&router, "GET", "/a");
        assert_eq!(response.status(), StatusCode::Ok);
        assert!(request.path_params().is_empty());

        let (_, request, response) = route(&router, "GET", "/b");
        assert_eq!(response.status(), StatusCode::Accepted);
        assert_eq!(request.path_param("param1"), Some("b"));
    }

    #[test]
    fn object_handlers_beat_callbacks() {
        let mut router = Router::new();
        router.register_callback(Method::Get, "/same", respond_with(StatusCode::Accepted));
        router.register_handler(Method::Get, "/same", Fixed(StatusCode::Ok));
        router.register_pattern_callback(Method::Get, "/p/:id", respond_with(StatusCode::Accepted));
        router.register_pattern_handler(Method::Get, "/p/:id", Fixed(StatusCode::Created));

        assert_eq!(route(&router, "GET", "/same").2.status(), StatusCode::Ok);
        assert_eq!(route(&router, "GET", "/p/1").2.status(), StatusCode::Created);
    }

    #[test]
    fn path_params_use_positional_keys() {
        let mut router = Router::new();
        router.register_pattern_callback(Method::Post, "/users/:id/:action", |req, resp| {
            resp.set_status(StatusCode::Ok);
            resp.set_body(format!(
                "{}-{}",
                req.path_param("param1").unwrap_or(""),
                req.path_param("param2").unwrap_or("")
            ));
        });

        let mut request = {
            let mut parser = RequestParser::new();
            let mut buf =
                BytesMut::from(&b"POST /users/42/ban HTTP/1.1\r\nContent-Length: 0\r\n\r\n"[..]);
            parser.parse(&mut buf, SystemTime::now()).unwrap();
            parser.take_request()
        };
        let mut response = Response::default();
        assert!(router.dispatch(&mut request, &mut response));
        assert_eq!(request.path_param("param1"), Some("42"));
        assert_eq!(request.path_param("param2"), Some("ban"));
        assert_eq!(response.body_bytes(), b"42-ban");
    }

    #[test]
    fn first_registered_pattern_wins() {
        let mut router = Router::new();
        router.register_pattern_callback(Method::Get, "/files/:name", respond_with(StatusCode::Ok));
        router.register_pattern_callback(Method::Get, "/:dir/:name", respond_with(StatusCode::Accepted));

        assert_eq!(route(&router, "GET", "/files/a").2.status(), StatusCode::Ok);
        assert_eq!(route(&router, "GET", "/docs/a").2.status(), StatusCode::Accepted);
    }

    #[test]
    fn pattern_method_must_match() {
        let mut router = Router::new();
        router.register_pattern_callback(Method::Delete, "/items/:id", respond_with(StatusCode::NoContent));
        assert!(!route(&router, "GET", "/items/3").0);
        assert!(route(&router, "DELETE", "/items/3").0);
    }

    #[test]
    fn reregistering_exact_route_replaces_it() {
        let mut router = Router::new();
        router.register_callback(Method::Get, "/v", respond_with(StatusCode::Ok));
        router.register_callback(Method::Get, "/v", respond_with(StatusCode::Accepted));
        assert_eq!(router.len(), 1);
        assert_eq!(route(&router, "GET", "/v").2.status(), StatusCode::Accepted);
    }
}
