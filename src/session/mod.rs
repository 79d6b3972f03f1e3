//! Cookie-keyed sessions — a key/value store with expiry behind a pluggable
//! storage backend.
//!
//! Sessions are plain values. A handler asks the [`SessionManager`] for the
//! session belonging to a request, mutates its copy, and hands it back with
//! [`SessionManager::update_session`]. Nothing holds a reference to a live
//! session; the id is the handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::http::{Request, Response};

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "sessionId";

/// Default session lifetime.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(3600);

/// A single session: an id, string key/value pairs and an expiry instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: String,
    data: HashMap<String, String>,
    max_age: Duration,
    expires_at: Instant,
}

impl Session {
    /// Creates an empty session that expires `max_age` from now.
    pub fn new(id: impl Into<String>, max_age: Duration) -> Self {
        Self {
            id: id.into(),
            data: HashMap::new(),
            max_age,
            expires_at: Instant::now() + max_age,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), value.into());
    }

    /// Removes `key`, returning its value if it was present.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.data.remove(key)
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Returns `true` if the session is expired as of `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Pushes the expiry `max_age` past the current time.
    pub fn refresh(&mut self) {
        self.expires_at = Instant::now() + self.max_age;
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }
}

/// Storage backend for sessions.
///
/// Implementations are shared by every connection task and must be
/// internally synchronized.
pub trait SessionStorage: Send + Sync {
    /// Inserts or replaces the session stored under its id.
    fn save(&self, session: Session);

    /// Returns a live session by id. Expired sessions are not returned.
    fn load(&self, id: &str) -> Option<Session>;

    /// Deletes a session, returning whether it existed.
    fn remove(&self, id: &str) -> bool;

    /// Deletes every expired session, returning how many were dropped.
    fn remove_expired(&self) -> usize;
}

/// Process-local [`SessionStorage`] backed by a mutex-guarded map.
#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored sessions, expired ones included.
    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStorage for MemorySessionStorage {
    fn save(&self, session: Session) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id.clone(), session);
    }

    fn load(&self, id: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        match sessions.get(id) {
            Some(session) if session.is_expired() => {
                sessions.remove(id);
                None
            }
            Some(session) => Some(session.clone()),
            None => None,
        }
    }

    fn remove(&self, id: &str) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired_at(now));
        before - sessions.len()
    }
}

/// Issues, looks up and expires sessions for requests.
///
/// Each manager owns its own random generator for session ids.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use wirehttp::http::{Request, Response, StatusCode};
/// use wirehttp::session::{MemorySessionStorage, SessionManager};
///
/// let sessions = SessionManager::new(Arc::new(MemorySessionStorage::new()), Duration::from_secs(60));
///
/// let request = Request::new();
/// let mut response = Response::new(StatusCode::Ok);
/// let mut session = sessions.get_session(&request, &mut response);
/// assert_eq!(session.id().len(), 32);
/// assert!(response.headers().get("Set-Cookie").unwrap().starts_with("sessionId="));
///
/// session.set("user", "ada");
/// sessions.update_session(&session);
/// ```
pub struct SessionManager {
    storage: Arc<dyn SessionStorage>,
    rng: Mutex<StdRng>,
    max_age: Duration,
}

impl SessionManager {
    /// Creates a manager whose id generator is seeded from OS entropy.
    pub fn new(storage: Arc<dyn SessionStorage>, max_age: Duration) -> Self {
        Self::with_rng(storage, max_age, StdRng::from_entropy())
    }

    /// Creates a manager with a deterministic id sequence.
    pub fn with_seed(storage: Arc<dyn SessionStorage>, max_age: Duration, seed: u64) -> Self {
        Self::with_rng(storage, max_age, StdRng::seed_from_u64(seed))
    }

    fn with_rng(storage: Arc<dyn SessionStorage>, max_age: Duration, rng: StdRng) -> Self {
        Self {
            storage,
            rng: Mutex::new(rng),
            max_age,
        }
    }

    /// Returns the configured session lifetime.
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Returns the session named by the request's `sessionId` cookie, or
    /// issues a new one.
    ///
    /// A live session has its expiry refreshed. A missing, unknown or expired
    /// session is replaced by a fresh one, which is stored immediately and
    /// announced with `Set-Cookie: sessionId=<id>; Path=/; HttpOnly`.
    pub fn get_session(&self, request: &Request, response: &mut Response) -> Session {
        if let Some(id) = request.header("Cookie").and_then(session_id_from_cookie) {
            if let Some(mut session) = self.storage.load(id) {
                session.refresh();
                self.storage.save(session.clone());
                return session;
            }
            debug!(session = %id, "session unknown or expired; issuing a new one");
        }

        let session = Session::new(self.generate_id(), self.max_age);
        self.storage.save(session.clone());
        response.add_header(
            "Set-Cookie",
            format!("{SESSION_COOKIE}={}; Path=/; HttpOnly", session.id()),
        );
        debug!(session = %session.id(), "session issued");
        session
    }

    /// Stores the caller's modified copy of a session.
    pub fn update_session(&self, session: &Session) {
        self.storage.save(session.clone());
    }

    /// Deletes a session by id.
    pub fn destroy_session(&self, id: &str) -> bool {
        self.storage.remove(id)
    }

    /// Drops every expired session from storage.
    pub fn clean_expired(&self) -> usize {
        let removed = self.storage.remove_expired();
        if removed > 0 {
            debug!(removed, "expired sessions removed");
        }
        removed
    }

    fn generate_id(&self) -> String {
        let mut bytes = [0u8; 16];
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fill(&mut bytes);
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

/// Extracts the `sessionId` value from a `Cookie` header.
pub fn session_id_from_cookie(cookie: &str) -> Option<&str> {
    cookie
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use bytes::BytesMut;

    use super::*;
    use crate::http::{RequestParser, StatusCode};

    fn manager(max_age: Duration) -> (Arc<MemorySessionStorage>, SessionManager) {
        let storage = Arc::new(MemorySessionStorage::new());
        let manager = SessionManager::with_seed(storage.clone(), max_age, 7);
        (storage, manager)
    }

    fn request_with_cookie(cookie: &str) -> Request {
        let raw = format!("GET / HTTP/1.1\r\nCookie: {cookie}\r\n\r\n");
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(raw.as_bytes());
        parser.parse(&mut buf, SystemTime::now()).unwrap();
        parser.take_request()
    }

    #[test]
    fn cookie_parsing() {
        assert_eq!(session_id_from_cookie("sessionId=abc"), Some("abc"));
        assert_eq!(
            session_id_from_cookie("theme=dark; sessionId=abc; lang=en"),
            Some("abc")
        );
        assert_eq!(session_id_from_cookie("theme=dark"), None);
        assert_eq!(session_id_from_cookie("sessionId="), None);
    }

    #[test]
    fn new_session_sets_cookie_with_hex_id() {
        let (storage, sessions) = manager(DEFAULT_MAX_AGE);
        let mut response = Response::new(StatusCode::Ok);
        let session = sessions.get_session(&Request::new(), &mut response);

        assert_eq!(session.id().len(), 32);
        assert!(session.id().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(
            response.headers().get("Set-Cookie"),
            Some(format!("sessionId={}; Path=/; HttpOnly", session.id()).as_str())
        );
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn existing_session_is_returned_without_new_cookie() {
        let (_, sessions) = manager(DEFAULT_MAX_AGE);
        let mut first = sessions.get_session(&Request::new(), &mut Response::new(StatusCode::Ok));
        first.set("user", "ada");
        sessions.update_session(&first);

        let mut response = Response::new(StatusCode::Ok);
        let request = request_with_cookie(&format!("sessionId={}", first.id()));
        let again = sessions.get_session(&request, &mut response);

        assert_eq!(again.id(), first.id());
        assert_eq!(again.get("user"), Some("ada"));
        assert!(!response.headers().contains("Set-Cookie"));
    }

    #[test]
    fn unknown_id_gets_fresh_session() {
        let (_, sessions) = manager(DEFAULT_MAX_AGE);
        let mut response = Response::new(StatusCode::Ok);
        let session = sessions.get_session(&request_with_cookie("sessionId=nope"), &mut response);
        assert_ne!(session.id(), "nope");
        assert!(response.headers().contains("Set-Cookie"));
    }

    #[test]
    fn seeded_managers_issue_identical_sequences() {
        let (_, a) = manager(DEFAULT_MAX_AGE);
        let (_, b) = manager(DEFAULT_MAX_AGE);
        assert_eq!(a.generate_id(), b.generate_id());
        assert_ne!(a.generate_id(), a.generate_id());
    }

    #[test]
    fn expired_sessions_are_not_loaded_and_are_cleaned() {
        let (storage, sessions) = manager(Duration::ZERO);
        let session = sessions.get_session(&Request::new(), &mut Response::new(StatusCode::Ok));
        assert!(session.is_expired());
        assert!(storage.load(session.id()).is_none());

        sessions.update_session(&session);
        assert_eq!(storage.len(), 1);
        assert_eq!(sessions.clean_expired(), 1);
        assert!(storage.is_empty());
    }

    #[test]
    fn session_values() {
        let mut session = Session::new("id", DEFAULT_MAX_AGE);
        session.set("a", "1");
        session.set("a", "2");
        assert_eq!(session.get("a"), Some("2"));
        assert_eq!(session.remove("a").as_deref(), Some("2"));
        session.set("b", "x");
        session.clear();
        assert!(session.is_empty());
        assert!(!session.is_expired());
    }

    #[test]
    fn destroy_removes_session() {
        let (storage, sessions) = manager(DEFAULT_MAX_AGE);
        let session = sessions.get_session(&Request::new(), &mut Response::new(StatusCode::Ok));
        assert!(sessions.destroy_session(session.id()));
        assert!(!sessions.destroy_session(session.id()));
        assert!(storage.is_empty());
    }
}
