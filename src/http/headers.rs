//! HTTP header map with case-insensitive name lookup.
//!
//! Names keep the case they were received or set with; lookups ignore ASCII
//! case. This is not an exact-name map: `X-Id` and `x-id` are the same header
//! and share one entry. A repeated name overwrites the earlier value, so the
//! last occurrence wins.

use std::fmt;

/// An ordered, case-insensitive HTTP header map.
///
/// [`insert`](Self::insert) replaces any existing entry whose name matches
/// ignoring case, so names that differ only in case never coexist;
/// [`append`](Self::append) keeps repeated fields side by side for the rare
/// header that needs them.
///
/// # Examples
///
/// ```
/// use wirehttp::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Content-Type", "text/html; charset=utf-8");
/// headers.insert("X-Custom", "first");
/// headers.insert("x-custom", "second");
///
/// assert_eq!(headers.get("content-type"), Some("text/html; charset=utf-8"));
/// assert_eq!(headers.get("X-CUSTOM"), Some("second"));
/// assert_eq!(headers.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

fn same_name(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty map with room for `capacity` fields.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| same_name(k, name))
    }

    /// Sets a header, overwriting any existing entry with the same name.
    ///
    /// The stored name takes the case of the most recent insert.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let field = (name.into(), value.into());
        match self.position(&field.0) {
            Some(i) => self.entries[i] = field,
            None => self.entries.push(field),
        }
    }

    /// Adds a field after any existing ones of the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Looks up a value by name, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    /// Every value stored under `name`, in the order they were added.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.iter()
            .filter(move |(k, _)| same_name(k, name))
            .map(|(_, v)| v)
    }

    /// Drops every field called `name`; `false` if there was none.
    pub fn remove(&mut self, name: &str) -> bool {
        let count = self.entries.len();
        self.entries.retain(|(k, _)| !same_name(k, name));
        self.entries.len() != count
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Number of stored fields, counting repeats.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(name, value)` pairs in the order they were first stored.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}
