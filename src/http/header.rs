//! Case-insensitive, insertion-order-preserving header table.
//!
//! The teacher never built one of these (its `H1Request` kept headers as a
//! raw `&[u8]` slice of the request buffer and re-scanned on lookup); this
//! is new, grounded on `other_examples`' soketto handshake header handling
//! and on `original_source/src/net/http.c`'s case-insensitive header
//! lookup.

use std::fmt::Write as _;

/// One header name/value pair, in the order it was inserted or parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    name: String,
    value: String,
}

/// A case-insensitive header table that preserves insertion order for
/// serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<Entry>,
}

impl HeaderMap {
    /// Creates an empty header table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `name: value`. A header with the same name (case-insensitive)
    /// is NOT replaced — first-wins, matching the duplicate-header policy
    /// of the map this codec's wire format was designed against. Use
    /// [`HeaderMap::set`] for replace semantics.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if self.get(&name).is_some() {
            return;
        }
        self.entries.push(Entry {
            name,
            value: value.into(),
        });
    }

    /// Inserts `name: value`, replacing an existing same-name header iff
    /// its value differs (a same-value `set` is a no-op, matching the
    /// assembler's idempotent-insert contract).
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(existing) = self.entries.iter_mut().find(|e| e.name.eq_ignore_ascii_case(&name)) {
            if existing.value != value {
                existing.value = value;
            }
            return;
        }
        self.entries.push(Entry { name, value });
    }

    /// Looks up a header value by case-insensitive name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .map(|e| e.value.as_str())
    }

    /// `true` if `name` is present, case-insensitively.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Parses one `name: value` header line (without the trailing CRLF).
    /// Returns `None` if there is no `:`. Leading whitespace on the value
    /// is trimmed; the name is lowercased.
    pub fn parse_line(line: &str) -> Option<(String, String)> {
        let (name, value) = line.split_once(':')?;
        Some((name.trim().to_ascii_lowercase(), value.trim_start().to_string()))
    }

    /// Serializes all headers as `Name: Value\r\n` lines, in insertion
    /// order.
    pub fn write_to(&self, out: &mut String) {
        for entry in &self.entries {
            let _ = write!(out, "{}: {}\r\n", entry.name, entry.value);
        }
    }

    /// Removes all headers without dropping the underlying allocation,
    /// for reuse across `clear()` calls on the owning request/response.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of headers stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if no headers are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", "text/plain");
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
    }

    #[test]
    fn insert_is_first_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Count", "1");
        headers.insert("x-count", "2");
        assert_eq!(headers.get("X-Count"), Some("1"));
    }

    #[test]
    fn set_replaces_only_on_different_value() {
        let mut headers = HeaderMap::new();
        headers.set("X-Count", "1");
        headers.set("X-Count", "1");
        headers.set("X-Count", "2");
        assert_eq!(headers.get("X-Count"), Some("2"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn write_to_preserves_insertion_order() {
        let mut headers = HeaderMap::new();
        headers.insert("B", "2");
        headers.insert("A", "1");
        let mut out = String::new();
        headers.write_to(&mut out);
        assert_eq!(out, "B: 2\r\nA: 1\r\n");
    }

    #[test]
    fn parse_line_trims_value_and_lowercases_name() {
        let (name, value) = HeaderMap::parse_line("Content-Length:   42").unwrap();
        assert_eq!(name, "content-length");
        assert_eq!(value, "42");
    }
}
