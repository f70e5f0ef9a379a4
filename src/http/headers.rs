//! Ordered, case-insensitive, multi-valued header collection.
//!
//! Names keep the spelling they were first inserted with; lookups ignore
//! ASCII case. Serialization walks names in insertion order and writes every
//! value of a name before moving to the next one.

use std::fmt;

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// A collection of HTTP style headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    entries: Vec<(String, Vec<String>)>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    /// Append a value, keeping any existing values for the name.
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.get_all_mut(name).push(value.into());
    }

    /// Replace every value of `name` with a single value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let values = self.get_all_mut(name);
        values.clear();
        values.push(value.into());
    }

    /// First value of `name`, or `""` when absent.
    pub fn get(&self, name: &str) -> &str {
        self.get_all(name).first().map(String::as_str).unwrap_or("")
    }

    /// All values of `name` in insertion order.
    pub fn get_all(&self, name: &str) -> &[String] {
        match self.position(name) {
            Some(i) => &self.entries[i].1,
            None => &[],
        }
    }

    /// Mutable access to the values of `name`.
    ///
    /// Inserts an empty entry when the name is absent. Empty entries are
    /// invisible to [`contains`](Self::contains) and serialize to nothing.
    pub fn get_all_mut(&mut self, name: &str) -> &mut Vec<String> {
        let index = match self.position(name) {
            Some(i) => i,
            None => {
                self.entries.push((name.to_string(), Vec::new()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index].1
    }

    /// True when `name` has at least one value.
    pub fn contains(&self, name: &str) -> bool {
        !self.get_all(name).is_empty()
    }

    /// Remove `name` and all of its values.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    }

    /// Names present in the collection, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(key, _)| key.as_str())
    }

    /// Every `(name, value)` pair in serialization order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().flat_map(|(key, values)| {
            values.iter().map(move |value| (key.as_str(), value.as_str()))
        })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.keys().next().is_none()
    }

    /// True when the comma-separated values of `name` contain `token`, ignoring case.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .iter()
            .flat_map(|value| value.split(','))
            .any(|part| part.trim().eq_ignore_ascii_case(token))
    }

    /// Serialize to `Name: value\r\n` lines.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, value) in self.iter() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out
    }

    /// Write the headers out to a stream (no terminating blank line).
    pub async fn write_to<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.to_wire()).await
    }
}

impl fmt::Display for HeaderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Headers")?;
        for name in self.keys() {
            write!(f, " {}:{}", name, self.get_all(name).join(", "))?;
        }
        write!(f, "]")
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for HeaderSet {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut headers = HeaderSet::new();
        for (name, value) in iter {
            headers.add(name, value);
        }
        headers
    }
}
