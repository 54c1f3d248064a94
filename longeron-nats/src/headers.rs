//! Message headers.
//!
//! A small ordered multi-map carried on publishes and inbound messages,
//! encoded on the wire as a `NATS/1.0` header block.

use bytes::{BufMut, Bytes, BytesMut};

use crate::proto::ProtoError;

const HEADER_VERSION: &str = "NATS/1.0";
const CRLF: &[u8] = b"\r\n";

/// Ordered multi-map of header names to values.
///
/// Insertion order is preserved; a name may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// Create an empty header map.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append a header entry, keeping any existing values for the name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace all values for `name` with a single value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries.retain(|(n, _)| n != &name);
        self.entries.push((name, value.into()));
    }

    /// First value for `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name` in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over all entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encoded size of the header block in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let mut len = HEADER_VERSION.len() + 2 + 2; // version line + final CRLF
        for (name, value) in &self.entries {
            len += name.len() + 2 + value.len() + 2; // "name: value\r\n"
        }
        len
    }

    /// Write the header block including the version line and terminating
    /// blank line.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(HEADER_VERSION.as_bytes());
        buf.put_slice(CRLF);
        for (name, value) in &self.entries {
            buf.put_slice(name.as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(CRLF);
        }
        buf.put_slice(CRLF);
    }

    /// Parse a header block as produced by [`HeaderMap::encode`].
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the version line is missing or an entry
    /// has no `:` separator.
    pub fn parse(block: &Bytes) -> Result<Self, ProtoError> {
        let text = std::str::from_utf8(block)
            .map_err(|_| ProtoError::BadHeaders("header block is not UTF-8".into()))?;

        let mut lines = text.split("\r\n");
        let version = lines
            .next()
            .ok_or_else(|| ProtoError::BadHeaders("empty header block".into()))?;
        if !version.starts_with(HEADER_VERSION) {
            return Err(ProtoError::BadHeaders(format!(
                "unexpected header version line '{version}'"
            )));
        }

        let mut map = Self::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ProtoError::BadHeaders(format!("malformed header '{line}'")))?;
            map.append(name.trim(), value.trim());
        }
        Ok(map)
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (n, v) in iter {
            map.append(n, v);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_append_accumulates() {
        let mut h = HeaderMap::new();
        h.append("Trace-Id", "a");
        h.append("Trace-Id", "b");
        assert_eq!(h.get_all("Trace-Id").collect::<Vec<_>>(), ["a", "b"]);

        h.insert("Trace-Id", "c");
        assert_eq!(h.get_all("Trace-Id").collect::<Vec<_>>(), ["c"]);
    }

    #[test]
    fn encode_parse_round_trip() {
        let mut h = HeaderMap::new();
        h.append("Content-Type", "application/json");
        h.append("Retry", "1");

        let mut buf = BytesMut::new();
        h.encode(&mut buf);
        assert_eq!(buf.len(), h.encoded_len());

        let parsed = HeaderMap::parse(&buf.freeze()).unwrap();
        assert_eq!(parsed, h);
    }

    #[test]
    fn rejects_block_without_version_line() {
        let block = Bytes::from_static(b"Key: value\r\n\r\n");
        assert!(HeaderMap::parse(&block).is_err());
    }
}
