use std::fmt;

/// Storage-safe name for a cached URI.
///
/// `/` becomes `_`, so `/200` is stored as `_200`. Any other byte outside `[A-Za-z0-9.-]`
/// (including a literal `_`) is written as `%XX`, which keeps the mapping injective and the
/// result a single path component. Because every cached URI starts with `/`, every key starts
/// with `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

pub(super) const KEY_PREFIX: char = '_';

impl CacheKey {
    pub fn for_uri(uri: &str) -> Self {
        let mut escaped = String::with_capacity(uri.len());
        for byte in uri.bytes() {
            match byte {
                b'/' => escaped.push(KEY_PREFIX),
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'-' => {
                    escaped.push(byte as char)
                }
                other => escaped.push_str(&format!("%{other:02X}")),
            }
        }
        Self(escaped)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when a file name could have been produced by [`CacheKey::for_uri`].
    pub(super) fn looks_like_key(name: &str) -> bool {
        name.starts_with(KEY_PREFIX)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
