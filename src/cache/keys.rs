//! Cache key definitions
//!
//! Keys are plain strings of `:`-separated segments. Invalidation targets may
//! carry glob wildcards (`*` any run, `?` one character), matching the
//! semantics of the shared store's `KEYS` command.

use sha2::{Digest, Sha256};
use std::fmt;

/// Cache key for an upstream call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Key namespace (e.g. "account", "tokenProperties")
    pub namespace: String,
    /// Remaining segments, in order
    pub segments: Vec<String>,
}

impl CacheKey {
    /// Create a key from a namespace and identifying segments
    pub fn new<S: AsRef<str>>(namespace: &str, segments: &[S]) -> Self {
        Self {
            namespace: namespace.to_string(),
            segments: segments.iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }

    /// Create a key whose last segment is a short hash of serialized arguments
    pub fn hashed(namespace: &str, fn_name: &str, args: &str) -> Self {
        // Hash the args for a shorter key
        let args_hash = if args.is_empty() {
            "empty".to_string()
        } else {
            let mut hasher = Sha256::new();
            hasher.update(args.as_bytes());
            let hash = hasher.finalize();
            hex::encode(&hash[..8]) // First 8 bytes = 16 hex chars
        };

        Self::new(namespace, &[fn_name, args_hash.as_str()])
    }

    /// Convert to storage key string
    pub fn to_storage_key(&self) -> String {
        let mut key = self.namespace.clone();
        for segment in &self.segments {
            key.push(':');
            key.push_str(segment);
        }
        key
    }

    /// Pattern matching every key under a namespace prefix
    pub fn prefix_pattern<S: AsRef<str>>(namespace: &str, segments: &[S]) -> String {
        let mut pattern = Self::new(namespace, segments).to_storage_key();
        pattern.push('*');
        pattern
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_storage_key())
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.to_storage_key()
    }
}

/// Whether a key is a glob pattern rather than a concrete key.
/// Backslash-escaped wildcards are literal.
pub fn is_pattern(key: &str) -> bool {
    let mut chars = key.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '*' | '?' => return true,
            _ => {}
        }
    }
    false
}

/// Escape glob metacharacters so `text` matches only itself
pub fn escape_glob(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Glob match with `*` and `?` wildcards and `\` escapes, as Redis `KEYS`
/// interprets them
pub fn matches_pattern(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();

    let (mut p, mut k) = (0, 0);
    // Last `*` seen in the pattern and the key position it was tried at
    let mut backtrack: Option<(usize, usize)> = None;

    while k < key.len() {
        let step = match pattern.get(p) {
            Some('\\') if p + 1 < pattern.len() => (pattern[p + 1] == key[k]).then_some(2),
            Some('?') => Some(1),
            Some('*') => {
                backtrack = Some((p, k));
                p += 1;
                continue;
            }
            Some(c) => (*c == key[k]).then_some(1),
            None => None,
        };

        if let Some(width) = step {
            p += width;
            k += 1;
        } else if let Some((star_p, star_k)) = backtrack {
            p = star_p + 1;
            k = star_k + 1;
            backtrack = Some((star_p, star_k + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}
