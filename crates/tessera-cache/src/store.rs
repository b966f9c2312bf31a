//! Key/value store abstraction consumed by [`StateCache`](crate::StateCache).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CacheResult;
use crate::pipeline::{Pipeline, PipelineReply};

/// Read counters reported by a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub hits: u64,
    pub misses: u64,
}

impl StoreStats {
    /// Fraction of reads that found a value, 0.0 when nothing was read.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Primitive operations the runtime needs from a shared key/value service.
///
/// Implementations must give at least read-your-writes consistency per key.
/// Patterns use Redis glob syntax (`*`, `?`, `[abc]`).
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Set a string value, replacing any previous value and TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> CacheResult<u64>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Remaining time to live; `None` for missing keys and keys without expiry.
    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>>;

    /// Set a TTL on an existing key. Returns false if the key is missing.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// Keys matching a glob pattern.
    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>>;

    async fn sadd(&self, key: &str, members: &[String]) -> CacheResult<u64>;

    async fn srem(&self, key: &str, members: &[String]) -> CacheResult<u64>;

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>>;

    /// Run a batch in one round trip.
    async fn execute(&self, pipeline: Pipeline) -> CacheResult<Vec<PipelineReply>>;

    async fn stats(&self) -> CacheResult<StoreStats>;

    async fn ping(&self) -> CacheResult<()>;
}

/// Backslash-escape glob metacharacters so `text` matches only itself.
pub(crate) fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Redis-style glob match over bytes.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let p = pattern.as_bytes();
    let t = text.as_bytes();
    let (mut pi, mut ti) = (0usize, 0usize);
    // Backtrack point for the most recent '*'
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() {
            match p[pi] {
                b'*' => {
                    star = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                b'?' => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                b'[' => {
                    if let Some((matched, next)) = match_class(p, pi, t[ti])
                        && matched
                    {
                        pi = next;
                        ti += 1;
                        continue;
                    }
                }
                b'\\' if pi + 1 < p.len() => {
                    if p[pi + 1] == t[ti] {
                        pi += 2;
                        ti += 1;
                        continue;
                    }
                }
                c if c == t[ti] => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                _ => {}
            }
        }
        match star {
            Some((sp, st)) => {
                pi = sp + 1;
                ti = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }

    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

/// Match `c` against the `[...]` class starting at `start`. Returns whether it
/// matched and the index just past the class, or `None` if the class is unterminated.
fn match_class(p: &[u8], start: usize, c: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = i < p.len() && p[i] == b'^';
    if negate {
        i += 1;
    }
    let mut matched = false;
    while i < p.len() && p[i] != b']' {
        if i + 2 < p.len() && p[i + 1] == b'-' && p[i + 2] != b']' {
            if p[i] <= c && c <= p[i + 2] {
                matched = true;
            }
            i += 3;
        } else {
            if p[i] == c {
                matched = true;
            }
            i += 1;
        }
    }
    if i >= p.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("acp:*", "acp:agents:status:a", true)]
    #[case("acp:agents:status:*", "acp:agents:heartbeat:a", false)]
    #[case("acp:workflows:steps:wf-1:*", "acp:workflows:steps:wf-1:s1", true)]
    #[case("acp:workflows:steps:wf-1:*", "acp:workflows:steps:wf-10:s1", false)]
    #[case("a?c", "abc", true)]
    #[case("a?c", "ac", false)]
    #[case("h[ae]llo", "hello", true)]
    #[case("h[^e]llo", "hello", false)]
    #[case("h[a-c]llo", "hbllo", true)]
    #[case("*", "", true)]
    #[case("exact", "exact", true)]
    #[case("exact", "exactly", false)]
    #[case("a\\*b", "a*b", true)]
    fn glob_cases(#[case] pattern: &str, #[case] text: &str, #[case] expected: bool) {
        assert_eq!(glob_match(pattern, text), expected, "{pattern} vs {text}");
    }

    #[rstest]
    #[case("wf*", "wf1", false)]
    #[case("wf*", "wf*", true)]
    #[case("wf?", "wfx", false)]
    #[case("wf[1]", "wf1", false)]
    #[case("wf[1]", "wf[1]", true)]
    #[case("a\\b", "a\\b", true)]
    fn escaped_ids_match_literally(#[case] id: &str, #[case] key: &str, #[case] expected: bool) {
        let pattern = format!("{}:*", escape_glob(id));
        assert_eq!(glob_match(&pattern, &format!("{key}:s1")), expected, "{pattern} vs {key}");
    }

    #[test]
    fn test_hit_ratio() {
        assert_eq!(StoreStats::default().hit_ratio(), 0.0);
        let stats = StoreStats { hits: 3, misses: 1 };
        assert!((stats.hit_ratio() - 0.75).abs() < f64::EPSILON);
    }
}
