//! Identity issued by the relay at registration.

use std::fmt;

use unblink_common::protocol::Registered;

/// Characters of the key that may appear in diagnostics.
const KEY_PREFIX_LEN: usize = 16;

/// Bearer secret sent as `X-Worker-Key` on every fetch and emit.
///
/// `Debug` and `Display` show only a bounded prefix.
#[derive(Clone, PartialEq, Eq)]
pub struct WorkerKey(String);

impl WorkerKey {
    pub fn new(key: impl Into<String>) -> Self {
        WorkerKey(key.into())
    }

    /// The full secret, for request headers only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(KEY_PREFIX_LEN).collect();
        format!("{prefix}...")
    }
}

impl fmt::Debug for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkerKey({})", self.redacted())
    }
}

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Immutable result of a successful registration.
///
/// Produced once per connection and shared read-only with every batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub worker_id: String,
    pub key: WorkerKey,
}

impl From<Registered> for Credentials {
    fn from(r: Registered) -> Self {
        Credentials {
            worker_id: r.worker_id,
            key: WorkerKey::new(r.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_redacted() {
        let key = WorkerKey::new("0123456789abcdef0123456789abcdef");
        assert_eq!(key.to_string(), "0123456789abcdef...");
        assert!(!format!("{key:?}").contains("0123456789abcdef0"));
        assert_eq!(key.expose().len(), 32);
    }

    #[test]
    fn test_short_key() {
        assert_eq!(WorkerKey::new("abc").to_string(), "abc...");
    }

    #[test]
    fn test_credentials_debug_hides_key() {
        let creds = Credentials::from(Registered {
            worker_id: "w-1".into(),
            key: "k".repeat(64),
        });
        let dbg = format!("{creds:?}");
        assert!(dbg.contains("w-1"));
        assert!(!dbg.contains(&"k".repeat(17)));
    }
}
