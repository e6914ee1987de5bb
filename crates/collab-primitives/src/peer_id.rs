use core::fmt;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A session participant identifier.
///
/// Ordering is lexicographic byte order on the inner string, which is what
/// the initiator-uniqueness rule in the peer connection manager relies on:
/// for any pair, the side holding the smaller [`PeerId`] initiates.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    /// Generates a fresh random peer id, used when a session is constructed
    /// without an explicit `peerId`.
    #[must_use]
    pub fn random() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        Self(suffix.to_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First six characters, used to derive the default display name
    /// (`"User-<first 6 of peerId>"`).
    #[must_use]
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(6).map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_lexicographic() {
        let a = PeerId::from("aaaa");
        let b = PeerId::from("bbbb");
        assert!(a < b);
    }

    #[test]
    fn short_handles_unicode_without_panicking() {
        let id = PeerId::from("abc");
        assert_eq!(id.short(), "abc");
    }

    #[test]
    fn random_ids_are_distinct() {
        assert_ne!(PeerId::random(), PeerId::random());
    }
}
