//! Agent identity, shared-secret token and liveness bookkeeping.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

/// Shared secret the control plane presents on every request.
#[derive(Clone, PartialEq, Eq)]
pub struct AgentToken(String);

impl AgentToken {
    /// Generate a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        let seed = Uuid::new_v4();
        Self(blake3::hash(seed.as_bytes()).to_hex().to_string())
    }

    /// Wrap an existing token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare a presented token in constant time.
    #[must_use]
    pub fn matches(&self, presented: &str) -> bool {
        // blake3::Hash equality is constant-time.
        blake3::hash(self.0.as_bytes()) == blake3::hash(presented.as_bytes())
    }
}

impl fmt::Debug for AgentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AgentToken(..)")
    }
}

/// Health as reported on the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// The control plane answered recently.
    Ok,
    /// The control plane has not answered within the threshold.
    Bad,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("OK"),
            Self::Bad => f.write_str("BAD"),
        }
    }
}

/// What the agent advertises to the control plane, plus the time it last
/// heard back.
#[derive(Debug)]
pub struct AgentIdentity {
    hostname: String,
    port: u16,
    token: AgentToken,
    last_contact: RwLock<Option<DateTime<Utc>>>,
}

impl AgentIdentity {
    /// Create an identity that has not contacted the control plane yet.
    #[must_use]
    pub fn new(hostname: impl Into<String>, port: u16, token: AgentToken) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            token,
            last_contact: RwLock::new(None),
        }
    }

    /// Hostname advertised on registration.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// HTTP port advertised on registration.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// The agent's token.
    #[must_use]
    pub const fn token(&self) -> &AgentToken {
        &self.token
    }

    /// Record a successful exchange with the control plane.
    pub fn record_contact(&self, at: DateTime<Utc>) {
        *self.last_contact.write() = Some(at);
    }

    /// Time of the last successful ping.
    #[must_use]
    pub fn last_contact(&self) -> Option<DateTime<Utc>> {
        *self.last_contact.read()
    }

    /// Health now. Never having reached the control plane is `Bad`.
    #[must_use]
    pub fn health(&self, bad_after: Duration) -> Health {
        self.health_at(Utc::now(), bad_after)
    }

    /// Health as of `now`.
    #[must_use]
    pub fn health_at(&self, now: DateTime<Utc>, bad_after: Duration) -> Health {
        let Some(last) = self.last_contact() else {
            return Health::Bad;
        };
        let elapsed = now.signed_duration_since(last).to_std().unwrap_or_default();
        if elapsed > bad_after {
            Health::Bad
        } else {
            Health::Ok
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_hex_and_distinct() {
        let a = AgentToken::generate();
        let b = AgentToken::generate();
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn token_matching() {
        let token = AgentToken::new("s3cret");
        assert!(token.matches("s3cret"));
        assert!(!token.matches("s3cret "));
        assert!(!token.matches(""));
        assert_eq!(format!("{token:?}"), "AgentToken(..)");
    }

    #[test]
    fn health_tracks_last_contact() {
        let identity = AgentIdentity::new("db-1", 3002, AgentToken::new("t"));
        let threshold = Duration::from_secs(300);
        assert_eq!(identity.health(threshold), Health::Bad);

        let now = Utc::now();
        identity.record_contact(now);
        assert_eq!(identity.health_at(now, threshold), Health::Ok);
        assert_eq!(
            identity.health_at(now + chrono::Duration::seconds(299), threshold),
            Health::Ok
        );
        assert_eq!(
            identity.health_at(now + chrono::Duration::seconds(301), threshold),
            Health::Bad
        );
    }

    #[test]
    fn clock_skew_counts_as_fresh() {
        let identity = AgentIdentity::new("db-1", 3002, AgentToken::new("t"));
        let now = Utc::now();
        identity.record_contact(now);
        assert_eq!(
            identity.health_at(now - chrono::Duration::seconds(10), Duration::from_secs(1)),
            Health::Ok
        );
    }
}
