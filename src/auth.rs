//! Inbound credential policy.

use std::fmt;

/// How a backend judges the caller's API key.
#[derive(Clone)]
pub enum ApiKeyPolicy {
    /// Only this exact, non-empty key is accepted.
    Secret(String),
    /// Every key, including none, is accepted. Used for keyless local backends.
    AllowAll,
}

impl ApiKeyPolicy {
    pub fn secret(key: impl Into<String>) -> anyhow::Result<Self> {
        let key = key.into();
        anyhow::ensure!(!key.is_empty(), "API key must not be empty");
        Ok(Self::Secret(key))
    }

    /// Compare `candidate` against the configured secret.
    ///
    /// Runtime depends only on the secret's length, never on where the first
    /// mismatching byte sits or on the candidate's length.
    pub fn validate(&self, candidate: &str) -> bool {
        match self {
            Self::AllowAll => true,
            Self::Secret(secret) => constant_time_eq(secret.as_bytes(), candidate.as_bytes()),
        }
    }

    pub fn is_enforced(&self) -> bool {
        matches!(self, Self::Secret(_))
    }
}

impl fmt::Debug for ApiKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secret(_) => f.write_str("Secret(<redacted>)"),
            Self::AllowAll => f.write_str("AllowAll"),
        }
    }
}

fn constant_time_eq(secret: &[u8], candidate: &[u8]) -> bool {
    let mut diff = secret.len() ^ candidate.len();
    for (i, &s) in secret.iter().enumerate() {
        let c = candidate.get(i).copied().unwrap_or(0);
        diff |= usize::from(s ^ c);
    }
    diff == 0
}
