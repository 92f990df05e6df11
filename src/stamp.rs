//! Response ids and creation timestamps.
//!
//! Injected into backends so tests can pin both and compare output bytes.

use uuid::Uuid;

pub trait Stamper: Send + Sync {
    /// A fresh `chatcmpl-…` id.
    fn response_id(&self) -> String;
    /// Current Unix time in seconds.
    fn now(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemStamper;

impl Stamper for SystemStamper {
    fn response_id(&self) -> String {
        format!("chatcmpl-{}", Uuid::new_v4().simple())
    }

    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Parse an RFC 3339 timestamp (as sent by Ollama) into Unix seconds.
pub fn parse_rfc3339(value: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.timestamp())
}

#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct FixedStamper {
    pub id: &'static str,
    pub now: i64,
}

#[cfg(test)]
impl Default for FixedStamper {
    fn default() -> Self {
        Self {
            id: "chatcmpl-fixed",
            now: 1_700_000_000,
        }
    }
}

#[cfg(test)]
impl Stamper for FixedStamper {
    fn response_id(&self) -> String {
        self.id.to_owned()
    }

    fn now(&self) -> i64 {
        self.now
    }
}
