//! Cache fingerprints
//!
//! A fingerprint is a SHA-256 digest over length-prefixed fields, so that
//! `("ab", "c")` and `("a", "bc")` never collide. Callers feed fields in a
//! fixed order and never iterate maps or sets while building one. Time
//! bounds are bucketed first so requests that differ only by a few seconds
//! share an entry.

use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn builder(kind: &str) -> FingerprintBuilder {
        FingerprintBuilder::new(kind)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    fn new(kind: &str) -> Self {
        let builder = Self {
            hasher: Sha256::new(),
        };
        builder.str(kind)
    }

    pub fn bytes(mut self, field: &[u8]) -> Self {
        self.hasher.update((field.len() as u64).to_le_bytes());
        self.hasher.update(field);
        self
    }

    pub fn str(self, field: &str) -> Self {
        self.bytes(field.as_bytes())
    }

    pub fn int(self, field: i64) -> Self {
        self.bytes(&field.to_le_bytes())
    }

    /// Hash a timestamp floored to `granularity` seconds
    pub fn time(self, ts: i64, granularity: i64) -> Self {
        self.int(time_bucket(ts, granularity))
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint(hex::encode(self.hasher.finalize()))
    }
}

/// Floor `ts` to a multiple of `granularity` (no-op for granularity <= 1)
pub fn time_bucket(ts: i64, granularity: i64) -> i64 {
    if granularity <= 1 {
        return ts;
    }
    ts.div_euclid(granularity) * granularity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let a = Fingerprint::builder("find").str("a.b.*").int(7).finish();
        let b = Fingerprint::builder("find").str("a.b.*").int(7).finish();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn test_fields_are_length_prefixed() {
        let a = Fingerprint::builder("k").str("ab").str("c").finish();
        let b = Fingerprint::builder("k").str("a").str("bc").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_kind_separates_namespaces() {
        let a = Fingerprint::builder("find").str("x").finish();
        let b = Fingerprint::builder("render").str("x").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_time_bucketing() {
        assert_eq!(time_bucket(125, 60), 120);
        assert_eq!(time_bucket(-1, 60), -60);
        assert_eq!(time_bucket(125, 0), 125);

        let a = Fingerprint::builder("r").time(1_000_005, 60).finish();
        let b = Fingerprint::builder("r").time(1_000_019, 60).finish();
        let c = Fingerprint::builder("r").time(1_000_020, 60).finish();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
