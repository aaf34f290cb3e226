use std::fmt;

use serde::{Deserialize, Serialize};

/// Hex-encoded BLAKE3 digest identifying a piece of rule content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash raw bytes.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    /// Hash submitted rule text. Line endings are normalized to `\n` and
    /// trailing whitespace is dropped from every line first, so the same
    /// content saved by different editors hashes identically.
    #[must_use]
    pub fn of_text(text: &str) -> Self {
        let mut normalized = String::with_capacity(text.len());
        for line in text.lines() {
            normalized.push_str(line.trim_end());
            normalized.push('\n');
        }
        let trimmed = normalized.trim_end_matches('\n');
        Self::of_bytes(trimmed.as_bytes())
    }

    /// Wrap an already computed hex digest (e.g. read back from storage).
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
