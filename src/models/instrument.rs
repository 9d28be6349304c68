use serde::{Deserialize, Serialize};
use std::fmt;

/// Index aliases that users type instead of the exchange code
const INDEX_ALIASES: &[(&str, &str)] = &[
    ("NIFTY", "^NSEI"),
    ("NIFTY50", "^NSEI"),
    ("NIFTY 50", "^NSEI"),
    ("BANKNIFTY", "^NSEBANK"),
    ("NIFTY BANK", "^NSEBANK"),
    ("SENSEX", "^BSESN"),
    ("FINNIFTY", "NIFTY_FIN_SERVICE.NS"),
];

// Listed without an exchange suffix
const US_LARGE_CAPS: &[&str] = &["AAPL", "GOOGL", "MSFT", "AMZN", "META", "TSLA", "NVDA"];

const DEFAULT_SUFFIX: &str = ".NS";

/// Canonical instrument identifier
///
/// Built only through [`InstrumentKey::normalize`], which never fails and is
/// idempotent: normalizing an already normalized key returns it unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentKey(String);

impl InstrumentKey {
    pub fn normalize(raw: &str) -> Self {
        let cleaned = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_uppercase();

        if cleaned.is_empty() {
            return Self(cleaned);
        }

        if let Some((_, code)) = INDEX_ALIASES.iter().find(|(alias, _)| *alias == cleaned) {
            return Self((*code).to_string());
        }

        if cleaned.starts_with('^') || cleaned.contains('.') || US_LARGE_CAPS.contains(&cleaned.as_str())
        {
            return Self(cleaned);
        }

        Self(format!("{}{}", cleaned, DEFAULT_SUFFIX))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstrumentKey {
    fn from(raw: &str) -> Self {
        Self::normalize(raw)
    }
}
