//! Secret scrubbing for log output.
//!
//! The private key must never appear in the log stream, even inside an
//! error string bubbled up from a lower layer. Error messages that could
//! embed request context go through [`redact`] before logging.

use std::sync::OnceLock;

const PRIVATE_KEY_ENV: &str = "POLYMARKET_PRIVATE_KEY";

fn secret_patterns() -> &'static Vec<String> {
    static PATTERNS: OnceLock<Vec<String>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let mut patterns = Vec::new();
        if let Ok(key) = std::env::var(PRIVATE_KEY_ENV) {
            let key = key.trim().to_string();
            if !key.is_empty() {
                // Match with and without the 0x prefix.
                let bare = key.trim_start_matches("0x").to_string();
                patterns.push(key);
                if !patterns.contains(&bare) {
                    patterns.push(bare);
                }
            }
        }
        patterns
    })
}

/// Replace any occurrence of the private key with a placeholder.
pub fn redact(message: &str) -> String {
    let mut out = message.to_string();
    for pattern in secret_patterns() {
        if out.contains(pattern.as_str()) {
            out = out.replace(pattern.as_str(), "[REDACTED]");
        }
    }
    out
}
