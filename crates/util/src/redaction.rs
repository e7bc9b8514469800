//! Redaction of secret-looking fragments in free-form text.
//!
//! Values flagged sensitive are masked structurally by the value model. Error
//! messages raised by routines and scripts are plain text, however, and may
//! echo credentials; [`redact_sensitive`] scrubs those before they are placed
//! into `EVENT_ACTION_ERROR` payloads or logs.

use once_cell::sync::Lazy;
use regex::Regex;

/// Replacement token for redacted fragments.
pub const REDACTED: &str = "[REDACTED]";

static REDACT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(build_redact_patterns);

fn build_redact_patterns() -> Vec<Regex> {
    [
        r"(?i)(authorization:\s+)([^\s]+(?:\s+[^\s]+)*)",
        r"(?i)((?:^|\b)Bearer\s+)([A-Za-z0-9\-._~+/]+=*)",
        r"(?i)(\b[A-Z0-9_]*(?:KEY|TOKEN|SECRET|PASSWORD|PASSWD|PWD)\s*[=:]\s*)([^\s,;]+)",
        r#"(?i)("[a-z0-9_]*(?:key|token|secret|password)"\s*:\s*")([^"]*)(")"#,
        r"(?i)([a-z][a-z0-9+.\-]*://[^:/\s]+:)([^@\s]+)(@)",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
}

/// Replace secret-looking values in `input` with [`REDACTED`], keeping their keys.
///
/// ```rust
/// use stepwise_util::redact_sensitive;
///
/// assert_eq!(redact_sensitive("login failed: PASSWORD=hunter2"), "login failed: PASSWORD=[REDACTED]");
/// ```
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in REDACT_PATTERNS.iter() {
        redacted = pattern
            .replace_all(&redacted, |captures: &regex::Captures| {
                let prefix = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                let suffix = captures.get(3).map(|m| m.as_str()).unwrap_or("");
                format!("{prefix}{REDACTED}{suffix}")
            })
            .into_owned();
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_assignment_style_secrets() {
        assert_eq!(redact_sensitive("export API_TOKEN=abc123"), "export API_TOKEN=[REDACTED]");
    }

    #[test]
    fn redacts_json_style_secrets() {
        let input = r#"{"clientSecret": "top-secret", "user": "jane"}"#;
        assert_eq!(redact_sensitive(input), r#"{"clientSecret": "[REDACTED]", "user": "jane"}"#);
    }

    #[test]
    fn redacts_url_credentials() {
        assert_eq!(
            redact_sensitive("cannot reach postgres://admin:s3cr3t@db:5432"),
            "cannot reach postgres://admin:[REDACTED]@db:5432"
        );
    }

    #[test]
    fn leaves_ordinary_text_untouched() {
        let input = "division by zero in step 'compute' (port=8080)";
        assert_eq!(redact_sensitive(input), input);
    }
}
