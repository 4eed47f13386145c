//! Credential redaction for error messages.
//!
//! Provider and GitHub error bodies sometimes echo request headers back.
//! Anything that is logged or persisted into `last_error` passes through
//! [`redact_error_message`] first.

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};

/// A named credential pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretPatternDef {
    pub id: &'static str,
    pub regex: &'static str,
}

pub static DEFAULT_SECRET_PATTERNS: &[SecretPatternDef] = &[
    SecretPatternDef {
        id: "bearer_token",
        regex: r"Bearer [A-Za-z0-9._-]{8,}",
    },
    SecretPatternDef {
        id: "api_key_header",
        regex: r"(?i)(?:x-api-key|x-goog-api-key|api-key|apikey)\s*[=:]\s*[A-Za-z0-9_-]{8,}",
    },
    SecretPatternDef {
        id: "anthropic_api_key",
        regex: r"sk-ant-[A-Za-z0-9_-]{16,}",
    },
    SecretPatternDef {
        id: "openrouter_api_key",
        regex: r"sk-or-v1-[A-Za-z0-9]{16,}",
    },
    SecretPatternDef {
        id: "openai_api_key",
        regex: r"sk-(?:proj-|org-)?[A-Za-z0-9_-]{20,}",
    },
    SecretPatternDef {
        id: "gcp_api_key",
        regex: r"AIza[0-9A-Za-z_-]{35}",
    },
    SecretPatternDef {
        id: "github_token",
        regex: r"gh[pousr]_[A-Za-z0-9]{36,}",
    },
    SecretPatternDef {
        id: "github_fine_grained_pat",
        regex: r"github_pat_[A-Za-z0-9_]{22,}",
    },
];

struct Redactor {
    set: RegexSet,
    patterns: Vec<Regex>,
}

impl Redactor {
    fn build() -> Option<Self> {
        let set = RegexSet::new(DEFAULT_SECRET_PATTERNS.iter().map(|p| p.regex)).ok()?;
        let patterns = DEFAULT_SECRET_PATTERNS
            .iter()
            .map(|p| Regex::new(p.regex))
            .collect::<Result<Vec<_>, _>>()
            .ok()?;
        Some(Self { set, patterns })
    }

    fn redact(&self, text: &str) -> String {
        let matches = self.set.matches(text);
        if !matches.matched_any() {
            return text.to_string();
        }
        let mut redacted = text.to_string();
        for index in matches.iter() {
            if let Some(regex) = self.patterns.get(index) {
                redacted = regex.replace_all(&redacted, "***").into_owned();
            }
        }
        redacted
    }
}

static REDACTOR: Lazy<Option<Redactor>> = Lazy::new(Redactor::build);

/// Replace every known credential shape in `text` with `***`.
///
/// If the pattern table failed to compile the whole message is withheld
/// rather than risk leaking a key.
#[must_use]
pub fn redact_error_message(text: &str) -> String {
    match REDACTOR.as_ref() {
        Some(redactor) => redactor.redact(text),
        None => "[redacted: redaction patterns unavailable]".to_string(),
    }
}

/// Redact and cap an upstream response body for inclusion in an error.
#[must_use]
pub fn summarize_body(body: &str, max_chars: usize) -> String {
    let redacted = redact_error_message(body.trim());
    if redacted.chars().count() <= max_chars {
        return redacted;
    }
    let mut out: String = redacted.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
