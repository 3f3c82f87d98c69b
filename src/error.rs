use thiserror::Error;

/// Failures inside the engine. None of these cross a public operation boundary: callers
/// fold them into a details string or a "nothing found" result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid rule `{rule}`: {reason}")]
    Rule { rule: String, reason: String },

    #[error("request failed: {0}")]
    Fetch(String),

    #[error("nothing found: {0}")]
    NotFound(String),

    #[error("URI malformed: {0}")]
    Decode(String),

    #[error("invalid URL `{url}`: {reason}")]
    Url { url: String, reason: String },
}

impl Error {
    pub fn rule(rule: &str, reason: impl Into<String>) -> Self {
        Error::Rule {
            rule: rule.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
