//! Translation service: cache lookup → protect → rate-limit → dispatch with retry →
//! restore → glossary → cache store.
//! `TranslationClient` is the only entry point; the other pieces are collaborators it owns.

pub mod cache;
pub mod client;
pub mod dispatch;
pub mod glossary;
pub mod limiter;
pub mod protect;
pub mod provider;
pub mod retry;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use client::TranslationClient;

/// Source tag meaning "let the provider detect the language".
pub const AUTO_LANG: &str = "auto";

/// Body format forwarded to the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFormat {
    #[default]
    Text,
    Html,
}

impl TextFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            TextFormat::Text => "text/plain",
            TextFormat::Html => "text/html",
        }
    }
}

/// Per-call options for `TranslationClient::translate` and friends.
#[derive(Debug, Clone, Default)]
pub struct TranslateOptions {
    /// Ask the provider for the source language first when the source is `auto`.
    pub detect_source: bool,
    /// Run the glossary over the restored translation.
    pub apply_glossary: bool,
    pub format: TextFormat,
    /// Overrides the client-wide token for this call.
    pub cancel: Option<CancellationToken>,
}

/// Active language pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

/// One remote translate call: texts share a language pair and format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslateCall {
    pub texts: Vec<String>,
    pub source_lang: String,
    pub target_lang: String,
    pub format: TextFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    /// Cache backend unavailable or an operation on it failed.
    Storage(String),
    /// Strict-mode admission denial.
    RateLimitExceeded,
    /// Transport failure.
    Network(String),
    /// Non-2xx provider response.
    Http { status: u16, body: String },
    /// Provider answered with a payload we cannot read.
    UnexpectedResponseShape(String),
    UnsupportedLanguage(String),
    InvalidInput(String),
    Cancelled,
}

impl TranslateError {
    /// Only transport and HTTP status failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TranslateError::Network(_) | TranslateError::Http { .. })
    }
}

impl std::fmt::Display for TranslateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranslateError::Storage(msg) => write!(f, "cache storage error: {msg}"),
            TranslateError::RateLimitExceeded => write!(f, "rate limit exceeded"),
            TranslateError::Network(msg) => write!(f, "network error: {msg}"),
            TranslateError::Http { status, body } => {
                write!(f, "HTTP error {status}: {body}")
            }
            TranslateError::UnexpectedResponseShape(msg) => {
                write!(f, "unexpected API response structure: {msg}")
            }
            TranslateError::UnsupportedLanguage(tag) => write!(f, "unsupported language: {tag}"),
            TranslateError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            TranslateError::Cancelled => write!(f, "translation cancelled"),
        }
    }
}

impl std::error::Error for TranslateError {}

/// Check a BCP 47-ish tag: a 2-3 letter primary subtag followed by 1-8 char
/// alphanumeric subtags. `auto` is accepted only when `allow_auto` is set.
pub fn validate_language_tag(tag: &str, allow_auto: bool) -> Result<(), TranslateError> {
    if tag == AUTO_LANG {
        return if allow_auto {
            Ok(())
        } else {
            Err(TranslateError::UnsupportedLanguage(tag.to_string()))
        };
    }

    let mut parts = tag.split('-');
    let primary_ok = parts
        .next()
        .map(|p| (2..=3).contains(&p.len()) && p.chars().all(|c| c.is_ascii_alphabetic()))
        .unwrap_or(false);
    let rest_ok = parts.all(|p| (1..=8).contains(&p.len()) && p.chars().all(|c| c.is_ascii_alphanumeric()));

    if primary_ok && rest_ok {
        Ok(())
    } else {
        Err(TranslateError::UnsupportedLanguage(tag.to_string()))
    }
}
