//! Source documents and the languages the corpus is written in.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Language of a document or a query.
///
/// The corpus is bilingual, so the set is closed: anything else is rejected
/// when parsing rather than carried around as a free-form string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "fr", alias = "FR", alias = "Fr")]
    Fr,
    #[serde(rename = "en", alias = "EN", alias = "En")]
    En,
}

impl Language {
    /// ISO 639-1 code, lowercase.
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Fr => "fr",
            Language::En => "en",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported language code '{0}' (expected 'fr' or 'en')")]
pub struct ParseLanguageError(pub String);

impl FromStr for Language {
    type Err = ParseLanguageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fr" => Ok(Language::Fr),
            "en" => Ok(Language::En),
            _ => Err(ParseLanguageError(s.to_string())),
        }
    }
}

/// An immutable unit of ingested knowledge.
///
/// Records coming from the curation pipeline carry a few more fields
/// (`source_type`, `year`, `topics`); they are ignored on deserialization.
/// The pipeline names the link `url`, which is accepted as an alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub language: Language,
    pub text: String,
    #[serde(alias = "url", default)]
    pub source_url: String,
}

impl Document {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        language: Language,
        text: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            language,
            text: text.into(),
            source_url: source_url.into(),
        }
    }
}
