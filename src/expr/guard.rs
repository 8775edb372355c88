//! Forbidden-construct guard.
//!
//! Runs over the raw expression text before anything is parsed. String
//! literals are NOT exempt: the expression is later spliced verbatim into
//! larger statements, so a keyword that is harmless inside a literal today
//! can close the literal tomorrow.

use once_cell::sync::Lazy;
use regex::Regex;

/// Data-definition, data-manipulation and access-control keywords.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "CREATE", "ALTER", "DROP", "TRUNCATE", "RENAME", "COMMENT", "INSERT", "UPDATE", "DELETE",
    "MERGE", "UPSERT", "COPY", "PUT", "GRANT", "REVOKE", "EXEC", "EXECUTE", "CALL", "USE",
];

/// Statement separators and comment openers.
pub const FORBIDDEN_TOKENS: &[&str] = &[";", "--", "/*", "*/"];

static KEYWORD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let alternatives = FORBIDDEN_KEYWORDS.join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternatives})\b")).expect("keyword pattern is valid")
});

/// One forbidden construct found in the raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForbiddenHit {
    /// The construct as it should be reported (keywords upper-cased).
    pub construct: String,
    /// Byte offset into the expression text.
    pub position: usize,
}

/// Scan `text` for every forbidden keyword and token, in position order.
pub fn scan(text: &str) -> Vec<ForbiddenHit> {
    let mut hits: Vec<ForbiddenHit> = KEYWORD_PATTERN
        .find_iter(text)
        .map(|m| ForbiddenHit {
            construct: m.as_str().to_ascii_uppercase(),
            position: m.start(),
        })
        .collect();

    for token in FORBIDDEN_TOKENS {
        hits.extend(text.match_indices(token).map(|(position, _)| ForbiddenHit {
            construct: (*token).to_string(),
            position,
        }));
    }

    hits.sort_by_key(|h| h.position);
    hits
}
