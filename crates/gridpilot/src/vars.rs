//! Variable substitution and text normalization.
//!
//! Step parameters may reference spreadsheet columns as `${name}` tokens.
//! The resolver replaces each token with the current row's stringified value;
//! a token with no matching column is left verbatim and recorded as a
//! warning, so a single missing column never aborts the row.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;

/// Column name → cell value for the row currently being executed.
pub type RowBindings = BTreeMap<String, Value>;

/// Full-width → half-width punctuation applied before text comparisons.
///
/// OCR backends routinely report CJK full-width punctuation for UI text
/// authored with half-width characters; both sides of a comparison are
/// normalized through this table.
pub const FULLWIDTH_TABLE: &[(char, char)] = &[
    ('：', ':'),
    ('；', ';'),
    ('（', '('),
    ('）', ')'),
    ('［', '['),
    ('］', ']'),
    ('｛', '{'),
    ('｝', '}'),
    ('＜', '<'),
    ('＞', '>'),
    ('，', ','),
    ('。', '.'),
    ('！', '!'),
    ('？', '?'),
    ('\u{3000}', ' '),
];

/// Result of resolving one string parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub text: String,
    /// Token names that had no binding and were left verbatim.
    pub unresolved: Vec<String>,
}

impl Resolution {
    pub fn is_clean(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Scans string parameters for `${name}` tokens.
#[derive(Debug, Clone)]
pub struct VariableResolver {
    pattern: Regex,
}

impl Default for VariableResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableResolver {
    pub fn new() -> Self {
        // The token body is anything up to the closing brace, so column
        // names with spaces or CJK characters resolve too.
        Self {
            pattern: Regex::new(r"\$\{([^}]+)\}").expect("token pattern is valid"),
        }
    }

    /// Substitutes every `${name}` token in `input` against `bindings`.
    pub fn resolve(&self, input: &str, bindings: &RowBindings) -> Resolution {
        let mut unresolved = Vec::new();
        let text = self
            .pattern
            .replace_all(input, |caps: &regex::Captures| {
                let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                match bindings.get(name) {
                    Some(value) => stringify_cell(value),
                    None => {
                        unresolved.push(name.to_string());
                        caps.get(0).map(|m| m.as_str()).unwrap_or_default().to_string()
                    }
                }
            })
            .into_owned();
        Resolution { text, unresolved }
    }
}

/// Renders a cell value the way it reads in the spreadsheet.
pub fn stringify_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Applies [`FULLWIDTH_TABLE`] to `text`.
pub fn normalize_fullwidth(text: &str) -> String {
    text.chars()
        .map(|c| {
            FULLWIDTH_TABLE
                .iter()
                .find(|(full, _)| *full == c)
                .map(|(_, half)| *half)
                .unwrap_or(c)
        })
        .collect()
}

/// Shared comparison semantics for text search: trimmed, case-insensitive,
/// full-width punctuation normalized. `exact` demands equality, otherwise
/// the target must occur within the candidate.
///
/// Exported so vision backends match the way the engine's own
/// excel-value conditions do.
pub fn text_matches(candidate: &str, target: &str, exact: bool) -> bool {
    let candidate = normalize_fullwidth(candidate.trim()).to_lowercase();
    let target = normalize_fullwidth(target.trim()).to_lowercase();
    if exact {
        candidate == target
    } else {
        candidate.contains(&target)
    }
}
