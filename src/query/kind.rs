//! Transaction kind classification

use crate::typeql::{self, Token, TokenKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of transaction a statement must run in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Schema-defining statements
    Schema,
    /// Read-only statements
    Read,
    /// Data-writing statements
    Write,
}

impl TransactionKind {
    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Schema => "schema",
            TransactionKind::Read => "read",
            TransactionKind::Write => "write",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const SCHEMA_KEYWORDS: &[&str] = &["define", "undefine", "redefine"];
const WRITE_KEYWORDS: &[&str] = &["insert", "delete", "update", "put"];

/// Classify a statement by its leading keyword
///
/// A `match` pipeline that continues into a write stage is a write.
/// Text that cannot be tokenized classifies as a read and is left for the
/// engine to reject.
pub fn classify(query: &str) -> TransactionKind {
    let tokens = typeql::tokenize(query).unwrap_or_default();
    let Some(leading) = tokens.first().and_then(Token::ident) else {
        return TransactionKind::Read;
    };
    let leading = leading.to_ascii_lowercase();

    if SCHEMA_KEYWORDS.contains(&leading.as_str()) {
        return TransactionKind::Schema;
    }
    if WRITE_KEYWORDS.contains(&leading.as_str()) {
        return TransactionKind::Write;
    }
    if clause_keywords(&tokens)
        .iter()
        .any(|k| WRITE_KEYWORDS.contains(&k.as_str()))
    {
        return TransactionKind::Write;
    }
    TransactionKind::Read
}

/// Lowercased keywords that open each top-level clause of a statement
///
/// `match $x isa person; fetch { ... };` yields `["match", "fetch"]`.
pub fn stages(query: &str) -> Vec<String> {
    typeql::tokenize(query)
        .map(|tokens| clause_keywords(&tokens))
        .unwrap_or_default()
}

fn clause_keywords(tokens: &[Token]) -> Vec<String> {
    let mut keywords = Vec::new();
    let mut depth: usize = 0;
    let mut clause_start = true;

    for token in tokens {
        match &token.kind {
            TokenKind::Punct('(') | TokenKind::Punct('{') | TokenKind::Punct('[') => depth += 1,
            TokenKind::Punct(')') | TokenKind::Punct('}') | TokenKind::Punct(']') => {
                depth = depth.saturating_sub(1)
            }
            TokenKind::Ident(word) if depth == 0 && clause_start => {
                keywords.push(word.to_ascii_lowercase());
            }
            _ => {}
        }
        clause_start = depth == 0 && token.is_punct(';');
    }

    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements() {
        assert_eq!(classify("define entity person;"), TransactionKind::Schema);
        assert_eq!(classify("  UNDEFINE person;"), TransactionKind::Schema);
        assert_eq!(
            classify("# comment first\nredefine attribute age value long;"),
            TransactionKind::Schema
        );
    }

    #[test]
    fn test_read_statements() {
        assert_eq!(classify("match $x isa thing;"), TransactionKind::Read);
        assert_eq!(
            classify("match $p isa person; fetch { \"name\": $p.name };"),
            TransactionKind::Read
        );
        assert_eq!(classify(""), TransactionKind::Read);
    }

    #[test]
    fn test_write_statements() {
        assert_eq!(classify("insert $p isa person;"), TransactionKind::Write);
        assert_eq!(
            classify("match $p isa person, has name \"Bob\"; delete $p;"),
            TransactionKind::Write
        );
    }

    #[test]
    fn test_stages() {
        assert_eq!(
            stages("match $p isa person; fetch { \"n\": $p.name; };"),
            vec!["match", "fetch"]
        );
        assert_eq!(stages("match $x isa t; reduce $c = count;"), vec!["match", "reduce"]);
    }

    #[test]
    fn test_write_keyword_inside_string_is_ignored() {
        assert_eq!(
            classify("match $p isa person, has name \"x; insert\";"),
            TransactionKind::Read
        );
    }
}
