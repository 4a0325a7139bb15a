//! TypeQL lexical scanning
//!
//! A small tokenizer shared by the schema parser, the transaction kind
//! classifier and the embedded engine. Comments (`# ...`) and whitespace are
//! dropped; string literals keep their unescaped content.

use crate::error::{Result, StudioError};

/// Token kinds
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Keyword or label (letters, digits, `_`, `-`)
    Ident(String),
    /// Variable such as `$x`
    Var(String),
    /// String literal, unescaped
    Str(String),
    /// Numeric literal as written
    Number(String),
    /// Annotation name without the `@`
    Annotation(String),
    /// Any other single character
    Punct(char),
}

/// A token with its byte span in the source
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    /// The identifier text, if this is an identifier
    pub fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this is the given keyword (case-insensitive)
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.ident().is_some_and(|s| s.eq_ignore_ascii_case(keyword))
    }

    /// Whether this is the given punctuation character
    pub fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct(c)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

/// Tokenize TypeQL text
pub fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c == '#' {
            while let Some(&(_, c)) = chars.peek() {
                if c == '\n' {
                    break;
                }
                chars.next();
            }
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            chars.next();
            let mut value = String::new();
            let mut closed = None;
            while let Some((i, c)) = chars.next() {
                match c {
                    '\\' => {
                        if let Some((_, escaped)) = chars.next() {
                            value.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            });
                        }
                    }
                    c if c == quote => {
                        closed = Some(i + c.len_utf8());
                        break;
                    }
                    c => value.push(c),
                }
            }
            let end = closed.ok_or_else(|| StudioError::SchemaParse {
                offset: start,
                message: "unterminated string literal".to_string(),
            })?;
            tokens.push(Token {
                kind: TokenKind::Str(value),
                start,
                end,
            });
            continue;
        }

        if c == '$' || c == '@' {
            chars.next();
            let mut name = String::new();
            let mut end = start + 1;
            while let Some(&(i, c)) = chars.peek() {
                if !is_ident_char(c) {
                    break;
                }
                name.push(c);
                end = i + c.len_utf8();
                chars.next();
            }
            let kind = if c == '$' {
                TokenKind::Var(name)
            } else {
                TokenKind::Annotation(name)
            };
            tokens.push(Token { kind, start, end });
            continue;
        }

        if c.is_ascii_digit() {
            let mut number = String::new();
            let mut end = start;
            while let Some(&(i, c)) = chars.peek() {
                if !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-')) {
                    break;
                }
                number.push(c);
                end = i + c.len_utf8();
                chars.next();
            }
            tokens.push(Token {
                kind: TokenKind::Number(number),
                start,
                end,
            });
            continue;
        }

        if is_ident_char(c) {
            let mut ident = String::new();
            let mut end = start;
            while let Some(&(i, c)) = chars.peek() {
                if !is_ident_char(c) {
                    break;
                }
                ident.push(c);
                end = i + c.len_utf8();
                chars.next();
            }
            tokens.push(Token {
                kind: TokenKind::Ident(ident),
                start,
                end,
            });
            continue;
        }

        chars.next();
        tokens.push(Token {
            kind: TokenKind::Punct(c),
            start,
            end: start + c.len_utf8(),
        });
    }

    Ok(tokens)
}

/// Split tokens into statements at top-level `;`
///
/// Semicolons nested inside `()`, `{}` or `[]` do not end a statement.
/// Empty statements are dropped.
pub fn split_statements(tokens: &[Token]) -> Vec<&[Token]> {
    let mut statements = Vec::new();
    let mut depth: usize = 0;
    let mut begin = 0;

    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::Punct('(') | TokenKind::Punct('{') | TokenKind::Punct('[') => depth += 1,
            TokenKind::Punct(')') | TokenKind::Punct('}') | TokenKind::Punct(']') => {
                depth = depth.saturating_sub(1)
            }
            TokenKind::Punct(';') if depth == 0 => {
                if i > begin {
                    statements.push(&tokens[begin..i]);
                }
                begin = i + 1;
            }
            _ => {}
        }
    }
    if begin < tokens.len() {
        statements.push(&tokens[begin..]);
    }

    statements
}

/// Source text covered by a token slice
pub fn source_of<'a>(text: &'a str, tokens: &[Token]) -> &'a str {
    match (tokens.first(), tokens.last()) {
        (Some(first), Some(last)) => &text[first.start..last.end],
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        tokenize(text).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_statement() {
        assert_eq!(
            kinds("entity person @abstract, owns name;"),
            vec![
                TokenKind::Ident("entity".to_string()),
                TokenKind::Ident("person".to_string()),
                TokenKind::Annotation("abstract".to_string()),
                TokenKind::Punct(','),
                TokenKind::Ident("owns".to_string()),
                TokenKind::Ident("name".to_string()),
                TokenKind::Punct(';'),
            ]
        );
    }

    #[test]
    fn test_comments_are_dropped() {
        let tokens = tokenize("# a comment\nmatch $x isa person; # trailing").unwrap();
        assert_eq!(tokens.len(), 5);
        assert!(tokens[0].is_keyword("match"));
        assert_eq!(tokens[1].kind, TokenKind::Var("x".to_string()));
    }

    #[test]
    fn test_string_escapes_and_hash_inside_string() {
        assert_eq!(
            kinds(r#"has name "a \"b\" # c""#)[2],
            TokenKind::Str(r#"a "b" # c"#.to_string())
        );
    }

    #[test]
    fn test_unterminated_string_is_an_error() {
        let err = tokenize("insert $x has name \"oops;").unwrap_err();
        assert!(matches!(err, StudioError::SchemaParse { offset: 19, .. }));
    }

    #[test]
    fn test_split_respects_nesting() {
        let text = r#"attribute code value string @regex("a;b"); entity e, owns code @card(0..1);"#;
        let tokens = tokenize(text).unwrap();
        let statements = split_statements(&tokens);
        assert_eq!(statements.len(), 2);
        assert_eq!(
            source_of(text, statements[1]),
            "entity e, owns code @card(0..1)"
        );
    }

    #[test]
    fn test_nested_semicolons_inside_parentheses() {
        let tokens = tokenize("fun f() -> { person }: match $p isa person; return { $p };").unwrap();
        // the `;` after `person` is top-level, so the function body splits
        assert_eq!(split_statements(&tokens).len(), 2);

        let tokens = tokenize("x (a; b); y;").unwrap();
        assert_eq!(split_statements(&tokens).len(), 2);
    }
}
