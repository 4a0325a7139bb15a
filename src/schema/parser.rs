//! Textual schema parser
//!
//! Extracts a `SchemaCatalog` from a TypeQL schema definition for engines
//! without structured introspection. Statements are split by the shared
//! tokenizer, then each statement is read as a type header followed by a
//! comma-separated property list.
//!
//! Supported subset:
//! - `entity|relation|attribute <label> [sub <parent>] [@abstract], ...;`
//! - label-first statements: `<label> sub <parent>, ...;` and `<label> owns <attr>;`
//!   with the kind resolved through the supertype chain
//! - properties `owns`, `plays <relation:role>`, `relates <role> [as <role>]`,
//!   `value <type>`, `sub <parent>`, `@abstract` / `abstract`
//!
//! Annotation arguments are skipped as a nested group. `fun` and `struct`
//! declarations are ignored.

use crate::error::Result;
use crate::schema::model::{AttributeType, EntityType, RelationType, SchemaCatalog};
use crate::typeql::{self, Token, TokenKind};
use std::collections::BTreeMap;

const ROOT_KINDS: &[&str] = &["entity", "relation", "attribute"];
const PROPERTY_KEYWORDS: &[&str] = &["sub", "owns", "plays", "relates", "value", "abstract"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Entity,
    Relation,
    Attribute,
}

impl Kind {
    fn from_keyword(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "entity" => Some(Kind::Entity),
            "relation" => Some(Kind::Relation),
            "attribute" => Some(Kind::Attribute),
            _ => None,
        }
    }
}

/// Properties collected for one label across all statements
#[derive(Debug, Default)]
struct TypeDraft {
    kind: Option<Kind>,
    parent: Option<String>,
    is_abstract: bool,
    owns: Vec<String>,
    plays: Vec<String>,
    relates: Vec<String>,
    value_type: Option<String>,
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

/// Parse a schema definition into a catalog sorted by label
pub fn parse_schema(text: &str) -> Result<SchemaCatalog> {
    let tokens = typeql::tokenize(text)?;
    let mut drafts: BTreeMap<String, TypeDraft> = BTreeMap::new();
    let mut in_function = false;

    for statement in typeql::split_statements(&tokens) {
        let statement = strip_define(statement);
        if statement.is_empty() {
            continue;
        }

        if in_function && !starts_declaration(statement) {
            continue;
        }
        in_function = false;

        let Some(first) = statement[0].ident() else {
            continue;
        };
        match first.to_ascii_lowercase().as_str() {
            "fun" => {
                in_function = true;
                continue;
            }
            "struct" => continue,
            _ => {}
        }

        if let Some(kind) = Kind::from_keyword(first) {
            let Some(label) = statement.get(1).and_then(Token::ident) else {
                continue;
            };
            let draft = drafts.entry(label.to_string()).or_default();
            draft.kind = Some(kind);
            read_properties(&statement[2..], draft);
        } else if is_label_first(statement) {
            let draft = drafts.entry(first.to_string()).or_default();
            read_properties(&statement[1..], draft);
        } else {
            tracing::debug!(statement = first, "Skipping unrecognized schema statement");
        }
    }

    Ok(build_catalog(drafts))
}

/// Drop leading `define` keywords
fn strip_define(mut statement: &[Token]) -> &[Token] {
    while statement.first().is_some_and(|t| t.is_keyword("define")) {
        statement = &statement[1..];
    }
    statement
}

fn is_label_first(statement: &[Token]) -> bool {
    statement.len() >= 2
        && statement[0].ident().is_some()
        && statement[1]
            .ident()
            .is_some_and(|w| PROPERTY_KEYWORDS.iter().any(|k| w.eq_ignore_ascii_case(k)))
}

fn starts_declaration(statement: &[Token]) -> bool {
    let Some(first) = statement.first().and_then(Token::ident) else {
        return false;
    };
    Kind::from_keyword(first).is_some()
        || first.eq_ignore_ascii_case("fun")
        || first.eq_ignore_ascii_case("struct")
        || is_label_first(statement)
}

/// Read a property list, splitting on top-level commas
fn read_properties(tokens: &[Token], draft: &mut TypeDraft) {
    let mut depth: usize = 0;
    let mut begin = 0;
    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::Punct('(') | TokenKind::Punct('{') | TokenKind::Punct('[') => depth += 1,
            TokenKind::Punct(')') | TokenKind::Punct('}') | TokenKind::Punct(']') => {
                depth = depth.saturating_sub(1)
            }
            TokenKind::Punct(',') if depth == 0 => {
                read_clause(&tokens[begin..i], draft);
                begin = i + 1;
            }
            _ => {}
        }
    }
    read_clause(&tokens[begin..], draft);
}

fn read_clause(clause: &[Token], draft: &mut TypeDraft) {
    let mut i = 0;
    while i < clause.len() {
        let token = &clause[i];
        match &token.kind {
            TokenKind::Annotation(name) => {
                if name.eq_ignore_ascii_case("abstract") {
                    draft.is_abstract = true;
                }
                i += 1;
                i = skip_group(clause, i);
            }
            TokenKind::Ident(word) => {
                let next = clause.get(i + 1).and_then(Token::ident);
                match word.to_ascii_lowercase().as_str() {
                    "abstract" => {
                        draft.is_abstract = true;
                        i += 1;
                    }
                    "sub" => {
                        if let Some(parent) = next {
                            draft.parent = Some(parent.to_string());
                        }
                        i += 2;
                    }
                    "owns" => {
                        if let Some(attr) = next {
                            push_unique(&mut draft.owns, attr.to_string());
                        }
                        i += 2;
                    }
                    "relates" => {
                        if let Some(role) = next {
                            push_unique(&mut draft.relates, role.to_string());
                        }
                        i += 2;
                        // `relates role as overridden`
                        if clause.get(i).is_some_and(|t| t.is_keyword("as")) {
                            i += 2;
                        }
                    }
                    "plays" => {
                        let scope = next;
                        let role = clause
                            .get(i + 2)
                            .filter(|t| t.is_punct(':'))
                            .and_then(|_| clause.get(i + 3))
                            .and_then(Token::ident);
                        match (scope, role) {
                            (Some(scope), Some(role)) => {
                                push_unique(&mut draft.plays, format!("{}:{}", scope, role));
                                i += 4;
                            }
                            (Some(role), None) => {
                                push_unique(&mut draft.plays, role.to_string());
                                i += 2;
                            }
                            _ => i += 1,
                        }
                    }
                    "value" => {
                        if let Some(value_type) = next {
                            draft.value_type = Some(value_type.to_ascii_lowercase());
                        }
                        i += 2;
                    }
                    _ => i += 1,
                }
            }
            _ => i += 1,
        }
    }
}

/// Skip a parenthesized group starting at `i`, if any
fn skip_group(tokens: &[Token], mut i: usize) -> usize {
    if !tokens.get(i).is_some_and(|t| t.is_punct('(')) {
        return i;
    }
    let mut depth = 0usize;
    while i < tokens.len() {
        if tokens[i].is_punct('(') {
            depth += 1;
        } else if tokens[i].is_punct(')') {
            depth -= 1;
            if depth == 0 {
                return i + 1;
            }
        }
        i += 1;
    }
    i
}

/// Resolve a draft's kind through its supertype chain
fn resolve_kind(label: &str, drafts: &BTreeMap<String, TypeDraft>) -> Option<Kind> {
    let mut current = label;
    for _ in 0..=drafts.len() {
        let draft = drafts.get(current)?;
        if let Some(kind) = draft.kind {
            return Some(kind);
        }
        let parent = draft.parent.as_deref()?;
        if let Some(kind) = Kind::from_keyword(parent) {
            return Some(kind);
        }
        current = parent;
    }
    None
}

fn build_catalog(drafts: BTreeMap<String, TypeDraft>) -> SchemaCatalog {
    let mut catalog = SchemaCatalog::new();

    for (label, draft) in &drafts {
        let Some(kind) = resolve_kind(label, &drafts) else {
            tracing::debug!(label = %label, "Could not resolve kind of schema type");
            continue;
        };
        let supertype = draft
            .parent
            .clone()
            .filter(|p| !ROOT_KINDS.iter().any(|root| p.eq_ignore_ascii_case(root)));

        match kind {
            Kind::Entity => catalog.entities.push(EntityType {
                label: label.clone(),
                is_abstract: draft.is_abstract,
                supertype,
                owned_attributes: draft.owns.clone(),
                played_roles: draft.plays.clone(),
            }),
            Kind::Relation => catalog.relations.push(RelationType {
                label: label.clone(),
                is_abstract: draft.is_abstract,
                supertype,
                related_roles: draft.relates.clone(),
                owned_attributes: draft.owns.clone(),
                played_roles: draft.plays.clone(),
            }),
            Kind::Attribute => catalog.attributes.push(AttributeType {
                label: label.clone(),
                is_abstract: draft.is_abstract,
                supertype,
                value_type: draft.value_type.clone(),
            }),
        }
    }

    catalog.sort();
    catalog
}
