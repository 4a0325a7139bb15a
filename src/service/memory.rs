//! Embedded engine
//!
//! An in-process engine holding every database in memory. Nothing survives
//! `reset`, which is how a page reload or engine restart looks to the
//! studio. It understands a practical TypeQL subset:
//!
//! - `define`, `undefine <label>`, `redefine` of type declarations
//! - `insert` of entities and relations with `has` and `links`
//! - `match` patterns over `isa`, `has` and `links`, optionally followed by
//!   `insert`, `delete $x`, `fetch { ... }` or `reduce $v = count|sum|min|max|mean`

use crate::error::{Result, StudioError};
use crate::query::kind::TransactionKind;
use crate::schema::model::SchemaCatalog;
use crate::schema::parser::parse_schema;
use crate::service::{Credentials, DatabaseService, LiveStatus, QueryResponse, Row, ServiceEvent};
use crate::session::ConnectionMode;
use crate::typeql::{self, Token, TokenKind};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 64;

/// A declared type and the statement that declared it
#[derive(Debug, Clone)]
struct Definition {
    label: String,
    text: String,
}

/// A stored entity or relation instance
#[derive(Debug, Clone)]
struct Concept {
    iid: String,
    label: String,
    attributes: Vec<(String, Value)>,
    /// `(role, player iid)`
    players: Vec<(String, String)>,
}

impl Concept {
    fn to_json(&self) -> Value {
        json!({ "iid": self.iid, "type": self.label })
    }

    fn attribute(&self, label: &str) -> Option<&Value> {
        self.attributes.iter().find(|(l, _)| l == label).map(|(_, v)| v)
    }
}

#[derive(Debug, Default)]
struct Database {
    definitions: Vec<Definition>,
    concepts: Vec<Concept>,
    next_iid: u64,
}

impl Database {
    fn schema_text(&self) -> String {
        let mut text = String::from("define\n");
        for definition in &self.definitions {
            text.push_str("  ");
            text.push_str(&definition.text);
            text.push_str(";\n");
        }
        text
    }

    fn catalog(&self) -> Result<SchemaCatalog> {
        parse_schema(&self.schema_text())
    }

    fn allocate_iid(&mut self) -> String {
        self.next_iid += 1;
        format!("0x{:016x}", self.next_iid)
    }

    fn concept(&self, iid: &str) -> Option<&Concept> {
        self.concepts.iter().find(|c| c.iid == iid)
    }
}

#[derive(Debug, Default)]
struct EngineState {
    connected: bool,
    databases: BTreeMap<String, Database>,
}

/// In-memory graph engine
pub struct MemoryEngine {
    state: Mutex<EngineState>,
    events: broadcast::Sender<ServiceEvent>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(EngineState::default()),
            events,
        }
    }

    /// Drop every database and the connection, as a reload would
    pub fn reset(&self) {
        let was_connected = {
            let mut state = self.lock();
            let was_connected = state.connected;
            *state = EngineState::default();
            was_connected
        };
        info!("Embedded engine reset");
        if was_connected {
            self.emit(ServiceEvent::StatusChanged(LiveStatus::Disconnected));
            self.emit(ServiceEvent::ModeChanged(None));
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ServiceEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn with_database<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Database) -> Result<R>,
    ) -> Result<R> {
        let mut state = self.lock();
        if !state.connected {
            return Err(StudioError::NotConnected);
        }
        let database = state
            .databases
            .get_mut(name)
            .ok_or_else(|| StudioError::query(format!("Database '{}' does not exist", name)))?;
        f(database)
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseService for MemoryEngine {
    fn status(&self) -> LiveStatus {
        if self.lock().connected {
            LiveStatus::Connected
        } else {
            LiveStatus::Disconnected
        }
    }

    fn mode(&self) -> Option<ConnectionMode> {
        self.lock().connected.then_some(ConnectionMode::Embedded)
    }

    fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    async fn connect(&self, credentials: &Credentials) -> Result<()> {
        if credentials.mode() != ConnectionMode::Embedded {
            return Err(StudioError::connection(
                "the embedded engine does not accept remote credentials",
            ));
        }
        let changed = {
            let mut state = self.lock();
            !std::mem::replace(&mut state.connected, true)
        };
        if changed {
            self.emit(ServiceEvent::StatusChanged(LiveStatus::Connected));
            self.emit(ServiceEvent::ModeChanged(Some(ConnectionMode::Embedded)));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let changed = std::mem::replace(&mut self.lock().connected, false);
        if changed {
            self.emit(ServiceEvent::StatusChanged(LiveStatus::Disconnected));
            self.emit(ServiceEvent::ModeChanged(None));
        }
        Ok(())
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        let state = self.lock();
        if !state.connected {
            return Err(StudioError::NotConnected);
        }
        Ok(state.databases.keys().cloned().collect())
    }

    async fn create_database(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(StudioError::NotConnected);
        }
        if name.trim().is_empty() {
            return Err(StudioError::query("Database name cannot be empty"));
        }
        if state.databases.contains_key(name) {
            return Err(StudioError::query(format!("Database '{}' already exists", name)));
        }
        state.databases.insert(name.to_string(), Database::default());
        debug!(database = name, "Created database");
        Ok(())
    }

    async fn execute_query(
        &self,
        database: &str,
        query: &str,
        kind: TransactionKind,
    ) -> Result<QueryResponse> {
        self.with_database(database, |db| execute(db, query, kind))
    }

    async fn schema_text(&self, database: &str) -> Result<String> {
        self.with_database(database, |db| Ok(db.schema_text()))
    }
}

fn execute(db: &mut Database, query: &str, kind: TransactionKind) -> Result<QueryResponse> {
    let tokens = typeql::tokenize(query).map_err(StudioError::query)?;
    let Some(leading) = tokens.first().and_then(Token::ident).map(str::to_ascii_lowercase) else {
        return Err(StudioError::query("Empty query"));
    };

    match leading.as_str() {
        "define" | "undefine" | "redefine" => {
            if kind != TransactionKind::Schema {
                return Err(StudioError::query(
                    "Schema queries must run in a schema transaction",
                ));
            }
            let body = &tokens[1..];
            match leading.as_str() {
                "define" => define(db, query, body).map(|_| QueryResponse::Define { success: true }),
                "undefine" => undefine(db, body).map(|_| QueryResponse::Undefine { success: true }),
                _ => redefine(db, query, body).map(|_| QueryResponse::Redefine { success: true }),
            }
        }
        "match" | "insert" => {
            let catalog = db.catalog()?;
            let stages = parse_pipeline(&tokens)?;
            if stages.iter().any(Stage::writes) && kind == TransactionKind::Read {
                return Err(StudioError::query(
                    "Write queries must run in a write transaction",
                ));
            }
            run_pipeline(db, &catalog, stages)
        }
        other => Err(StudioError::query(format!("Unsupported query: '{}'", other))),
    }
}

/// Label declared by one schema statement
fn declared_label(statement: &[Token]) -> Option<&str> {
    let first = statement.first()?.ident()?;
    if matches!(first.to_ascii_lowercase().as_str(), "entity" | "relation" | "attribute") {
        statement.get(1)?.ident()
    } else {
        Some(first)
    }
}

fn schema_statements<'a>(text: &'a str, body: &'a [Token]) -> Result<Vec<Definition>> {
    typeql::split_statements(body)
        .into_iter()
        .map(|statement| {
            let label = declared_label(statement)
                .ok_or_else(|| StudioError::query("Expected a type declaration"))?;
            Ok(Definition {
                label: label.to_string(),
                text: typeql::source_of(text, statement).to_string(),
            })
        })
        .collect()
}

/// Replace the definitions, keeping them only if the result is consistent
fn apply_definitions(db: &mut Database, definitions: Vec<Definition>) -> Result<()> {
    let previous = std::mem::replace(&mut db.definitions, definitions);
    let checked = db
        .catalog()
        .map_err(StudioError::query)
        .and_then(|catalog| validate(&catalog));
    if let Err(e) = checked {
        db.definitions = previous;
        return Err(e);
    }
    Ok(())
}

/// Every referenced type must be declared
fn validate(catalog: &SchemaCatalog) -> Result<()> {
    let declared = |label: &str| {
        catalog.entity(label).is_some()
            || catalog.relation(label).is_some()
            || catalog.attribute(label).is_some()
    };
    let missing = |label: &str, referrer: &str| {
        StudioError::query(format!(
            "Type '{}' referenced by '{}' is not defined",
            label, referrer
        ))
    };

    let owners = catalog
        .entities
        .iter()
        .map(|e| (&e.label, &e.supertype, &e.owned_attributes, &e.played_roles))
        .chain(
            catalog
                .relations
                .iter()
                .map(|r| (&r.label, &r.supertype, &r.owned_attributes, &r.played_roles)),
        );

    for (label, supertype, owned, played) in owners {
        if let Some(parent) = supertype.as_deref().filter(|p| !declared(p)) {
            return Err(missing(parent, label));
        }
        if let Some(attribute) = owned.iter().find(|a| catalog.attribute(a).is_none()) {
            return Err(missing(attribute, label));
        }
        for role in played {
            let scope = role.split(':').next().unwrap_or(role);
            if catalog.relation(scope).is_none() {
                return Err(missing(scope, label));
            }
        }
    }
    for attribute in &catalog.attributes {
        if let Some(parent) = attribute.supertype.as_deref().filter(|p| !declared(p)) {
            return Err(missing(parent, &attribute.label));
        }
    }
    Ok(())
}

fn define(db: &mut Database, text: &str, body: &[Token]) -> Result<()> {
    let added = schema_statements(text, body)?;
    if added.is_empty() {
        return Err(StudioError::query("Nothing to define"));
    }
    let mut definitions = db.definitions.clone();
    definitions.extend(added);
    apply_definitions(db, definitions)
}

fn undefine(db: &mut Database, body: &[Token]) -> Result<()> {
    let mut definitions = db.definitions.clone();
    for statement in typeql::split_statements(body) {
        let label = match statement {
            [token] => token.ident(),
            _ => None,
        }
        .ok_or_else(|| StudioError::query("Only 'undefine <label>;' is supported"))?;

        if !definitions.iter().any(|d| d.label == label) {
            return Err(StudioError::query(format!("Type '{}' not found", label)));
        }
        if db.concepts.iter().any(|c| c.label == label) {
            return Err(StudioError::query(format!(
                "Type '{}' has instances and cannot be undefined",
                label
            )));
        }
        definitions.retain(|d| d.label != label);
    }
    apply_definitions(db, definitions)
}

fn redefine(db: &mut Database, text: &str, body: &[Token]) -> Result<()> {
    let mut definitions = db.definitions.clone();
    for replacement in schema_statements(text, body)? {
        if !definitions.iter().any(|d| d.label == replacement.label) {
            return Err(StudioError::query(format!(
                "Type '{}' not found",
                replacement.label
            )));
        }
        definitions.retain(|d| d.label != replacement.label);
        definitions.push(replacement);
    }
    apply_definitions(db, definitions)
}

/// Right-hand side of `has`
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Value(Value),
    Var(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Constraint {
    Isa(String),
    Has(String, Operand),
    /// `(role, player var)`
    Links(Vec<(Option<String>, String)>),
}

/// `$var constraint, constraint, ...`
#[derive(Debug, Clone, PartialEq)]
struct Pattern {
    var: String,
    constraints: Vec<Constraint>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Reducer {
    Count,
    Sum,
    Min,
    Max,
    Mean,
}

#[derive(Debug, Clone, PartialEq)]
enum Stage {
    Match(Vec<Pattern>),
    Insert(Vec<Pattern>),
    Delete(Vec<String>),
    /// `(key, var, attribute)`
    Fetch(Vec<(String, String, Option<String>)>),
    Reduce {
        reducer: Reducer,
        var: Option<String>,
    },
}

impl Stage {
    fn writes(&self) -> bool {
        matches!(self, Stage::Insert(_) | Stage::Delete(_))
    }
}

fn unsupported(tokens: &[Token]) -> StudioError {
    let near = tokens
        .first()
        .map(|t| format!("{:?}", t.kind))
        .unwrap_or_else(|| "end of query".to_string());
    StudioError::query(format!("Unsupported syntax near {}", near))
}

fn parse_pipeline(tokens: &[Token]) -> Result<Vec<Stage>> {
    let mut stages: Vec<Stage> = Vec::new();

    for segment in typeql::split_statements(tokens) {
        let keyword = segment[0].ident().map(str::to_ascii_lowercase);
        match keyword.as_deref() {
            Some("match") => stages.push(Stage::Match(patterns_of(&segment[1..])?)),
            Some("insert") => stages.push(Stage::Insert(patterns_of(&segment[1..])?)),
            Some("delete") => stages.push(Stage::Delete(delete_vars(&segment[1..])?)),
            Some("fetch") => stages.push(Stage::Fetch(fetch_fields(&segment[1..])?)),
            Some("reduce") => stages.push(parse_reduce(&segment[1..])?),
            Some("update") | Some("put") => {
                return Err(StudioError::query("update and put stages are not supported"))
            }
            _ => match stages.last_mut() {
                Some(Stage::Match(patterns)) | Some(Stage::Insert(patterns)) => {
                    patterns.push(parse_pattern(segment)?)
                }
                _ => return Err(unsupported(segment)),
            },
        }
    }

    Ok(stages)
}

fn patterns_of(tokens: &[Token]) -> Result<Vec<Pattern>> {
    if tokens.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![parse_pattern(tokens)?])
}

/// Split at top-level commas
fn split_commas(tokens: &[Token]) -> Vec<&[Token]> {
    let mut parts = Vec::new();
    let mut depth: usize = 0;
    let mut begin = 0;
    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::Punct('(') | TokenKind::Punct('{') | TokenKind::Punct('[') => depth += 1,
            TokenKind::Punct(')') | TokenKind::Punct('}') | TokenKind::Punct(']') => {
                depth = depth.saturating_sub(1)
            }
            TokenKind::Punct(',') if depth == 0 => {
                parts.push(&tokens[begin..i]);
                begin = i + 1;
            }
            _ => {}
        }
    }
    if begin < tokens.len() {
        parts.push(&tokens[begin..]);
    }
    parts
}

fn parse_pattern(tokens: &[Token]) -> Result<Pattern> {
    let Some(TokenKind::Var(var)) = tokens.first().map(|t| &t.kind) else {
        return Err(unsupported(tokens));
    };

    let constraints = split_commas(&tokens[1..])
        .into_iter()
        .map(parse_constraint)
        .collect::<Result<Vec<_>>>()?;

    Ok(Pattern {
        var: var.clone(),
        constraints,
    })
}

fn parse_constraint(tokens: &[Token]) -> Result<Constraint> {
    let keyword = tokens.first().and_then(Token::ident).map(str::to_ascii_lowercase);
    match keyword.as_deref() {
        Some("isa") => {
            let rest = match tokens.get(1) {
                Some(t) if t.is_punct('!') => &tokens[2..],
                _ => &tokens[1..],
            };
            match rest {
                [label] => label
                    .ident()
                    .map(|l| Constraint::Isa(l.to_string()))
                    .ok_or_else(|| unsupported(rest)),
                _ => Err(unsupported(rest)),
            }
        }
        Some("has") => match &tokens[1..] {
            [label, operand] => {
                let label = label.ident().ok_or_else(|| unsupported(&tokens[1..]))?;
                Ok(Constraint::Has(label.to_string(), parse_operand(operand)?))
            }
            rest => Err(unsupported(rest)),
        },
        Some("links") => {
            let inner = match &tokens[1..] {
                [open, inner @ .., close] if open.is_punct('(') && close.is_punct(')') => inner,
                rest => return Err(unsupported(rest)),
            };
            let players = split_commas(inner)
                .into_iter()
                .map(|player| match player {
                    [role, colon, var] if colon.is_punct(':') => match (&role.kind, &var.kind) {
                        (TokenKind::Ident(role), TokenKind::Var(var)) => {
                            Ok((Some(role.clone()), var.clone()))
                        }
                        _ => Err(unsupported(player)),
                    },
                    [var] => match &var.kind {
                        TokenKind::Var(var) => Ok((None, var.clone())),
                        _ => Err(unsupported(player)),
                    },
                    _ => Err(unsupported(player)),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Constraint::Links(players))
        }
        _ => Err(unsupported(tokens)),
    }
}

fn parse_operand(token: &Token) -> Result<Operand> {
    match &token.kind {
        TokenKind::Var(var) => Ok(Operand::Var(var.clone())),
        TokenKind::Str(s) => Ok(Operand::Value(Value::String(s.clone()))),
        TokenKind::Number(n) | TokenKind::Ident(n) => Ok(Operand::Value(literal(n))),
        _ => Err(unsupported(std::slice::from_ref(token))),
    }
}

/// Numbers and booleans as JSON, anything else (dates) as a string
fn literal(text: &str) -> Value {
    match text {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = text.parse::<i64>() {
        return json!(n);
    }
    if let Ok(f) = text.parse::<f64>() {
        return json!(f);
    }
    Value::String(text.to_string())
}

fn delete_vars(tokens: &[Token]) -> Result<Vec<String>> {
    split_commas(tokens)
        .into_iter()
        .map(|part| match part {
            [token] => match &token.kind {
                TokenKind::Var(var) => Ok(var.clone()),
                _ => Err(unsupported(part)),
            },
            // `delete $x isa person` from older syntax
            [token, isa, _] if isa.is_keyword("isa") => match &token.kind {
                TokenKind::Var(var) => Ok(var.clone()),
                _ => Err(unsupported(part)),
            },
            _ => Err(StudioError::query("Only 'delete $var;' is supported")),
        })
        .collect()
}

fn fetch_fields(tokens: &[Token]) -> Result<Vec<(String, String, Option<String>)>> {
    let inner = match tokens {
        [open, inner @ .., close] if open.is_punct('{') && close.is_punct('}') => inner,
        _ => return Err(unsupported(tokens)),
    };

    split_commas(inner)
        .into_iter()
        .filter(|field| !field.is_empty())
        .map(|field| {
            // A trailing `;` inside the braces is allowed
            let field = match field {
                [rest @ .., last] if last.is_punct(';') => rest,
                _ => field,
            };
            match field {
                [key, colon, var, rest @ ..] if colon.is_punct(':') => {
                    let TokenKind::Str(key) = &key.kind else {
                        return Err(unsupported(field));
                    };
                    let TokenKind::Var(var) = &var.kind else {
                        return Err(unsupported(field));
                    };
                    let attribute = match rest {
                        [] => None,
                        [dot, attr] if dot.is_punct('.') => {
                            Some(attr.ident().ok_or_else(|| unsupported(rest))?.to_string())
                        }
                        _ => return Err(unsupported(rest)),
                    };
                    Ok((key.clone(), var.clone(), attribute))
                }
                _ => Err(unsupported(field)),
            }
        })
        .collect()
}

fn parse_reduce(tokens: &[Token]) -> Result<Stage> {
    let (function, argument) = match tokens {
        [_, eq, function] if eq.is_punct('=') => (function, None),
        [_, eq, function, open, arg, close]
            if eq.is_punct('=') && open.is_punct('(') && close.is_punct(')') =>
        {
            let TokenKind::Var(var) = &arg.kind else {
                return Err(unsupported(tokens));
            };
            (function, Some(var.clone()))
        }
        _ => return Err(unsupported(tokens)),
    };

    let reducer = match function.ident().map(str::to_ascii_lowercase).as_deref() {
        Some("count") => Reducer::Count,
        Some("sum") => Reducer::Sum,
        Some("min") => Reducer::Min,
        Some("max") => Reducer::Max,
        Some("mean") => Reducer::Mean,
        _ => return Err(unsupported(std::slice::from_ref(function))),
    };
    if reducer != Reducer::Count && argument.is_none() {
        return Err(StudioError::query("This reducer needs a variable argument"));
    }

    Ok(Stage::Reduce {
        reducer,
        var: argument,
    })
}

/// A variable binding: a concept iid or an attribute value
#[derive(Debug, Clone, PartialEq)]
enum Bound {
    Concept(String),
    Value(Value),
}

type Binding = BTreeMap<String, Bound>;

fn run_pipeline(db: &mut Database, catalog: &SchemaCatalog, stages: Vec<Stage>) -> Result<QueryResponse> {
    let mut rows: Vec<Binding> = vec![Binding::new()];
    let mut response = None;

    for stage in stages {
        response = None;
        match stage {
            Stage::Match(patterns) => {
                rows = match_patterns(db, catalog, &patterns, rows)?;
            }
            Stage::Insert(patterns) => {
                let mut inserted = Vec::new();
                for row in &mut rows {
                    inserted.push(insert_patterns(db, catalog, &patterns, row)?);
                }
                response = Some(QueryResponse::Insert {
                    inserted: inserted.iter().map(|row| answer(db, row)).collect(),
                });
                rows = inserted;
            }
            Stage::Delete(vars) => {
                let mut doomed: Vec<String> = Vec::new();
                for row in &rows {
                    for var in &vars {
                        match row.get(var) {
                            Some(Bound::Concept(iid)) if !doomed.contains(iid) => doomed.push(iid.clone()),
                            Some(Bound::Concept(_)) => {}
                            _ => {
                                return Err(StudioError::query(format!(
                                    "Variable '${}' is not bound to a concept",
                                    var
                                )))
                            }
                        }
                    }
                }
                db.concepts.retain(|c| !doomed.contains(&c.iid));
                for concept in &mut db.concepts {
                    concept.players.retain(|(_, iid)| !doomed.contains(iid));
                }
                response = Some(QueryResponse::Delete {
                    deleted_count: doomed.len() as u64,
                });
            }
            Stage::Fetch(fields) => {
                let documents = rows
                    .iter()
                    .map(|row| {
                        let mut document = Map::new();
                        for (key, var, attribute) in &fields {
                            document.insert(key.clone(), fetch_value(db, row, var, attribute.as_deref()));
                        }
                        Value::Object(document)
                    })
                    .collect();
                response = Some(QueryResponse::Fetch { documents });
            }
            Stage::Reduce { reducer, var } => {
                response = Some(QueryResponse::Aggregate {
                    value: reduce(&rows, reducer, var.as_deref()),
                });
            }
        }
    }

    Ok(response.unwrap_or_else(|| QueryResponse::Match {
        answers: rows.iter().map(|row| answer(db, row)).collect(),
    }))
}

fn answer(db: &Database, row: &Binding) -> Row {
    row.iter()
        .map(|(var, bound)| {
            let value = match bound {
                Bound::Concept(iid) => db.concept(iid).map_or(Value::Null, Concept::to_json),
                Bound::Value(value) => value.clone(),
            };
            (var.clone(), value)
        })
        .collect()
}

fn fetch_value(db: &Database, row: &Binding, var: &str, attribute: Option<&str>) -> Value {
    match (row.get(var), attribute) {
        (Some(Bound::Concept(iid)), Some(attribute)) => db
            .concept(iid)
            .and_then(|c| c.attribute(attribute).cloned())
            .unwrap_or(Value::Null),
        (Some(Bound::Concept(iid)), None) => {
            let Some(concept) = db.concept(iid) else {
                return Value::Null;
            };
            let mut document = Map::new();
            document.insert("type".to_string(), json!(concept.label));
            for (label, value) in &concept.attributes {
                document.insert(label.clone(), value.clone());
            }
            Value::Object(document)
        }
        (Some(Bound::Value(value)), None) => value.clone(),
        _ => Value::Null,
    }
}

fn reduce(rows: &[Binding], reducer: Reducer, var: Option<&str>) -> Value {
    if reducer == Reducer::Count {
        let count = match var {
            Some(var) => rows.iter().filter(|row| row.contains_key(var)).count(),
            None => rows.len(),
        };
        return json!(count);
    }

    let numbers: Vec<f64> = rows
        .iter()
        .filter_map(|row| match var.and_then(|v| row.get(v)) {
            Some(Bound::Value(value)) => value.as_f64(),
            _ => None,
        })
        .collect();
    if numbers.is_empty() {
        return Value::Null;
    }

    let result = match reducer {
        Reducer::Sum => numbers.iter().sum(),
        Reducer::Min => numbers.iter().copied().fold(f64::INFINITY, f64::min),
        Reducer::Max => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Reducer::Mean => numbers.iter().sum::<f64>() / numbers.len() as f64,
        Reducer::Count => numbers.len() as f64,
    };
    json!(result)
}

/// Whether `label` (or a supertype) owns `attribute`
fn owns(catalog: &SchemaCatalog, label: &str, attribute: &str) -> bool {
    let mut current = Some(label);
    let mut hops = 0;
    while let Some(l) = current {
        let owned = catalog
            .entity(l)
            .map(|e| &e.owned_attributes)
            .or_else(|| catalog.relation(l).map(|r| &r.owned_attributes));
        if owned.is_some_and(|owned| owned.iter().any(|a| a == attribute)) {
            return true;
        }
        hops += 1;
        if hops > 64 {
            return false;
        }
        current = catalog.supertype_of(l);
    }
    false
}

fn type_matches(catalog: &SchemaCatalog, concept_label: &str, wanted: &str) -> bool {
    match wanted {
        "entity" => catalog.entity(concept_label).is_some(),
        "relation" => catalog.relation(concept_label).is_some(),
        _ => catalog.is_subtype_of(concept_label, wanted),
    }
}

fn known_type(catalog: &SchemaCatalog, label: &str) -> bool {
    matches!(label, "thing" | "entity" | "relation")
        || catalog.entity(label).is_some()
        || catalog.relation(label).is_some()
        || catalog.attribute(label).is_some()
}

fn match_patterns(
    db: &Database,
    catalog: &SchemaCatalog,
    patterns: &[Pattern],
    rows: Vec<Binding>,
) -> Result<Vec<Binding>> {
    for pattern in patterns {
        for constraint in &pattern.constraints {
            if let Constraint::Isa(label) = constraint {
                if !known_type(catalog, label) {
                    return Err(StudioError::query(format!("Type '{}' not found", label)));
                }
            }
        }
    }

    let mut rows = rows;
    for pattern in patterns {
        let mut next = Vec::new();
        for row in rows {
            next.extend(match_pattern(db, catalog, pattern, row));
        }
        rows = next;
    }
    Ok(rows)
}

/// Extend one binding with every way `pattern` can match
fn match_pattern(db: &Database, catalog: &SchemaCatalog, pattern: &Pattern, row: Binding) -> Vec<Binding> {
    let candidates: Vec<&Concept> = match row.get(&pattern.var) {
        Some(Bound::Concept(iid)) => db.concept(iid).into_iter().collect(),
        Some(Bound::Value(_)) => return Vec::new(),
        None => db.concepts.iter().collect(),
    };

    let mut results = Vec::new();
    for concept in candidates {
        let mut partial = vec![row.clone()];
        for binding in &mut partial {
            binding.insert(pattern.var.clone(), Bound::Concept(concept.iid.clone()));
        }

        for constraint in &pattern.constraints {
            partial = partial
                .into_iter()
                .flat_map(|binding| apply_constraint(db, catalog, concept, constraint, binding))
                .collect();
            if partial.is_empty() {
                break;
            }
        }
        results.extend(partial);
    }
    results
}

fn apply_constraint(
    db: &Database,
    catalog: &SchemaCatalog,
    concept: &Concept,
    constraint: &Constraint,
    binding: Binding,
) -> Vec<Binding> {
    match constraint {
        Constraint::Isa(label) => {
            if type_matches(catalog, &concept.label, label) {
                vec![binding]
            } else {
                Vec::new()
            }
        }
        Constraint::Has(attribute, Operand::Value(expected)) => {
            let found = concept
                .attributes
                .iter()
                .any(|(l, v)| l == attribute && v == expected);
            if found {
                vec![binding]
            } else {
                Vec::new()
            }
        }
        Constraint::Has(attribute, Operand::Var(var)) => concept
            .attributes
            .iter()
            .filter(|(l, _)| l == attribute)
            .filter_map(|(_, value)| match binding.get(var) {
                Some(Bound::Value(bound)) if bound == value => Some(binding.clone()),
                Some(_) => None,
                None => {
                    let mut extended = binding.clone();
                    extended.insert(var.clone(), Bound::Value(value.clone()));
                    Some(extended)
                }
            })
            .collect(),
        Constraint::Links(players) => {
            let mut bindings = vec![binding];
            for (role, var) in players {
                bindings = bindings
                    .into_iter()
                    .flat_map(|binding| {
                        concept
                            .players
                            .iter()
                            .filter(|(r, _)| role.as_ref().map_or(true, |role| role == r))
                            .filter(|(_, iid)| db.concept(iid).is_some())
                            .filter_map(|(_, iid)| match binding.get(var) {
                                Some(Bound::Concept(bound)) if bound == iid => Some(binding.clone()),
                                Some(_) => None,
                                None => {
                                    let mut extended = binding.clone();
                                    extended.insert(var.clone(), Bound::Concept(iid.clone()));
                                    Some(extended)
                                }
                            })
                            .collect::<Vec<_>>()
                    })
                    .collect();
            }
            bindings
        }
    }
}

/// Run insert patterns for one input row, returning the row extended with
/// the new concepts
fn insert_patterns(
    db: &mut Database,
    catalog: &SchemaCatalog,
    patterns: &[Pattern],
    row: &Binding,
) -> Result<Binding> {
    let mut row = row.clone();

    for pattern in patterns {
        let isa = pattern.constraints.iter().find_map(|c| match c {
            Constraint::Isa(label) => Some(label.clone()),
            _ => None,
        });

        let bound = row.get(&pattern.var).cloned();
        let iid = match (bound, isa) {
            (None, Some(label)) => {
                let is_abstract = match (catalog.entity(&label), catalog.relation(&label)) {
                    (Some(entity), _) => entity.is_abstract,
                    (None, Some(relation)) => relation.is_abstract,
                    (None, None) => {
                        return Err(StudioError::query(format!(
                            "Type '{}' not found or not insertable",
                            label
                        )))
                    }
                };
                if is_abstract {
                    return Err(StudioError::query(format!(
                        "Cannot insert an instance of abstract type '{}'",
                        label
                    )));
                }
                let iid = db.allocate_iid();
                db.concepts.push(Concept {
                    iid: iid.clone(),
                    label,
                    attributes: Vec::new(),
                    players: Vec::new(),
                });
                row.insert(pattern.var.clone(), Bound::Concept(iid.clone()));
                iid
            }
            (Some(Bound::Concept(iid)), None) => iid,
            (Some(_), Some(_)) => {
                return Err(StudioError::query(format!(
                    "Variable '${}' is already bound",
                    pattern.var
                )))
            }
            _ => {
                return Err(StudioError::query(format!(
                    "Variable '${}' needs a type to be inserted",
                    pattern.var
                )))
            }
        };

        for constraint in &pattern.constraints {
            match constraint {
                Constraint::Isa(_) => {}
                Constraint::Has(attribute, operand) => {
                    let value = match operand {
                        Operand::Value(value) => value.clone(),
                        Operand::Var(var) => match row.get(var) {
                            Some(Bound::Value(value)) => value.clone(),
                            _ => {
                                return Err(StudioError::query(format!(
                                    "Variable '${}' is not bound to a value",
                                    var
                                )))
                            }
                        },
                    };
                    let label = db
                        .concept(&iid)
                        .map(|c| c.label.clone())
                        .unwrap_or_default();
                    if !owns(catalog, &label, attribute) {
                        return Err(StudioError::query(format!(
                            "Type '{}' does not own attribute '{}'",
                            label, attribute
                        )));
                    }
                    if let Some(concept) = db.concepts.iter_mut().find(|c| c.iid == iid) {
                        concept.attributes.push((attribute.clone(), value));
                    }
                }
                Constraint::Links(players) => {
                    let mut resolved = Vec::new();
                    for (role, var) in players {
                        let Some(Bound::Concept(player)) = row.get(var) else {
                            return Err(StudioError::query(format!(
                                "Role player '${}' is not bound",
                                var
                            )));
                        };
                        resolved.push((role.clone().unwrap_or_default(), player.clone()));
                    }
                    if let Some(concept) = db.concepts.iter_mut().find(|c| c.iid == iid) {
                        concept.players.extend(resolved);
                    }
                }
            }
        }
    }

    Ok(row)
}
