//! Result projections
//!
//! Turns one structured response into the three views the studio renders:
//! log lines, a table and the raw JSON payload.

use crate::query::{QueryResultState, TransactionKind};
use crate::service::QueryResponse;
use serde_json::{json, Value};

/// The rendered views of a single response
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub result_kind: String,
    pub row_count: u64,
    pub summary: String,
    pub log_lines: Vec<String>,
    pub table_columns: Vec<String>,
    pub table_rows: Vec<Vec<String>>,
    pub raw_json: String,
}

impl Projection {
    /// Project a response
    pub fn from_response(
        query: &str,
        kind: TransactionKind,
        elapsed_ms: u64,
        response: &QueryResponse,
    ) -> Self {
        let rows = table_source(response);
        let row_count = row_count(response);
        let summary = summary(response, row_count);
        let payload = payload(response);

        let mut log_lines = vec![
            format!("> {}", query.trim()),
            format!("Transaction: {}", kind),
            format!("Elapsed: {} ms", elapsed_ms),
            summary.clone(),
        ];
        log_lines.extend(rows.iter().map(|row| row.to_string()));

        let (table_columns, table_rows) = table(&rows);

        Self {
            result_kind: response.kind_name().to_string(),
            row_count,
            summary,
            log_lines,
            table_columns,
            table_rows,
            raw_json: serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string()),
        }
    }

    /// Write the projection into the result slot
    pub fn apply(self, slot: &mut QueryResultState) {
        slot.result_kind = Some(self.result_kind);
        slot.result_count = self.row_count;
        slot.log_lines = self.log_lines;
        slot.table_columns = self.table_columns;
        slot.table_rows = self.table_rows;
        slot.raw_json = Some(self.raw_json);
    }
}

/// Number of rows a response counts for
pub fn row_count(response: &QueryResponse) -> u64 {
    match response {
        QueryResponse::Match { answers } => answers.len() as u64,
        QueryResponse::Fetch { documents } => documents.len() as u64,
        QueryResponse::Insert { inserted } => inserted.len() as u64,
        QueryResponse::Delete { deleted_count } => *deleted_count,
        QueryResponse::Define { success }
        | QueryResponse::Undefine { success }
        | QueryResponse::Redefine { success } => u64::from(*success),
        QueryResponse::Aggregate { .. } => 1,
    }
}

fn summary(response: &QueryResponse, count: u64) -> String {
    match response {
        QueryResponse::Match { .. } => format!("{} row(s) returned", count),
        QueryResponse::Fetch { .. } => format!("{} document(s) fetched", count),
        QueryResponse::Insert { .. } => format!("{} concept(s) inserted", count),
        QueryResponse::Delete { .. } => format!("{} concept(s) deleted", count),
        QueryResponse::Define { success } => schema_summary("defined", *success),
        QueryResponse::Undefine { success } => schema_summary("undefined", *success),
        QueryResponse::Redefine { success } => schema_summary("redefined", *success),
        QueryResponse::Aggregate { value } => format!("Aggregate result: {}", value),
    }
}

fn schema_summary(verb: &str, success: bool) -> String {
    if success {
        format!("Schema {} successfully", verb)
    } else {
        format!("Schema was not {}", verb)
    }
}

/// The JSON payload shown in the raw view
fn payload(response: &QueryResponse) -> Value {
    match response {
        QueryResponse::Match { answers } => json!(answers),
        QueryResponse::Fetch { documents } => json!(documents),
        QueryResponse::Insert { inserted } => json!(inserted),
        QueryResponse::Delete { deleted_count } => json!({ "deletedCount": deleted_count }),
        QueryResponse::Define { success }
        | QueryResponse::Undefine { success }
        | QueryResponse::Redefine { success } => json!({ "success": success }),
        QueryResponse::Aggregate { value } => value.clone(),
    }
}

/// Rows shown in the table and log views
fn table_source(response: &QueryResponse) -> Vec<Value> {
    match response {
        QueryResponse::Match { answers } => answers.iter().cloned().map(Value::Object).collect(),
        QueryResponse::Insert { inserted } => inserted.iter().cloned().map(Value::Object).collect(),
        QueryResponse::Fetch { documents } => documents.clone(),
        QueryResponse::Aggregate { value } => vec![json!({ "value": value })],
        _ => Vec::new(),
    }
}

/// Columns from the first row's keys, cells as stable strings
fn table(rows: &[Value]) -> (Vec<String>, Vec<Vec<String>>) {
    let columns: Vec<String> = match rows.first() {
        Some(Value::Object(map)) => map.keys().cloned().collect(),
        Some(_) => vec!["value".to_string()],
        None => return (Vec::new(), Vec::new()),
    };

    let table_rows = rows
        .iter()
        .map(|row| match row {
            Value::Object(map) => columns
                .iter()
                .map(|column| map.get(column).map(cell).unwrap_or_default())
                .collect(),
            other => {
                let mut cells = vec![String::new(); columns.len()];
                if let Some(first) = cells.first_mut() {
                    *first = cell(other);
                }
                cells
            }
        })
        .collect();

    (columns, table_rows)
}

/// Cell text: strings unquoted, null empty, everything else as JSON
pub fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Row;

    fn row(name: &str) -> Row {
        let mut row = Row::new();
        row.insert("name".to_string(), json!(name));
        row.insert("age".to_string(), json!(30));
        row
    }

    #[test]
    fn test_match_projection() {
        let response = QueryResponse::Match {
            answers: vec![row("Alice"), row("Bob")],
        };
        let projection =
            Projection::from_response("match $p isa person;", TransactionKind::Read, 12, &response);

        assert_eq!(projection.row_count, 2);
        assert_eq!(projection.table_columns.len(), 2);
        let name = projection
            .table_columns
            .iter()
            .position(|c| c == "name")
            .unwrap();
        assert_eq!(projection.table_rows[0][name], "Alice");
        assert_eq!(projection.table_rows[1][1 - name], "30");
        assert!(projection.log_lines.iter().any(|l| l.contains("2 row(s)")));
        assert_eq!(projection.log_lines[1], "Transaction: read");
        assert_eq!(projection.log_lines.len(), 6);

        let raw: Value = serde_json::from_str(&projection.raw_json).unwrap();
        assert_eq!(raw.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_schema_projection() {
        let response = QueryResponse::Define { success: true };
        let projection = Projection::from_response("define entity a;", TransactionKind::Schema, 1, &response);

        assert_eq!(projection.row_count, 1);
        assert!(projection.table_rows.is_empty());
        assert_eq!(projection.summary, "Schema defined successfully");
        let raw: Value = serde_json::from_str(&projection.raw_json).unwrap();
        assert_eq!(raw, json!({ "success": true }));
    }

    #[test]
    fn test_delete_and_aggregate_counts() {
        let delete = QueryResponse::Delete { deleted_count: 4 };
        assert_eq!(row_count(&delete), 4);

        let aggregate = QueryResponse::Aggregate { value: json!(7) };
        let projection = Projection::from_response("match ...", TransactionKind::Read, 0, &aggregate);
        assert_eq!(projection.row_count, 1);
        assert_eq!(projection.table_columns, vec!["value"]);
        assert_eq!(projection.table_rows, vec![vec!["7".to_string()]]);
        assert_eq!(projection.raw_json, "7");
    }

    #[test]
    fn test_fetch_documents_with_scalars() {
        let fetch = QueryResponse::Fetch {
            documents: vec![json!("plain"), json!(null)],
        };
        let projection = Projection::from_response("match ...", TransactionKind::Read, 0, &fetch);
        assert_eq!(projection.table_columns, vec!["value"]);
        assert_eq!(projection.table_rows, vec![vec!["plain".to_string()], vec![String::new()]]);
        assert_eq!(projection.summary, "2 document(s) fetched");
    }
}
