//! Row-oriented dataset decoded from a query attachment.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::json_repair::{repair_parse, RepairError};

/// Column name under which per-row narratives are merged back.
pub const PROMPT_RESULT_COLUMN: &str = "prompt_result";

/// One record: column name to value, in source column order.
pub type Row = Map<String, Value>;

/// Ordered sequence of rows. Lives for a single request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    rows: Vec<Row>,
}

impl Dataset {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    /// Decode an attachment payload, repairing stray quotes if needed.
    pub fn from_json(text: &str) -> Result<Self, RepairError> {
        let value: Value = repair_parse(text)?;
        Self::from_value(value)
    }

    /// Accept a top-level array whose items are all objects.
    pub fn from_value(value: Value) -> Result<Self, RepairError> {
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(RepairError::Shape(format!(
                    "top-level value is {}",
                    kind(&other)
                )))
            }
        };

        let rows = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(row) => Ok(row),
                other => Err(RepairError::Shape(format!("row {i} is {}", kind(&other)))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Write one narrative per row under [`PROMPT_RESULT_COLUMN`].
    ///
    /// Extra narratives are ignored and rows without one are left untouched;
    /// callers pass exactly one per row.
    pub fn merge_row_results(&mut self, results: Vec<String>) {
        for (row, result) in self.rows.iter_mut().zip(results) {
            row.insert(PROMPT_RESULT_COLUMN.to_string(), Value::String(result));
        }
    }

    /// Union of column names in order of first appearance.
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for row in &self.rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        columns
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
