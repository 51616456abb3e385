//! Tabular source collaborator
//!
//! Read access to named tables as flat records, plus the exact-key left join
//! the task initializer needs. Storage and ingestion live outside the engine;
//! `CsvDirectory` reads one CSV file per table and `MemoryTables` holds tables
//! in process.

use reconlab_common::{Error, FlatRecord, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

/// One row of a left join: the target row and its matched source row, if any
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRow {
    pub target: FlatRecord,
    pub source: Option<FlatRecord>,
}

/// Named tables readable as flat records
pub trait TabularSource: Send + Sync {
    /// Column names of a table, in table order
    fn columns(&self, table: &str) -> Result<Vec<String>>;

    /// All rows of a table, in table order
    fn rows(&self, table: &str) -> Result<Vec<FlatRecord>>;

    /// Left outer join of `target` with `source` on exact key equality
    ///
    /// Every target row appears at least once. A target row matching several
    /// source rows appears once per match, in source order. Null keys never
    /// match.
    fn left_join(
        &self,
        target: &str,
        source: &str,
        target_key: &str,
        source_key: &str,
    ) -> Result<Vec<JoinedRow>> {
        require_column(self, target, target_key)?;
        require_column(self, source, source_key)?;

        let source_rows = self.rows(source)?;
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (position, row) in source_rows.iter().enumerate() {
            if let Some(key) = row.get(source_key).and_then(join_value) {
                index.entry(key).or_default().push(position);
            }
        }

        let mut joined = Vec::new();
        for row in self.rows(target)? {
            let matches = row
                .get(target_key)
                .and_then(join_value)
                .and_then(|key| index.get(&key));

            match matches {
                Some(positions) => {
                    for &position in positions {
                        joined.push(JoinedRow {
                            target: row.clone(),
                            source: Some(source_rows[position].clone()),
                        });
                    }
                }
                None => joined.push(JoinedRow {
                    target: row,
                    source: None,
                }),
            }
        }

        Ok(joined)
    }
}

fn require_column<S: TabularSource + ?Sized>(tables: &S, table: &str, column: &str) -> Result<()> {
    if tables.columns(table)?.iter().any(|c| c == column) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Join column '{}' not found in table '{}'",
            column, table
        )))
    }
}

/// Equality key for a join column value; `None` for null
///
/// Values are compared by their JSON encoding, so the string "1" and the
/// number 1 are different keys.
fn join_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Directory holding one `<table>.csv` file per table
///
/// The header row names the columns; empty cells read as null.
#[derive(Debug, Clone)]
pub struct CsvDirectory {
    root: PathBuf,
}

impl CsvDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn table_path(&self, table: &str) -> Result<PathBuf> {
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(Error::InvalidInput(format!("Invalid table name: {:?}", table)));
        }

        let path = self.root.join(format!("{}.csv", table));
        if !path.is_file() {
            return Err(Error::NotFound(format!("Table not found: {}", table)));
        }
        Ok(path)
    }

    fn reader(&self, table: &str) -> Result<csv::Reader<std::fs::File>> {
        let path = self.table_path(table)?;
        csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)
            .map_err(|e| csv_error(table, e))
    }
}

fn csv_error(table: &str, err: csv::Error) -> Error {
    match err.into_kind() {
        csv::ErrorKind::Io(e) => Error::Io(e),
        kind => Error::InvalidInput(format!("Malformed CSV table '{}': {:?}", table, kind)),
    }
}

impl TabularSource for CsvDirectory {
    fn columns(&self, table: &str) -> Result<Vec<String>> {
        let mut reader = self.reader(table)?;
        let headers = reader.headers().map_err(|e| csv_error(table, e))?;
        Ok(headers.iter().map(str::to_string).collect())
    }

    fn rows(&self, table: &str) -> Result<Vec<FlatRecord>> {
        let mut reader = self.reader(table)?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| csv_error(table, e))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| csv_error(table, e))?;
            let row: FlatRecord = headers
                .iter()
                .zip(record.iter())
                .map(|(header, cell)| {
                    let value = if cell.is_empty() {
                        Value::Null
                    } else {
                        Value::String(cell.to_string())
                    };
                    (header.clone(), value)
                })
                .collect();
            rows.push(row);
        }

        tracing::debug!(table = %table, rows = rows.len(), "Read CSV table");
        Ok(rows)
    }
}

/// In-process tables
#[derive(Debug, Clone, Default)]
pub struct MemoryTables {
    tables: HashMap<String, MemoryTable>,
}

#[derive(Debug, Clone)]
struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<FlatRecord>,
}

impl MemoryTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a table
    pub fn with_table<C: Into<String>>(
        mut self,
        name: &str,
        columns: impl IntoIterator<Item = C>,
        rows: Vec<FlatRecord>,
    ) -> Self {
        self.tables.insert(
            name.to_string(),
            MemoryTable {
                columns: columns.into_iter().map(Into::into).collect(),
                rows,
            },
        );
        self
    }

    fn table(&self, name: &str) -> Result<&MemoryTable> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Table not found: {}", name)))
    }
}

impl TabularSource for MemoryTables {
    fn columns(&self, table: &str) -> Result<Vec<String>> {
        Ok(self.table(table)?.columns.clone())
    }

    fn rows(&self, table: &str) -> Result<Vec<FlatRecord>> {
        Ok(self.table(table)?.rows.clone())
    }
}
