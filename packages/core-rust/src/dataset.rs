//! Dataset documents consumed by seed, write and delete jobs.
//!
//! A dataset is a JSON document with a `Name` and a mapping of table name to
//! table definition. Field names are PascalCase on the wire and unknown fields
//! are rejected, so a typo in a request body surfaces as a 400 rather than
//! being silently dropped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Delimiter used to split rows when a table does not declare one.
pub const DEFAULT_DELIMITER: &str = ",";

fn default_delimiter() -> String {
    DEFAULT_DELIMITER.to_string()
}

fn is_default_delimiter(delimiter: &str) -> bool {
    delimiter == DEFAULT_DELIMITER
}

/// Errors raised while importing or interpreting a dataset.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("failed to read dataset file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse dataset file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("row {row} of table {table} has {found} fields, expected {expected}")]
    RowWidth {
        table: String,
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// A named collection of tables to create and populate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct DbDataSet {
    /// Database name the tables live in.
    pub name: String,
    /// Table definitions keyed by table name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tables: BTreeMap<String, DataTable>,
}

impl DbDataSet {
    /// Reads and parses a dataset document from disk.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::Io`] if the file cannot be read and
    /// [`DatasetError::Parse`] if it is not a valid dataset document.
    pub fn import(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let content = std::fs::read(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&content).map_err(|source| DatasetError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Serializes the dataset back to its document form.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        // Every field is a string, a map with string keys, or a JSON value.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// A single table: columns, rows and table-level constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct DataTable {
    /// Column definitions keyed by column name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub columns: BTreeMap<String, DataColumn>,
    /// Delimiter-separated row values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<DataRow>,
    #[serde(
        default = "default_delimiter",
        skip_serializing_if = "is_default_delimiter"
    )]
    pub delimiter: String,
    /// Raw SQL table constraints, e.g. `PRIMARY KEY (id)`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,
}

impl Default for DataTable {
    fn default() -> Self {
        Self {
            columns: BTreeMap::new(),
            rows: Vec::new(),
            delimiter: default_delimiter(),
            constraints: Vec::new(),
        }
    }
}

impl DataTable {
    /// Splits every row into its fields.
    ///
    /// Fields map onto the columns in column-key order, so every row must
    /// carry exactly one field per column.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::RowWidth`] for the first row whose field count
    /// does not match the column count.
    pub fn parsed_rows(&self, table: &str) -> Result<Vec<Vec<&str>>, DatasetError> {
        let expected = self.columns.len();
        self.rows
            .iter()
            .enumerate()
            .map(|(row, data)| {
                let fields = data.fields(&self.delimiter);
                if fields.len() == expected {
                    Ok(fields)
                } else {
                    Err(DatasetError::RowWidth {
                        table: table.to_string(),
                        row,
                        expected,
                        found: fields.len(),
                    })
                }
            })
            .collect()
    }
}

/// Column definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct DataColumn {
    /// Column name; empty means the column key is used.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub header: String,
    /// SQL data type, e.g. `int` or `varchar(64)`.
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
}

/// One row of delimiter-separated values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataRow(pub String);

impl DataRow {
    /// Splits the row on `delimiter`. An empty delimiter yields the whole row.
    #[must_use]
    pub fn fields(&self, delimiter: &str) -> Vec<&str> {
        if delimiter.is_empty() {
            return vec![self.0.as_str()];
        }
        self.0.split(delimiter).collect()
    }
}

/// A named raw query, the payload of read and query jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct QueryDataSet {
    #[serde(default)]
    pub name: String,
    pub query: String,
}

impl QueryDataSet {
    #[must_use]
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const SHOP: &str =
        r#"{"Name":"shop","Tables":{"orders":{"Columns":{"id":{"Header":"id","DataType":"int"}}}}}"#;

    #[test]
    fn minimal_document_fills_defaults() {
        let ds: DbDataSet = serde_json::from_str(SHOP).unwrap();
        assert_eq!(ds.name, "shop");

        let orders = &ds.tables["orders"];
        assert_eq!(orders.delimiter, ",");
        assert!(orders.rows.is_empty());
        assert!(orders.constraints.is_empty());

        let id = &orders.columns["id"];
        assert_eq!(id.header, "id");
        assert_eq!(id.data_type, "int");
        assert!(id.default_value.is_none());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = serde_json::from_str::<DbDataSet>(r#"{"Name":"shop","Colour":"red"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("unknown field `Colour`"));
    }

    #[test]
    fn import_then_serialize_preserves_content() {
        let doc = r#"{
            "Name": "inventory",
            "Tables": {
                "items": {
                    "Columns": {
                        "id": {"Header": "id", "DataType": "int", "Constraints": ["NOT NULL"]},
                        "label": {"Header": "label", "DataType": "text", "DefaultValue": "none"}
                    },
                    "Rows": ["1|hammer", "2|saw"],
                    "Delimiter": "|",
                    "Constraints": ["PRIMARY KEY (id)"]
                }
            }
        }"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(doc.as_bytes()).unwrap();

        let imported = DbDataSet::import(file.path()).unwrap();
        let reparsed: DbDataSet = serde_json::from_value(imported.to_json()).unwrap();

        assert_eq!(reparsed.name, imported.name);
        assert_eq!(reparsed.tables, imported.tables);

        let original: serde_json::Value = serde_json::from_str(doc).unwrap();
        let back = imported.to_json();
        assert_eq!(back["Name"], original["Name"]);
        assert_eq!(back["Tables"], original["Tables"]);
    }

    #[test]
    fn minimal_document_serializes_without_added_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SHOP.as_bytes()).unwrap();

        let back = DbDataSet::import(file.path()).unwrap().to_json();
        let original: serde_json::Value = serde_json::from_str(SHOP).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn column_header_is_optional() {
        let ds: DbDataSet = serde_json::from_str(
            r#"{"Name":"shop","Tables":{"orders":{"Columns":{"id":{"DataType":"int"}}}}}"#,
        )
        .unwrap();
        let column = &ds.tables["orders"].columns["id"];
        assert!(column.header.is_empty());
        assert_eq!(column.data_type, "int");
    }

    #[test]
    fn import_missing_file_reports_path() {
        let err = DbDataSet::import("/nonexistent/dataset.json").unwrap_err();
        assert!(matches!(err, DatasetError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/dataset.json"));
    }

    #[test]
    fn import_invalid_json_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\"Name\": ").unwrap();
        let err = DbDataSet::import(file.path()).unwrap_err();
        assert!(matches!(err, DatasetError::Parse { .. }));
    }

    #[test]
    fn rows_split_on_table_delimiter() {
        let table = DataTable {
            columns: BTreeMap::from([
                ("a".to_string(), DataColumn::default()),
                ("b".to_string(), DataColumn::default()),
            ]),
            rows: vec![DataRow("1;x".into()), DataRow("2;y".into())],
            delimiter: ";".into(),
            constraints: Vec::new(),
        };
        let rows = table.parsed_rows("t").unwrap();
        assert_eq!(rows, vec![vec!["1", "x"], vec!["2", "y"]]);
    }

    #[test]
    fn row_width_mismatch_is_reported() {
        let table = DataTable {
            columns: BTreeMap::from([("a".to_string(), DataColumn::default())]),
            rows: vec![DataRow("1".into()), DataRow("2,3".into())],
            ..DataTable::default()
        };
        let err = table.parsed_rows("t").unwrap_err();
        assert!(matches!(
            err,
            DatasetError::RowWidth { row: 1, expected: 1, found: 2, .. }
        ));
    }

    #[test]
    fn empty_delimiter_keeps_row_whole() {
        let row = DataRow("a,b".into());
        assert_eq!(row.fields(""), vec!["a,b"]);
    }

    #[test]
    fn query_dataset_requires_query() {
        assert!(serde_json::from_str::<QueryDataSet>(r#"{"Name":"q"}"#).is_err());
        let q: QueryDataSet = serde_json::from_str(r#"{"Query":"SELECT 1"}"#).unwrap();
        assert_eq!(q, QueryDataSet::new("", "SELECT 1"));
    }
}
