pub mod credentials;
pub mod lib_duckdb;
pub mod loader;
pub mod snowflake;

use tabled::{builder::Builder, settings::Style};

use crate::config::PipelineConfig;
use crate::eia::normalize::{CellValue, NormalizedBatch};
use crate::error::EtlError;

use self::credentials::PrivateKey;

/// Something we can open a session against.
pub trait Warehouse {
    type Session: WarehouseSession;

    /// Open a session.  Failures here are [`EtlError::Connect`].
    fn connect(&self, config: &PipelineConfig, key: &PrivateKey)
        -> Result<Self::Session, EtlError>;
}

/// An open, exclusively owned session.  Dropping it releases the connection.
pub trait WarehouseSession {
    fn drop_table_if_exists(&mut self, table: &str) -> Result<(), EtlError>;

    /// Create `table` with a schema inferred from `batch` and insert every
    /// row as one bulk operation.  Returns the number of rows inserted.
    fn create_and_insert(&mut self, table: &str, batch: &NormalizedBatch)
        -> Result<usize, EtlError>;

    fn describe_table(&mut self, table: &str) -> Result<Vec<TableColumn>, EtlError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Text,
    Timestamp,
}

impl ColumnType {
    pub fn snowflake_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "NUMBER(38,0)",
            ColumnType::Float => "FLOAT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Text => "VARCHAR",
            ColumnType::Timestamp => "TIMESTAMP_NTZ",
        }
    }

    pub fn duckdb_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "BIGINT",
            ColumnType::Float => "DOUBLE",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Text => "VARCHAR",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }
}

/// Infer one type per column from the non-null cells.  Integers widen to
/// float, any other mix (or no data at all) falls back to text.
pub fn infer_column_types(batch: &NormalizedBatch) -> Vec<ColumnType> {
    (0..batch.columns.len())
        .map(|j| {
            let mut acc: Option<ColumnType> = None;
            for row in &batch.rows {
                let t = match &row.values[j] {
                    CellValue::Null => continue,
                    CellValue::Boolean(_) => ColumnType::Boolean,
                    CellValue::Integer(_) => ColumnType::Integer,
                    CellValue::Float(_) => ColumnType::Float,
                    CellValue::Text(_) => ColumnType::Text,
                    CellValue::Timestamp(_) => ColumnType::Timestamp,
                };
                acc = Some(match (acc, t) {
                    (None, t) => t,
                    (Some(a), t) if a == t => a,
                    (Some(ColumnType::Integer), ColumnType::Float)
                    | (Some(ColumnType::Float), ColumnType::Integer) => ColumnType::Float,
                    _ => ColumnType::Text,
                });
                if acc == Some(ColumnType::Text) {
                    break;
                }
            }
            acc.unwrap_or(ColumnType::Text)
        })
        .collect()
}

/// Double-quote an identifier, doubling any embedded quote.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Make an ASCII table from a table description, for the logs.
pub fn ascii_table(columns: &[TableColumn]) -> tabled::Table {
    let mut builder = Builder::new();
    builder.push_record(vec!["Column", "Type", "Nullable"]);
    for c in columns {
        builder.push_record(vec![
            c.name.clone(),
            c.data_type.clone(),
            if c.nullable { "Y" } else { "N" }.to_string(),
        ]);
    }
    let mut table = builder.build();
    table.with(Style::sharp());
    table
}
