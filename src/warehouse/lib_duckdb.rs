use duckdb::types::{TimeUnit, Value};
use duckdb::{appender_params_from_iter, Connection};
use log::{debug, error, info};

use crate::config::PipelineConfig;
use crate::eia::normalize::{CellValue, NormalizedBatch};
use crate::error::EtlError;

use super::credentials::PrivateKey;
use super::{
    infer_column_types, quote_ident, ColumnType, TableColumn, Warehouse, WarehouseSession,
};

/// A local DuckDB file standing in for the cloud warehouse, for dry runs.
#[derive(Clone)]
pub struct DuckDbWarehouse {
    pub duckdb_path: String,
}

impl Warehouse for DuckDbWarehouse {
    type Session = DuckDbSession;

    /// No authentication, the key has already been validated by the caller.
    fn connect(
        &self,
        _config: &PipelineConfig,
        _key: &PrivateKey,
    ) -> Result<DuckDbSession, EtlError> {
        let conn = Connection::open(&self.duckdb_path).map_err(|e| {
            error!("Error opening DuckDB {}: {}", self.duckdb_path, e);
            EtlError::Connect(format!("{}: {}", self.duckdb_path, e))
        })?;
        info!("Successfully connected to DuckDB {}", self.duckdb_path);
        Ok(DuckDbSession {
            conn,
            duckdb_path: self.duckdb_path.clone(),
        })
    }
}

pub struct DuckDbSession {
    conn: Connection,
    duckdb_path: String,
}

impl WarehouseSession for DuckDbSession {
    fn drop_table_if_exists(&mut self, table: &str) -> Result<(), EtlError> {
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {};", quote_ident(table)))
            .map_err(|e| EtlError::Load(e.to_string()))?;
        info!("Dropped existing table {}", table);
        Ok(())
    }

    fn create_and_insert(
        &mut self,
        table: &str,
        batch: &NormalizedBatch,
    ) -> Result<usize, EtlError> {
        let types = infer_column_types(batch);
        let ddl = create_table_sql(table, &batch.columns, &types);

        let tx = self
            .conn
            .transaction()
            .map_err(|e| EtlError::Load(e.to_string()))?;
        tx.execute_batch(&ddl)
            .map_err(|e| EtlError::Load(e.to_string()))?;
        info!("Created table {} with {} columns", table, batch.columns.len());
        {
            let mut appender = tx
                .appender(table)
                .map_err(|e| EtlError::Load(e.to_string()))?;
            for row in &batch.rows {
                let values = row.values.iter().zip(&types).map(|(c, t)| to_duckdb(c, *t));
                appender
                    .append_row(appender_params_from_iter(values))
                    .map_err(|e| EtlError::Load(e.to_string()))?;
            }
            appender
                .flush()
                .map_err(|e| EtlError::Load(e.to_string()))?;
        }
        tx.commit().map_err(|e| EtlError::Load(e.to_string()))?;
        Ok(batch.len())
    }

    fn describe_table(&mut self, table: &str) -> Result<Vec<TableColumn>, EtlError> {
        let mut stmt = self
            .conn
            .prepare(&format!("DESCRIBE {}", quote_ident(table)))
            .map_err(|e| EtlError::Load(e.to_string()))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(TableColumn {
                    name: row.get::<usize, String>(0)?,
                    data_type: row.get::<usize, String>(1)?,
                    nullable: row.get::<usize, String>(2)? == "YES",
                })
            })
            .map_err(|e| EtlError::Load(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| EtlError::Load(e.to_string()))?;
        Ok(columns)
    }
}

impl Drop for DuckDbSession {
    fn drop(&mut self) {
        debug!("DuckDB connection to {} released", self.duckdb_path);
    }
}

pub fn create_table_sql(table: &str, columns: &[String], types: &[ColumnType]) -> String {
    let cols = columns
        .iter()
        .zip(types)
        .map(|(c, t)| format!("    {} {}", quote_ident(c), t.duckdb_type()))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("CREATE TABLE {} (\n{}\n);", quote_ident(table), cols)
}

/// Convert a cell to exactly the DuckDB type of its column.
fn to_duckdb(cell: &CellValue, column_type: ColumnType) -> Value {
    match (cell, column_type) {
        (CellValue::Null, _) => Value::Null,
        (CellValue::Boolean(b), ColumnType::Boolean) => Value::Boolean(*b),
        (CellValue::Integer(i), ColumnType::Integer) => Value::BigInt(*i),
        (CellValue::Integer(i), ColumnType::Float) => Value::Double(*i as f64),
        (CellValue::Float(x), ColumnType::Float) => Value::Double(*x),
        (CellValue::Timestamp(ts), ColumnType::Timestamp) => {
            Value::Timestamp(TimeUnit::Microsecond, ts.as_microsecond())
        }
        (cell, _) => Value::Text(cell.to_string()),
    }
}
