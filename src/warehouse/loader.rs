use log::{error, info, warn};

use crate::config::PipelineConfig;
use crate::eia::normalize::NormalizedBatch;
use crate::error::EtlError;

use super::credentials::PrivateKey;
use super::{ascii_table, Warehouse, WarehouseSession};

pub const DEFAULT_TABLE: &str = "EIA_STEO_DATA";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { rows: usize },
    /// Nothing was fetched, the table was not touched.
    Skipped,
}

/// Full refresh of `table`: drop it, recreate it from the batch schema and
/// bulk insert every row.  An empty batch leaves the table alone.
///
/// The session only exists once `connect` succeeded and is dropped on every
/// return path below, so the connection is always released.
pub fn load<W: Warehouse>(
    warehouse: &W,
    config: &PipelineConfig,
    batch: &NormalizedBatch,
    table: &str,
) -> Result<LoadOutcome, EtlError> {
    let key = PrivateKey::from_pem_file(&config.private_key_path)?;
    let mut session = warehouse.connect(config, &key)?;

    if batch.is_empty() {
        warn!("No data to load, table {} left untouched", table);
        return Ok(LoadOutcome::Skipped);
    }

    let rows = replace_table(&mut session, table, batch).map_err(|e| {
        error!("Error loading data to table {}: {}", table, e);
        e
    })?;
    info!("Successfully loaded {} rows to table {}", rows, table);

    // verification only, a failure here doesn't fail the load
    match session.describe_table(table) {
        Ok(columns) => info!("Table structure:\n{}", ascii_table(&columns)),
        Err(e) => warn!("Could not describe table {}: {}", table, e),
    }

    Ok(LoadOutcome::Loaded { rows })
}

fn replace_table<S: WarehouseSession>(
    session: &mut S,
    table: &str,
    batch: &NormalizedBatch,
) -> Result<usize, EtlError> {
    session.drop_table_if_exists(table)?;
    session.create_and_insert(table, batch)
}
