use jiff::Timestamp;
use log::{debug, error, info};

use crate::config::PipelineConfig;
use crate::eia::normalize::normalize;
use crate::eia::steo::RecordSource;
use crate::error::EtlError;
use crate::warehouse::loader::{load, LoadOutcome};
use crate::warehouse::Warehouse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Fetching,
    Normalizing,
    Loading,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub records_fetched: usize,
    pub columns: usize,
    /// The `EXTRACTED_TIMESTAMP` every loaded row carries.
    pub extracted_at: Timestamp,
    pub outcome: LoadOutcome,
}

/// Fetch -> normalize -> load, once.  The first error moves the runner to
/// [`RunState::Failed`] and is returned as is.
pub struct PipelineRunner<S, W> {
    source: S,
    warehouse: W,
    table: String,
    state: RunState,
}

impl<S: RecordSource, W: Warehouse> PipelineRunner<S, W> {
    pub fn new(source: S, warehouse: W, table: &str) -> Self {
        PipelineRunner {
            source,
            warehouse,
            table: table.to_string(),
            state: RunState::Init,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run the job.  `resolve` is called first and must succeed (including the
    /// private key check) before anything goes over the network.
    pub fn run<F>(&mut self, resolve: F) -> Result<RunSummary, EtlError>
    where
        F: FnOnce() -> Result<PipelineConfig, EtlError>,
    {
        if self.state != RunState::Init {
            return Err(EtlError::Config(format!(
                "Runner already used, state is {:?}",
                self.state
            )));
        }
        info!("Starting EIA to warehouse ETL process...");
        match self.run_stages(resolve) {
            Ok(summary) => {
                self.transition(RunState::Done);
                info!("ETL process completed successfully");
                Ok(summary)
            }
            Err(e) => {
                self.transition(RunState::Failed);
                error!("ETL process failed: {}", e);
                Err(e)
            }
        }
    }

    fn run_stages<F>(&mut self, resolve: F) -> Result<RunSummary, EtlError>
    where
        F: FnOnce() -> Result<PipelineConfig, EtlError>,
    {
        let config = resolve()?;

        self.transition(RunState::Fetching);
        let records = self.source.fetch(&config)?;

        self.transition(RunState::Normalizing);
        let batch = normalize(&records);

        self.transition(RunState::Loading);
        let outcome = load(&self.warehouse, &config, &batch, &self.table)?;

        Ok(RunSummary {
            records_fetched: records.len(),
            columns: batch.columns.len(),
            extracted_at: batch.extracted_at,
            outcome,
        })
    }

    fn transition(&mut self, next: RunState) {
        debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::error::Error;
    use std::path::Path;

    use duckdb::Connection;

    use crate::eia::steo::records_from_body;
    use crate::eia::RawRecord;
    use crate::warehouse::credentials::tests::write_test_key;
    use crate::warehouse::lib_duckdb::DuckDbWarehouse;
    use crate::warehouse::loader::DEFAULT_TABLE;

    use super::*;

    const BODY: &str = r#"{
        "response": {
            "total": 4,
            "dateFormat": "YYYY-MM",
            "frequency": "monthly",
            "data": [
                {"period": "2024-02", "seriesId": "DSRTUUS", "seriesDescription": "Retail gasoline price", "value": 3.41, "unit": "dollars per gallon"},
                {"period": "2024-02", "seriesId": "DSRTUUS_$", "seriesDescription": "Real retail gasoline price", "value": 3.47, "unit": "real 2012 dollars"},
                {"period": "2024-01", "seriesId": "DSRTUUS", "seriesDescription": "Retail gasoline price", "value": 3.33, "unit": "dollars per gallon"},
                {"period": "2024-01", "seriesId": "DSRTUUS_$", "seriesDescription": "Real retail gasoline price", "value": 3.4, "unit": "real 2012 dollars"}
            ]
        },
        "apiVersion": "2.1.8"
    }"#;

    /// Serves a canned API body and counts the calls.
    struct CannedSource<'a> {
        body: &'a str,
        calls: &'a Cell<usize>,
    }

    impl RecordSource for CannedSource<'_> {
        fn fetch(&self, _config: &PipelineConfig) -> Result<Vec<RawRecord>, EtlError> {
            self.calls.set(self.calls.get() + 1);
            records_from_body(self.body)
        }
    }

    struct FailingSource;

    impl RecordSource for FailingSource {
        fn fetch(&self, _config: &PipelineConfig) -> Result<Vec<RawRecord>, EtlError> {
            Err(EtlError::Fetch("HTTP 503 Service Unavailable".into()))
        }
    }

    fn resolver(dir: &Path) -> impl FnOnce() -> Result<PipelineConfig, EtlError> + '_ {
        move || PipelineConfig::resolve(|_| None, dir)
    }

    fn count_rows(duckdb_path: &str) -> Result<i64, Box<dyn Error>> {
        let conn = Connection::open(duckdb_path)?;
        let n = conn.query_row(
            &format!("SELECT count(*) FROM \"{}\"", DEFAULT_TABLE),
            [],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    #[test]
    fn missing_key_fails_before_fetch() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let calls = Cell::new(0);
        let source = CannedSource { body: BODY, calls: &calls };
        let warehouse = DuckDbWarehouse {
            duckdb_path: dir.path().join("eia.duckdb").to_string_lossy().to_string(),
        };
        let mut runner = PipelineRunner::new(source, warehouse, DEFAULT_TABLE);
        let res = runner.run(resolver(dir.path()));
        assert!(matches!(res, Err(EtlError::Config(_))));
        assert_eq!(calls.get(), 0);
        assert_eq!(runner.state(), RunState::Failed);
        Ok(())
    }

    #[test]
    fn run_twice_keeps_one_copy() -> Result<(), Box<dyn Error>> {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .is_test(true)
            .try_init();
        let dir = tempfile::tempdir()?;
        write_test_key(dir.path())?;
        let duckdb_path = dir.path().join("eia.duckdb").to_string_lossy().to_string();
        let warehouse = DuckDbWarehouse {
            duckdb_path: duckdb_path.clone(),
        };
        let calls = Cell::new(0);

        let mut last_stamp = None;
        for _ in 0..2 {
            let source = CannedSource { body: BODY, calls: &calls };
            let mut runner = PipelineRunner::new(source, warehouse.clone(), DEFAULT_TABLE);
            let summary = runner.run(resolver(dir.path()))?;
            assert_eq!(runner.state(), RunState::Done);
            assert_eq!(summary.records_fetched, 4);
            // 5 raw columns + EXTRACTED_TIMESTAMP + SOURCE
            assert_eq!(summary.columns, 7);
            assert_eq!(summary.outcome, LoadOutcome::Loaded { rows: 4 });
            assert_eq!(count_rows(&duckdb_path)?, 4);
            last_stamp = Some(summary.extracted_at);
        }
        assert_eq!(calls.get(), 2);

        // every row of a run carries the same stamp and tag
        let conn = Connection::open(&duckdb_path)?;
        let (stamps, tags): (i64, i64) = conn.query_row(
            "SELECT count(DISTINCT EXTRACTED_TIMESTAMP), count(DISTINCT SOURCE) FROM \"EIA_STEO_DATA\"",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        assert_eq!((stamps, tags), (1, 1));
        let stored: i64 = conn.query_row(
            "SELECT epoch_us(max(EXTRACTED_TIMESTAMP)) FROM \"EIA_STEO_DATA\"",
            [],
            |r| r.get(0),
        )?;
        assert_eq!(Some(stored), last_stamp.map(|ts| ts.as_microsecond()));
        Ok(())
    }

    #[test]
    fn no_data_leaves_table_alone() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        write_test_key(dir.path())?;
        let duckdb_path = dir.path().join("eia.duckdb").to_string_lossy().to_string();
        {
            let conn = Connection::open(&duckdb_path)?;
            conn.execute_batch(
                "CREATE TABLE \"EIA_STEO_DATA\" (SERIESID VARCHAR); \
                 INSERT INTO \"EIA_STEO_DATA\" VALUES ('DSRTUUS'), ('DSRTUUS_$');",
            )?;
        }
        let calls = Cell::new(0);
        let source = CannedSource {
            body: r#"{"response":{}}"#,
            calls: &calls,
        };
        let warehouse = DuckDbWarehouse {
            duckdb_path: duckdb_path.clone(),
        };
        let mut runner = PipelineRunner::new(source, warehouse, DEFAULT_TABLE);
        let summary = runner.run(resolver(dir.path()))?;
        assert_eq!(summary.outcome, LoadOutcome::Skipped);
        assert_eq!(summary.records_fetched, 0);
        assert_eq!(runner.state(), RunState::Done);
        assert_eq!(count_rows(&duckdb_path)?, 2);
        Ok(())
    }

    #[test]
    fn fetch_error_fails_the_run() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        write_test_key(dir.path())?;
        let duckdb_path = dir.path().join("eia.duckdb").to_string_lossy().to_string();
        let warehouse = DuckDbWarehouse {
            duckdb_path: duckdb_path.clone(),
        };
        let mut runner = PipelineRunner::new(FailingSource, warehouse, DEFAULT_TABLE);
        let res = runner.run(resolver(dir.path()));
        assert!(matches!(res, Err(EtlError::Fetch(_))));
        assert_eq!(runner.state(), RunState::Failed);
        assert!(!Path::new(&duckdb_path).exists());

        // failed is terminal
        let again = runner.run(resolver(dir.path()));
        assert!(matches!(again, Err(EtlError::Config(_))));
        assert_eq!(runner.state(), RunState::Failed);
        Ok(())
    }
}
