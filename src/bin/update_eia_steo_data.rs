use std::{error::Error, path::Path};

use clap::Parser;
use log::{info, warn};
use steo_etl::{
    eia::steo::SteoClient,
    warehouse::{
        lib_duckdb::DuckDbWarehouse, loader::DEFAULT_TABLE, snowflake::SnowflakeWarehouse,
    },
    PipelineConfig, PipelineRunner,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,

    /// Destination table, replaced on every run
    #[arg(short, long, default_value = DEFAULT_TABLE)]
    table: String,

    /// Load into this local DuckDB file instead of Snowflake
    #[arg(long)]
    duckdb: Option<String>,
}

/// Run this job once a month, after the STEO release (usually the first Tuesday)
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let env_file = format!(".env/{}.env", args.env);
    match dotenvy::from_path(Path::new(&env_file)) {
        Ok(_) => info!("Loaded environment from {}", env_file),
        Err(e) => warn!("No environment file {} ({}), using process env", env_file, e),
    }

    let summary = match args.duckdb {
        Some(duckdb_path) => {
            let warehouse = DuckDbWarehouse { duckdb_path };
            PipelineRunner::new(SteoClient::new(), warehouse, &args.table)
                .run(PipelineConfig::from_env)?
        }
        None => PipelineRunner::new(SteoClient::new(), SnowflakeWarehouse, &args.table)
            .run(PipelineConfig::from_env)?,
    };
    info!("{:?}", summary);

    Ok(())
}
