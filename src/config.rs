use std::env;
use std::path::{Path, PathBuf};

use log::warn;

use crate::error::EtlError;

pub const EIA_BASE_URL: &str = "https://api.eia.gov/v2/steo/data/";
pub const PRIVATE_KEY_FILE: &str = "rsa_key.p8";
pub const DEFAULT_SERIES_IDS: [&str; 3] = ["DSRTUUS", "DSRTUUS_$", "DSRTUUS_RP_$"];

/// Shape of the single EIA request made per run.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiQuery {
    pub frequency: String,
    pub data_fields: Vec<String>,
    pub series_ids: Vec<String>,
    pub sort_column: String,
    pub sort_direction: String,
    pub offset: u32,
    /// Only one page is ever requested.  Anything past `length` rows is dropped.
    pub length: u32,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl Default for ApiQuery {
    fn default() -> Self {
        ApiQuery {
            frequency: "monthly".to_string(),
            data_fields: vec!["value".to_string()],
            series_ids: DEFAULT_SERIES_IDS.iter().map(|s| s.to_string()).collect(),
            sort_column: "period".to_string(),
            sort_direction: "desc".to_string(),
            offset: 0,
            length: 5000,
            start: None,
            end: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnowflakeConfig {
    pub account: String,
    pub user: String,
    pub role: String,
    pub warehouse: String,
    pub database: String,
    pub schema: String,
}

/// Everything a run needs, resolved once at startup and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub api_key: String,
    pub base_url: String,
    pub query: ApiQuery,
    pub snowflake: SnowflakeConfig,
    pub private_key_path: PathBuf,
}

impl PipelineConfig {
    /// Resolve from the process environment.  The key file is expected next to
    /// the running executable.
    pub fn from_env() -> Result<Self, EtlError> {
        let exe = env::current_exe()
            .map_err(|e| EtlError::Config(format!("Cannot locate the running program: {}", e)))?;
        let program_dir = exe.parent().ok_or_else(|| {
            EtlError::Config(format!("No parent directory for {}", exe.display()))
        })?;
        Self::resolve(|name| env::var(name).ok(), program_dir)
    }

    /// Resolve using `lookup` for variables.  Fails if the private key file
    /// is missing, so no API quota is spent on a run that can't load.
    pub fn resolve<F>(lookup: F, program_dir: &Path) -> Result<Self, EtlError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| -> String {
            lookup(name)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let api_key = var("EIA_API_KEY", "");
        if api_key.is_empty() {
            warn!("EIA_API_KEY is not set, the request will go out without an API key");
        }

        let mut query = ApiQuery::default();
        if let Some(ids) = lookup("EIA_SERIES_IDS") {
            let ids: Vec<String> = ids
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !ids.is_empty() {
                query.series_ids = ids;
            }
        }
        query.start = lookup("EIA_START").filter(|v| !v.is_empty());
        query.end = lookup("EIA_END").filter(|v| !v.is_empty());

        let snowflake = SnowflakeConfig {
            account: var("SNOWFLAKE_ACCOUNT", "IBIEUED-EXA24018"),
            user: var("SNOWFLAKE_USER", "API_USER"),
            role: var("SNOWFLAKE_ROLE", "API_ROLE"),
            warehouse: var("SNOWFLAKE_WAREHOUSE", "PINSLY_FIVETRAN_COMPUTE"),
            database: var("SNOWFLAKE_DATABASE", "PINSLY_RAW"),
            schema: var("SNOWFLAKE_SCHEMA", "EIA_RAW"),
        };

        let private_key_path = program_dir.join(PRIVATE_KEY_FILE);
        if !private_key_path.exists() {
            return Err(EtlError::Config(format!(
                "Private key file not found: {}",
                private_key_path.display()
            )));
        }

        Ok(PipelineConfig {
            api_key,
            base_url: EIA_BASE_URL.to_string(),
            query,
            snowflake,
            private_key_path,
        })
    }

    /// First 10 characters of the API key, safe to log.
    pub fn masked_api_key(&self) -> String {
        let prefix: String = self.api_key.chars().take(10).collect();
        format!("{}...", prefix)
    }
}
