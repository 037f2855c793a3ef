use itertools::Itertools;
use log::{error, info, warn};
use reqwest::blocking::Client;
use serde_json::Value;

use crate::config::{ApiQuery, PipelineConfig};
use crate::eia::RawRecord;
use crate::error::EtlError;

/// Anything that can produce the raw records for one run.
pub trait RecordSource {
    fn fetch(&self, config: &PipelineConfig) -> Result<Vec<RawRecord>, EtlError>;
}

/// Blocking client for the EIA v2 `steo/data` route.  One GET per run, no
/// retries and no pagination.
pub struct SteoClient {
    client: Client,
}

impl SteoClient {
    pub fn new() -> Self {
        SteoClient {
            // reqwest's default 30 s request timeout still applies
            client: Client::new(),
        }
    }
}

impl Default for SteoClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordSource for SteoClient {
    fn fetch(&self, config: &PipelineConfig) -> Result<Vec<RawRecord>, EtlError> {
        info!("Fetching data from EIA API...");
        if config.api_key.is_empty() {
            warn!("No API key found!");
        } else {
            info!("Using API key: {}", config.masked_api_key());
        }

        let params = query_params(&config.api_key, &config.query);
        let response = self
            .client
            .get(&config.base_url)
            .query(&params)
            .send()
            .map_err(|e| {
                error!("Error fetching data from EIA API: {}", e);
                EtlError::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            error!("EIA API returned {}: {}", status, body);
            return Err(EtlError::Fetch(format!(
                "HTTP {} from {}",
                status, config.base_url
            )));
        }

        let body = response.text().map_err(|e| {
            error!("Failed to read the EIA API response body: {}", e);
            EtlError::from(e)
        })?;
        let records = records_from_body(&body)?;
        if records.len() as u64 >= u64::from(config.query.length) {
            warn!(
                "Received a full page of {} records, rows past offset {} may be missing",
                records.len(),
                config.query.offset + config.query.length
            );
        }
        Ok(records)
    }
}

/// The EIA v2 query string, bracketed keys and all.  Facet values repeat the
/// same key once per series id.
pub fn query_params(api_key: &str, query: &ApiQuery) -> Vec<(String, String)> {
    let mut params = vec![
        ("api_key".to_string(), api_key.to_string()),
        ("frequency".to_string(), query.frequency.clone()),
    ];
    for (i, field) in query.data_fields.iter().enumerate() {
        params.push((format!("data[{}]", i), field.clone()));
    }
    for id in &query.series_ids {
        params.push(("facets[seriesId][]".to_string(), id.clone()));
    }
    params.push(("sort[0][column]".to_string(), query.sort_column.clone()));
    params.push(("sort[0][direction]".to_string(), query.sort_direction.clone()));
    params.push(("offset".to_string(), query.offset.to_string()));
    params.push(("length".to_string(), query.length.to_string()));
    if let Some(start) = &query.start {
        params.push(("start".to_string(), start.clone()));
    }
    if let Some(end) = &query.end {
        params.push(("end".to_string(), end.clone()));
    }
    params
}

/// Pull the records out of the `{"response": {"data": [...]}}` envelope.
///
/// A body that isn't JSON is an error.  A JSON body without `response.data`
/// is treated as "no data" and gives an empty vector.
pub fn records_from_body(body: &str) -> Result<Vec<RawRecord>, EtlError> {
    let v: Value = serde_json::from_str(body).map_err(|e| {
        error!("Unexpected error parsing EIA response: {}", e);
        EtlError::Fetch(format!("Response is not valid JSON: {}", e))
    })?;

    let data = match v.get("response").and_then(|r| r.get("data")) {
        Some(Value::Array(xs)) => xs,
        _ => {
            warn!("No data found in API response");
            warn!("API response: {}", v);
            return Ok(Vec::new());
        }
    };

    let mut records: Vec<RawRecord> = Vec::with_capacity(data.len());
    for (i, item) in data.iter().enumerate() {
        match item {
            Value::Object(obj) => records.push(obj.clone()),
            other => warn!("Skipping item {} of response.data, not an object: {}", i, other),
        }
    }

    if let Some(total) = v["response"].get("total").and_then(as_count) {
        if total > records.len() as u64 {
            warn!(
                "API reports {} matching records but only {} were returned in this page",
                total,
                records.len()
            );
        }
    }

    info!("Successfully fetched {} records from EIA API", records.len());
    let columns = records.iter().flat_map(|r| r.keys()).unique().join(", ");
    info!("Original columns in API response: [{}]", columns);

    Ok(records)
}

/// `response.total` comes back as a number or as a numeric string.
fn as_count(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}
