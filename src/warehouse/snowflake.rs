// Snowflake over the SQL REST API with key-pair (JWT) authentication.
// https://docs.snowflake.com/en/developer-guide/sql-api/authenticating

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jiff::Timestamp;
use log::{debug, error, info};
use openssl::hash::MessageDigest;
use openssl::sign::Signer;
use reqwest::{
    blocking::Client,
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT},
    StatusCode,
};
use serde_json::{json, Map, Value};

use crate::config::{PipelineConfig, SnowflakeConfig};
use crate::eia::normalize::NormalizedBatch;
use crate::error::EtlError;

use super::credentials::PrivateKey;
use super::{
    infer_column_types, quote_ident, ColumnType, TableColumn, Warehouse, WarehouseSession,
};

/// Snowflake caps key-pair tokens at one hour.
const TOKEN_LIFETIME_SECS: i64 = 3600;
const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct SnowflakeWarehouse;

impl Warehouse for SnowflakeWarehouse {
    type Session = SnowflakeSession;

    fn connect(
        &self,
        config: &PipelineConfig,
        key: &PrivateKey,
    ) -> Result<SnowflakeSession, EtlError> {
        open_session(&config.snowflake, key, account_url(&config.snowflake.account))
    }
}

/// Sign a token and check it against `base_url` with a trivial query.
fn open_session(
    sf: &SnowflakeConfig,
    key: &PrivateKey,
    base_url: String,
) -> Result<SnowflakeSession, EtlError> {
    let token = keypair_jwt(&sf.account, &sf.user, key, Timestamp::now().as_second())
        .map_err(|e| {
            error!("Error connecting to Snowflake: cannot sign the login token: {}", e);
            EtlError::Connect(format!("cannot sign the login token: {}", e))
        })?;
    let session = SnowflakeSession {
        // reqwest's default 30 s request timeout still applies
        client: Client::new(),
        base_url,
        token,
        config: sf.clone(),
    };
    let version = session.execute("SELECT CURRENT_VERSION()", None).map_err(|e| {
        error!("Error connecting to Snowflake: {}", e);
        EtlError::Connect(e)
    })?;
    info!(
        "Successfully connected to Snowflake {} as {} (version {})",
        sf.account,
        sf.user,
        version["data"][0][0].as_str().unwrap_or("?")
    );
    Ok(session)
}

pub struct SnowflakeSession {
    client: Client,
    base_url: String,
    token: String,
    config: SnowflakeConfig,
}

impl SnowflakeSession {
    /// Run one statement and wait for it to finish.  Returns the result set
    /// body, or the server's error message.
    fn execute(&self, sql: &str, bindings: Option<Value>) -> Result<Value, String> {
        let mut body = json!({
            "statement": sql,
            "role": self.config.role,
            "warehouse": self.config.warehouse,
            "database": self.config.database,
            "schema": self.config.schema,
        });
        if let Some(bindings) = bindings {
            body["bindings"] = bindings;
        }
        debug!("Snowflake: {}", sql);

        let url = format!("{}/api/v2/statements", self.base_url);
        let response = self
            .authorized(self.client.post(url))
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .map_err(|e| e.to_string())?;
        let (mut status, mut v) = read_response(response)?;

        // still running, poll the status URL until it completes
        while status == StatusCode::ACCEPTED {
            let status_url = v["statementStatusUrl"]
                .as_str()
                .ok_or_else(|| format!("No statementStatusUrl in {}", v))?
                .to_string();
            std::thread::sleep(POLL_INTERVAL);
            let response = self
                .authorized(self.client.get(format!("{}{}", self.base_url, status_url)))
                .send()
                .map_err(|e| e.to_string())?;
            (status, v) = read_response(response)?;
        }
        Ok(v)
    }

    fn authorized(
        &self,
        builder: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        builder
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header("X-Snowflake-Authorization-Token-Type", "KEYPAIR_JWT")
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, concat!("steo_etl/", env!("CARGO_PKG_VERSION")))
    }
}

impl WarehouseSession for SnowflakeSession {
    fn drop_table_if_exists(&mut self, table: &str) -> Result<(), EtlError> {
        let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(table));
        self.execute(&sql, None).map_err(EtlError::Load)?;
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
        self.execute(&ddl, None).map_err(EtlError::Load)?;
        info!("Created table {} with {} columns", table, batch.columns.len());

        let placeholders = vec!["?"; batch.columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            batch
                .columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            placeholders
        );
        let v = self
            .execute(&sql, Some(array_bindings(batch, &types)))
            .map_err(EtlError::Load)?;
        let inserted = v["data"][0][0]
            .as_str()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(batch.len());
        Ok(inserted)
    }

    fn describe_table(&mut self, table: &str) -> Result<Vec<TableColumn>, EtlError> {
        let sql = format!("DESCRIBE TABLE {}", quote_ident(table));
        let v = self.execute(&sql, None).map_err(EtlError::Load)?;
        let rows = v["data"].as_array().cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .map(|r| TableColumn {
                name: r[0].as_str().unwrap_or_default().to_string(),
                data_type: r[1].as_str().unwrap_or_default().to_string(),
                nullable: r[3].as_str() == Some("Y"),
            })
            .collect())
    }
}

impl Drop for SnowflakeSession {
    fn drop(&mut self) {
        // the SQL API is stateless, releasing means forgetting the token
        self.token.clear();
        debug!("Snowflake session for {} released", self.config.user);
    }
}

fn read_response(
    response: reqwest::blocking::Response,
) -> Result<(StatusCode, Value), String> {
    let status = response.status();
    let text = response.text().map_err(|e| e.to_string())?;
    let v: Value = serde_json::from_str(&text)
        .map_err(|_| format!("HTTP {}: {}", status, text.chars().take(500).collect::<String>()))?;
    if status.is_success() {
        Ok((status, v))
    } else {
        Err(format!(
            "HTTP {}: {} ({})",
            status,
            v["message"].as_str().unwrap_or("unknown error"),
            v["code"].as_str().unwrap_or("-")
        ))
    }
}

/// `https://<account>.snowflakecomputing.com`, with the account lowercased
/// and underscores turned into hyphens.
pub fn account_url(account: &str) -> String {
    format!(
        "https://{}.snowflakecomputing.com",
        account.to_lowercase().replace('_', "-")
    )
}

/// The account part of the JWT issuer: uppercase, and without any
/// `.region.cloud` suffix.
fn jwt_account(account: &str) -> String {
    account
        .split('.')
        .next()
        .unwrap_or(account)
        .to_uppercase()
}

/// Sign an RS256 token for key-pair authentication.
pub fn keypair_jwt(
    account: &str,
    user: &str,
    key: &PrivateKey,
    issued_at: i64,
) -> Result<String, openssl::error::ErrorStack> {
    let qualified = format!("{}.{}", jwt_account(account), user.to_uppercase());
    let header = json!({"alg": "RS256", "typ": "JWT"});
    let claims = json!({
        "iss": format!("{}.{}", qualified, key.fingerprint()),
        "sub": qualified,
        "iat": issued_at,
        "exp": issued_at + TOKEN_LIFETIME_SECS,
    });
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    );

    let pkey = key.pkey()?;
    let mut signer = Signer::new(MessageDigest::sha256(), &pkey)?;
    signer.update(signing_input.as_bytes())?;
    let signature = signer.sign_to_vec()?;
    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
}

pub fn create_table_sql(table: &str, columns: &[String], types: &[ColumnType]) -> String {
    let cols = columns
        .iter()
        .zip(types)
        .map(|(c, t)| format!("{} {}", quote_ident(c), t.snowflake_type()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({})", quote_ident(table), cols)
}

/// One array binding per column, so a single INSERT carries every row.
fn array_bindings(batch: &NormalizedBatch, types: &[ColumnType]) -> Value {
    let mut bindings = Map::new();
    for (j, t) in types.iter().enumerate() {
        let values: Vec<Value> = batch
            .rows
            .iter()
            .map(|row| {
                let cell = &row.values[j];
                if cell.is_null() {
                    Value::Null
                } else {
                    Value::String(cell.to_string())
                }
            })
            .collect();
        let kind = match t {
            ColumnType::Integer => "FIXED",
            ColumnType::Float => "REAL",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Text | ColumnType::Timestamp => "TEXT",
        };
        bindings.insert(
            (j + 1).to_string(),
            json!({"type": kind, "value": values}),
        );
    }
    Value::Object(bindings)
}
