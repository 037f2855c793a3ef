use std::collections::HashMap;
use std::fmt::Display;

use itertools::Itertools;
use jiff::Timestamp;
use lazy_static::lazy_static;
use log::info;
use regex::Regex;
use serde_json::Value;

use crate::eia::RawRecord;

pub const EXTRACTED_TIMESTAMP: &str = "EXTRACTED_TIMESTAMP";
pub const SOURCE: &str = "SOURCE";
pub const SOURCE_TAG: &str = "EIA_API";

/// Prefix for names that would clash with SQL keywords or the metadata columns.
const PREFIX: &str = "EIA_";
const RESERVED: [&str; 7] = ["VALUE", "PERIOD", "DATE", "TIME", "YEAR", "MONTH", "DAY"];

lazy_static! {
    static ref SEPARATORS: Regex = Regex::new(r"[ .\-]").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(Timestamp),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

impl From<&Value> for CellValue {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => CellValue::Null,
            Value::Bool(b) => CellValue::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => CellValue::Integer(i),
                None => n
                    .as_f64()
                    .map(CellValue::Float)
                    .unwrap_or_else(|| CellValue::Text(n.to_string())),
            },
            Value::String(s) => CellValue::Text(s.clone()),
            // nested values are kept as their JSON text
            other => CellValue::Text(other.to_string()),
        }
    }
}

impl Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Null => write!(f, "NULL"),
            CellValue::Boolean(b) => write!(f, "{}", b),
            CellValue::Integer(i) => write!(f, "{}", i),
            CellValue::Float(x) => write!(f, "{}", x),
            CellValue::Text(s) => write!(f, "{}", s),
            CellValue::Timestamp(ts) => write!(
                f,
                "{}.{:06}",
                ts.strftime("%Y-%m-%d %H:%M:%S"),
                ts.subsec_microsecond()
            ),
        }
    }
}

/// Values are positional, aligned with [`NormalizedBatch::columns`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub values: Vec<CellValue>,
}

/// The rows of one run.  Every row has the same columns, in the same order.
#[derive(Debug, Clone)]
pub struct NormalizedBatch {
    pub columns: Vec<String>,
    pub rows: Vec<NormalizedRow>,
    pub extracted_at: Timestamp,
}

impl NormalizedBatch {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&CellValue> {
        let j = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.values.get(j))
    }
}

/// Canonical warehouse column name for a raw API field name.
pub fn column_name(raw: &str) -> String {
    let upper = raw.trim_matches('"').to_uppercase();
    let name = SEPARATORS.replace_all(&upper, "_").into_owned();
    if RESERVED.contains(&name.as_str()) || name == EXTRACTED_TIMESTAMP || name == SOURCE {
        format!("{}{}", PREFIX, name)
    } else {
        name
    }
}

/// Normalize the batch, stamping every row with the current time.
pub fn normalize(records: &[RawRecord]) -> NormalizedBatch {
    normalize_at(records, Timestamp::now())
}

/// Rename the fields of every record and append the metadata columns.  The
/// column set is the union over the whole batch, in first-seen order, so a
/// record missing a field gets a null there.
pub fn normalize_at(records: &[RawRecord], extracted_at: Timestamp) -> NormalizedBatch {
    if records.is_empty() {
        return NormalizedBatch {
            columns: Vec::new(),
            rows: Vec::new(),
            extracted_at,
        };
    }

    let mut columns: Vec<String> = Vec::new();
    let mut slot: HashMap<&str, usize> = HashMap::new();
    for record in records {
        for raw in record.keys() {
            if slot.contains_key(raw.as_str()) {
                continue;
            }
            let name = column_name(raw);
            let j = match columns.iter().position(|c| *c == name) {
                Some(j) => j,
                None => {
                    columns.push(name);
                    columns.len() - 1
                }
            };
            slot.insert(raw.as_str(), j);
        }
    }
    let n_data = columns.len();
    columns.push(EXTRACTED_TIMESTAMP.to_string());
    columns.push(SOURCE.to_string());

    let rows: Vec<NormalizedRow> = records
        .iter()
        .map(|record| {
            let mut values = vec![CellValue::Null; n_data];
            for (raw, v) in record {
                let j = slot[raw.as_str()];
                // two raw names can share a column, the first non-null wins
                if values[j].is_null() {
                    values[j] = CellValue::from(v);
                }
            }
            values.push(CellValue::Timestamp(extracted_at));
            values.push(CellValue::Text(SOURCE_TAG.to_string()));
            NormalizedRow { values }
        })
        .collect();

    info!("Cleaned columns: [{}]", columns.join(", "));
    for row in rows.iter().take(2) {
        info!(
            "Sample data: {{{}}}",
            columns
                .iter()
                .zip(row.values.iter())
                .map(|(c, v)| format!("{}: {}", c, v))
                .join(", ")
        );
    }

    NormalizedBatch {
        columns,
        rows,
        extracted_at,
    }
}
