//! U.S. Energy Information Administration, Short-Term Energy Outlook data.
//! https://www.eia.gov/opendata/browser/steo

pub mod normalize;
pub mod steo;

/// One item of `response.data`, field names exactly as the API sent them.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;
