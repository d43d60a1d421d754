/// Lenient numeric decoding for exchange payloads and stored state
use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(f64),
    Text(String),
}

/// Serde `deserialize_with` hook accepting `1.5` or `"1.5"`
pub fn number_or_string<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Numeric::deserialize(deserializer)? {
        Numeric::Number(value) => Ok(value),
        Numeric::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Read a JSON number or numeric string
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
