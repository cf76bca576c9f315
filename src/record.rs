use serde_json::Value;
use std::collections::HashMap;

/// Sparse user payload keyed by field key. Keys the template does not name
/// are carried but never rendered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordData {
    values: HashMap<String, String>,
}

impl RecordData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Accepts a JSON object. Strings are taken as-is, other scalars are
    /// stringified, `null` leaves the key absent and arrays or objects are
    /// kept as compact JSON text.
    pub fn from_json_str(input: &str) -> Result<Self, serde_json::Error> {
        let map: serde_json::Map<String, Value> = serde_json::from_str(input)?;
        Ok(map
            .into_iter()
            .filter_map(|(key, value)| {
                let text = match value {
                    Value::Null => return None,
                    Value::String(text) => text,
                    Value::Bool(flag) => flag.to_string(),
                    Value::Number(number) => number.to_string(),
                    nested @ (Value::Array(_) | Value::Object(_)) => nested.to_string(),
                };
                Some((key, text))
            })
            .collect())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RecordData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}
