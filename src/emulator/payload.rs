//! Helpers for reading the command-specific `data.data` payload carried by
//! an inbound envelope.
//!
//! The wire payload is typically shaped `{params, transaction, lodging?}`
//! (spec §3); this module applies the same "nested overrides top-level"
//! merge rule the Gateway uses for its duck-typed request bodies (§9), here
//! merging `transaction` over `params` over the payload's own top-level
//! fields, so handlers can read a single flattened object regardless of
//! which shape a given terminal driver used.

use serde_json::{Map, Value};

use crate::amount::{self, AmountError};

/// Flatten a `{params?, transaction?, ...top-level}` payload into one
/// object, with `transaction` fields overriding `params` fields overriding
/// the payload's own top-level fields.
#[must_use]
pub fn merge(payload: &Value) -> Map<String, Value> {
    let mut merged = Map::new();
    let Some(obj) = payload.as_object() else { return merged };

    for (key, value) in obj {
        if key != "params" && key != "transaction" && key != "lodging" {
            merged.insert(key.clone(), value.clone());
        }
    }
    if let Some(params) = obj.get("params").and_then(Value::as_object) {
        for (key, value) in params {
            merged.insert(key.clone(), value.clone());
        }
    }
    if let Some(transaction) = obj.get("transaction").and_then(Value::as_object) {
        for (key, value) in transaction {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Read a string field.
#[must_use]
pub fn string(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// Read and normalize a decimal-string amount field.
///
/// # Errors
/// Returns [`AmountError`] if the field is present but not a valid amount.
pub fn amount(fields: &Map<String, Value>, key: &str) -> Result<Option<String>, AmountError> {
    fields.get(key).map(amount::normalize_json).transpose()
}

/// Read a boolean-ish `0`/`1` flag field, defaulting to `false`.
#[must_use]
pub fn flag(fields: &Map<String, Value>, key: &str) -> bool {
    match fields.get(key) {
        Some(Value::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
        Some(Value::String(s)) => s == "1",
        Some(Value::Bool(b)) => *b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn transaction_overrides_params_overrides_top_level() {
        let payload = json!({
            "baseAmount": "1.00",
            "params": {"baseAmount": "2.00", "invoiceNbr": "42"},
            "transaction": {"baseAmount": "3.00"},
        });
        let merged = merge(&payload);
        assert_eq!(string(&merged, "baseAmount").as_deref(), Some("3.00"));
        assert_eq!(string(&merged, "invoiceNbr").as_deref(), Some("42"));
    }

    #[test]
    fn flag_reads_numeric_and_string_truthiness() {
        let payload = json!({"allowPartialAuth": 1, "allowDuplicate": "0"});
        let merged = merge(&payload);
        assert!(flag(&merged, "allowPartialAuth"));
        assert!(!flag(&merged, "allowDuplicate"));
        assert!(!flag(&merged, "missing"));
    }
}
