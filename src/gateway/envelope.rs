//! Per-command envelope factories.
//!
//! Each function takes the Gateway's merged request body (already flattened
//! nested-over-top-level, per spec.md §4.C.1) plus the resolved `ecrId` and
//! `requestId`, normalizes the amount fields the command recognizes, and
//! builds the [`Envelope`] the Protocol Engine will send. This is the
//! Gateway's analogue of the teacher's `commands::build_request` factories
//! (`src/commands/mod.rs`): one function per wire command, returning a typed
//! failure the caller maps to HTTP 400 rather than ever panicking on bad
//! input.

use serde_json::{Map, Value, json};

use crate::{
    envelope::Envelope,
    gateway::errors::GatewayError,
};

fn required_string(fields: &Map<String, Value>, key: &str) -> Result<String, GatewayError> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| GatewayError::BadRequest(format!("missing required field '{key}'")))
}

fn optional_string(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn required_amount(fields: &Map<String, Value>, key: &str) -> Result<String, GatewayError> {
    let raw = fields
        .get(key)
        .ok_or_else(|| GatewayError::BadRequest(format!("missing required field '{key}'")))?;
    Ok(crate::amount::normalize_json(raw)?)
}

fn optional_amount(fields: &Map<String, Value>, key: &str) -> Result<Option<Value>, GatewayError> {
    fields
        .get(key)
        .map(|raw| crate::amount::normalize_json(raw).map(Value::String).map_err(GatewayError::from))
        .transpose()
}

/// Build a `Sale` envelope.
///
/// # Errors
/// Returns [`GatewayError::BadRequest`] if `baseAmount` is missing or any
/// recognized amount field fails to normalize.
pub fn sale(fields: &Map<String, Value>, ecr_id: &str, request_id: &str) -> Result<Envelope, GatewayError> {
    let base_amount = required_amount(fields, "baseAmount")?;
    let mut data = json!({
        "baseAmount": base_amount,
        "taxIndicator": optional_string(fields, "taxIndicator").unwrap_or_else(|| "0".to_owned()),
    });
    insert_optional_amount(&mut data, fields, "tipAmount")?;
    insert_optional_amount(&mut data, fields, "taxAmount")?;
    insert_optional_amount(&mut data, fields, "cashBackAmount")?;
    insert_optional(&mut data, "allowPartialAuth", fields.get("allowPartialAuth").cloned());
    insert_optional(&mut data, "allowDuplicate", fields.get("allowDuplicate").cloned());
    insert_optional(&mut data, "invoiceNbr", optional_string(fields, "invoiceNbr").map(Value::String));
    if let Some(lodging) = fields.get("lodging") {
        insert_optional(&mut data, "lodging", Some(lodging.clone()));
    }
    Ok(Envelope::new("Sale", ecr_id, request_id).with_data(data))
}

/// Build a `PreAuth` envelope.
///
/// # Errors
/// Returns [`GatewayError::BadRequest`] if `amount` is missing or any
/// recognized amount field fails to normalize.
pub fn preauth(fields: &Map<String, Value>, ecr_id: &str, request_id: &str) -> Result<Envelope, GatewayError> {
    let amount = required_amount(fields, "amount")?;
    let mut data = json!({ "amount": amount });
    insert_optional_amount(&mut data, fields, "preAuthAmount")?;
    if let Some(lodging) = fields.get("lodging") {
        insert_optional(&mut data, "lodging", Some(lodging.clone()));
    }
    Ok(Envelope::new("PreAuth", ecr_id, request_id).with_data(data))
}

/// Build an `AuthCompletion` envelope.
///
/// # Errors
/// Returns [`GatewayError::BadRequest`] if `referenceNumber` or `amount` is
/// missing, or an amount field fails to normalize.
pub fn auth_completion(fields: &Map<String, Value>, ecr_id: &str, request_id: &str) -> Result<Envelope, GatewayError> {
    let reference_number = required_string(fields, "referenceNumber")?;
    let amount = required_amount(fields, "amount")?;
    let mut data = json!({ "referenceNumber": reference_number, "amount": amount });
    insert_optional_amount(&mut data, fields, "tipAmount")?;
    Ok(Envelope::new("AuthCompletion", ecr_id, request_id).with_data(data))
}

/// Build a `Void` envelope.
///
/// # Errors
/// Returns [`GatewayError::BadRequest`] if neither `tranNo` nor
/// `referenceNumber` is present.
pub fn void(fields: &Map<String, Value>, ecr_id: &str, request_id: &str) -> Result<Envelope, GatewayError> {
    let data = target_identifier(fields)?;
    Ok(Envelope::new("Void", ecr_id, request_id).with_data(data))
}

/// Build a `Refund` envelope.
///
/// # Errors
/// Returns [`GatewayError::BadRequest`] if `totalAmount` is missing or fails
/// to normalize.
pub fn refund(fields: &Map<String, Value>, ecr_id: &str, request_id: &str) -> Result<Envelope, GatewayError> {
    let total_amount = required_amount(fields, "totalAmount")?;
    let mut data = json!({ "totalAmount": total_amount });
    insert_optional(&mut data, "referenceNumber", optional_string(fields, "referenceNumber").map(Value::String));
    Ok(Envelope::new("Refund", ecr_id, request_id).with_data(data))
}

/// Build a `TipAdjust` envelope.
///
/// # Errors
/// Returns [`GatewayError::BadRequest`] if `tipAmount` fails to normalize or
/// neither `tranNo` nor `referenceNumber` is present.
pub fn tip_adjust(fields: &Map<String, Value>, ecr_id: &str, request_id: &str) -> Result<Envelope, GatewayError> {
    let tip_amount = required_amount(fields, "tipAmount")?;
    let mut data = target_identifier(fields)?;
    insert_optional(&mut data, "tipAmount", Some(Value::String(tip_amount)));
    Ok(Envelope::new("TipAdjust", ecr_id, request_id).with_data(data))
}

/// Build an `EOD` (batch close) envelope.
#[must_use]
pub fn batch_close(ecr_id: &str, request_id: &str) -> Envelope { Envelope::new("EOD", ecr_id, request_id) }

/// Build a generic passthrough envelope from an explicit `{command, data}`
/// body.
///
/// # Errors
/// Returns [`GatewayError::BadRequest`] if `command` is missing.
pub fn command(fields: &Map<String, Value>, ecr_id: &str, request_id: &str) -> Result<Envelope, GatewayError> {
    let command = required_string(fields, "command")?;
    let payload = fields.get("data").cloned();
    let mut envelope = Envelope::new(command, ecr_id, request_id);
    if let Some(payload) = payload {
        envelope = envelope.with_data(payload);
    }
    Ok(envelope)
}

/// Build a `Ping` envelope.
#[must_use]
pub fn ping(ecr_id: &str, request_id: &str) -> Envelope { Envelope::new("Ping", ecr_id, request_id) }

fn target_identifier(fields: &Map<String, Value>) -> Result<Value, GatewayError> {
    if let Some(tran_no) = optional_string(fields, "tranNo") {
        return Ok(json!({ "tranNo": tran_no }));
    }
    if let Some(reference_number) = optional_string(fields, "referenceNumber") {
        return Ok(json!({ "referenceNumber": reference_number }));
    }
    Err(GatewayError::BadRequest("one of 'tranNo' or 'referenceNumber' is required".to_owned()))
}

fn insert_optional_amount(data: &mut Value, fields: &Map<String, Value>, key: &str) -> Result<(), GatewayError> {
    insert_optional(data, key, optional_amount(fields, key)?);
    Ok(())
}

fn insert_optional(data: &mut Value, key: &str, value: Option<Value>) {
    if let (Some(object), Some(value)) = (data.as_object_mut(), value) {
        object.insert(key.to_owned(), value);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fields_of(value: Value) -> Map<String, Value> { value.as_object().expect("object").clone() }

    #[test]
    fn sale_requires_base_amount() {
        let fields = Map::new();
        assert!(sale(&fields, "ECR1", "000001").is_err());
    }

    #[test]
    fn sale_builds_normalized_envelope() {
        let fields = fields_of(json!({"baseAmount": "10", "tipAmount": 1.5}));
        let envelope = sale(&fields, "ECR1", "000001").expect("valid");
        let value = envelope.to_value().expect("serialize");
        assert_eq!(value["data"]["data"]["baseAmount"], "10.00");
        assert_eq!(value["data"]["data"]["tipAmount"], "1.50");
    }

    #[test]
    fn void_requires_tran_no_or_reference_number() {
        let fields = Map::new();
        assert!(void(&fields, "ECR1", "000001").is_err());
    }

    #[test]
    fn void_prefers_tran_no_over_reference_number() {
        let fields = fields_of(json!({"tranNo": "000123", "referenceNumber": "200000000001"}));
        let envelope = void(&fields, "ECR1", "000001").expect("valid");
        let value = envelope.to_value().expect("serialize");
        assert_eq!(value["data"]["data"]["tranNo"], "000123");
        assert!(value["data"]["data"].get("referenceNumber").is_none());
    }
}
