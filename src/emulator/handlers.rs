//! One function per emulator command, each building the final response body
//! from the decoded payload and the Terminal State Core.
//!
//! Mirrors the teacher's `commands/handlers.rs` / `news_handlers` split: a
//! focused function per command, returning a fully assembled reply rather
//! than a raw database row, the way `news_handlers::encode_reply` builds a
//! reply `Transaction` from typed data.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{Value, json};

use super::{
    payload::{self, merge},
    state::{
        Amounts, Batch, CardAcquisition, Identifier, StateCore, StateError, Transaction,
        TransactionKind, TransactionStatus,
    },
};
use crate::{amount, envelope::CommandResult};

/// Thresholds and outcome of the deterministic authorization simulation used
/// by `Sale` and `PreAuth`.
struct Authorization {
    status: TransactionStatus,
    decline_reason: Option<String>,
    authorized_amount: Option<String>,
    balance_due: Option<String>,
    partial: bool,
    response_code: &'static str,
    response_text: &'static str,
}

fn last_four(masked_pan: &str) -> &str {
    let len = masked_pan.len();
    if len >= 4 { masked_pan.get(len - 4..).unwrap_or("") } else { masked_pan }
}

fn evaluate_authorization(total: Decimal, masked_pan: &str) -> Authorization {
    let amount_too_high = total >= Decimal::from(500);
    let card_declined = last_four(masked_pan) == "0001";

    if amount_too_high || card_declined {
        let reason = if amount_too_high { "AMOUNT TOO HIGH" } else { "CARD DECLINED" };
        return Authorization {
            status: TransactionStatus::Declined,
            decline_reason: Some(reason.to_owned()),
            authorized_amount: None,
            balance_due: None,
            partial: false,
            response_code: "05",
            response_text: "DECLINE",
        };
    }

    if total >= Decimal::from(155) && total < Decimal::from(200) {
        let authorized = Decimal::from(100);
        let balance = total - authorized;
        return Authorization {
            status: TransactionStatus::Approved,
            decline_reason: None,
            authorized_amount: Some(amount::format_two_fractional(authorized)),
            balance_due: Some(amount::format_two_fractional(balance)),
            partial: true,
            response_code: "10",
            response_text: "PARTIAL APPROVAL",
        };
    }

    Authorization {
        status: TransactionStatus::Approved,
        decline_reason: None,
        authorized_amount: None,
        balance_due: None,
        partial: false,
        response_code: "00",
        response_text: "APPROVAL",
    }
}

fn placeholder_transaction(kind: TransactionKind, total_amount: String) -> Transaction {
    let now = Utc::now();
    Transaction {
        id: uuid_like(),
        tran_no: String::new(),
        reference_number: String::new(),
        response_id: String::new(),
        approval_code: None,
        kind,
        status: TransactionStatus::Pending,
        amounts: Amounts { total_amount, ..Default::default() },
        card_acquisition: None,
        card_type: None,
        masked_pan: None,
        batch_id: String::new(),
        created_at: now,
        updated_at: now,
        original_transaction: None,
        decline_reason: None,
        balance_due: None,
        partial: false,
    }
}

/// Generate an opaque internal id. Not a UUID library dependency: a
/// timestamp-seeded counter is sufficient since ids are never parsed, only
/// compared for equality.
fn uuid_like() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("tx-{nanos:x}")
}

fn response_envelope(response: &str, ecr_id: &str, request_id: &str, extra: Value) -> Value {
    let mut body = json!({
        "EcrId": ecr_id,
        "requestId": request_id,
        "response": response,
    });
    if let (Some(target), Some(source)) = (body.as_object_mut(), extra.as_object()) {
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
    }
    body
}

fn failure(
    response: &str,
    ecr_id: &str,
    request_id: &str,
    code: &str,
    message: &str,
) -> Value {
    response_envelope(
        response,
        ecr_id,
        request_id,
        json!({ "cmdResult": CommandResult::failed(code, message) }),
    )
}

/// Sum whichever of `base`/`tip`/`tax`/`cashback` are present, used as the
/// transaction total when the caller never supplied an explicit total
/// amount (`Sale` has no `totalAmount` field on the wire; spec §4.C lists
/// only the component fields).
fn sum_amount_components(parts: &[Option<&str>]) -> String {
    let sum = parts
        .iter()
        .copied()
        .flatten()
        .filter_map(|raw| amount::parse(raw).ok())
        .fold(Decimal::ZERO, |acc, value| acc + value);
    amount::format_two_fractional(sum)
}

async fn build_sale_like(
    state: &StateCore,
    kind: TransactionKind,
    payload: &Value,
    card_acquisition: CardAcquisition,
    total_amount_key: &str,
    default_total: Option<&str>,
) -> Result<Transaction, amount::AmountError> {
    let fields = merge(payload);
    let base = payload::amount(&fields, "baseAmount")?;
    let tip = payload::amount(&fields, "tipAmount")?;
    let tax = payload::amount(&fields, "taxAmount")?;
    let cashback = payload::amount(&fields, "cashbackAmount")?;

    let total_raw = payload::amount(&fields, total_amount_key)?
        .or_else(|| default_total.map(str::to_owned))
        .unwrap_or_else(|| sum_amount_components(&[base.as_deref(), tip.as_deref(), tax.as_deref(), cashback.as_deref()]));
    let total = amount::parse(&total_raw)?;

    let masked_pan =
        payload::string(&fields, "maskedPAN").unwrap_or_else(|| "400000******0000".to_owned());
    let card_type = payload::string(&fields, "cardType").unwrap_or_else(|| "VISA".to_owned());

    let auth = evaluate_authorization(total, &masked_pan);
    let ids = state.new_ids().await;

    let mut tx = placeholder_transaction(kind, amount::format_two_fractional(total));
    tx.tran_no = ids.tran_no;
    tx.reference_number = ids.reference_number;
    tx.response_id = ids.response_id;
    tx.approval_code = matches!(auth.status, TransactionStatus::Approved).then_some(ids.approval_code);
    tx.status = auth.status;
    tx.amounts.base_amount = base;
    tx.amounts.tip_amount = tip;
    tx.amounts.tax_amount = tax;
    tx.amounts.cashback_amount = cashback;
    tx.amounts.authorized_amount = auth.authorized_amount;
    tx.card_acquisition = Some(card_acquisition);
    tx.card_type = Some(card_type);
    tx.masked_pan = Some(masked_pan);
    tx.decline_reason = auth.decline_reason;
    tx.balance_due = auth.balance_due;
    tx.partial = auth.partial;

    Ok(state.add_transaction(tx).await)
}

fn host_result_json(response_code: &str, response_text: &str) -> Value {
    json!({ "responseCode": response_code, "responseText": response_text })
}

fn authorization_view(tx: &Transaction) -> (&'static str, &'static str) {
    match tx.status {
        TransactionStatus::Declined => ("05", "DECLINE"),
        _ if tx.partial => ("10", "PARTIAL APPROVAL"),
        _ => ("00", "APPROVAL"),
    }
}

fn sale_response(response: &str, ecr_id: &str, request_id: &str, tx: &Transaction) -> Value {
    let (code, text) = authorization_view(tx);
    let cmd_result = if tx.status == TransactionStatus::Declined {
        CommandResult::failed("DECLINE", tx.decline_reason.clone().unwrap_or_default())
    } else {
        CommandResult::success()
    };
    response_envelope(
        response,
        ecr_id,
        request_id,
        json!({
            "cmdResult": cmd_result,
            "host": host_result_json(code, text),
            "transaction": tx,
        }),
    )
}

/// `Sale` / `CreditSale`.
pub async fn sale(state: &StateCore, ecr_id: &str, request_id: &str, payload: &Value) -> Value {
    match build_sale_like(
        state,
        TransactionKind::Sale,
        payload,
        CardAcquisition::Manual,
        "totalAmount",
        None,
    )
    .await
    {
        Ok(tx) => sale_response("Sale", ecr_id, request_id, &tx),
        Err(err) => failure("Sale", ecr_id, request_id, "AMT001", &err.to_string()),
    }
}

/// `PreAuth` / `PreAuthorization`.
pub async fn preauth(state: &StateCore, ecr_id: &str, request_id: &str, payload: &Value) -> Value {
    let fields = merge(payload);
    let amount_field = payload::amount(&fields, "amount").ok().flatten();
    match build_sale_like(
        state,
        TransactionKind::PreAuth,
        payload,
        CardAcquisition::Manual,
        "preAuthAmount",
        amount_field.as_deref(),
    )
    .await
    {
        Ok(tx) => sale_response("PreAuth", ecr_id, request_id, &tx),
        Err(err) => failure("PreAuth", ecr_id, request_id, "AMT001", &err.to_string()),
    }
}

/// `AuthCompletion` (capture/close tab against a prior `PreAuth`).
pub async fn auth_completion(
    state: &StateCore,
    ecr_id: &str,
    request_id: &str,
    payload: &Value,
) -> Value {
    let fields = merge(payload);
    let Some(reference_number) = payload::string(&fields, "referenceNumber") else {
        return failure("AuthCompletion", ecr_id, request_id, "REF001", "missing referenceNumber");
    };
    let Some(original) = state.find(&Identifier::ReferenceNumber(reference_number)).await else {
        return failure("AuthCompletion", ecr_id, request_id, "REF001", "referenced transaction not found");
    };

    let total_raw = match payload::amount(&fields, "amount") {
        Ok(Some(v)) => v,
        Ok(None) => return failure("AuthCompletion", ecr_id, request_id, "AMT001", "missing amount"),
        Err(err) => return failure("AuthCompletion", ecr_id, request_id, "AMT001", &err.to_string()),
    };
    let tip_raw = match payload::amount(&fields, "tipAmount") {
        Ok(v) => v,
        Err(err) => return failure("AuthCompletion", ecr_id, request_id, "AMT001", &err.to_string()),
    };
    let total = match amount::parse(&total_raw) {
        Ok(v) => v,
        Err(err) => return failure("AuthCompletion", ecr_id, request_id, "AMT001", &err.to_string()),
    };

    let ids = state.new_ids().await;
    let mut tx = placeholder_transaction(TransactionKind::Capture, amount::format_two_fractional(total));
    tx.tran_no = ids.tran_no;
    tx.reference_number = ids.reference_number;
    tx.response_id = ids.response_id;
    tx.approval_code = Some(ids.approval_code);
    tx.status = TransactionStatus::Approved;
    tx.amounts.base_amount = Some(total_raw);
    tx.amounts.tip_amount = tip_raw;
    tx.card_acquisition = original.card_acquisition;
    tx.card_type = original.card_type.clone();
    tx.masked_pan = original.masked_pan.clone();
    tx.original_transaction = Some(original.id.clone());

    let stored = state.add_transaction(tx).await;
    sale_response("AuthCompletion", ecr_id, request_id, &stored)
}

fn resolve_target_identifier(fields: &serde_json::Map<String, Value>) -> Option<Identifier> {
    payload::string(fields, "tranNo")
        .map(Identifier::TranNo)
        .or_else(|| payload::string(fields, "referenceNumber").map(Identifier::ReferenceNumber))
}

/// `Void` / `VoidTransaction`.
pub async fn void(state: &StateCore, ecr_id: &str, request_id: &str, payload: &Value) -> Value {
    let fields = merge(payload);
    let Some(identifier) = resolve_target_identifier(&fields) else {
        return failure("Void", ecr_id, request_id, "REF001", "missing tranNo or referenceNumber");
    };
    let Some(original) = state.find(&identifier).await else {
        return failure("Void", ecr_id, request_id, "REF001", StateError::ReferenceNotFound.to_string().as_str());
    };

    let validation = match original.status {
        TransactionStatus::Voided => Some(StateError::AlreadyVoided),
        TransactionStatus::Settled => Some(StateError::AlreadySettled),
        TransactionStatus::Approved | TransactionStatus::TipAdjusted => None,
        _ => Some(StateError::NotAdjustable),
    };
    if let Some(err) = validation {
        return failure("Void", ecr_id, request_id, err.code(), &err.to_string());
    }

    let original_id = original.id.clone();
    let update_result = state
        .update(&Identifier::Id(original_id.clone()), |t| {
            t.status = TransactionStatus::Voided;
        })
        .await;
    let Ok(voided) = update_result else {
        return failure("Void", ecr_id, request_id, "TRAN009", "transaction not found");
    };

    let ids = state.new_ids().await;
    let mut void_tx = placeholder_transaction(TransactionKind::Void, voided.amounts.total_amount.clone());
    void_tx.tran_no = ids.tran_no;
    void_tx.reference_number = ids.reference_number;
    void_tx.response_id = ids.response_id;
    void_tx.status = TransactionStatus::Voided;
    void_tx.card_acquisition = voided.card_acquisition;
    void_tx.card_type = voided.card_type.clone();
    void_tx.masked_pan = voided.masked_pan.clone();
    void_tx.original_transaction = Some(original_id);
    let stored = state.add_transaction(void_tx).await;

    response_envelope(
        "Void",
        ecr_id,
        request_id,
        json!({ "cmdResult": CommandResult::success(), "transaction": stored }),
    )
}

/// `Refund` / `CreditRefund`.
pub async fn refund(state: &StateCore, ecr_id: &str, request_id: &str, payload: &Value) -> Value {
    let fields = merge(payload);
    let total_raw = match payload::amount(&fields, "totalAmount") {
        Ok(Some(v)) => v,
        Ok(None) => return failure("Refund", ecr_id, request_id, "AMT001", "missing totalAmount"),
        Err(err) => return failure("Refund", ecr_id, request_id, "AMT001", &err.to_string()),
    };
    let total = match amount::parse(&total_raw) {
        Ok(v) => v,
        Err(err) => return failure("Refund", ecr_id, request_id, "AMT001", &err.to_string()),
    };

    let reference_number = payload::string(&fields, "referenceNumber");
    let mut original_id = None;

    if let Some(reference_number) = reference_number {
        let Some(original) = state.find(&Identifier::ReferenceNumber(reference_number)).await else {
            return failure("Refund", ecr_id, request_id, "REF002", "refund target not found");
        };
        let Ok(original_total) = amount::parse(&original.amounts.total_amount) else {
            return failure("Refund", ecr_id, request_id, "AMT001", "invalid original amount");
        };
        if total > original_total {
            return failure(
                "Refund",
                ecr_id,
                request_id,
                StateError::RefundExceedsOriginal.code(),
                &StateError::RefundExceedsOriginal.to_string(),
            );
        }
        original_id = Some(original.id);
    }

    let ids = state.new_ids().await;
    let mut tx = placeholder_transaction(TransactionKind::Refund, amount::format_two_fractional(total));
    tx.tran_no = ids.tran_no;
    tx.reference_number = ids.reference_number;
    tx.response_id = ids.response_id;
    tx.status = TransactionStatus::Refunded;
    tx.original_transaction = original_id;
    let stored = state.add_transaction(tx).await;

    response_envelope(
        "Refund",
        ecr_id,
        request_id,
        json!({ "cmdResult": CommandResult::success(), "transaction": stored }),
    )
}

/// `TipAdjust` / `TipAdjustment`.
pub async fn tip_adjust(state: &StateCore, ecr_id: &str, request_id: &str, payload: &Value) -> Value {
    let fields = merge(payload);
    let Some(identifier) = resolve_target_identifier(&fields) else {
        return failure("TipAdjust", ecr_id, request_id, "REF001", "missing tranNo or referenceNumber");
    };
    let tip_raw = match payload::amount(&fields, "tipAmount") {
        Ok(Some(v)) => v,
        Ok(None) => return failure("TipAdjust", ecr_id, request_id, "TIP001", "missing tipAmount"),
        Err(err) => return failure("TipAdjust", ecr_id, request_id, "TIP001", &err.to_string()),
    };

    let Some(original) = state.find(&identifier).await else {
        return failure("TipAdjust", ecr_id, request_id, "REF001", "referenced transaction not found");
    };
    if !matches!(original.status, TransactionStatus::Approved | TransactionStatus::TipAdjusted) {
        return failure(
            "TipAdjust",
            ecr_id,
            request_id,
            StateError::NotTipAdjustable.code(),
            &StateError::NotTipAdjustable.to_string(),
        );
    }

    let base = amount::parse(original.amounts.base_amount.as_deref().unwrap_or("0.00")).unwrap_or_default();
    let tax = amount::parse(original.amounts.tax_amount.as_deref().unwrap_or("0.00")).unwrap_or_default();
    let cashback =
        amount::parse(original.amounts.cashback_amount.as_deref().unwrap_or("0.00")).unwrap_or_default();
    let Ok(tip) = amount::parse(&tip_raw) else {
        return failure("TipAdjust", ecr_id, request_id, "TIP001", "invalid tipAmount");
    };
    let new_total = amount::format_two_fractional(base + tax + cashback + tip);

    let updated = state
        .update(&Identifier::Id(original.id.clone()), |t| {
            t.amounts.tip_amount = Some(tip_raw.clone());
            t.amounts.total_amount.clone_from(&new_total);
            t.status = TransactionStatus::TipAdjusted;
        })
        .await;

    match updated {
        Ok(tx) => response_envelope(
            "TipAdjust",
            ecr_id,
            request_id,
            json!({ "cmdResult": CommandResult::success(), "transaction": tx }),
        ),
        Err(err) => failure("TipAdjust", ecr_id, request_id, err.code(), &err.to_string()),
    }
}

fn batch_summary(batch: &Batch) -> Value {
    json!({
        "batchId": batch.id,
        "salesCount": batch.settlement_count,
        "netAmount": batch.total_amount,
        "closeTime": batch.close_time,
    })
}

/// `EOD` / `EODProcessing` / `BatchClose` / `Batch`.
///
/// Always responds with `response: "EOD"` regardless of which alias routed
/// here, per the inherited quirk this behavior preserves rather than fixes.
pub async fn batch_close(state: &StateCore, ecr_id: &str, request_id: &str, _payload: &Value) -> Value {
    let closed = state.close_batch().await;
    response_envelope(
        "EOD",
        ecr_id,
        request_id,
        json!({ "cmdResult": CommandResult::success(), "batchSummary": batch_summary(&closed) }),
    )
}

/// `StatusInquiry` / `TransactionStatus`.
pub async fn status_inquiry(state: &StateCore, ecr_id: &str, request_id: &str, payload: &Value) -> Value {
    let fields = merge(payload);
    let Some(identifier) = resolve_target_identifier(&fields) else {
        return failure("StatusInquiry", ecr_id, request_id, "TRAN009", "missing tranNo or referenceNumber");
    };
    match state.find(&identifier).await {
        Some(tx) => response_envelope(
            "StatusInquiry",
            ecr_id,
            request_id,
            json!({ "cmdResult": CommandResult::success(), "transaction": tx }),
        ),
        None => failure(
            "StatusInquiry",
            ecr_id,
            request_id,
            StateError::TransactionNotFound.code(),
            &StateError::TransactionNotFound.to_string(),
        ),
    }
}

/// `BatchInquiry` / `BatchStatus`.
pub async fn batch_inquiry(state: &StateCore, ecr_id: &str, request_id: &str, _payload: &Value) -> Value {
    let batch = state.current_batch().await;
    response_envelope(
        "BatchInquiry",
        ecr_id,
        request_id,
        json!({ "cmdResult": CommandResult::success(), "batch": batch }),
    )
}

/// `TransactionList` / `TransactionHistory`.
pub async fn transaction_list(state: &StateCore, ecr_id: &str, request_id: &str, _payload: &Value) -> Value {
    let transactions = state.list_transactions().await;
    response_envelope(
        "TransactionList",
        ecr_id,
        request_id,
        json!({ "cmdResult": CommandResult::success(), "transactions": transactions }),
    )
}

/// `SystemReset` / `Reset`.
///
/// A no-op acknowledgement: this emulator carries no connection- or
/// device-level state that a reset would need to clear.
pub async fn system_reset(_state: &StateCore, ecr_id: &str, request_id: &str, _payload: &Value) -> Value {
    response_envelope(
        "SystemReset",
        ecr_id,
        request_id,
        json!({ "cmdResult": CommandResult::success() }),
    )
}

/// `Ping`.
pub async fn ping(_state: &StateCore, ecr_id: &str, request_id: &str, _payload: &Value) -> Value {
    response_envelope("Ping", ecr_id, request_id, json!({ "cmdResult": CommandResult::success() }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use camino::Utf8PathBuf;
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    async fn state(dir: &tempfile::TempDir) -> StateCore {
        let path = Utf8PathBuf::from_path_buf(dir.path().join("store.json")).expect("utf8 path");
        StateCore::load_or_init(&path, Duration::from_secs(30)).expect("load")
    }

    #[tokio::test]
    async fn sale_approves_a_normal_amount() {
        let dir = tempdir().expect("tempdir");
        let state = state(&dir).await;
        let payload = json!({"transaction": {"baseAmount": "10.00"}});
        let response = sale(&state, "ECR1", "000001", &payload).await;
        assert_eq!(response["cmdResult"]["result"], "Success");
        assert_eq!(response["transaction"]["status"], "Approved");
        assert_eq!(response["host"]["responseCode"], "00");
    }

    #[tokio::test]
    async fn sale_total_defaults_to_sum_of_components() {
        let dir = tempdir().expect("tempdir");
        let state = state(&dir).await;
        let payload = json!({
            "transaction": {"baseAmount": "150.00", "tipAmount": "10.00", "taxAmount": "5.00"},
        });
        let response = sale(&state, "ECR1", "000099", &payload).await;
        assert_eq!(response["transaction"]["totalAmount"], "165.00");
    }

    #[tokio::test]
    async fn sale_partial_approves_in_threshold_band() {
        let dir = tempdir().expect("tempdir");
        let state = state(&dir).await;
        let payload = json!({"transaction": {"baseAmount": "155.00"}});
        let response = sale(&state, "ECR1", "000002", &payload).await;
        assert_eq!(response["transaction"]["authorizedAmount"], "100.00");
        assert_eq!(response["transaction"]["balanceDue"], "55.00");
        assert_eq!(response["host"]["responseCode"], "10");
    }

    #[tokio::test]
    async fn sale_declines_above_threshold() {
        let dir = tempdir().expect("tempdir");
        let state = state(&dir).await;
        let payload = json!({"transaction": {"baseAmount": "500.00"}});
        let response = sale(&state, "ECR1", "000003", &payload).await;
        assert_eq!(response["cmdResult"]["result"], "Failed");
        assert_eq!(response["transaction"]["declineReason"], "AMOUNT TOO HIGH");
    }

    #[tokio::test]
    async fn void_lifecycle_rejects_second_void() {
        let dir = tempdir().expect("tempdir");
        let state = state(&dir).await;
        let sale_resp = sale(&state, "ECR1", "000004", &json!({"transaction": {"baseAmount": "10.00"}})).await;
        let tran_no = sale_resp["transaction"]["tranNo"].as_str().expect("tranNo").to_owned();

        let first_void = void(&state, "ECR1", "000005", &json!({"tranNo": tran_no})).await;
        assert_eq!(first_void["cmdResult"]["result"], "Success");

        let second_void = void(&state, "ECR1", "000006", &json!({"tranNo": tran_no})).await;
        assert_eq!(second_void["cmdResult"]["errorCode"], "VOID001");
    }

    #[tokio::test]
    async fn batch_close_settles_and_sums() {
        let dir = tempdir().expect("tempdir");
        let state = state(&dir).await;
        sale(&state, "ECR1", "000007", &json!({"transaction": {"baseAmount": "10.00"}})).await;
        sale(&state, "ECR1", "000008", &json!({"transaction": {"baseAmount": "20.00"}})).await;
        let closed = batch_close(&state, "ECR1", "000009", &json!({})).await;
        assert_eq!(closed["batchSummary"]["salesCount"], 2);
        assert_eq!(closed["batchSummary"]["netAmount"], "30.00");
    }
}
