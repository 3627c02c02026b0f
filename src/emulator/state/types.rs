//! Persisted domain types for the Terminal State Core.
//!
//! Amounts are always decimal strings (see [`crate::amount`]); nothing here
//! ever holds a transaction amount as `f64`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transaction kind, matching the command that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// A credit sale.
    Sale,
    /// An authorization hold without capture.
    PreAuth,
    /// Capture of a prior `PreAuth`.
    Capture,
    /// A void of a prior transaction.
    Void,
    /// A refund, referenced or unreferenced.
    Refund,
    /// A tip adjustment on a prior transaction.
    TipAdjust,
    /// A reversal (not reachable from the documented command surface, kept
    /// for forward compatibility with `originalTransaction` back-references).
    Reversal,
    /// A batch close/EOD transaction marker.
    BatchClose,
    /// A forced sale bypassing normal authorization.
    ForceSale,
}

/// Transaction lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Created but not yet resolved.
    Pending,
    /// Authorized (fully or partially).
    Approved,
    /// Declined by the (simulated) issuer.
    Declined,
    /// Voided before settlement.
    Voided,
    /// Settled as part of a closed batch.
    Settled,
    /// Refunded.
    Refunded,
    /// Partially voided (reserved for future partial-void support).
    PartialVoided,
    /// Tip amount adjusted after approval, before settlement.
    TipAdjusted,
}

impl TransactionStatus {
    /// Whether a transaction in this status is eligible for settlement on
    /// batch close.
    #[must_use]
    pub const fn is_settlement_eligible(self) -> bool {
        matches!(self, Self::Approved | Self::TipAdjusted)
    }

    /// Whether a transaction in this status is terminal (no further
    /// transitions are possible).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Settled | Self::Voided | Self::Declined)
    }
}

/// Card acquisition method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardAcquisition {
    /// Chip insert.
    Insert,
    /// Magnetic stripe swipe.
    Swipe,
    /// Manually keyed entry.
    Manual,
    /// Contactless tap.
    Tap,
}

/// Decimal-string amount fields carried by a transaction.
///
/// Every field is optional except `totalAmount`: a command only sets the
/// amounts it is defined over (§4.C of the requirements this module
/// implements), and the rest are omitted from the wire response rather than
/// rendered as `"0.00"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amounts {
    /// Base sale amount before tip/tax/cashback.
    #[serde(rename = "baseAmount", skip_serializing_if = "Option::is_none")]
    pub base_amount: Option<String>,
    /// Tip amount.
    #[serde(rename = "tipAmount", skip_serializing_if = "Option::is_none")]
    pub tip_amount: Option<String>,
    /// Tax amount.
    #[serde(rename = "taxAmount", skip_serializing_if = "Option::is_none")]
    pub tax_amount: Option<String>,
    /// Cashback amount.
    #[serde(rename = "cashbackAmount", skip_serializing_if = "Option::is_none")]
    pub cashback_amount: Option<String>,
    /// Total amount actually charged/refunded/voided.
    #[serde(rename = "totalAmount")]
    pub total_amount: String,
    /// Amount actually authorized, when less than requested (partial
    /// approval).
    #[serde(rename = "authorizedAmount", skip_serializing_if = "Option::is_none")]
    pub authorized_amount: Option<String>,
}

/// A single transaction record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Internal opaque identifier, never exposed as a lookup key by name.
    pub id: String,
    /// Zero-padded monotonic transaction number.
    #[serde(rename = "tranNo")]
    pub tran_no: String,
    /// Twelve-digit monotonic reference number.
    #[serde(rename = "referenceNumber")]
    pub reference_number: String,
    /// Numeric response identifier, unique across the store.
    #[serde(rename = "responseId")]
    pub response_id: String,
    /// Six-digit approval code, present only when approved.
    #[serde(rename = "approvalCode", skip_serializing_if = "Option::is_none")]
    pub approval_code: Option<String>,
    /// The command that produced this record.
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    /// Current lifecycle status.
    pub status: TransactionStatus,
    /// Decimal-string amount fields.
    pub amounts: Amounts,
    /// How the card was presented.
    #[serde(rename = "cardAcquisition", skip_serializing_if = "Option::is_none")]
    pub card_acquisition: Option<CardAcquisition>,
    /// Card brand/type label.
    #[serde(rename = "cardType", skip_serializing_if = "Option::is_none")]
    pub card_type: Option<String>,
    /// First six and last four digits of the PAN, remainder masked.
    #[serde(rename = "maskedPAN", skip_serializing_if = "Option::is_none")]
    pub masked_pan: Option<String>,
    /// Batch this transaction belongs to.
    #[serde(rename = "batchId")]
    pub batch_id: String,
    /// Creation timestamp.
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    /// `id` of a prior transaction this one relates to (Void/Refund/TipAdjust
    /// target), never an ownership relation.
    #[serde(rename = "originalTransaction", skip_serializing_if = "Option::is_none")]
    pub original_transaction: Option<String>,
    /// Reason the transaction was declined, present only when declined.
    #[serde(rename = "declineReason", skip_serializing_if = "Option::is_none")]
    pub decline_reason: Option<String>,
    /// Remaining balance when `authorizedAmount` is less than the requested
    /// total (partial approval).
    #[serde(rename = "balanceDue", skip_serializing_if = "Option::is_none")]
    pub balance_due: Option<String>,
    /// Whether this transaction was only partially authorized.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
}

/// A settlement batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Batch identifier, `"B" + zero-padded batch number`.
    pub id: String,
    /// When the batch was opened.
    #[serde(rename = "openTime")]
    pub open_time: DateTime<Utc>,
    /// When the batch was closed, if it has been.
    #[serde(rename = "closeTime", skip_serializing_if = "Option::is_none")]
    pub close_time: Option<DateTime<Utc>>,
    /// Whether the batch is still accepting transactions.
    #[serde(rename = "isOpen")]
    pub is_open: bool,
    /// Ids of transactions bound to this batch.
    pub transactions: Vec<String>,
    /// Count of transactions settled at close time.
    #[serde(rename = "settlementCount", skip_serializing_if = "Option::is_none")]
    pub settlement_count: Option<u32>,
    /// Sum of settled `totalAmount` at close time.
    #[serde(rename = "totalAmount", skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<String>,
}

/// Monotonic ID counters, reconstructed on load as `max(existing) + 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counters {
    /// Next transaction number to allocate.
    #[serde(rename = "nextTranNo")]
    pub next_tran_no: u64,
    /// Next batch number to allocate.
    #[serde(rename = "nextBatchNo")]
    pub next_batch_no: u64,
    /// Next reference number to allocate.
    #[serde(rename = "nextRefNo")]
    pub next_ref_no: u64,
    /// Next response identifier to allocate.
    #[serde(rename = "nextResponseId")]
    pub next_response_id: u64,
}

/// Starting value for `nextRefNo` on a fresh store, per the requirements
/// this module implements.
pub const INITIAL_REF_NO: u64 = 200_000_000_000;

impl Default for Counters {
    fn default() -> Self {
        Self {
            next_tran_no: 1,
            next_batch_no: 1,
            next_ref_no: INITIAL_REF_NO,
            next_response_id: 1,
        }
    }
}

/// Running totals tracked alongside the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statistics {
    /// Transaction count for the current calendar day (UTC).
    #[serde(rename = "dailyCount")]
    pub daily_count: u64,
    /// Sum of `totalAmount` for the current calendar day (UTC).
    #[serde(rename = "dailyTotal")]
    pub daily_total: String,
    /// Transaction count since the store was first created.
    #[serde(rename = "globalCount")]
    pub global_count: u64,
    /// Sum of `totalAmount` since the store was first created.
    #[serde(rename = "globalTotal")]
    pub global_total: String,
}

/// Freshly allocated identifiers for a new transaction.
#[derive(Debug, Clone)]
pub struct NewIds {
    /// Zero-padded transaction number.
    pub tran_no: String,
    /// Twelve-digit reference number.
    pub reference_number: String,
    /// Numeric response identifier.
    pub response_id: String,
    /// Six-digit approval code, to be used only if the transaction is
    /// approved.
    pub approval_code: String,
}

/// A lookup key accepted by [`super::core::StateCore::find`] and
/// [`super::core::StateCore::update`], tried in this declared order:
/// `id`, then `tranNo`, then `referenceNumber`, then `responseId`.
#[derive(Debug, Clone)]
pub enum Identifier {
    /// Internal opaque id.
    Id(String),
    /// Zero-padded transaction number.
    TranNo(String),
    /// Reference number.
    ReferenceNumber(String),
    /// Response identifier.
    ResponseId(String),
}

impl Identifier {
    /// Whether `tx` matches this identifier.
    #[must_use]
    pub fn matches(&self, tx: &Transaction) -> bool {
        match self {
            Self::Id(v) => &tx.id == v,
            Self::TranNo(v) => &tx.tran_no == v,
            Self::ReferenceNumber(v) => &tx.reference_number == v,
            Self::ResponseId(v) => &tx.response_id == v,
        }
    }
}
