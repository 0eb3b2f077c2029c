use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

use super::money::Money;
use super::receipt::{ExtractedItem, ReceiptId, SettlementId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMethod {
    /// Divide the grand total evenly across the named participants.
    #[default]
    Equal,
    /// Split each assigned item among the participants it was assigned to.
    Item,
}

impl fmt::Display for SplitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitMethod::Equal => write!(f, "equal"),
            SplitMethod::Item => write!(f, "item"),
        }
    }
}

impl std::str::FromStr for SplitMethod {
    type Err = AllocationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "equal" => Ok(SplitMethod::Equal),
            "item" => Ok(SplitMethod::Item),
            other => Err(AllocationError::Malformed(format!(
                "method must be \"equal\" or \"item\", got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAssignment {
    pub item_name: String,
    #[serde(default, alias = "participants")]
    pub participant_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptAssignments {
    pub receipt_id: ReceiptId,
    #[serde(default, alias = "items")]
    pub item_assignments: Vec<ItemAssignment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    #[serde(default)]
    pub method: SplitMethod,
    #[serde(default)]
    pub receipts: Vec<ReceiptAssignments>,
    /// Required only for [`SplitMethod::Equal`].
    #[serde(default, alias = "participants")]
    pub participant_names: Vec<String>,
}

impl AllocationRequest {
    /// Parse a request from its JSON wire form. Any shape error, including an
    /// unknown `method`, surfaces as [`AllocationError::Malformed`].
    pub fn from_json(json: &str) -> Result<Self, AllocationError> {
        serde_json::from_str(json).map_err(|e| AllocationError::Malformed(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("Malformed allocation request: {0}")]
    Malformed(String),
    #[error("receipts must not be empty")]
    NoReceipts,
    #[error("participant_names is required for the equal method")]
    NoParticipants,
    #[error("item method requires item_assignments for receipt {0}")]
    NoAssignments(ReceiptId),
    #[error("none of the requested receipts exist")]
    NoKnownReceipts,
    #[error("amounts are too large to add up")]
    AmountOverflow,
}

/// Outcome of a single allocation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementResult {
    pub method: SplitMethod,
    pub per_participant_amount: BTreeMap<String, Money>,
    /// The assignment lists exactly as consumed, kept for audit and export.
    pub item_assignments_audit: Vec<ReceiptAssignments>,
    /// Receipts that resolved and contributed, in request order.
    pub receipt_ids: Vec<ReceiptId>,
    /// Rounding loss left over by floor division; never distributed.
    pub undistributed: Money,
}

impl SettlementResult {
    pub fn settled_total(&self) -> Money {
        self.per_participant_amount.values().copied().sum()
    }
}

/// A settlement as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub id: SettlementId,
    pub result: SettlementResult,
    /// Roster participants (by name) that appear in the result.
    pub participant_names: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Validated, de-duplicated view of an [`AllocationRequest`].
struct ValidatedRequest<'a> {
    method: SplitMethod,
    receipts: &'a [ReceiptAssignments],
    participants: Vec<String>,
}

impl<'a> ValidatedRequest<'a> {
    fn validate(request: &'a AllocationRequest) -> Result<Self, AllocationError> {
        if request.receipts.is_empty() {
            return Err(AllocationError::NoReceipts);
        }

        let participants = distinct_names(&request.participant_names);
        match request.method {
            SplitMethod::Equal => {
                if participants.is_empty() {
                    return Err(AllocationError::NoParticipants);
                }
            }
            SplitMethod::Item => {
                if let Some(r) = request.receipts.iter().find(|r| r.item_assignments.is_empty()) {
                    return Err(AllocationError::NoAssignments(r.receipt_id));
                }
            }
        }

        Ok(ValidatedRequest {
            method: request.method,
            receipts: &request.receipts,
            participants,
        })
    }
}

/// Compute who owes what.
///
/// `items_by_receipt` holds the materialized items of every receipt the
/// caller knows about. Requested receipts missing from it are skipped; if none
/// of them resolve, the call fails and nothing should be persisted.
pub fn allocate(
    request: &AllocationRequest,
    items_by_receipt: &HashMap<ReceiptId, Vec<ExtractedItem>>,
) -> Result<SettlementResult, AllocationError> {
    let req = ValidatedRequest::validate(request)?;

    let resolved: Vec<(&ReceiptAssignments, &[ExtractedItem])> = req
        .receipts
        .iter()
        .filter_map(|r| match items_by_receipt.get(&r.receipt_id) {
            Some(items) => Some((r, items.as_slice())),
            None => {
                tracing::warn!("Skipping unknown receipt {} in allocation", r.receipt_id);
                None
            }
        })
        .collect();

    if resolved.is_empty() {
        return Err(AllocationError::NoKnownReceipts);
    }

    let (per_participant_amount, undistributed) = match req.method {
        SplitMethod::Equal => split_equally(&resolved, &req.participants)?,
        SplitMethod::Item => split_by_item(&resolved)?,
    };

    Ok(SettlementResult {
        method: req.method,
        per_participant_amount,
        item_assignments_audit: resolved.iter().map(|(r, _)| (*r).clone()).collect(),
        receipt_ids: resolved.iter().map(|(r, _)| r.receipt_id).collect(),
        undistributed,
    })
}

fn checked_add(a: Money, b: Money) -> Result<Money, AllocationError> {
    a.checked_add(b).ok_or(AllocationError::AmountOverflow)
}

fn split_equally(
    receipts: &[(&ReceiptAssignments, &[ExtractedItem])],
    participants: &[String],
) -> Result<(BTreeMap<String, Money>, Money), AllocationError> {
    let grand_total = receipts
        .iter()
        .flat_map(|(_, items)| items.iter().map(|i| i.total_amount))
        .try_fold(Money::zero(), checked_add)?;

    let split = grand_total.split(participants.len());
    let result = participants
        .iter()
        .map(|name| (name.clone(), split.share))
        .collect();
    Ok((result, split.remainder))
}

fn split_by_item(
    receipts: &[(&ReceiptAssignments, &[ExtractedItem])],
) -> Result<(BTreeMap<String, Money>, Money), AllocationError> {
    let mut result: BTreeMap<String, Money> = BTreeMap::new();
    let mut undistributed = Money::zero();

    for (receipt, items) in receipts {
        for assignment in &receipt.item_assignments {
            // A name listed twice counts once: ["A", "A", "B"] splits in two,
            // not three, so nobody pays a double share.
            let names = distinct_names(&assignment.participant_names);
            // Every same-named item is split on its own rather than pooled.
            for item in items.iter().filter(|i| i.matches_name(&assignment.item_name)) {
                let split = item.total_amount.split(names.len());
                for name in &names {
                    let owed = result.entry(name.clone()).or_default();
                    *owed = checked_add(*owed, split.share)?;
                }
                let left = if names.is_empty() { item.total_amount } else { split.remainder };
                undistributed = checked_add(undistributed, left)?;
            }
        }
    }

    Ok((result, undistributed))
}

/// Trimmed, non-empty names in first-seen order.
fn distinct_names(names: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if !out.iter().any(|seen| seen == name) {
            out.push(name.to_string());
        }
    }
    out
}
