use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiptId(pub i64);

impl fmt::Display for ReceiptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettlementId(pub i64);

impl fmt::Display for SettlementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One purchased line on a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedItem {
    pub store_name: String,
    pub item_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub total_amount: Money,
}

impl ExtractedItem {
    pub fn new(
        store_name: impl Into<String>,
        item_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
        total_amount: Money,
    ) -> Self {
        ExtractedItem {
            store_name: store_name.into(),
            item_name: item_name.into().trim().to_string(),
            quantity: quantity.max(1),
            unit_price,
            total_amount,
        }
    }

    /// Whether this item's name matches `name` under [`normalize_item_name`].
    pub fn matches_name(&self, name: &str) -> bool {
        normalize_item_name(&self.item_name) == normalize_item_name(name)
    }
}

/// Receipt metadata as known at upload time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptHeader {
    pub id: ReceiptId,
    pub file_name: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Option<i64>,
    pub name: String,
}

/// Case- and whitespace-insensitive form of an item name used for exact
/// matching between assignments and extracted items.
pub fn normalize_item_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
