use serde::Serialize;

use super::money::Money;
use super::receipt::{normalize_item_name, ExtractedItem, ReceiptHeader, SettlementId};
use super::settlement::{SettlementRecord, SplitMethod};

/// Everything an exporter needs to render one settlement, with no further
/// lookups.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementReport {
    pub settlement_id: SettlementId,
    pub method: SplitMethod,
    pub receipts: Vec<ReceiptSection>,
    pub settled_total: Money,
    pub undistributed: Money,
    pub per_participant_amount: Vec<(String, Money)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiptSection {
    pub header: ReceiptHeader,
    /// Store name of the first item; `None` when the receipt has no items.
    pub store_name: Option<String>,
    pub rows: Vec<ReportRow>,
    pub receipt_total: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    pub item: ExtractedItem,
    /// Who this item was split among. Empty for equal settlements, where
    /// every item is part of the single pooled split.
    pub participants: Vec<String>,
}

impl SettlementReport {
    /// `receipts` pairs each referenced receipt with its current items, in the
    /// order the report should list them.
    pub fn build(record: &SettlementRecord, receipts: Vec<(ReceiptHeader, Vec<ExtractedItem>)>) -> Self {
        let result = &record.result;

        let sections = receipts
            .into_iter()
            .map(|(header, items)| {
                let assignments = result
                    .item_assignments_audit
                    .iter()
                    .find(|a| a.receipt_id == header.id);

                let rows = items
                    .into_iter()
                    .map(|item| {
                        let participants = match (result.method, assignments) {
                            (SplitMethod::Item, Some(ra)) => {
                                let key = normalize_item_name(&item.item_name);
                                let mut who: Vec<String> = Vec::new();
                                for a in ra
                                    .item_assignments
                                    .iter()
                                    .filter(|a| normalize_item_name(&a.item_name) == key)
                                {
                                    for name in a.participant_names.iter().map(|n| n.trim()) {
                                        if !name.is_empty() && !who.iter().any(|w| w == name) {
                                            who.push(name.to_string());
                                        }
                                    }
                                }
                                who
                            }
                            _ => Vec::new(),
                        };
                        ReportRow { item, participants }
                    })
                    .collect::<Vec<_>>();

                ReceiptSection {
                    store_name: rows.first().map(|r| r.item.store_name.clone()),
                    receipt_total: rows.iter().map(|r| r.item.total_amount).sum(),
                    header,
                    rows,
                }
            })
            .collect();

        SettlementReport {
            settlement_id: record.id,
            method: result.method,
            receipts: sections,
            settled_total: result.settled_total(),
            undistributed: result.undistributed,
            per_participant_amount: result
                .per_participant_amount
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }

    pub fn method_label(&self) -> &'static str {
        match self.method {
            SplitMethod::Equal => "1/N 정산",
            SplitMethod::Item => "항목별 정산",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipt::ReceiptId;
    use crate::settlement::{allocate, AllocationRequest, ItemAssignment, ReceiptAssignments};
    use chrono::Utc;
    use std::collections::HashMap;

    fn header(id: i64) -> ReceiptHeader {
        ReceiptHeader { id: ReceiptId(id), file_name: format!("r{id}.jpg"), uploaded_at: Utc::now() }
    }

    fn item(name: &str, total: i64) -> ExtractedItem {
        ExtractedItem::new("김밥천국", name, 1, Money::new(total), Money::new(total))
    }

    fn record(request: &AllocationRequest, items: &HashMap<ReceiptId, Vec<ExtractedItem>>) -> SettlementRecord {
        SettlementRecord {
            id: SettlementId(1),
            result: allocate(request, items).unwrap(),
            participant_names: vec![],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn item_report_lists_participants_per_row() {
        let items: HashMap<_, _> = [(ReceiptId(1), vec![item("김밥", 3000), item("라면", 4000)])].into();
        let request = AllocationRequest {
            method: SplitMethod::Item,
            receipts: vec![ReceiptAssignments {
                receipt_id: ReceiptId(1),
                item_assignments: vec![
                    ItemAssignment { item_name: "김밥".into(), participant_names: vec!["A".into()] },
                    ItemAssignment { item_name: "라면".into(), participant_names: vec!["A".into(), "B".into()] },
                ],
            }],
            participant_names: vec![],
        };
        let rec = record(&request, &items);

        let report = SettlementReport::build(&rec, vec![(header(1), items[&ReceiptId(1)].clone())]);
        let section = &report.receipts[0];
        assert_eq!(section.store_name.as_deref(), Some("김밥천국"));
        assert_eq!(section.receipt_total, Money::new(7000));
        assert_eq!(section.rows[0].participants, vec!["A".to_string()]);
        assert_eq!(section.rows[1].participants, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(report.settled_total, Money::new(7000));
        assert_eq!(report.method_label(), "항목별 정산");
    }

    #[test]
    fn equal_report_has_no_per_row_participants() {
        let items: HashMap<_, _> = [(ReceiptId(1), vec![item("김밥", 6000)])].into();
        let request = AllocationRequest {
            method: SplitMethod::Equal,
            receipts: vec![ReceiptAssignments { receipt_id: ReceiptId(1), item_assignments: vec![] }],
            participant_names: vec!["A".into(), "B".into()],
        };
        let rec = record(&request, &items);

        let report = SettlementReport::build(&rec, vec![(header(1), items[&ReceiptId(1)].clone())]);
        assert!(report.receipts[0].rows[0].participants.is_empty());
        assert_eq!(report.per_participant_amount.len(), 2);
        assert_eq!(report.method_label(), "1/N 정산");
    }

    #[test]
    fn receipt_without_items_has_no_store_name() {
        let items: HashMap<_, _> = [(ReceiptId(1), vec![])].into();
        let request = AllocationRequest {
            method: SplitMethod::Equal,
            receipts: vec![ReceiptAssignments { receipt_id: ReceiptId(1), item_assignments: vec![] }],
            participant_names: vec!["A".into()],
        };
        let rec = record(&request, &items);
        let report = SettlementReport::build(&rec, vec![(header(1), vec![])]);
        assert!(report.receipts[0].store_name.is_none());
        assert_eq!(report.receipts[0].receipt_total, Money::zero());
    }
}
