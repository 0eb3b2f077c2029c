pub mod money;
pub mod receipt;
pub mod report;
pub mod settlement;

pub use money::{Money, Split};
pub use receipt::{
    normalize_item_name, ExtractedItem, Participant, ReceiptHeader, ReceiptId, SettlementId,
};
pub use report::{ReceiptSection, ReportRow, SettlementReport};
pub use settlement::{
    allocate, AllocationError, AllocationRequest, ItemAssignment, ReceiptAssignments,
    SettlementRecord, SettlementResult, SplitMethod,
};
