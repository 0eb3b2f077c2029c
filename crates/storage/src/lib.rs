pub mod db;

pub use db::{
    clear_all_data, create_db, get_all_participants, get_all_receipts, get_items_by_receipts,
    get_items_for_receipt, get_receipt_by_id, get_settlement, insert_participant, insert_receipt,
    insert_settlement, replace_all_items, DbPool, ReceiptRecord, StorageError, StoredItem,
};
