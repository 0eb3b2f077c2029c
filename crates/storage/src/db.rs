use chrono::{DateTime, Utc};
use nbbang_core::{
    ExtractedItem, Money, Participant, ReceiptAssignments, ReceiptHeader, ReceiptId,
    SettlementId, SettlementRecord, SettlementResult, SplitMethod,
};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Participant already exists: {0}")]
    DuplicateParticipant(String),
    #[error("Participant name must not be empty")]
    InvalidName,
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiptRecord {
    pub id: ReceiptId,
    /// Name the file was uploaded under.
    pub file_name: String,
    /// Where the image lives in the attachment tree.
    pub image_path: String,
    pub content_hash: String,
    pub uploaded_at: DateTime<Utc>,
}

impl ReceiptRecord {
    pub fn header(&self) -> ReceiptHeader {
        ReceiptHeader {
            id: self.id,
            file_name: self.file_name.clone(),
            uploaded_at: self.uploaded_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredItem {
    pub id: i64,
    pub receipt_id: ReceiptId,
    pub item: ExtractedItem,
}

type ReceiptRow = (i64, String, String, String, DateTime<Utc>);
type ItemRow = (i64, i64, String, String, i64, i64, i64);

pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS receipts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_name TEXT NOT NULL,
            image_path TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            uploaded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS receipt_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            receipt_id INTEGER NOT NULL,
            store_name TEXT NOT NULL,
            item_name TEXT NOT NULL,
            quantity INTEGER NOT NULL CHECK (quantity >= 1),
            unit_price INTEGER NOT NULL CHECK (unit_price >= 0),
            total_amount INTEGER NOT NULL CHECK (total_amount >= 0),
            FOREIGN KEY (receipt_id) REFERENCES receipts(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS participants (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settlements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            method TEXT NOT NULL,
            result_json TEXT NOT NULL,
            item_assignments_json TEXT NOT NULL,
            undistributed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settlement_receipts (
            settlement_id INTEGER NOT NULL,
            receipt_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (settlement_id, receipt_id),
            FOREIGN KEY (settlement_id) REFERENCES settlements(id) ON DELETE CASCADE,
            FOREIGN KEY (receipt_id) REFERENCES receipts(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settlement_participants (
            settlement_id INTEGER NOT NULL,
            participant_id INTEGER NOT NULL,
            PRIMARY KEY (settlement_id, participant_id),
            FOREIGN KEY (settlement_id) REFERENCES settlements(id) ON DELETE CASCADE,
            FOREIGN KEY (participant_id) REFERENCES participants(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

// ── Receipts ──────────────────────────────────────────────────────────────────

pub async fn insert_receipt(
    pool: &DbPool,
    file_name: &str,
    image_path: &str,
    content_hash: &str,
) -> Result<ReceiptRecord, StorageError> {
    let uploaded_at = Utc::now();
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO receipts (file_name, image_path, content_hash, uploaded_at) VALUES (?, ?, ?, ?) RETURNING id"
    )
    .bind(file_name)
    .bind(image_path)
    .bind(content_hash)
    .bind(uploaded_at)
    .fetch_one(pool)
    .await?;

    Ok(ReceiptRecord {
        id: ReceiptId(id),
        file_name: file_name.to_string(),
        image_path: image_path.to_string(),
        content_hash: content_hash.to_string(),
        uploaded_at,
    })
}

pub async fn get_all_receipts(pool: &DbPool) -> Result<Vec<ReceiptRecord>, StorageError> {
    let rows = sqlx::query_as::<_, ReceiptRow>(
        "SELECT id, file_name, image_path, content_hash, uploaded_at FROM receipts ORDER BY id"
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(row_to_receipt).collect())
}

pub async fn get_receipt_by_id(pool: &DbPool, id: ReceiptId) -> Result<Option<ReceiptRecord>, StorageError> {
    let row = sqlx::query_as::<_, ReceiptRow>(
        "SELECT id, file_name, image_path, content_hash, uploaded_at FROM receipts WHERE id = ?"
    )
    .bind(id.0)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(row_to_receipt))
}

fn row_to_receipt(r: ReceiptRow) -> ReceiptRecord {
    ReceiptRecord {
        id: ReceiptId(r.0),
        file_name: r.1,
        image_path: r.2,
        content_hash: r.3,
        uploaded_at: r.4,
    }
}

// ── Items ─────────────────────────────────────────────────────────────────────

/// Replace every stored item with `batch` in a single transaction. Readers see
/// either the previous item set or the new one, never a mix.
pub async fn replace_all_items(
    pool: &DbPool,
    batch: &[(ReceiptId, Vec<ExtractedItem>)],
) -> Result<Vec<StoredItem>, StorageError> {
    let mut tx = pool.begin().await?;

    let cleared = sqlx::query("DELETE FROM receipt_items")
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let mut stored = Vec::new();
    for (receipt_id, items) in batch {
        for item in items {
            let id = sqlx::query_scalar::<_, i64>(
                "INSERT INTO receipt_items (receipt_id, store_name, item_name, quantity, unit_price, total_amount) VALUES (?, ?, ?, ?, ?, ?) RETURNING id"
            )
            .bind(receipt_id.0)
            .bind(&item.store_name)
            .bind(&item.item_name)
            .bind(i64::from(item.quantity))
            .bind(item.unit_price.amount())
            .bind(item.total_amount.amount())
            .fetch_one(&mut *tx)
            .await?;

            stored.push(StoredItem { id, receipt_id: *receipt_id, item: item.clone() });
        }
    }

    tx.commit().await?;
    tracing::debug!("Replaced {cleared} stored items with {}", stored.len());
    Ok(stored)
}

pub async fn get_items_for_receipt(pool: &DbPool, id: ReceiptId) -> Result<Vec<ExtractedItem>, StorageError> {
    let rows = sqlx::query_as::<_, ItemRow>(
        "SELECT id, receipt_id, store_name, item_name, quantity, unit_price, total_amount FROM receipt_items WHERE receipt_id = ? ORDER BY id"
    )
    .bind(id.0)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(|r| row_to_item(r).map(|s| s.item)).collect()
}

/// Items of every known receipt, keyed by receipt. Receipts without items map
/// to an empty list so they still count as known.
pub async fn get_items_by_receipts(
    pool: &DbPool,
) -> Result<HashMap<ReceiptId, Vec<ExtractedItem>>, StorageError> {
    let receipt_ids = sqlx::query_scalar::<_, i64>("SELECT id FROM receipts")
        .fetch_all(pool)
        .await?;
    let mut map: HashMap<ReceiptId, Vec<ExtractedItem>> = receipt_ids
        .into_iter()
        .map(|id| (ReceiptId(id), Vec::new()))
        .collect();

    let rows = sqlx::query_as::<_, ItemRow>(
        "SELECT id, receipt_id, store_name, item_name, quantity, unit_price, total_amount FROM receipt_items ORDER BY receipt_id, id"
    )
    .fetch_all(pool)
    .await?;

    for row in rows {
        let stored = row_to_item(row)?;
        map.entry(stored.receipt_id).or_default().push(stored.item);
    }
    Ok(map)
}

fn row_to_item(r: ItemRow) -> Result<StoredItem, StorageError> {
    let quantity = u32::try_from(r.4)
        .map_err(|_| StorageError::Corrupt(format!("item {} has quantity {}", r.0, r.4)))?;
    Ok(StoredItem {
        id: r.0,
        receipt_id: ReceiptId(r.1),
        item: ExtractedItem {
            store_name: r.2,
            item_name: r.3,
            quantity,
            unit_price: Money::new(r.5),
            total_amount: Money::new(r.6),
        },
    })
}

// ── Participants ──────────────────────────────────────────────────────────────

pub async fn insert_participant(pool: &DbPool, name: &str) -> Result<Participant, StorageError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StorageError::InvalidName);
    }

    let result = sqlx::query_scalar::<_, i64>("INSERT INTO participants (name) VALUES (?) RETURNING id")
        .bind(name)
        .fetch_one(pool)
        .await;

    match result {
        Ok(id) => Ok(Participant { id: Some(id), name: name.to_string() }),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            Err(StorageError::DuplicateParticipant(name.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn get_all_participants(pool: &DbPool) -> Result<Vec<Participant>, StorageError> {
    let rows = sqlx::query_as::<_, (i64, String)>("SELECT id, name FROM participants ORDER BY id")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(id, name)| Participant { id: Some(id), name })
        .collect())
}

// ── Settlements ───────────────────────────────────────────────────────────────

/// Persist a settlement together with its receipt and participant links.
/// Participants are linked when they appear in the result and exist in the
/// roster. Either everything is written or nothing is.
pub async fn insert_settlement(
    pool: &DbPool,
    result: &SettlementResult,
) -> Result<SettlementRecord, StorageError> {
    let result_json = serde_json::to_string(&result.per_participant_amount)?;
    let assignments_json = serde_json::to_string(&result.item_assignments_audit)?;
    let created_at = Utc::now();

    let mut tx = pool.begin().await?;

    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO settlements (method, result_json, item_assignments_json, undistributed, created_at) VALUES (?, ?, ?, ?, ?) RETURNING id"
    )
    .bind(result.method.to_string())
    .bind(&result_json)
    .bind(&assignments_json)
    .bind(result.undistributed.amount())
    .bind(created_at)
    .fetch_one(&mut *tx)
    .await?;

    for (position, receipt_id) in result.receipt_ids.iter().enumerate() {
        sqlx::query(
            "INSERT OR IGNORE INTO settlement_receipts (settlement_id, receipt_id, position) VALUES (?, ?, ?)"
        )
        .bind(id)
        .bind(receipt_id.0)
        .bind(position as i64)
        .execute(&mut *tx)
        .await?;
    }

    let mut participant_names = Vec::new();
    for name in result.per_participant_amount.keys() {
        let linked = sqlx::query(
            "INSERT INTO settlement_participants (settlement_id, participant_id) SELECT ?, id FROM participants WHERE name = ?"
        )
        .bind(id)
        .bind(name)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if linked > 0 {
            participant_names.push(name.clone());
        }
    }

    tx.commit().await?;

    Ok(SettlementRecord {
        id: SettlementId(id),
        result: result.clone(),
        participant_names,
        created_at,
    })
}

pub async fn get_settlement(pool: &DbPool, id: SettlementId) -> Result<Option<SettlementRecord>, StorageError> {
    let row = sqlx::query_as::<_, (String, String, String, i64, DateTime<Utc>)>(
        "SELECT method, result_json, item_assignments_json, undistributed, created_at FROM settlements WHERE id = ?"
    )
    .bind(id.0)
    .fetch_optional(pool)
    .await?;

    let Some((method, result_json, assignments_json, undistributed, created_at)) = row else {
        return Ok(None);
    };

    let method: SplitMethod = method
        .parse()
        .map_err(|e| StorageError::Corrupt(format!("settlement {id}: {e}")))?;
    let per_participant_amount: BTreeMap<String, Money> = serde_json::from_str(&result_json)?;
    let item_assignments_audit: Vec<ReceiptAssignments> = serde_json::from_str(&assignments_json)?;

    let receipt_ids = sqlx::query_scalar::<_, i64>(
        "SELECT receipt_id FROM settlement_receipts WHERE settlement_id = ? ORDER BY position"
    )
    .bind(id.0)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(ReceiptId)
    .collect();

    let participant_names = sqlx::query_scalar::<_, String>(
        "SELECT p.name FROM settlement_participants sp JOIN participants p ON p.id = sp.participant_id WHERE sp.settlement_id = ? ORDER BY p.name"
    )
    .bind(id.0)
    .fetch_all(pool)
    .await?;

    Ok(Some(SettlementRecord {
        id,
        result: SettlementResult {
            method,
            per_participant_amount,
            item_assignments_audit,
            receipt_ids,
            undistributed: Money::new(undistributed),
        },
        participant_names,
        created_at,
    }))
}

// ── Reset ─────────────────────────────────────────────────────────────────────

/// Delete every item, settlement, receipt and participant.
pub async fn clear_all_data(pool: &DbPool) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;
    for table in [
        "receipt_items",
        "settlement_participants",
        "settlement_receipts",
        "settlements",
        "receipts",
        "participants",
    ] {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}
