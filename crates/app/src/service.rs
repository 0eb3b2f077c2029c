use nbbang_core::{
    allocate, AllocationError, AllocationRequest, ExtractedItem, Participant, ReceiptId,
    SettlementId, SettlementRecord, SettlementReport,
};
use nbbang_ocr::hash::attachment_path;
use nbbang_ocr::{
    file_extension, sha256_bytes, sniff_format, store_image, to_hex, OcrBackend, ReceiptPipeline,
};
use nbbang_storage::{DbPool, ReceiptRecord, StorageError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::{AppConfig, ConfigError};

const DB_FILE: &str = "nbbang.db";
const ATTACHMENTS_DIR: &str = "attachments";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No receipts have been uploaded")]
    NoReceipts,
    #[error("Settlement {0} not found")]
    SettlementNotFound(SettlementId),
    #[error("Analysis worker failed: {0}")]
    Worker(String),
}

/// One uploaded file, as received.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub data: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self { file_name: file_name.into(), data }
    }

    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { file_name, data: std::fs::read(path)? })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Accepted(ReceiptRecord),
    Rejected { file_name: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyzedItem {
    pub receipt_id: ReceiptId,
    #[serde(flatten)]
    pub item: ExtractedItem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisFailure {
    pub receipt_id: ReceiptId,
    pub file_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisReport {
    pub items: Vec<AnalyzedItem>,
    /// Receipts that were read but held no item lines.
    pub empty_receipts: Vec<ReceiptId>,
    pub failures: Vec<AnalysisFailure>,
}

/// Ties the pipeline, the store and the allocator together.
pub struct ReceiptService<R: OcrBackend> {
    pool: DbPool,
    attachments_dir: PathBuf,
    pipeline: Arc<ReceiptPipeline<R>>,
    workers: usize,
}

impl<R: OcrBackend + 'static> ReceiptService<R> {
    /// Open (or create) the data directory described by `config`.
    pub async fn open(config: &AppConfig, recognizer: R) -> Result<Self, ServiceError> {
        let data_dir = config.data_dir()?;
        std::fs::create_dir_all(&data_dir)?;

        let pool = nbbang_storage::create_db(&data_dir.join(DB_FILE))
            .await
            .map_err(StorageError::from)?;

        let dictionary = Arc::new(config.load_dictionary()?);
        let pipeline = ReceiptPipeline::new(recognizer, dictionary.clone())
            .with_normalizer(config.normalizer(dictionary))
            .with_merge_policy(config.ocr.merge_policy);

        Ok(Self::new(pool, data_dir.join(ATTACHMENTS_DIR), pipeline, config.workers()))
    }

    pub fn new(pool: DbPool, attachments_dir: PathBuf, pipeline: ReceiptPipeline<R>, workers: usize) -> Self {
        Self {
            pool,
            attachments_dir,
            pipeline: Arc::new(pipeline),
            workers: workers.max(1),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Store every upload that decodes as an image. Rejections are reported
    /// per file and never stop the batch.
    pub async fn ingest(&self, uploads: Vec<Upload>) -> Result<Vec<IngestOutcome>, ServiceError> {
        let mut outcomes = Vec::with_capacity(uploads.len());

        for upload in uploads {
            if upload.data.is_empty() {
                tracing::warn!("Rejected {}: empty file", upload.file_name);
                outcomes.push(IngestOutcome::Rejected {
                    file_name: upload.file_name,
                    reason: "empty file".to_string(),
                });
                continue;
            }
            if let Err(e) = sniff_format(&upload.data) {
                tracing::warn!("Rejected {}: {e}", upload.file_name);
                outcomes.push(IngestOutcome::Rejected {
                    file_name: upload.file_name,
                    reason: e.to_string(),
                });
                continue;
            }

            match self.store_upload(&upload).await {
                Ok(record) => {
                    tracing::info!("Receipt {} stored: {}", record.id, upload.file_name);
                    outcomes.push(IngestOutcome::Accepted(record));
                }
                Err(e) => {
                    tracing::warn!("Rejected {}: {e}", upload.file_name);
                    outcomes.push(IngestOutcome::Rejected {
                        file_name: upload.file_name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(outcomes)
    }

    /// Write the image and its receipt row. An image this call created is
    /// removed again when the row cannot be inserted.
    async fn store_upload(&self, upload: &Upload) -> Result<ReceiptRecord, ServiceError> {
        let ext = file_extension(&upload.file_name);
        let hash_hex = to_hex(&sha256_bytes(&upload.data));
        let existed = attachment_path(&self.attachments_dir, &hash_hex, &ext).exists();

        let stored = store_image(&self.attachments_dir, &upload.data, &ext)?;
        let inserted = nbbang_storage::insert_receipt(
            &self.pool,
            &upload.file_name,
            &stored.path.to_string_lossy(),
            &stored.hash_hex,
        )
        .await;

        match inserted {
            Ok(record) => Ok(record),
            Err(e) => {
                if !existed {
                    if let Err(cleanup) = tokio::fs::remove_file(&stored.path).await {
                        tracing::warn!("Could not remove {}: {cleanup}", stored.path.display());
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Re-run the pipeline over every stored receipt and replace the whole
    /// item store with the results. A receipt that fails keeps no items.
    pub async fn analyze(&self) -> Result<AnalysisReport, ServiceError> {
        let receipts = nbbang_storage::get_all_receipts(&self.pool).await?;
        if receipts.is_empty() {
            return Err(ServiceError::NoReceipts);
        }

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut handles = Vec::with_capacity(receipts.len());
        for receipt in receipts {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| ServiceError::Worker(e.to_string()))?;
            let pipeline = self.pipeline.clone();
            let path = PathBuf::from(&receipt.image_path);
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                pipeline.process_file(&path)
            });
            handles.push((receipt, handle));
        }

        let mut report = AnalysisReport::default();
        let mut staged: Vec<(ReceiptId, Vec<ExtractedItem>)> = Vec::new();

        for (receipt, handle) in handles {
            let reason = match handle.await {
                Ok(Ok(analysis)) => {
                    let status = analysis.status();
                    let items = analysis.extracted.items;
                    tracing::info!(
                        "Receipt {} ({}): {status}, {} items",
                        receipt.id,
                        receipt.file_name,
                        items.len()
                    );
                    if items.is_empty() {
                        report.empty_receipts.push(receipt.id);
                    }
                    staged.push((receipt.id, items));
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };

            tracing::warn!("Skipping receipt {} ({}): {reason}", receipt.id, receipt.file_name);
            report.failures.push(AnalysisFailure {
                receipt_id: receipt.id,
                file_name: receipt.file_name,
                reason,
            });
        }

        let stored = nbbang_storage::replace_all_items(&self.pool, &staged).await?;
        report.items = stored
            .into_iter()
            .map(|s| AnalyzedItem { receipt_id: s.receipt_id, item: s.item })
            .collect();

        tracing::info!(
            "Analysis complete: {} items, {} empty receipts, {} failures",
            report.items.len(),
            report.empty_receipts.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Compute and persist a settlement. Nothing is written when the request
    /// is rejected.
    pub async fn allocate(&self, request: &AllocationRequest) -> Result<SettlementRecord, ServiceError> {
        let items = nbbang_storage::get_items_by_receipts(&self.pool).await?;
        let result = allocate(request, &items)?;
        let record = nbbang_storage::insert_settlement(&self.pool, &result).await?;

        tracing::info!(
            "Settlement {} saved: {} split, {} participants, settled {}, undistributed {}",
            record.id,
            record.result.method,
            record.result.per_participant_amount.len(),
            record.result.settled_total(),
            record.result.undistributed
        );
        Ok(record)
    }

    pub async fn join_participant(&self, name: &str) -> Result<Participant, ServiceError> {
        let participant = nbbang_storage::insert_participant(&self.pool, name).await?;
        tracing::info!("Participant joined: {}", participant.name);
        Ok(participant)
    }

    pub async fn participants(&self) -> Result<Vec<Participant>, ServiceError> {
        Ok(nbbang_storage::get_all_participants(&self.pool).await?)
    }

    /// The export view of a stored settlement. Receipts deleted since the
    /// settlement was made are left out.
    pub async fn settlement_report(&self, id: SettlementId) -> Result<SettlementReport, ServiceError> {
        let record = nbbang_storage::get_settlement(&self.pool, id)
            .await?
            .ok_or(ServiceError::SettlementNotFound(id))?;

        let mut receipts = Vec::with_capacity(record.result.receipt_ids.len());
        for receipt_id in &record.result.receipt_ids {
            let Some(receipt) = nbbang_storage::get_receipt_by_id(&self.pool, *receipt_id).await? else {
                continue;
            };
            let items = nbbang_storage::get_items_for_receipt(&self.pool, *receipt_id).await?;
            receipts.push((receipt.header(), items));
        }

        Ok(SettlementReport::build(&record, receipts))
    }

    /// Drop every receipt, item, participant and settlement, and the stored
    /// images.
    pub async fn clear_all(&self) -> Result<(), ServiceError> {
        nbbang_storage::clear_all_data(&self.pool).await?;
        match tokio::fs::remove_dir_all(&self.attachments_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!("All data cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbbang_core::{ItemAssignment, Money, ReceiptAssignments, SplitMethod};
    use nbbang_ocr::MockRecognizer;
    use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
    use std::io::Cursor;

    fn png(shade: u8) -> Vec<u8> {
        let img: GrayImage = ImageBuffer::from_fn(8, 8, |x, _| Luma([if x < 4 { shade } else { 220 }]));
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    async fn service(dir: &tempfile::TempDir, text: &str) -> ReceiptService<MockRecognizer> {
        let config = AppConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..AppConfig::default()
        };
        ReceiptService::open(&config, MockRecognizer::new(text)).await.unwrap()
    }

    async fn ingest_one(svc: &ReceiptService<MockRecognizer>, shade: u8) -> ReceiptRecord {
        let outcomes = svc.ingest(vec![Upload::new(format!("r{shade}.png"), png(shade))]).await.unwrap();
        match outcomes.into_iter().next() {
            Some(IngestOutcome::Accepted(r)) => r,
            other => panic!("expected accepted upload, got {other:?}"),
        }
    }

    fn equal_request(receipt_id: ReceiptId, names: &[&str]) -> AllocationRequest {
        AllocationRequest {
            method: SplitMethod::Equal,
            receipts: vec![ReceiptAssignments { receipt_id, item_assignments: vec![] }],
            participant_names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn ingest_rejects_non_images() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, "").await;

        let outcomes = svc
            .ingest(vec![
                Upload::new("notes.txt", b"hello".to_vec()),
                Upload::new("empty.jpg", Vec::new()),
                Upload::new("scan.PNG", png(30)),
            ])
            .await
            .unwrap();

        assert!(matches!(&outcomes[0], IngestOutcome::Rejected { file_name, .. } if file_name == "notes.txt"));
        assert!(matches!(&outcomes[1], IngestOutcome::Rejected { reason, .. } if reason == "empty file"));
        let IngestOutcome::Accepted(record) = &outcomes[2] else {
            panic!("png should be accepted");
        };
        assert!(record.image_path.ends_with(".png"));
        assert!(Path::new(&record.image_path).exists());
        assert_eq!(nbbang_storage::get_all_receipts(svc.pool()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_upload_does_not_abort_batch() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, "").await;

        // A directory squatting on the target path makes the image write fail.
        let blocked = png(60);
        let target = attachment_path(&svc.attachments_dir, &to_hex(&sha256_bytes(&blocked)), "png");
        std::fs::create_dir_all(&target).unwrap();

        let outcomes = svc
            .ingest(vec![
                Upload::new("first.png", png(30)),
                Upload::new("blocked.png", blocked),
                Upload::new("third.png", png(90)),
            ])
            .await
            .unwrap();

        assert!(matches!(&outcomes[0], IngestOutcome::Accepted(r) if r.file_name == "first.png"));
        assert!(matches!(&outcomes[1], IngestOutcome::Rejected { file_name, .. } if file_name == "blocked.png"));
        assert!(matches!(&outcomes[2], IngestOutcome::Accepted(r) if r.file_name == "third.png"));
        assert_eq!(nbbang_storage::get_all_receipts(svc.pool()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_insert_removes_new_image() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, "").await;
        svc.pool().close().await;

        let data = png(30);
        let outcomes = svc.ingest(vec![Upload::new("late.png", data.clone())]).await.unwrap();

        assert!(matches!(&outcomes[0], IngestOutcome::Rejected { .. }));
        let path = attachment_path(&svc.attachments_dir, &to_hex(&sha256_bytes(&data)), "png");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn analyze_without_receipts_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, "김밥 3,000").await;
        assert!(matches!(svc.analyze().await, Err(ServiceError::NoReceipts)));
    }

    #[tokio::test]
    async fn equal_split_between_two() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, "김밥천국\n김밥 3,000 2 6,000").await;
        let receipt = ingest_one(&svc, 30).await;

        let report = svc.analyze().await.unwrap();
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].item.total_amount, Money::new(6000));
        assert_eq!(report.items[0].item.store_name, "김밥천국");

        let record = svc.allocate(&equal_request(receipt.id, &["A", "B"])).await.unwrap();
        assert_eq!(record.result.per_participant_amount["A"], Money::new(3000));
        assert_eq!(record.result.per_participant_amount["B"], Money::new(3000));
        assert_eq!(record.result.undistributed, Money::zero());

        let export = svc.settlement_report(record.id).await.unwrap();
        assert_eq!(export.receipts.len(), 1);
        assert_eq!(export.receipts[0].receipt_total, Money::new(6000));
        assert_eq!(export.settled_total, Money::new(6000));
    }

    #[tokio::test]
    async fn item_split_among_three_leaves_remainder() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, "돈까스 10,000").await;
        let receipt = ingest_one(&svc, 30).await;
        svc.analyze().await.unwrap();

        let request = AllocationRequest {
            method: SplitMethod::Item,
            receipts: vec![ReceiptAssignments {
                receipt_id: receipt.id,
                item_assignments: vec![ItemAssignment {
                    item_name: "돈까스".into(),
                    participant_names: vec!["A".into(), "B".into(), "C".into()],
                }],
            }],
            participant_names: vec![],
        };
        let record = svc.allocate(&request).await.unwrap();

        for name in ["A", "B", "C"] {
            assert_eq!(record.result.per_participant_amount[name], Money::new(3333));
        }
        assert_eq!(record.result.undistributed, Money::new(1));

        let export = svc.settlement_report(record.id).await.unwrap();
        assert_eq!(export.receipts[0].rows[0].participants, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn rejected_allocation_persists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, "김밥 6,000").await;
        let receipt = ingest_one(&svc, 30).await;
        svc.analyze().await.unwrap();

        let err = svc.allocate(&equal_request(receipt.id, &[])).await.unwrap_err();
        assert!(matches!(err, ServiceError::Allocation(AllocationError::NoParticipants)));

        let err = svc.allocate(&equal_request(ReceiptId(999), &["A"])).await.unwrap_err();
        assert!(matches!(err, ServiceError::Allocation(AllocationError::NoKnownReceipts)));

        assert!(matches!(
            svc.settlement_report(SettlementId(1)).await,
            Err(ServiceError::SettlementNotFound(_))
        ));
    }

    #[tokio::test]
    async fn image_without_items_is_empty_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, "감사합니다\n또 오세요").await;
        let receipt = ingest_one(&svc, 30).await;

        let report = svc.analyze().await.unwrap();
        assert!(report.items.is_empty());
        assert!(report.failures.is_empty());
        assert_eq!(report.empty_receipts, vec![receipt.id]);
    }

    #[tokio::test]
    async fn reanalysis_replaces_items_and_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, "라면 4,500").await;
        let first = ingest_one(&svc, 30).await;
        let second = ingest_one(&svc, 60).await;

        let report = svc.analyze().await.unwrap();
        assert_eq!(report.items.len(), 2);

        std::fs::remove_file(&first.image_path).unwrap();
        let report = svc.analyze().await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].receipt_id, first.id);
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].receipt_id, second.id);

        let stored = nbbang_storage::get_items_by_receipts(svc.pool()).await.unwrap();
        assert!(stored[&first.id].is_empty());
        assert_eq!(stored[&second.id].len(), 1);
    }

    #[tokio::test]
    async fn settlement_links_roster_participants() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, "김밥 6,000").await;
        let receipt = ingest_one(&svc, 30).await;
        svc.analyze().await.unwrap();

        svc.join_participant("A").await.unwrap();
        assert!(matches!(
            svc.join_participant("A").await,
            Err(ServiceError::Storage(StorageError::DuplicateParticipant(_)))
        ));

        let record = svc.allocate(&equal_request(receipt.id, &["A", "B"])).await.unwrap();
        assert_eq!(record.participant_names, vec!["A".to_string()]);
        assert_eq!(svc.participants().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn clear_all_removes_data_and_images() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, "김밥 6,000").await;
        let receipt = ingest_one(&svc, 30).await;
        svc.join_participant("A").await.unwrap();

        svc.clear_all().await.unwrap();

        assert!(!Path::new(&receipt.image_path).exists());
        assert!(svc.participants().await.unwrap().is_empty());
        assert!(matches!(svc.analyze().await, Err(ServiceError::NoReceipts)));
        // Clearing twice is fine.
        svc.clear_all().await.unwrap();
    }
}
