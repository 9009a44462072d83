use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;

use crate::csv::CsvTable;
use crate::model::{is_national_id, StudentRecord};
use crate::normalize::{self, Placeholders, Schema};
use crate::store::{DocumentStore, StoreError};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("รูปแบบไฟล์ CSV ไม่รองรับหรือไม่ถูกต้อง กรุณาใช้ไฟล์ตัวอย่างจากระบบ")]
    FormatUnrecognized,
    #[error("ไม่พบข้อมูลที่ถูกต้องในไฟล์ CSV")]
    NoValidRows,
    /// Some or all creations were rejected. Rows that did commit stay committed.
    #[error("เกิดปัญหาในการประมวลผลข้อมูล")]
    WriteFailed { committed: usize, failed: usize },
}

impl ImportError {
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::FormatUnrecognized => "format_unrecognized",
            ImportError::NoValidRows => "no_valid_rows",
            ImportError::WriteFailed { .. } => "write_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub schema: Schema,
    pub rows_total: usize,
    pub submitted: usize,
    /// Rows dropped for carrying neither a student number nor a national id.
    pub skipped: usize,
    /// Submitted rows whose student number is a placeholder.
    pub flagged: usize,
    /// Submitted rows whose national id is present but not 13 digits.
    pub malformed_national_ids: usize,
    pub message: String,
}

/// Normalizes every row, keeps the ones with an identity, and creates them
/// all concurrently. Nothing is written unless the format is recognized and
/// at least one row survives.
pub async fn import_rows(
    store: &dyn DocumentStore,
    collection: &str,
    table: &CsvTable,
    mut ids: Placeholders,
) -> Result<ImportReport, ImportError> {
    let schema = normalize::detect_schema(&table.headers).ok_or(ImportError::FormatUnrecognized)?;

    let records: Vec<StudentRecord> = table
        .rows
        .iter()
        .map(|row| normalize::normalize(schema, row, &mut ids))
        .filter(StudentRecord::has_identity)
        .map(|mut r| {
            r.prepare_for_save();
            r
        })
        .collect();
    if records.is_empty() {
        tracing::info!(?schema, rows = table.rows.len(), "import found no valid rows");
        return Err(ImportError::NoValidRows);
    }

    let flagged = records.iter().filter(|r| r.has_placeholder_number()).count();
    let malformed_national_ids = records
        .iter()
        .filter(|r| !r.national_id.is_empty() && !is_national_id(&r.national_id))
        .inspect(|r| {
            tracing::warn!(
                student_number = %r.student_number,
                national_id = %r.national_id,
                "imported national id is not 13 digits"
            )
        })
        .count();
    let writes = records.iter().map(|r| async move {
        match serde_json::to_value(r) {
            Ok(body) => store.create(collection, body).await,
            Err(e) => Err(StoreError::from(e)),
        }
    });
    let results = join_all(writes).await;

    let committed = results.iter().filter(|r| r.is_ok()).count();
    let failed = results.len() - committed;
    if failed > 0 {
        if let Some(Err(first)) = results.iter().find(|r| r.is_err()) {
            tracing::warn!(committed, failed, error = %first, "import writes rejected");
        }
        return Err(ImportError::WriteFailed { committed, failed });
    }

    tracing::info!(?schema, rows = table.rows.len(), submitted = committed, flagged, "import complete");
    Ok(ImportReport {
        schema,
        rows_total: table.rows.len(),
        submitted: committed,
        skipped: table.rows.len() - records.len(),
        flagged,
        malformed_national_ids,
        message: format!("นำเข้าข้อมูลนักเรียน {committed} คนเรียบร้อย!"),
    })
}
