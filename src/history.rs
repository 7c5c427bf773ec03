/// This module implements the append-only history of payment attempts. Exactly
/// one record is written per completed purchase attempt, confirmed or failed,
/// independent of whether a reservation was created. Records are never updated
/// or deleted; they are the audit trail operators use to reconcile the
/// paid-but-unreserved window.
use crate::db::Database;
use crate::error::ApiError;
use crate::reservation::Rect;
use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

const HISTORY_PREFIX: &str = "hist:";

/// Terminal status of a purchase attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Completed,
    Failed,
}

/// One completed purchase attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: Uuid,
    pub wallet: String,
    pub rect: Rect,
    pub amount_lamports: u64,
    pub status: AttemptStatus,
    /// Ledger signature, present when the transaction was submitted.
    pub signature: Option<String>,
    /// Failure tag from the error taxonomy, absent on success.
    pub reason: Option<String>,
    /// Reservation created by this attempt, absent on failure.
    pub reservation_id: Option<Uuid>,
    pub timestamp: i64,
}

/// Append-only RocksDB table of attempt records, keyed
/// `hist:{timestamp}:{seq}:{uuid}`. The timestamp alone is whole seconds, so a
/// process-monotonic sequence counter breaks ties between records appended
/// within the same second; lexicographic iteration then returns records in
/// append order.
pub struct HistoryStore {
    db: Arc<Database>,
    seq: AtomicU64,
}

impl HistoryStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            seq: AtomicU64::new(0),
        }
    }

    /// Appends a completed attempt.
    pub fn append(
        &self,
        wallet: &str,
        rect: Rect,
        amount_lamports: u64,
        status: AttemptStatus,
        signature: Option<String>,
        reason: Option<String>,
        reservation_id: Option<Uuid>,
    ) -> Result<AttemptRecord, ApiError> {
        let record = AttemptRecord {
            id: Uuid::new_v4(),
            wallet: wallet.to_string(),
            rect,
            amount_lamports,
            status,
            signature,
            reason,
            reservation_id,
            timestamp: Utc::now().timestamp(),
        };
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let key = format!(
            "{}{:020}:{:010}:{}",
            HISTORY_PREFIX, record.timestamp, seq, record.id
        );
        self.db
            .inner
            .put(key.as_bytes(), serde_json::to_vec(&record)?)?;
        debug!(
            "History: {:?} attempt by {} for {} lamports",
            record.status, record.wallet, record.amount_lamports
        );
        Ok(record)
    }

    /// All records in append order.
    pub fn list(&self) -> Result<Vec<AttemptRecord>, ApiError> {
        let mut records = Vec::new();
        for entry in self.db.inner.prefix_iterator(HISTORY_PREFIX.as_bytes()) {
            let (key, value) = entry?;
            if !key.starts_with(HISTORY_PREFIX.as_bytes()) {
                break;
            }
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }
}
