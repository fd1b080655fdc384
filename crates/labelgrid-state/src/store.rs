//! StateStore — redb-backed blob buckets and leased message queues.
//!
//! All operations run in their own redb transaction, so concurrent callers
//! (gateway sessions, workers, the correlator) never observe a half-applied
//! lease or a torn blob. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use tracing::debug;

use labelgrid_core::{Receipt, ReceivedMessage, epoch_millis};

use crate::error::{StateError, StateResult};
use crate::handles::{Bucket, Queue};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// A queued message as persisted in the `messages` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMessage {
    body: String,
    /// Unix millis when the message was enqueued.
    enqueued_at: u64,
    /// Unix millis from which the message may be leased again.
    visible_at: u64,
    /// Number of leases handed out so far.
    receive_count: u32,
}

/// Message counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Messages available for leasing.
    pub visible: u64,
    /// Messages currently leased.
    pub in_flight: u64,
}

/// Thread-safe broker backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(BLOBS).map_err(map_err!(Table))?;
        txn.open_table(MESSAGES).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Handle addressing one blob bucket.
    pub fn bucket(&self, name: &str) -> Bucket {
        Bucket::new(self.clone(), name)
    }

    /// Handle addressing one message queue.
    pub fn queue(&self, name: &str) -> Queue {
        Queue::new(self.clone(), name)
    }

    // ── Blobs ──────────────────────────────────────────────────────

    /// Store a blob, replacing any previous value.
    pub fn put_blob(&self, bucket: &str, key: &str, bytes: &[u8]) -> StateResult<()> {
        let full_key = blob_key(bucket, key);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(BLOBS).map_err(map_err!(Table))?;
            table
                .insert(full_key.as_str(), bytes)
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%bucket, %key, len = bytes.len(), "blob stored");
        Ok(())
    }

    /// Fetch a blob.
    pub fn get_blob(&self, bucket: &str, key: &str) -> StateResult<Option<Vec<u8>>> {
        let full_key = blob_key(bucket, key);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BLOBS).map_err(map_err!(Table))?;
        let value = table
            .get(full_key.as_str())
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_vec());
        Ok(value)
    }

    /// Delete a blob. Returns true if it existed.
    pub fn delete_blob(&self, bucket: &str, key: &str) -> StateResult<bool> {
        let full_key = blob_key(bucket, key);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(BLOBS).map_err(map_err!(Table))?;
            existed = table
                .remove(full_key.as_str())
                .map_err(map_err!(Write))?
                .is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%bucket, %key, existed, "blob deleted");
        Ok(existed)
    }

    /// List the keys stored in a bucket.
    pub fn list_blob_keys(&self, bucket: &str) -> StateResult<Vec<String>> {
        let prefix = format!("{bucket}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BLOBS).map_err(map_err!(Table))?;
        let mut keys = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if let Some(rest) = key.value().strip_prefix(&prefix) {
                keys.push(rest.to_string());
            }
        }
        Ok(keys)
    }

    /// Delete every blob in a bucket. Returns the number deleted.
    pub fn purge_bucket(&self, bucket: &str) -> StateResult<u64> {
        let keys = self.list_blob_keys(bucket)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut deleted = 0u64;
        {
            let mut table = txn.open_table(BLOBS).map_err(map_err!(Table))?;
            for key in &keys {
                let full_key = blob_key(bucket, key);
                if table
                    .remove(full_key.as_str())
                    .map_err(map_err!(Write))?
                    .is_some()
                {
                    deleted += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%bucket, deleted, "bucket purged");
        Ok(deleted)
    }

    // ── Queues ─────────────────────────────────────────────────────

    /// Append a message to a queue. Returns the message's storage key.
    pub fn enqueue(&self, queue: &str, body: &str) -> StateResult<String> {
        let now = epoch_millis();
        let message = StoredMessage {
            body: body.to_string(),
            enqueued_at: now,
            visible_at: now,
            receive_count: 0,
        };
        let value = serde_json::to_vec(&message).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let key;
        {
            let mut seqs = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
            let seq = seqs
                .get(queue)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            seqs.insert(queue, seq + 1).map_err(map_err!(Write))?;

            key = message_key(queue, seq);
            let mut table = txn.open_table(MESSAGES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%queue, %key, "message enqueued");
        Ok(key)
    }

    /// Lease up to `max` visible messages for `visibility`.
    pub fn lease(
        &self,
        queue: &str,
        max: usize,
        visibility: Duration,
    ) -> StateResult<Vec<ReceivedMessage>> {
        self.lease_at(queue, max, visibility, epoch_millis())
    }

    /// [`lease`](Self::lease) against an explicit clock (unix millis).
    pub fn lease_at(
        &self,
        queue: &str,
        max: usize,
        visibility: Duration,
        now: u64,
    ) -> StateResult<Vec<ReceivedMessage>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let prefix = format!("{queue}:");
        let visible_again = now + visibility.as_millis() as u64;
        let mut received = Vec::new();

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(MESSAGES).map_err(map_err!(Table))?;

            // Collect first; the table can't be mutated while iterating.
            let mut due = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let key = key.value();
                if !key.starts_with(&prefix) {
                    continue;
                }
                let message: StoredMessage =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if message.visible_at <= now {
                    due.push((key.to_string(), message));
                    if due.len() >= max {
                        break;
                    }
                }
            }

            for (key, mut message) in due {
                message.visible_at = visible_again;
                message.receive_count += 1;
                let value = serde_json::to_vec(&message).map_err(map_err!(Serialize))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                received.push(ReceivedMessage {
                    receipt: Receipt(format!("{key}#{}", message.receive_count)),
                    receive_count: message.receive_count,
                    body: message.body,
                });
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;

        if !received.is_empty() {
            debug!(%queue, count = received.len(), "messages leased");
        }
        Ok(received)
    }

    /// Remove a leased message.
    ///
    /// Returns `Ok(false)` if the message is already gone. A receipt from a
    /// lease that has since been superseded by a newer one is rejected with
    /// [`StateError::StaleReceipt`], so a slow consumer can't delete a message
    /// another consumer now owns.
    pub fn ack(&self, queue: &str, receipt: &str) -> StateResult<bool> {
        let (key, lease) = parse_receipt(queue, receipt)?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed;
        {
            let mut table = txn.open_table(MESSAGES).map_err(map_err!(Table))?;
            let current = table
                .get(key)
                .map_err(map_err!(Read))?
                .map(|guard| serde_json::from_slice::<StoredMessage>(guard.value()))
                .transpose()
                .map_err(map_err!(Deserialize))?;

            match current {
                None => removed = false,
                Some(message) if message.receive_count != lease => {
                    return Err(StateError::StaleReceipt(receipt.to_string()));
                }
                Some(_) => {
                    table.remove(key).map_err(map_err!(Write))?;
                    removed = true;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%queue, %key, removed, "message acked");
        Ok(removed)
    }

    /// Visible and in-flight counts for a queue.
    pub fn queue_stats(&self, queue: &str) -> StateResult<QueueStats> {
        self.queue_stats_at(queue, epoch_millis())
    }

    /// [`queue_stats`](Self::queue_stats) against an explicit clock (unix millis).
    pub fn queue_stats_at(&self, queue: &str, now: u64) -> StateResult<QueueStats> {
        let prefix = format!("{queue}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MESSAGES).map_err(map_err!(Table))?;
        let mut stats = QueueStats::default();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            let message: StoredMessage =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if message.visible_at <= now {
                stats.visible += 1;
            } else {
                stats.in_flight += 1;
            }
        }
        Ok(stats)
    }

    /// Delete every message in a queue, leased or not. Returns the number deleted.
    pub fn purge_queue(&self, queue: &str) -> StateResult<u64> {
        let prefix = format!("{queue}:");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut deleted = 0u64;
        {
            let mut table = txn.open_table(MESSAGES).map_err(map_err!(Table))?;
            let keys: Vec<String> = table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    k.starts_with(&prefix).then_some(k)
                })
                .collect();
            for key in &keys {
                if table
                    .remove(key.as_str())
                    .map_err(map_err!(Write))?
                    .is_some()
                {
                    deleted += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%queue, deleted, "queue purged");
        Ok(deleted)
    }
}

fn blob_key(bucket: &str, key: &str) -> String {
    format!("{bucket}/{key}")
}

fn message_key(queue: &str, seq: u64) -> String {
    format!("{queue}:{seq:020}")
}

/// Split a receipt into its message key and lease number, checking that it
/// belongs to `queue`.
fn parse_receipt<'a>(queue: &str, receipt: &'a str) -> StateResult<(&'a str, u32)> {
    let invalid = || StateError::InvalidReceipt(receipt.to_string());
    let (key, lease) = receipt.rsplit_once('#').ok_or_else(invalid)?;
    let lease: u32 = lease.parse().map_err(|_| invalid())?;
    match key.strip_prefix(queue) {
        Some(rest) if rest.starts_with(':') => Ok((key, lease)),
        _ => Err(invalid()),
    }
}
