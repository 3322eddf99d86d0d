//! Durable, host-sharded work queue with lease-based delivery.
//!
//! Entries live in two sled trees sharing the crawl database: one holding the
//! queued entries, keyed `tag ++ 0x00 ++ seq`, and one holding the leases of
//! entries currently handed to a worker. Key order gives per-tag FIFO; a scan
//! cursor that advances past the last-served tag gives round-robin fairness
//! across tags. Everything survives a process restart.

use crate::store::{self, StoreError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const ENTRIES_TREE: &str = "frontier/entries";
const LEASES_TREE: &str = "frontier/leases";

#[derive(Error, Debug)]
pub enum QueueError {
    /// No entries left and none leased: the queue is permanently drained.
    #[error("queue drained")]
    Drained,
    #[error("cancelled")]
    Cancelled,
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error(transparent)]
    Codec(#[from] StoreError),
}

/// Result a worker reports for a leased entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Entry handled; remove it permanently.
    Done,
    /// Transient failure; re-queue with a visibility delay.
    Retry,
}

#[derive(Debug, Clone)]
pub struct FrontierConfig {
    /// Visibility delay applied when an entry is retried.
    pub retry_interval: Duration,
    /// How long a worker may hold a lease before the entry becomes
    /// deliverable again.
    pub lease_ttl: Duration,
    /// Backstop tick for blocked `next` callers waiting on visibility or
    /// lease expiry.
    pub poll_interval: Duration,
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(180),
            lease_ttl: Duration::from_secs(300),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// A claim on a queue entry, held by a worker until [`Frontier::done`].
#[derive(Debug)]
pub struct Lease {
    key: Vec<u8>,
    tag: String,
    payload: Vec<u8>,
    attempts: u32,
}

impl Lease {
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// How many times this entry has been retried before.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[derive(Serialize, Deserialize)]
struct Entry {
    payload: Vec<u8>,
    visible_after: u64,
    attempts: u32,
}

pub struct Frontier {
    db: sled::Db,
    entries: sled::Tree,
    leases: sled::Tree,
    config: FrontierConfig,
    notify: Notify,
    /// Exclusive lower bound for the next entry scan; rotates past the tag
    /// served last so no single tag monopolizes the workers.
    cursor: parking_lot::Mutex<Vec<u8>>,
}

impl Frontier {
    /// Open the frontier trees on an existing database.
    ///
    /// Leases left over from a previous process are cleared: a crashed worker
    /// cannot hold one, so every unacked entry becomes visible again
    /// immediately.
    pub fn open(db: &sled::Db, config: FrontierConfig) -> Result<Self, QueueError> {
        let entries = db.open_tree(ENTRIES_TREE)?;
        let leases = db.open_tree(LEASES_TREE)?;
        leases.clear()?;

        Ok(Self {
            db: db.clone(),
            entries,
            leases,
            config,
            notify: Notify::new(),
            cursor: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Append an entry under a tag. Returns only after the entry is on disk.
    pub async fn add(&self, tag: &str, payload: &[u8]) -> Result<(), QueueError> {
        let seq = self.db.generate_id()?;
        let key = entry_key(tag, seq);
        let entry = Entry {
            payload: payload.to_vec(),
            visible_after: now_millis(),
            attempts: 0,
        };
        self.entries.insert(key, store::encode(&entry)?)?;
        self.entries.flush_async().await?;
        self.notify.notify_waiters();
        Ok(())
    }

    /// Claim the next visible entry.
    ///
    /// Blocks until an entry becomes available, the token is cancelled
    /// (`QueueError::Cancelled`), or the queue is permanently drained
    /// (`QueueError::Drained`).
    pub async fn next(&self, cancel: &CancellationToken) -> Result<Lease, QueueError> {
        loop {
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }

            self.reclaim_expired()?;

            if let Some(lease) = self.try_claim()? {
                return Ok(lease);
            }

            if self.entries.is_empty() && self.leases.is_empty() {
                return Err(QueueError::Drained);
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
            }
        }
    }

    /// Report the outcome for a leased entry and release the lease.
    pub async fn done(&self, lease: Lease, outcome: Outcome) -> Result<(), QueueError> {
        match outcome {
            Outcome::Done => {
                self.entries.remove(&lease.key)?;
            }
            Outcome::Retry => {
                if let Some(value) = self.entries.get(&lease.key)? {
                    let mut entry: Entry = store::decode(&value)?;
                    entry.visible_after = now_millis() + self.config.retry_interval.as_millis() as u64;
                    entry.attempts = entry.attempts.saturating_add(1);
                    self.entries.insert(&lease.key, store::encode(&entry)?)?;
                }
            }
        }
        self.leases.remove(&lease.key)?;
        self.entries.flush_async().await?;
        // Wake blocked consumers: either new work is schedulable or the
        // drained condition is now observable.
        self.notify.notify_waiters();
        Ok(())
    }

    /// Number of queued entries, leased or not.
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    fn try_claim(&self) -> Result<Option<Lease>, QueueError> {
        let now = now_millis();
        let start = self.cursor.lock().clone();

        if let Some(lease) = self.claim_in(self.entries.range(start..), now)? {
            return Ok(Some(lease));
        }
        self.claim_in(self.entries.iter(), now)
    }

    fn claim_in(&self, iter: sled::Iter, now: u64) -> Result<Option<Lease>, QueueError> {
        for kv in iter {
            let (key, value) = kv?;

            if self.leases.contains_key(&key)? {
                continue;
            }
            let entry: Entry = store::decode(&value)?;
            if entry.visible_after > now {
                continue;
            }

            let expires = now + self.config.lease_ttl.as_millis() as u64;
            let claimed = self
                .leases
                .compare_and_swap(&key, None as Option<&[u8]>, Some(&expires.to_be_bytes()[..]))?
                .is_ok();
            if !claimed {
                // Another worker claimed it between our check and the swap.
                continue;
            }

            let tag = tag_of(&key);
            *self.cursor.lock() = after_tag(&tag);

            return Ok(Some(Lease {
                key: key.to_vec(),
                tag,
                payload: entry.payload,
                attempts: entry.attempts,
            }));
        }
        Ok(None)
    }

    fn reclaim_expired(&self) -> Result<(), QueueError> {
        let now = now_millis();
        for kv in self.leases.iter() {
            let (key, value) = kv?;
            let expires = match <[u8; 8]>::try_from(value.as_ref()) {
                Ok(bytes) => u64::from_be_bytes(bytes),
                Err(_) => 0,
            };
            if expires <= now {
                self.leases.remove(&key)?;
            }
        }
        Ok(())
    }
}

fn entry_key(tag: &str, seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(tag.len() + 9);
    key.extend_from_slice(tag.as_bytes());
    key.push(0);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn tag_of(key: &[u8]) -> String {
    let end = key.iter().position(|&b| b == 0).unwrap_or(key.len());
    String::from_utf8_lossy(&key[..end]).into_owned()
}

/// Smallest key strictly greater than every entry key of `tag`.
fn after_tag(tag: &str) -> Vec<u8> {
    let mut bound = tag.as_bytes().to_vec();
    bound.push(1);
    bound
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config() -> FrontierConfig {
        FrontierConfig {
            retry_interval: Duration::from_millis(150),
            lease_ttl: Duration::from_millis(60),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn open_frontier(dir: &TempDir) -> (sled::Db, Frontier) {
        let db = sled::open(dir.path()).unwrap();
        let frontier = Frontier::open(&db, test_config()).unwrap();
        (db, frontier)
    }

    #[tokio::test]
    async fn test_add_next_done_cycle() {
        let dir = TempDir::new().unwrap();
        let (_db, frontier) = open_frontier(&dir);
        let cancel = CancellationToken::new();

        frontier.add("a", b"one").await.unwrap();
        let lease = frontier.next(&cancel).await.unwrap();
        assert_eq!(lease.payload(), b"one");
        assert_eq!(lease.tag(), "a");
        frontier.done(lease, Outcome::Done).await.unwrap();

        assert!(matches!(
            frontier.next(&cancel).await.unwrap_err(),
            QueueError::Drained
        ));
        assert_eq!(frontier.pending(), 0);
    }

    #[tokio::test]
    async fn test_per_tag_fifo() {
        let dir = TempDir::new().unwrap();
        let (_db, frontier) = open_frontier(&dir);
        let cancel = CancellationToken::new();

        frontier.add("a", b"first").await.unwrap();
        frontier.add("a", b"second").await.unwrap();

        let l1 = frontier.next(&cancel).await.unwrap();
        assert_eq!(l1.payload(), b"first");
        frontier.done(l1, Outcome::Done).await.unwrap();

        let l2 = frontier.next(&cancel).await.unwrap();
        assert_eq!(l2.payload(), b"second");
        frontier.done(l2, Outcome::Done).await.unwrap();
    }

    #[tokio::test]
    async fn test_tag_round_robin() {
        let dir = TempDir::new().unwrap();
        let (_db, frontier) = open_frontier(&dir);
        let cancel = CancellationToken::new();

        frontier.add("a", b"a1").await.unwrap();
        frontier.add("a", b"a2").await.unwrap();
        frontier.add("a", b"a3").await.unwrap();
        frontier.add("b", b"b1").await.unwrap();

        let mut tags = Vec::new();
        for _ in 0..4 {
            let lease = frontier.next(&cancel).await.unwrap();
            tags.push(lease.tag().to_string());
            // Leases are held so claimed entries stay out of the scan.
        }
        assert_eq!(tags, vec!["a", "b", "a", "a"]);
    }

    #[tokio::test]
    async fn test_durable_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let (db, frontier) = open_frontier(&dir);
            frontier.add("a", b"kept").await.unwrap();
            frontier.add("b", b"also-kept").await.unwrap();
            db.flush().unwrap();
        }

        let (_db, frontier) = open_frontier(&dir);
        let cancel = CancellationToken::new();
        assert_eq!(frontier.pending(), 2);

        let mut payloads = Vec::new();
        for _ in 0..2 {
            let lease = frontier.next(&cancel).await.unwrap();
            payloads.push(lease.payload().to_vec());
            frontier.done(lease, Outcome::Done).await.unwrap();
        }
        payloads.sort();
        assert_eq!(payloads, vec![b"also-kept".to_vec(), b"kept".to_vec()]);
        assert!(matches!(
            frontier.next(&cancel).await.unwrap_err(),
            QueueError::Drained
        ));
    }

    #[tokio::test]
    async fn test_unacked_lease_redelivered_after_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let (db, frontier) = open_frontier(&dir);
            let cancel = CancellationToken::new();
            frontier.add("a", b"leased").await.unwrap();
            let _lease = frontier.next(&cancel).await.unwrap();
            // Simulated crash: lease never acked.
            db.flush().unwrap();
        }

        let (_db, frontier) = open_frontier(&dir);
        let cancel = CancellationToken::new();
        let lease = frontier.next(&cancel).await.unwrap();
        assert_eq!(lease.payload(), b"leased");
    }

    #[tokio::test]
    async fn test_expired_lease_redelivered() {
        let dir = TempDir::new().unwrap();
        let (_db, frontier) = open_frontier(&dir);
        let cancel = CancellationToken::new();

        frontier.add("a", b"stuck").await.unwrap();
        let _abandoned = frontier.next(&cancel).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        let lease = frontier.next(&cancel).await.unwrap();
        assert_eq!(lease.payload(), b"stuck");
    }

    #[tokio::test]
    async fn test_retry_delays_visibility() {
        let dir = TempDir::new().unwrap();
        let (_db, frontier) = open_frontier(&dir);
        let cancel = CancellationToken::new();

        frontier.add("a", b"flaky").await.unwrap();
        let lease = frontier.next(&cancel).await.unwrap();
        frontier.done(lease, Outcome::Retry).await.unwrap();

        // Not yet visible.
        let early = tokio::time::timeout(Duration::from_millis(50), frontier.next(&cancel)).await;
        assert!(early.is_err());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let lease = frontier.next(&cancel).await.unwrap();
        assert_eq!(lease.payload(), b"flaky");
        assert_eq!(lease.attempts(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_returns_promptly() {
        let dir = TempDir::new().unwrap();
        let (_db, frontier) = open_frontier(&dir);
        let cancel = CancellationToken::new();

        // One leased entry keeps the queue non-drained, so next blocks.
        frontier.add("a", b"held").await.unwrap();
        let _held = frontier.next(&cancel).await.unwrap();

        let c = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            c.cancel();
        });

        let err = frontier.next(&cancel).await.unwrap_err();
        assert!(matches!(err, QueueError::Cancelled));
    }

    #[tokio::test]
    async fn test_blocked_next_woken_by_add() {
        let dir = TempDir::new().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let frontier = std::sync::Arc::new(Frontier::open(&db, test_config()).unwrap());
        let cancel = CancellationToken::new();

        // Keep the queue alive with a held lease while a consumer waits.
        frontier.add("a", b"held").await.unwrap();
        let _held = frontier.next(&cancel).await.unwrap();

        let consumer = {
            let frontier = frontier.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { frontier.next(&cancel).await.map(|l| l.payload().to_vec()) })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        frontier.add("b", b"fresh").await.unwrap();

        let payload = consumer.await.unwrap().unwrap();
        assert_eq!(payload, b"fresh");
    }
}
