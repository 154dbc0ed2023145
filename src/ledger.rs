//! Durable dedup ledger with per-key reservations.
//!
//! The ledger is the single source of truth for "this key was already
//! processed". Rows are never updated or deleted by the crawler; deleting
//! the database file resets all history.
//!
//! Concurrent workers may race on the same key, so the combined
//! check-then-write is exposed as [`Ledger::reserve`]: an in-process per-key
//! marker is taken before durable state is consulted, and the returned
//! [`Reservation`] commits the row only after the caller has the bytes on
//! disk. Dropping an uncommitted reservation rolls the marker back, leaving
//! the key free for a future run.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::db::Database;

/// Ledger errors. Fatal to a run: the at-most-once guarantee cannot be
/// upheld without durable storage.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// A query against the ledger store failed.
    #[error("ledger query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Category of a recorded key, stored alongside it for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerKind {
    /// A whole document page.
    Page,
    /// A whole message post.
    Post,
    /// An image fetched by URL.
    Image,
    /// A media blob fetched through the message source.
    Media,
}

impl LedgerKind {
    /// Column value for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Post => "post",
            Self::Image => "image",
            Self::Media => "media",
        }
    }
}

/// Durable record of processed dedup keys.
///
/// Cheap to clone; clones share the connection pool and the in-flight
/// reservation set.
#[derive(Debug, Clone)]
pub struct Ledger {
    db: Database,
    in_flight: Arc<DashMap<String, ()>>,
}

impl Ledger {
    /// Wraps an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Returns true if `key` was recorded by this or any earlier run.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Query`] if the store cannot be read.
    #[instrument(skip(self))]
    pub async fn has(&self, key: &str) -> Result<bool, LedgerError> {
        let row = sqlx::query("SELECT 1 FROM processed_links WHERE key = ? LIMIT 1")
            .bind(key)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.is_some())
    }

    /// Records `key` as processed. Idempotent: inserting a duplicate key
    /// neither errors nor creates a second row. The timestamp is set by the
    /// database.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Query`] if the store cannot be written.
    #[instrument(skip(self))]
    pub async fn record(&self, key: &str, kind: LedgerKind) -> Result<(), LedgerError> {
        sqlx::query("INSERT OR IGNORE INTO processed_links (key, kind) VALUES (?, ?)")
            .bind(key)
            .bind(kind.as_str())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Atomically checks and reserves `key` ahead of a download.
    ///
    /// Returns `None` when the key is already recorded or currently reserved
    /// by another worker; the caller skips it as a duplicate. Otherwise the
    /// caller holds the only reservation for the key until it either calls
    /// [`Reservation::commit`] or drops the reservation (rollback).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Query`] if durable state cannot be read.
    #[instrument(skip(self))]
    pub async fn reserve(
        &self,
        key: &str,
        kind: LedgerKind,
    ) -> Result<Option<Reservation>, LedgerError> {
        // The in-process marker serializes racing workers on one key before
        // any durable read, closing the check-then-write gap.
        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(_) => {
                debug!("key reserved by another worker");
                return Ok(None);
            }
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }

        match self.has(key).await {
            Ok(true) => {
                self.release(key);
                Ok(None)
            }
            Ok(false) => Ok(Some(Reservation {
                ledger: self.clone(),
                key: key.to_string(),
                kind,
            })),
            Err(e) => {
                self.release(key);
                Err(e)
            }
        }
    }

    /// Number of recorded keys. Used for diagnostics and tests.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Query`] if the store cannot be read.
    pub async fn count(&self) -> Result<i64, LedgerError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM processed_links")
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.0)
    }

    fn release(&self, key: &str) {
        self.in_flight.remove(key);
    }
}

/// Exclusive in-flight claim on one dedup key.
///
/// The claim is released when the reservation is dropped; only
/// [`commit`](Reservation::commit) makes the key durable. An uncommitted
/// drop therefore rolls the key back so a future run retries it.
#[derive(Debug)]
pub struct Reservation {
    ledger: Ledger,
    key: String,
    kind: LedgerKind,
}

impl Reservation {
    /// Key this reservation holds.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Durably records the key. Call only after the downloaded bytes are
    /// fully written to storage.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Query`] if the store cannot be written; the
    /// in-flight claim is released either way.
    pub async fn commit(self) -> Result<(), LedgerError> {
        self.ledger.record(&self.key, self.kind).await
        // Drop releases the in-flight marker after the durable write.
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.ledger.release(&self.key);
    }
}
