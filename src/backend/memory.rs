//! In-memory wide-column store.
//!
//! Models the substrate contract exactly: per-row sorted columns, column
//! TTL, reversed range reads, and batch application under one lock (a
//! stronger atomicity than the real substrate guarantees for cross-row
//! batches; tests must not rely on it). A manually advanced clock offset
//! lets tests exercise TTL expiry without sleeping.

use crate::backend::{Column, ColumnFamily, ColumnStore, MutationBatch, MutationOp};
use crate::codec::EncodedKey;
use crate::error::EvdbError;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct StoredColumn {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

type Row = BTreeMap<Vec<u8>, StoredColumn>;
type Family = BTreeMap<Vec<u8>, Row>;

#[derive(Default)]
pub struct InMemoryColumnStore {
    families: RwLock<HashMap<ColumnFamily, Family>>,
    clock_offset: Mutex<Duration>,
}

impl InMemoryColumnStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the store's notion of "now" forward so column TTLs elapse
    /// without wall-clock waiting.
    pub fn advance_clock(&self, by: Duration) {
        let mut offset = self.clock_offset.lock();
        *offset += by;
    }

    fn now(&self) -> Instant {
        Instant::now() + *self.clock_offset.lock()
    }

    fn live(&self, column: &StoredColumn, now: Instant) -> bool {
        match column.expires_at {
            Some(expiry) => expiry > now,
            None => true,
        }
    }
}

impl ColumnStore for InMemoryColumnStore {
    fn execute(&self, batch: MutationBatch) -> Result<(), EvdbError> {
        let now = self.now();
        let mut families = self.families.write();
        for op in batch.into_ops() {
            match op {
                MutationOp::Put {
                    cf,
                    row,
                    column,
                    value,
                    ttl,
                } => {
                    let stored = StoredColumn {
                        value,
                        expires_at: ttl.map(|t| now + t),
                    };
                    families
                        .entry(cf)
                        .or_default()
                        .entry(row.into_vec())
                        .or_default()
                        .insert(column, stored);
                }
                MutationOp::Delete { cf, row, column } => {
                    if let Some(family) = families.get_mut(&cf) {
                        if let Some(columns) = family.get_mut(row.as_slice()) {
                            columns.remove(&column);
                            if columns.is_empty() {
                                family.remove(row.as_slice());
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn get_column(
        &self,
        cf: ColumnFamily,
        row: &EncodedKey,
        column: &[u8],
    ) -> Result<Option<Column>, EvdbError> {
        let now = self.now();
        let families = self.families.read();
        let found = families
            .get(&cf)
            .and_then(|family| family.get(row.as_slice()))
            .and_then(|columns| columns.get_key_value(column))
            .filter(|(_, stored)| self.live(stored, now))
            .map(|(name, stored)| Column {
                name: name.clone(),
                value: stored.value.clone(),
            });
        Ok(found)
    }

    fn get_columns(
        &self,
        cf: ColumnFamily,
        row: &EncodedKey,
        start: Option<&[u8]>,
        limit: usize,
        reversed: bool,
    ) -> Result<Vec<Column>, EvdbError> {
        let now = self.now();
        let families = self.families.read();
        let Some(columns) = families
            .get(&cf)
            .and_then(|family| family.get(row.as_slice()))
        else {
            return Ok(Vec::new());
        };

        let mut out = Vec::with_capacity(limit.min(columns.len()));
        if reversed {
            let upper = match start {
                Some(key) => Bound::Included(key.to_vec()),
                None => Bound::Unbounded,
            };
            for (name, stored) in columns
                .range((Bound::Unbounded, upper))
                .rev()
                .filter(|(_, stored)| self.live(stored, now))
                .take(limit)
            {
                out.push(Column {
                    name: name.clone(),
                    value: stored.value.clone(),
                });
            }
        } else {
            let lower = match start {
                Some(key) => Bound::Included(key.to_vec()),
                None => Bound::Unbounded,
            };
            for (name, stored) in columns
                .range((lower, Bound::Unbounded))
                .filter(|(_, stored)| self.live(stored, now))
                .take(limit)
            {
                out.push(Column {
                    name: name.clone(),
                    value: stored.value.clone(),
                });
            }
        }
        Ok(out)
    }

    fn scan_row_keys(
        &self,
        cf: ColumnFamily,
        prefix: &EncodedKey,
    ) -> Result<Vec<EncodedKey>, EvdbError> {
        let now = self.now();
        let families = self.families.read();
        let Some(family) = families.get(&cf) else {
            return Ok(Vec::new());
        };
        let keys = family
            .range(prefix.as_slice().to_vec()..)
            .take_while(|(row, _)| row.starts_with(prefix.as_slice()))
            .filter(|(_, columns)| columns.values().any(|c| self.live(c, now)))
            .map(|(row, _)| EncodedKey::from_bytes(row.clone()))
            .collect();
        Ok(keys)
    }
}
