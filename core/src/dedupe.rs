//! Within-run deduplication of repeated upstream records.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::hash::Hash;

/// Records that can be collapsed by a derived identity key.
pub trait Dedupe {
    type Key: Eq + Hash;

    fn dedup_key(&self) -> Self::Key;

    /// Timestamp used to pick the surviving copy. Missing sorts before present.
    fn freshness(&self) -> Option<DateTime<Utc>>;
}

/// Keep one record per key: the freshest, or the first seen on a tie.
///
/// Surviving records keep their relative input order. Applying this twice is
/// the same as applying it once.
pub fn dedupe<R: Dedupe>(records: Vec<R>) -> Vec<R> {
    let mut winners: HashMap<R::Key, usize> = HashMap::with_capacity(records.len());
    let mut keep = vec![false; records.len()];

    for (idx, record) in records.iter().enumerate() {
        match winners.get_mut(&record.dedup_key()) {
            Some(current) => {
                if record.freshness() > records[*current].freshness() {
                    keep[*current] = false;
                    keep[idx] = true;
                    *current = idx;
                }
            }
            None => {
                winners.insert(record.dedup_key(), idx);
                keep[idx] = true;
            }
        }
    }

    records
        .into_iter()
        .zip(keep)
        .filter_map(|(record, kept)| kept.then_some(record))
        .collect()
}
