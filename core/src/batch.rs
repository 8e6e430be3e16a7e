//! Splits collection targets into bounded request batches.

use crate::error::{Error, Result};
use std::fmt;

/// Sub-resource requested for a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Status,
    Arrivals,
}

/// A line or mode identifier to collect, with the sub-resource it feeds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionTarget {
    pub id: String,
    pub resource: Option<Resource>,
}

impl CollectionTarget {
    pub fn new(id: impl Into<String>, resource: Option<Resource>) -> Self {
        Self {
            id: id.into(),
            resource,
        }
    }
}

/// One request's worth of targets. `index` is the batch position within its run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub index: usize,
    pub targets: Vec<CollectionTarget>,
}

impl Batch {
    pub fn ids(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.id.as_str()).collect()
    }

    /// Comma-joined ids, the form TfL accepts in a path segment.
    pub fn ids_csv(&self) -> String {
        self.ids().join(",")
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.index, self.ids_csv())
    }
}

/// Partition `targets` into batches of at most `max_batch_size`, keeping input order.
pub fn partition(targets: &[CollectionTarget], max_batch_size: usize) -> Result<Vec<Batch>> {
    if max_batch_size == 0 {
        return Err(Error::Config(
            "max batch size must be greater than 0".to_string(),
        ));
    }

    Ok(targets
        .chunks(max_batch_size)
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            targets: chunk.to_vec(),
        })
        .collect())
}
