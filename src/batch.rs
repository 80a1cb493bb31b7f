//! Per-item results for batch operations.
//!
//! A batch that is structurally valid as a whole may still contain items
//! that fail on their own. Those are reported next to the items that
//! succeeded instead of aborting the batch.

use std::fmt;

use crate::error::{Result, TrackerError};

/// A single failed item inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// What kind of item failed ("comment", "bug", ...).
    pub kind: &'static str,
    /// The item's id, when it could be read.
    pub id: Option<String>,
    /// The issue the item belongs to, when known.
    pub issue_id: Option<String>,
    /// Why it failed.
    pub error: TrackerError,
}

impl ItemFailure {
    /// Create a failure record.
    pub fn new(kind: &'static str, id: Option<String>, error: TrackerError) -> Self {
        Self {
            kind,
            id,
            issue_id: None,
            error,
        }
    }

    /// Attribute the failure to an issue.
    pub fn in_issue(mut self, issue_id: impl Into<String>) -> Self {
        self.issue_id = Some(issue_id.into());
        self
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{} {}: {}", self.kind, id, self.error),
            None => write!(f, "{}: {}", self.kind, self.error),
        }
    }
}

/// Items that parsed or resolved, plus the ones that did not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    pub items: Vec<T>,
    pub failures: Vec<ItemFailure>,
}

impl<T> Default for Batch<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> Batch<T> {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one item.
    pub fn push(&mut self, kind: &'static str, id: Option<String>, outcome: Result<T>) {
        match outcome {
            Ok(item) => self.items.push(item),
            Err(error) => self.failures.push(ItemFailure::new(kind, id, error)),
        }
    }

    /// Record the outcome of one item belonging to issue `issue_id`.
    pub fn push_in(
        &mut self,
        issue_id: &str,
        kind: &'static str,
        id: Option<String>,
        outcome: Result<T>,
    ) {
        match outcome {
            Ok(item) => self.items.push(item),
            Err(error) => self
                .failures
                .push(ItemFailure::new(kind, id, error).in_issue(issue_id)),
        }
    }

    /// Merge another batch into this one, keeping order.
    pub fn extend(&mut self, other: Batch<T>) {
        self.items.extend(other.items);
        self.failures.extend(other.failures);
    }

    /// Check whether every item succeeded.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Total number of items seen, failed or not.
    pub fn len(&self) -> usize {
        self.items.len() + self.failures.len()
    }

    /// Check whether the batch saw no items at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All-or-nothing view: the items, or the first failure.
    pub fn into_all_or_nothing(self) -> Result<Vec<T>> {
        match self.failures.into_iter().next() {
            Some(failure) => Err(failure.error),
            None => Ok(self.items),
        }
    }

    /// Transform every successful item.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Batch<U> {
        Batch {
            items: self.items.into_iter().map(f).collect(),
            failures: self.failures,
        }
    }
}
