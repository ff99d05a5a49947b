//! Graph store seam.
//!
//! The backing database is a transactional key/predicate store: nodes carry a
//! type and a flat set of predicates, mutations are additive or deleting and
//! atomic one at a time, and the store mints opaque `uid`s. This module
//! defines the contract the engines rely on; the production adapter that
//! renders these calls into the store's wire DSL lives outside the core, and
//! [`memory::MemoryGraphStore`] implements the same contract for tests and
//! local development.
//!
//! Consistency requirements on every implementation:
//!
//! - `insert` enforces the unique constraints declared in [`schema`] and
//!   reports collisions as [`StoreError::UniqueViolation`];
//! - `update_if` is atomic: the guard predicates are compared and the update
//!   applied as one linearizable step, so concurrent writers see at most one
//!   `true` result for the same transition;
//! - `delete` reports whether the node still existed, making single-use
//!   record consumption race-safe.

pub mod deadline;
pub mod memory;
pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("unique constraint violated on {node_type}({predicates})")]
    UniqueViolation {
        node_type: String,
        predicates: String,
    },
    #[error("store deadline exceeded")]
    Timeout,
    #[error("write outcome unknown: {0}")]
    Indeterminate(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed store response: {0}")]
    Malformed(String),
}

pub fn is_unique_violation(err: &StoreError) -> bool {
    matches!(err, StoreError::UniqueViolation { .. })
}

/// A named predicate value on a node.
#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    pub name: String,
    pub value: Value,
}

impl Predicate {
    pub fn new(name: &str, value: impl Into<Value>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
        }
    }

    /// Timestamps persist as RFC 3339 strings.
    pub fn datetime(name: &str, at: DateTime<Utc>) -> Self {
        Self::new(name, at.to_rfc3339())
    }
}

/// Equality query over nodes of one type.
#[derive(Clone, Debug)]
pub struct NodeQuery {
    pub node_type: String,
    pub filters: Vec<Predicate>,
}

impl NodeQuery {
    #[must_use]
    pub fn new(node_type: &str) -> Self {
        Self {
            node_type: node_type.to_string(),
            filters: Vec::new(),
        }
    }

    #[must_use]
    pub fn eq(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Predicate::new(name, value));
        self
    }
}

/// A node to insert; the store mints and returns its `uid`.
#[derive(Clone, Debug)]
pub struct NewNode {
    pub node_type: String,
    pub predicates: Vec<Predicate>,
}

impl NewNode {
    #[must_use]
    pub fn new(node_type: &str) -> Self {
        Self {
            node_type: node_type.to_string(),
            predicates: Vec::new(),
        }
    }

    #[must_use]
    pub fn set(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::new(name, value));
        self
    }

    #[must_use]
    pub fn set_datetime(mut self, name: &str, at: DateTime<Utc>) -> Self {
        self.predicates.push(Predicate::datetime(name, at));
        self
    }
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Find nodes matching every filter. Rows are JSON objects keyed by
    /// predicate name, with the store `uid` under `"uid"`.
    async fn find(&self, query: &NodeQuery) -> Result<Vec<Value>, StoreError>;

    /// Insert a node, enforcing schema unique constraints.
    async fn insert(&self, node: NewNode) -> Result<String, StoreError>;

    /// Overwrite predicates on an existing node.
    async fn update(&self, uid: &str, set: Vec<Predicate>) -> Result<(), StoreError>;

    /// Atomically apply `set` iff every guard predicate currently holds.
    /// Returns whether the update was applied. A missing node is `false`.
    async fn update_if(
        &self,
        uid: &str,
        guard: &[Predicate],
        set: Vec<Predicate>,
    ) -> Result<bool, StoreError>;

    /// Delete a node. Returns whether it still existed.
    async fn delete(&self, uid: &str) -> Result<bool, StoreError>;
}

/// Pull the `uid` out of a query row.
pub(crate) fn row_uid(row: &Value) -> Result<String, StoreError> {
    row.get("uid")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| StoreError::Malformed("row is missing uid".to_string()))
}
