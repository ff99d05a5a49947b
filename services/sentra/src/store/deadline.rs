//! Deadline enforcement for store calls.
//!
//! Every store operation runs under the request deadline. A read that misses
//! the deadline is a retryable `Timeout`; a write that misses it may already
//! have reached the store, so it surfaces as `Indeterminate` and the caller
//! must not blindly retry.

use super::{GraphStore, NewNode, NodeQuery, Predicate, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

pub struct DeadlineStore {
    inner: Arc<dyn GraphStore>,
    deadline: Duration,
}

impl DeadlineStore {
    #[must_use]
    pub fn new(inner: Arc<dyn GraphStore>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    async fn read<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>> + Send,
    {
        match timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        }
    }

    async fn write<T, F>(&self, what: &str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>> + Send,
    {
        match timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Indeterminate(format!(
                "{what} exceeded the {}ms deadline",
                self.deadline.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl GraphStore for DeadlineStore {
    async fn find(&self, query: &NodeQuery) -> Result<Vec<Value>, StoreError> {
        self.read(self.inner.find(query)).await
    }

    async fn insert(&self, node: NewNode) -> Result<String, StoreError> {
        self.write("insert", self.inner.insert(node)).await
    }

    async fn update(&self, uid: &str, set: Vec<Predicate>) -> Result<(), StoreError> {
        self.write("update", self.inner.update(uid, set)).await
    }

    async fn update_if(
        &self,
        uid: &str,
        guard: &[Predicate],
        set: Vec<Predicate>,
    ) -> Result<bool, StoreError> {
        self.write("conditional update", self.inner.update_if(uid, guard, set))
            .await
    }

    async fn delete(&self, uid: &str) -> Result<bool, StoreError> {
        self.write("delete", self.inner.delete(uid)).await
    }
}
