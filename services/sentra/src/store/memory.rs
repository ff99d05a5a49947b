//! In-memory [`GraphStore`] used by tests and local development.
//!
//! A single mutex around the node map gives every mutation the linearizable,
//! one-at-a-time semantics the production store provides per mutation. The
//! schema unique constraints are enforced on insert.

use super::schema::{UNIQUE_CONSTRAINTS, UniqueConstraint};
use super::{GraphStore, NewNode, NodeQuery, Predicate, StoreError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Clone, Debug)]
struct Node {
    node_type: String,
    predicates: Map<String, Value>,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: HashMap<String, Node>,
    next_uid: u64,
}

#[derive(Debug)]
pub struct MemoryGraphStore {
    inner: Mutex<Inner>,
    constraints: &'static [UniqueConstraint],
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraphStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            constraints: UNIQUE_CONSTRAINTS,
        }
    }

    /// Number of nodes of one type; test helper.
    pub async fn count(&self, node_type: &str) -> usize {
        let inner = self.inner.lock().await;
        inner
            .nodes
            .values()
            .filter(|node| node.node_type == node_type)
            .count()
    }

    fn matches(node: &Node, query: &NodeQuery) -> bool {
        node.node_type == query.node_type
            && query
                .filters
                .iter()
                .all(|filter| node.predicates.get(&filter.name) == Some(&filter.value))
    }

    fn check_unique(&self, inner: &Inner, candidate: &Node) -> Result<(), StoreError> {
        for constraint in self
            .constraints
            .iter()
            .filter(|c| c.node_type == candidate.node_type)
        {
            let values: Option<Vec<&Value>> = constraint
                .predicates
                .iter()
                .map(|name| candidate.predicates.get(*name))
                .collect();
            let Some(values) = values else {
                continue;
            };
            let collision = inner.nodes.values().any(|existing| {
                existing.node_type == candidate.node_type
                    && constraint
                        .predicates
                        .iter()
                        .zip(&values)
                        .all(|(name, value)| existing.predicates.get(*name) == Some(*value))
            });
            if collision {
                return Err(StoreError::UniqueViolation {
                    node_type: constraint.node_type.to_string(),
                    predicates: constraint.predicates.join(", "),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn find(&self, query: &NodeQuery) -> Result<Vec<Value>, StoreError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<(String, Value)> = inner
            .nodes
            .iter()
            .filter(|(_, node)| Self::matches(node, query))
            .map(|(uid, node)| {
                let mut row = node.predicates.clone();
                row.insert("uid".to_string(), Value::String(uid.clone()));
                (uid.clone(), Value::Object(row))
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    async fn insert(&self, node: NewNode) -> Result<String, StoreError> {
        let mut predicates = Map::new();
        for predicate in node.predicates {
            predicates.insert(predicate.name, predicate.value);
        }
        let candidate = Node {
            node_type: node.node_type,
            predicates,
        };

        let mut inner = self.inner.lock().await;
        self.check_unique(&inner, &candidate)?;
        inner.next_uid += 1;
        let uid = format!("0x{:x}", inner.next_uid);
        inner.nodes.insert(uid.clone(), candidate);
        Ok(uid)
    }

    async fn update(&self, uid: &str, set: Vec<Predicate>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let node = inner.nodes.get_mut(uid).ok_or(StoreError::NotFound)?;
        for predicate in set {
            node.predicates.insert(predicate.name, predicate.value);
        }
        Ok(())
    }

    async fn update_if(
        &self,
        uid: &str,
        guard: &[Predicate],
        set: Vec<Predicate>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(node) = inner.nodes.get_mut(uid) else {
            return Ok(false);
        };
        let holds = guard
            .iter()
            .all(|predicate| node.predicates.get(&predicate.name) == Some(&predicate.value));
        if !holds {
            return Ok(false);
        }
        for predicate in set {
            node.predicates.insert(predicate.name, predicate.value);
        }
        Ok(true)
    }

    async fn delete(&self, uid: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.nodes.remove(uid).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema;
    use anyhow::Result;

    #[tokio::test]
    async fn insert_and_find_round_trip() -> Result<()> {
        let store = MemoryGraphStore::new();
        let uid = store
            .insert(
                NewNode::new(schema::CHANNEL_OTP)
                    .set("channelHash", "abc")
                    .set("used", false),
            )
            .await?;

        let rows = store
            .find(&NodeQuery::new(schema::CHANNEL_OTP).eq("channelHash", "abc"))
            .await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["uid"], Value::String(uid));
        assert_eq!(rows[0]["used"], Value::Bool(false));
        Ok(())
    }

    #[tokio::test]
    async fn unique_constraint_rejects_duplicate_channel() -> Result<()> {
        let store = MemoryGraphStore::new();
        let node = || {
            NewNode::new(schema::USER_CHANNEL)
                .set("channelHash", "did-1")
                .set("channelType", "email")
        };
        store.insert(node()).await?;
        let err = store.insert(node()).await.unwrap_err();
        assert!(super::super::is_unique_violation(&err));

        // Same hash over a different channel is a different identity.
        store
            .insert(
                NewNode::new(schema::USER_CHANNEL)
                    .set("channelHash", "did-1")
                    .set("channelType", "sms"),
            )
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn update_if_applies_at_most_once() -> Result<()> {
        let store = MemoryGraphStore::new();
        let uid = store
            .insert(
                NewNode::new(schema::CHANNEL_OTP)
                    .set("verified", false)
                    .set("used", false),
            )
            .await?;

        let guard = [
            Predicate::new("verified", false),
            Predicate::new("used", false),
        ];
        let consume = || {
            vec![
                Predicate::new("verified", true),
                Predicate::new("used", true),
            ]
        };

        assert!(store.update_if(&uid, &guard, consume()).await?);
        assert!(!store.update_if(&uid, &guard, consume()).await?);
        assert!(!store.update_if("0xdead", &guard, consume()).await?);
        Ok(())
    }

    #[tokio::test]
    async fn delete_reports_prior_existence() -> Result<()> {
        let store = MemoryGraphStore::new();
        let uid = store
            .insert(NewNode::new(schema::WEBAUTHN_CHALLENGE).set("challenge", "c1"))
            .await?;
        assert!(store.delete(&uid).await?);
        assert!(!store.delete(&uid).await?);
        Ok(())
    }
}
