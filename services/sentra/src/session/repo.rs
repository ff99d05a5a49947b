use super::models::{SessionMetadata, SessionMethod, SessionRecord};
use crate::store::{GraphStore, NewNode, NodeQuery, Predicate, StoreError, schema};
use chrono::{DateTime, Utc};

pub struct SessionRepo;

impl SessionRepo {
    /// Persist a session; the store's unique constraint on `tokenHash`
    /// rejects the (astronomically unlikely) duplicate token.
    pub async fn create(
        store: &dyn GraphStore,
        user_id: &str,
        method: SessionMethod,
        token_hash: &str,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        metadata: &SessionMetadata,
    ) -> Result<String, StoreError> {
        let mut node = NewNode::new(schema::AUTH_SESSION)
            .set("userId", user_id)
            .set("method", method.as_str())
            .set("tokenHash", token_hash)
            .set("valid", true)
            .set_datetime("createdAt", created_at)
            .set_datetime("expiresAt", expires_at);
        if let Some(ref ip) = metadata.ip_address {
            node = node.set("ipAddress", ip.as_str());
        }
        if let Some(ref ua) = metadata.user_agent {
            node = node.set("userAgent", ua.as_str());
        }
        if let Some(ref device) = metadata.device_id {
            node = node.set("deviceId", device.as_str());
        }
        store.insert(node).await
    }

    pub async fn find_by_token_hash(
        store: &dyn GraphStore,
        token_hash: &str,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let rows = store
            .find(&NodeQuery::new(schema::AUTH_SESSION).eq("tokenHash", token_hash))
            .await?;
        rows.into_iter()
            .next()
            .map(|row| {
                serde_json::from_value(row)
                    .map_err(|err| StoreError::Malformed(format!("AuthSession row: {err}")))
            })
            .transpose()
    }

    pub async fn touch_last_used(
        store: &dyn GraphStore,
        uid: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        store
            .update(uid, vec![Predicate::datetime("lastUsed", now)])
            .await
    }

    /// Clear the valid flag. Safe to repeat.
    pub async fn invalidate(store: &dyn GraphStore, uid: &str) -> Result<(), StoreError> {
        store.update(uid, vec![Predicate::new("valid", false)]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::is_unique_violation;
    use crate::store::memory::MemoryGraphStore;
    use anyhow::Result;
    use chrono::Duration;

    #[tokio::test]
    async fn token_hash_is_unique() -> Result<()> {
        let store = MemoryGraphStore::new();
        let now = Utc::now();
        let metadata = SessionMetadata::default();
        let create = || {
            SessionRepo::create(
                &store,
                "user-1",
                SessionMethod::Otp,
                "hash-1",
                now,
                now + Duration::hours(24),
                &metadata,
            )
        };
        create().await?;
        let err = create().await.unwrap_err();
        assert!(is_unique_violation(&err));
        Ok(())
    }

    #[tokio::test]
    async fn invalidate_is_idempotent() -> Result<()> {
        let store = MemoryGraphStore::new();
        let now = Utc::now();
        let uid = SessionRepo::create(
            &store,
            "user-1",
            SessionMethod::Webauthn,
            "hash-2",
            now,
            now + Duration::hours(24),
            &SessionMetadata {
                ip_address: Some("203.0.113.9".to_string()),
                ..SessionMetadata::default()
            },
        )
        .await?;

        SessionRepo::invalidate(&store, &uid).await?;
        SessionRepo::invalidate(&store, &uid).await?;

        let record = SessionRepo::find_by_token_hash(&store, "hash-2")
            .await?
            .expect("session exists");
        assert!(!record.valid);
        assert_eq!(record.ip_address.as_deref(), Some("203.0.113.9"));
        Ok(())
    }
}
