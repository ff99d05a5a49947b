use super::models::{UserChannelRecord, UserRecord, UserStatus};
use crate::dispatch::ChannelType;
use crate::store::{GraphStore, NewNode, NodeQuery, Predicate, StoreError, row_uid, schema};
use chrono::{DateTime, Utc};

pub struct UserRepo;

impl UserRepo {
    /// Resolve the store uid of a role by name.
    pub async fn find_role_uid(
        store: &dyn GraphStore,
        name: &str,
    ) -> Result<Option<String>, StoreError> {
        let rows = store
            .find(&NodeQuery::new(schema::ROLE).eq("name", name))
            .await?;
        rows.into_iter().next().map(|row| row_uid(&row)).transpose()
    }

    /// Create a `PENDING` user bound to the given role when one resolved.
    pub async fn create_pending(
        store: &dyn GraphStore,
        user_id: &str,
        role_uid: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let mut node = NewNode::new(schema::USER)
            .set("status", UserStatus::Pending.as_str())
            .set("did", user_id)
            .set_datetime("createdAt", now)
            .set_datetime("updatedAt", now);
        if let Some(role_uid) = role_uid {
            node = node.set("roles", role_uid);
        }
        store.insert(node).await
    }

    pub async fn find_by_did(
        store: &dyn GraphStore,
        user_id: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        let rows = store
            .find(&NodeQuery::new(schema::USER).eq("did", user_id))
            .await?;
        rows.into_iter()
            .next()
            .map(|row| {
                serde_json::from_value(row)
                    .map_err(|err| StoreError::Malformed(format!("User row: {err}")))
            })
            .transpose()
    }

    /// Promote `PENDING` to `ACTIVE`; returns whether the transition fired.
    pub async fn activate_if_pending(
        store: &dyn GraphStore,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(user) = Self::find_by_did(store, user_id).await? else {
            return Ok(false);
        };
        let guard = [Predicate::new("status", UserStatus::Pending.as_str())];
        store
            .update_if(
                &user.uid,
                &guard,
                vec![
                    Predicate::new("status", UserStatus::Active.as_str()),
                    Predicate::datetime("updatedAt", now),
                ],
            )
            .await
    }
}

pub struct UserChannelRepo;

impl UserChannelRepo {
    pub async fn find(
        store: &dyn GraphStore,
        channel_hash: &str,
        channel_type: ChannelType,
    ) -> Result<Option<UserChannelRecord>, StoreError> {
        let rows = store
            .find(
                &NodeQuery::new(schema::USER_CHANNEL)
                    .eq("channelHash", channel_hash)
                    .eq("channelType", channel_type.as_str()),
            )
            .await?;
        rows.into_iter()
            .next()
            .map(|row| {
                serde_json::from_value(row)
                    .map_err(|err| StoreError::Malformed(format!("UserChannel row: {err}")))
            })
            .transpose()
    }

    /// Attach a just-verified primary channel to a user. The store's unique
    /// constraint on `(channelHash, channelType)` rejects concurrent
    /// duplicates.
    pub async fn create_verified_primary(
        store: &dyn GraphStore,
        user_id: &str,
        channel_hash: &str,
        channel_type: ChannelType,
        now: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        store
            .insert(
                NewNode::new(schema::USER_CHANNEL)
                    .set("userId", user_id)
                    .set("channelType", channel_type.as_str())
                    .set("channelHash", channel_hash)
                    .set("verified", true)
                    .set("primary", true)
                    .set_datetime("createdAt", now)
                    .set_datetime("lastUsedAt", now),
            )
            .await
    }

    pub async fn touch_last_used(
        store: &dyn GraphStore,
        uid: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        store
            .update(uid, vec![Predicate::datetime("lastUsedAt", now)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::is_unique_violation;
    use crate::store::memory::MemoryGraphStore;
    use anyhow::Result;

    #[tokio::test]
    async fn pending_user_activates_exactly_once() -> Result<()> {
        let store = MemoryGraphStore::new();
        let now = Utc::now();
        UserRepo::create_pending(&store, "user_1_abcd1234", None, now).await?;

        assert!(UserRepo::activate_if_pending(&store, "user_1_abcd1234", now).await?);
        assert!(!UserRepo::activate_if_pending(&store, "user_1_abcd1234", now).await?);

        let user = UserRepo::find_by_did(&store, "user_1_abcd1234")
            .await?
            .expect("user exists");
        assert_eq!(user.status, UserStatus::Active);
        Ok(())
    }

    #[tokio::test]
    async fn activate_unknown_user_is_false() -> Result<()> {
        let store = MemoryGraphStore::new();
        assert!(!UserRepo::activate_if_pending(&store, "user_missing", Utc::now()).await?);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_channel_insertion_is_rejected() -> Result<()> {
        let store = MemoryGraphStore::new();
        let now = Utc::now();
        UserChannelRepo::create_verified_primary(&store, "user-a", "did-1", ChannelType::Email, now)
            .await?;
        let err = UserChannelRepo::create_verified_primary(
            &store,
            "user-b",
            "did-1",
            ChannelType::Email,
            now,
        )
        .await
        .unwrap_err();
        assert!(is_unique_violation(&err));
        Ok(())
    }

    #[tokio::test]
    async fn role_lookup_resolves_by_name() -> Result<()> {
        let store = MemoryGraphStore::new();
        let uid = store
            .insert(NewNode::new(schema::ROLE).set("name", "registered"))
            .await?;
        assert_eq!(
            UserRepo::find_role_uid(&store, "registered").await?,
            Some(uid)
        );
        assert_eq!(UserRepo::find_role_uid(&store, "admin").await?, None);
        Ok(())
    }
}
