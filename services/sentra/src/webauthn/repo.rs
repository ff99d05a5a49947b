use super::models::{ChallengeRecord, ChallengeType, CredentialRecord};
use crate::store::{GraphStore, NewNode, NodeQuery, Predicate, StoreError, row_uid, schema};
use chrono::{DateTime, Utc};

pub struct ChallengeRepo;

impl ChallengeRepo {
    pub async fn create(
        store: &dyn GraphStore,
        challenge: &str,
        user_id: &str,
        challenge_type: ChallengeType,
        state: &str,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        store
            .insert(
                NewNode::new(schema::WEBAUTHN_CHALLENGE)
                    .set("challenge", challenge)
                    .set("userId", user_id)
                    .set("type", challenge_type.as_str())
                    .set("state", state)
                    .set_datetime("createdAt", created_at)
                    .set_datetime("expiresAt", expires_at),
            )
            .await
    }

    pub async fn find(
        store: &dyn GraphStore,
        challenge: &str,
        user_id: &str,
        challenge_type: ChallengeType,
    ) -> Result<Option<ChallengeRecord>, StoreError> {
        let rows = store
            .find(
                &NodeQuery::new(schema::WEBAUTHN_CHALLENGE)
                    .eq("challenge", challenge)
                    .eq("userId", user_id)
                    .eq("type", challenge_type.as_str()),
            )
            .await?;
        rows.into_iter()
            .next()
            .map(|row| {
                serde_json::from_value(row)
                    .map_err(|err| StoreError::Malformed(format!("WebAuthnChallenge row: {err}")))
            })
            .transpose()
    }

    /// Single-use consumption: the delete races concurrent verifiers and only
    /// one observes `true`.
    pub async fn consume(store: &dyn GraphStore, uid: &str) -> Result<bool, StoreError> {
        store.delete(uid).await
    }

    /// Garbage-collect challenges past expiry.
    pub async fn purge_expired(
        store: &dyn GraphStore,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let rows = store.find(&NodeQuery::new(schema::WEBAUTHN_CHALLENGE)).await?;
        let mut purged = 0;
        for row in rows {
            let expired = row
                .get("expiresAt")
                .and_then(|value| serde_json::from_value::<DateTime<Utc>>(value.clone()).ok())
                .is_some_and(|expires_at| now >= expires_at);
            if expired && store.delete(&row_uid(&row)?).await? {
                purged += 1;
            }
        }
        Ok(purged)
    }
}

pub struct CredentialRepo;

impl CredentialRepo {
    /// Persist an enrolled credential; `credentialId` is globally unique at
    /// the store.
    pub async fn create(
        store: &dyn GraphStore,
        user_id: &str,
        credential_id: &str,
        public_key: &str,
        sign_count: u32,
        transports: &[String],
        added_at: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        store
            .insert(
                NewNode::new(schema::WEBAUTHN_CREDENTIAL)
                    .set("userId", user_id)
                    .set("credentialId", credential_id)
                    .set("publicKey", public_key)
                    .set("signCount", sign_count)
                    .set(
                        "transports",
                        serde_json::Value::Array(
                            transports
                                .iter()
                                .map(|t| serde_json::Value::String(t.clone()))
                                .collect(),
                        ),
                    )
                    .set_datetime("addedAt", added_at),
            )
            .await
    }

    pub async fn list_for_user(
        store: &dyn GraphStore,
        user_id: &str,
    ) -> Result<Vec<CredentialRecord>, StoreError> {
        let rows = store
            .find(&NodeQuery::new(schema::WEBAUTHN_CREDENTIAL).eq("userId", user_id))
            .await?;
        rows.into_iter()
            .map(|row| {
                serde_json::from_value(row)
                    .map_err(|err| StoreError::Malformed(format!("WebAuthnCredential row: {err}")))
            })
            .collect()
    }

    pub async fn find_by_credential_id(
        store: &dyn GraphStore,
        credential_id: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let rows = store
            .find(&NodeQuery::new(schema::WEBAUTHN_CREDENTIAL).eq("credentialId", credential_id))
            .await?;
        rows.into_iter()
            .next()
            .map(|row| {
                serde_json::from_value(row)
                    .map_err(|err| StoreError::Malformed(format!("WebAuthnCredential row: {err}")))
            })
            .transpose()
    }

    /// Record the counter observed by a successful assertion, and the
    /// refreshed credential state when the library reports one.
    pub async fn update_after_authentication(
        store: &dyn GraphStore,
        uid: &str,
        sign_count: u32,
        public_key: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut set = vec![Predicate::new("signCount", sign_count)];
        if let Some(public_key) = public_key {
            set.push(Predicate::new("publicKey", public_key));
        }
        store.update(uid, set).await
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
    async fn challenge_is_single_use() -> Result<()> {
        let store = MemoryGraphStore::new();
        let now = Utc::now();
        let uid = ChallengeRepo::create(
            &store,
            "Y2hhbGxlbmdl",
            "user-1",
            ChallengeType::Registration,
            "{\"rs\":{}}",
            now,
            now + Duration::minutes(5),
        )
        .await?;

        let found =
            ChallengeRepo::find(&store, "Y2hhbGxlbmdl", "user-1", ChallengeType::Registration)
                .await?;
        assert_eq!(found.expect("challenge exists").state, "{\"rs\":{}}");
        // The same string under the other ceremony type does not match.
        let cross =
            ChallengeRepo::find(&store, "Y2hhbGxlbmdl", "user-1", ChallengeType::Authentication)
                .await?;
        assert!(cross.is_none());

        assert!(ChallengeRepo::consume(&store, &uid).await?);
        assert!(!ChallengeRepo::consume(&store, &uid).await?);
        Ok(())
    }

    #[tokio::test]
    async fn purge_removes_expired_challenges() -> Result<()> {
        let store = MemoryGraphStore::new();
        let now = Utc::now();
        ChallengeRepo::create(
            &store,
            "stale",
            "user-1",
            ChallengeType::Authentication,
            "{}",
            now - Duration::minutes(10),
            now - Duration::minutes(5),
        )
        .await?;
        ChallengeRepo::create(
            &store,
            "live",
            "user-1",
            ChallengeType::Authentication,
            "{}",
            now,
            now + Duration::minutes(5),
        )
        .await?;

        assert_eq!(ChallengeRepo::purge_expired(&store, now).await?, 1);
        assert!(
            ChallengeRepo::find(&store, "live", "user-1", ChallengeType::Authentication)
                .await?
                .is_some()
        );
        Ok(())
    }

    #[tokio::test]
    async fn credential_id_is_globally_unique() -> Result<()> {
        let store = MemoryGraphStore::new();
        let now = Utc::now();
        CredentialRepo::create(&store, "user-1", "cred-1", "{}", 0, &[], now).await?;
        let err = CredentialRepo::create(&store, "user-2", "cred-1", "{}", 0, &[], now)
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));
        Ok(())
    }

    #[tokio::test]
    async fn authentication_updates_persist() -> Result<()> {
        let store = MemoryGraphStore::new();
        let now = Utc::now();
        let transports = vec!["internal".to_string(), "usb".to_string()];
        let uid =
            CredentialRepo::create(&store, "user-1", "cred-2", "{}", 5, &transports, now).await?;
        CredentialRepo::update_after_authentication(&store, &uid, 6, Some("{\"v\":2}")).await?;

        let record = CredentialRepo::find_by_credential_id(&store, "cred-2")
            .await?
            .expect("credential exists");
        assert_eq!(record.sign_count, 6);
        assert_eq!(record.public_key, "{\"v\":2}");
        assert_eq!(record.transports, transports);
        assert_eq!(CredentialRepo::list_for_user(&store, "user-1").await?.len(), 1);
        Ok(())
    }
}
