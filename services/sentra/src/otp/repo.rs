use super::models::{ChannelOtpRecord, OtpPurpose};
use crate::dispatch::ChannelType;
use crate::store::{GraphStore, NewNode, NodeQuery, Predicate, StoreError, row_uid, schema};
use chrono::{DateTime, Utc};

pub struct OtpRepo;

impl OtpRepo {
    /// Persist a fresh OTP record, unverified and unused.
    pub async fn create(
        store: &dyn GraphStore,
        channel_hash: &str,
        channel_type: ChannelType,
        otp_hash: &str,
        purpose: OtpPurpose,
        user_id: Option<&str>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let mut node = NewNode::new(schema::CHANNEL_OTP)
            .set("channelHash", channel_hash)
            .set("channelType", channel_type.as_str())
            .set("otpHash", otp_hash)
            .set("verified", false)
            .set("used", false)
            .set("purpose", purpose.as_str())
            .set_datetime("createdAt", created_at)
            .set_datetime("expiresAt", expires_at);
        if let Some(user_id) = user_id {
            node = node.set("userId", user_id);
        }
        store.insert(node).await
    }

    /// Find the unconsumed record matching both hashes, if any.
    pub async fn find_unconsumed(
        store: &dyn GraphStore,
        channel_hash: &str,
        otp_hash: &str,
    ) -> Result<Option<ChannelOtpRecord>, StoreError> {
        let rows = store
            .find(
                &NodeQuery::new(schema::CHANNEL_OTP)
                    .eq("channelHash", channel_hash)
                    .eq("otpHash", otp_hash)
                    .eq("verified", false)
                    .eq("used", false),
            )
            .await?;
        rows.into_iter()
            .next()
            .map(|row| {
                serde_json::from_value(row)
                    .map_err(|err| StoreError::Malformed(format!("ChannelOTP row: {err}")))
            })
            .transpose()
    }

    /// Mark the record verified and used in one conditional write.
    ///
    /// Returns `false` when another verifier consumed it first.
    pub async fn consume(store: &dyn GraphStore, uid: &str) -> Result<bool, StoreError> {
        let guard = [
            Predicate::new("verified", false),
            Predicate::new("used", false),
        ];
        store
            .update_if(
                uid,
                &guard,
                vec![
                    Predicate::new("verified", true),
                    Predicate::new("used", true),
                ],
            )
            .await
    }

    /// Delete unconsumed records past expiry; consumed ones stay for audit.
    pub async fn purge_expired(
        store: &dyn GraphStore,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let rows = store
            .find(&NodeQuery::new(schema::CHANNEL_OTP).eq("used", false))
            .await?;
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
