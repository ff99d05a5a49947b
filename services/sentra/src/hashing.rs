//! Hashing for recipients, codes, tokens, and channel identities.
//!
//! Recipients, codes, and session tokens are stored hash-only. The channel
//! DID binds the channel type into the digest so the same recipient reached
//! over two channels yields two identities.

use crate::dispatch::ChannelType;
use sha2::{Digest, Sha256};

/// Raw SHA-256 digest.
#[must_use]
pub fn sha256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hasher.finalize().into()
}

/// Hex-encoded SHA-256 of the input.
#[must_use]
pub fn sha256_hex(input: &str) -> String {
    hex::encode(sha256(input.as_bytes()))
}

/// Deterministic privacy-preserving identifier of a `(channel, recipient)`
/// pair: `hex(SHA256(channel ":" recipient))`.
#[must_use]
pub fn channel_did(channel: ChannelType, recipient: &str) -> String {
    sha256_hex(&format!("{}:{recipient}", channel.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(sha256_hex("a@b.test"), sha256_hex("a@b.test"));
        assert_eq!(sha256_hex("a@b.test").len(), 64);
        assert_ne!(sha256_hex("a@b.test"), sha256_hex("a@c.test"));
    }

    #[test]
    fn channel_did_separates_channels() {
        let email = channel_did(ChannelType::Email, "+15551234");
        let sms = channel_did(ChannelType::Sms, "+15551234");
        assert_ne!(email, sms);
    }

    #[test]
    fn channel_did_differs_from_bare_recipient_hash() {
        assert_ne!(
            channel_did(ChannelType::Email, "a@b.test"),
            sha256_hex("a@b.test")
        );
    }
}
