//! Wire-envelope adaptation between the front door and the WebAuthn library.
//!
//! The front door carries only the raw ceremony fields (clientDataJSON,
//! attestationObject, authenticatorData, signature), while the library
//! verifies full browser response envelopes. This module rebuilds those
//! envelopes and recovers the credential-id handle the envelope needs from
//! the attestation object. All protocol verification (challenge, origin,
//! rpIdHash, COSE keys, signatures, sign counters) stays in the library.

use crate::error::CoreError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ciborium::value::Value;
use serde_json::json;
use std::io::Cursor;
use webauthn_rs::prelude::{PublicKeyCredential, RegisterPublicKeyCredential};

/// Decode a base64url field, tolerating trailing padding.
pub(crate) fn b64url_decode(field: &str, value: &str) -> Result<Vec<u8>, CoreError> {
    URL_SAFE_NO_PAD
        .decode(value.trim().trim_end_matches('='))
        .map_err(|_| CoreError::InputInvalid(format!("{field} is not valid base64url")))
}

pub(crate) fn b64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Challenge strings persist unpadded; accept padded echoes from clients.
pub(crate) fn normalize_challenge(challenge: &str) -> &str {
    challenge.trim().trim_end_matches('=')
}

/// Recover the credential id from an attestation object so the browser
/// response envelope can be reassembled. Layout per the authenticator-data
/// serialization: 32-byte rpIdHash, flags, 32-bit counter, 16-byte AAGUID,
/// 16-bit credential-id length, credential id.
pub(crate) fn attested_credential_id(attestation_object: &str) -> Result<Vec<u8>, CoreError> {
    const ATTESTED_DATA_OFFSET: usize = 37;
    const FLAG_ATTESTED_CREDENTIAL: u8 = 0x40;

    let raw = b64url_decode("attestationObject", attestation_object)?;
    let value: Value = ciborium::de::from_reader(Cursor::new(&raw))
        .map_err(|err| CoreError::InputInvalid(format!("attestationObject: {err}")))?;
    let Value::Map(entries) = value else {
        return Err(CoreError::InputInvalid(
            "attestationObject is not a CBOR map".to_string(),
        ));
    };
    let auth_data = entries
        .iter()
        .find_map(|(key, value)| match (key, value) {
            (Value::Text(key), Value::Bytes(bytes)) if key == "authData" => Some(bytes.as_slice()),
            _ => None,
        })
        .ok_or_else(|| {
            CoreError::InputInvalid("attestationObject is missing authData".to_string())
        })?;

    if auth_data.len() < ATTESTED_DATA_OFFSET + 18 {
        return Err(CoreError::InputInvalid(
            "authenticator data is truncated".to_string(),
        ));
    }
    if auth_data[32] & FLAG_ATTESTED_CREDENTIAL == 0 {
        return Err(CoreError::InputInvalid(
            "no attested credential data".to_string(),
        ));
    }
    let id_offset = ATTESTED_DATA_OFFSET + 16 + 2;
    let id_len = usize::from(u16::from_be_bytes([
        auth_data[ATTESTED_DATA_OFFSET + 16],
        auth_data[ATTESTED_DATA_OFFSET + 17],
    ]));
    if auth_data.len() < id_offset + id_len {
        return Err(CoreError::InputInvalid(
            "credential id is truncated".to_string(),
        ));
    }
    Ok(auth_data[id_offset..id_offset + id_len].to_vec())
}

/// Reassemble the browser's registration response envelope.
pub(crate) fn register_response(
    credential_id: &[u8],
    client_data_json: &str,
    attestation_object: &str,
) -> Result<RegisterPublicKeyCredential, CoreError> {
    let id = b64url_encode(credential_id);
    serde_json::from_value(json!({
        "id": id.clone(),
        "rawId": id,
        "response": {
            "attestationObject": attestation_object.trim(),
            "clientDataJSON": client_data_json.trim(),
        },
        "type": "public-key",
        "extensions": {},
    }))
    .map_err(|err| CoreError::InputInvalid(format!("registration response: {err}")))
}

/// Reassemble the browser's assertion response envelope for one candidate
/// credential id.
pub(crate) fn assertion_response(
    credential_id: &str,
    client_data_json: &str,
    authenticator_data: &str,
    signature: &str,
) -> Result<PublicKeyCredential, CoreError> {
    serde_json::from_value(json!({
        "id": credential_id,
        "rawId": credential_id,
        "response": {
            "authenticatorData": authenticator_data.trim(),
            "clientDataJSON": client_data_json.trim(),
            "signature": signature.trim(),
            "userHandle": null,
        },
        "type": "public-key",
        "extensions": {},
    }))
    .map_err(|err| CoreError::InputInvalid(format!("assertion response: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attestation_object_with(auth_data: Vec<u8>) -> String {
        let entries = vec![
            (
                Value::Text("fmt".to_string()),
                Value::Text("none".to_string()),
            ),
            (Value::Text("attStmt".to_string()), Value::Map(Vec::new())),
            (Value::Text("authData".to_string()), Value::Bytes(auth_data)),
        ];
        let mut raw = Vec::new();
        ciborium::ser::into_writer(&Value::Map(entries), &mut raw).expect("encode");
        b64url_encode(&raw)
    }

    fn auth_data_with_credential(credential_id: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; 32];
        out.push(0x41);
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&u16::try_from(credential_id.len()).expect("len").to_be_bytes());
        out.extend_from_slice(credential_id);
        out
    }

    #[test]
    fn recovers_the_attested_credential_id() {
        let credential_id = [7u8; 20];
        let encoded = attestation_object_with(auth_data_with_credential(&credential_id));
        assert_eq!(
            attested_credential_id(&encoded).expect("recover id"),
            credential_id
        );
    }

    #[test]
    fn rejects_assertions_without_attested_data() {
        let mut auth_data = vec![0u8; 32];
        auth_data.push(0x01);
        auth_data.extend_from_slice(&0u32.to_be_bytes());
        let encoded = attestation_object_with(auth_data);
        assert!(matches!(
            attested_credential_id(&encoded),
            Err(CoreError::InputInvalid(_))
        ));
    }

    #[test]
    fn rejects_undecodable_input() {
        assert!(matches!(
            attested_credential_id("!!not-base64url!!"),
            Err(CoreError::InputInvalid(_))
        ));
        assert!(matches!(
            attested_credential_id(&b64url_encode(b"not cbor")),
            Err(CoreError::InputInvalid(_))
        ));
    }

    #[test]
    fn normalize_challenge_strips_padding() {
        assert_eq!(normalize_challenge("abc12=="), "abc12");
        assert_eq!(normalize_challenge(" abc12 "), "abc12");
    }

    #[test]
    fn envelopes_round_trip_through_the_library_types() {
        let register = register_response(&[9u8; 16], "Y2xpZW50", "YXR0ZXN0YXRpb24")
            .expect("registration envelope");
        assert_eq!(register.id, b64url_encode(&[9u8; 16]));

        let assertion = assertion_response("Y3JlZA", "Y2xpZW50", "YXV0aA", "c2ln")
            .expect("assertion envelope");
        assert_eq!(assertion.id, "Y3JlZA");
    }
}
