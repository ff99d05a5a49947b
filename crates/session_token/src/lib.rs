//! Signed session token envelope.
//!
//! Tokens are compact JWTs signed with HMAC-SHA256 under a process-wide
//! symmetric secret. The claims carry the session subject (`sub`), issuance
//! and expiry instants (`iat`/`exp`), a token identifier (`jti`), and any
//! caller-supplied extra claims that do not shadow the standard set.
//!
//! The raw token is only ever handed to the client; storage layers keep a
//! hash of it for revocation lookups.

mod error;
mod jwt;

pub use error::Error;
pub use jwt::{SessionClaims, sign_hs256, verify_hs256};
