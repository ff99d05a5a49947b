//! WebAuthn ceremonies: credential enrollment (attestation) and
//! re-authentication (assertion), with single-use challenges and
//! sign-counter replay detection.

pub mod models;
pub mod repo;
pub mod service;
pub(crate) mod wire;

pub use models::*;
pub use service::WebAuthnService;
pub use webauthn_rs::prelude::{CreationChallengeResponse, RequestChallengeResponse};
