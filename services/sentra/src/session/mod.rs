//! Session lifecycle: signed-token issuance, validation against the
//! revocation/expiry record, sliding refresh, explicit revocation.

pub mod models;
pub mod repo;
pub mod service;

pub use models::*;
pub use service::SessionService;
