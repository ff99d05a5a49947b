//! One-time passcode lifecycle: generation, channel delivery, single-use
//! verification under expiry.

pub mod models;
pub mod repo;
pub mod service;

pub use models::*;
pub use service::OtpService;
