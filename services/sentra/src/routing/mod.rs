//! Post-OTP routing: does this verified channel belong to anyone?
//!
//! A verified channel identity either signs an existing user in or triggers
//! pending-user creation. Users stay `PENDING` until their first credential
//! enrollment promotes them to `ACTIVE`.

pub mod models;
pub mod repo;
pub mod service;

pub use models::*;
pub use service::RouterService;
