//! # Sentra (MFA Core)
//!
//! `sentra` is the core of a multi-factor authentication platform. It walks an
//! untrusted user through a pipeline of challenges and owns the resulting
//! state in a backing graph store:
//!
//! - **OTP**: one-time passcodes generated, delivered over a channel
//!   (email/SMS/WhatsApp/Telegram), and verified single-use under expiry.
//! - **Routing**: user-existence lookup keyed by a deterministic channel
//!   identifier; pending users are created when no channel matches.
//! - **WebAuthn**: registration (attestation) and authentication (assertion)
//!   ceremonies with single-use challenges and sign-counter replay checks.
//! - **Sessions**: HS256-signed bearer tokens with store-backed revocation,
//!   expiry, and sliding refresh inside a bounded refresh window.
//! - **Audit**: an append-only trail covering every state transition, written
//!   fire-and-forget through a bounded retry queue.
//!
//! ## Boundaries
//!
//! The HTTP/GraphQL front door, the real graph database, and the outbound
//! message providers are external collaborators. They meet this crate at the
//! [`store::GraphStore`] and [`dispatch::MessageDispatcher`] traits and at the
//! [`context::CoreContext`] facade, which exposes one method per logical
//! front-door operation.
//!
//! ## Consistency
//!
//! The store contract is single-mutation atomicity plus unique-key
//! constraints; no multi-statement transactions are assumed. Races the
//! protocol cares about (double OTP verify, duplicate channel registration,
//! challenge replay, validate-vs-revoke) are resolved by conditional updates,
//! unique insertions, and single-use deletes at the store boundary.

pub mod audit;
pub mod clock;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod hashing;
pub mod otp;
pub mod routing;
pub mod session;
pub mod store;
pub mod webauthn;

pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use context::CoreContext;
pub use error::CoreError;
