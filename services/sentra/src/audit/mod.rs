//! Append-only audit trail.
//!
//! Every state transition in the core emits exactly one entry. Emission is
//! fire-and-forget: the triggering operation is never blocked on, or failed
//! by, the audit write. Entries flow through a bounded in-process queue; a
//! background worker persists them with a small number of retries and counts
//! what it had to drop.

pub mod models;
pub mod recorder;

pub use models::{AuditCategory, AuditEvent, AuditSeverity};
pub use recorder::AuditRecorder;
