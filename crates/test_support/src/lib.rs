//! Test scaffolding for the MFA core: a clock that only moves when told to,
//! a dispatcher that captures outbound messages, and a fake authenticator
//! that produces valid WebAuthn ceremony responses.

pub mod webauthn;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sentra::clock::Clock;
use sentra::dispatch::{DispatchError, DispatchRequest, DispatchResponse, MessageDispatcher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A clock that starts at a fixed instant and advances on demand.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_at(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap())
    }
}

impl ManualClock {
    #[must_use]
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }
}

/// A dispatcher that records every request and can be told to fail.
#[derive(Debug, Default)]
pub struct CapturingDispatcher {
    requests: Mutex<Vec<DispatchRequest>>,
    fail: AtomicBool,
    counter: AtomicU64,
}

impl CapturingDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent dispatch report a provider failure.
    pub fn fail_deliveries(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    #[must_use]
    pub fn sent(&self) -> Vec<DispatchRequest> {
        self.requests.lock().expect("dispatcher lock").clone()
    }

    /// The `code` variable of the most recent message carrying one.
    #[must_use]
    pub fn last_code(&self) -> Option<String> {
        self.requests
            .lock()
            .expect("dispatcher lock")
            .iter()
            .rev()
            .find_map(|request| request.variables.get("code").cloned())
    }
}

#[async_trait]
impl MessageDispatcher for CapturingDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResponse, DispatchError> {
        self.requests
            .lock()
            .expect("dispatcher lock")
            .push(request);
        if self.fail.load(Ordering::Relaxed) {
            return Ok(DispatchResponse {
                message_id: String::new(),
                success: false,
                error: Some("provider rejected the message".to_string()),
            });
        }
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(DispatchResponse {
            message_id: format!("msg-{id}"),
            success: true,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra::dispatch::ChannelType;

    #[test]
    fn manual_clock_advances_only_on_demand() {
        let clock = ManualClock::default();
        let start = clock.now();
        assert_eq!(clock.now(), start);
        clock.advance(Duration::minutes(6));
        assert_eq!(clock.now(), start + Duration::minutes(6));
    }

    #[tokio::test]
    async fn capturing_dispatcher_records_and_fails_on_demand() {
        let dispatcher = CapturingDispatcher::new();
        let request = DispatchRequest::new(ChannelType::Email, "a@b.test", "otp-code")
            .with_variable("code", "123456");

        let response = dispatcher.dispatch(request.clone()).await.expect("dispatch");
        assert!(response.success);
        assert_eq!(dispatcher.last_code().as_deref(), Some("123456"));

        dispatcher.fail_deliveries(true);
        let response = dispatcher.dispatch(request).await.expect("dispatch");
        assert!(!response.success);
        assert_eq!(dispatcher.sent().len(), 2);
    }
}
