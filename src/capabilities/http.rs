//! HTTP capability with a built-in retry loop.
//!
//! The shell executes one [`HttpRequest`] at a time (honouring `delay_ms`
//! before sending) and resolves it with either a status/body pair or a
//! transport error. Retry classification lives here in the core so every
//! caller gets the same policy: transport failures, timeouts and 5xx are
//! retried with capped exponential backoff; 4xx and anything the backend
//! said on purpose are final.

use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Attempts per logical request, first try included.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Backoff before the first retry.
pub const BASE_RETRY_DELAY_MS: u64 = 500;

/// Backoff ceiling.
pub const MAX_RETRY_DELAY_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// One HTTP exchange for the shell to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub timeout_ms: u64,
    /// Wait this long before sending. Non-zero only on retries.
    pub delay_ms: u64,
}

impl HttpRequest {
    /// A JSON POST, the shape every backend call takes.
    #[must_use]
    pub fn post_json(url: String, body: &serde_json::Value, timeout_ms: u64) -> Self {
        Self {
            method: HttpMethod::Post,
            url,
            headers: vec![("content-type".into(), "application/json".into())],
            // `Value` rendering is infallible.
            body: body.to_string().into_bytes(),
            timeout_ms,
            delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

/// Failures below the HTTP layer, reported by the shell.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpTransportError {
    #[error("request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("network unreachable: {reason}")]
    Network { reason: String },

    #[error("request could not be built: {reason}")]
    Malformed { reason: String },
}

pub type HttpResult = Result<HttpResponse, HttpTransportError>;

impl Operation for HttpRequest {
    type Output = HttpResult;
}

/// Only transport faults and server errors are worth retrying; a 4xx or a
/// well-formed refusal will not improve on a second attempt.
#[must_use]
pub fn is_retryable(result: &HttpResult) -> bool {
    match result {
        Ok(response) => response.is_server_error(),
        Err(HttpTransportError::Timeout { .. } | HttpTransportError::Network { .. }) => true,
        Err(HttpTransportError::Malformed { .. }) => false,
    }
}

/// Deterministic capped exponential backoff. No jitter: a single client
/// talking to a workflow backend gains nothing from randomisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRY_ATTEMPTS,
            base_delay_ms: BASE_RETRY_DELAY_MS,
            max_delay_ms: MAX_RETRY_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Pre-send delay for the given attempt (zero-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        let exponent = (attempt - 1).min(32);
        let shifted = self.base_delay_ms.saturating_mul(1u64 << exponent);
        shifted.min(self.max_delay_ms)
    }
}

/// The backend HTTP capability.
pub struct Backend<Ev> {
    context: CapabilityContext<HttpRequest, Ev>,
}

impl<Ev> Capability<Ev> for Backend<Ev> {
    type Operation = HttpRequest;
    type MappedSelf<MappedEv> = Backend<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Backend::new(self.context.map_event(f))
    }
}

impl<Ev> Backend<Ev>
where
    Ev: 'static,
{
    #[must_use]
    pub fn new(context: CapabilityContext<HttpRequest, Ev>) -> Self {
        Self { context }
    }

    /// Sends a request, retrying per `policy`, and delivers the last
    /// attempt's outcome to the app as an event.
    pub fn send<F>(&self, request: HttpRequest, policy: RetryPolicy, make_event: F)
    where
        F: Fn(HttpResult) -> Ev + Send + Sync + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                let mut this_try = request.clone();
                this_try.delay_ms = policy.delay_for_attempt(attempt);
                let result = context.request_from_shell(this_try).await;
                if is_retryable(&result) && attempt + 1 < policy.max_attempts {
                    attempt += 1;
                    debug!(url = %request.url, attempt, "retrying request");
                    continue;
                }
                context.update_app(make_event(result));
                break;
            }
        });
    }
}
