/*!
 * Retry logic with linear backoff and jitter
 */

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tonic::{Code, Status};
use tracing::warn;

/// Retry policy applied uniformly to every call when retry is enabled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff per attempt in milliseconds (attempt n waits n * backoff_ms)
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Random jitter as a fraction of the backoff (0.1 = +/-10%)
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,

    /// Status codes worth retrying
    #[serde(default = "default_codes", with = "code_names")]
    pub codes: Vec<Code>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    50
}

fn default_jitter_fraction() -> f64 {
    0.1
}

fn default_codes() -> Vec<Code> {
    vec![Code::Unavailable, Code::ResourceExhausted]
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            jitter_fraction: default_jitter_fraction(),
            codes: default_codes(),
        }
    }
}

impl RetryPolicy {
    /// Whether a failed attempt with this status may be retried
    pub fn is_retryable(&self, status: &Status) -> bool {
        self.codes.contains(&status.code())
    }

    /// Delay before retry number `attempt` (1-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(attempt as u64))
    }

    /// Delay before retry number `attempt` with jitter applied
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter_fraction <= 0.0 || base.is_zero() {
            return base;
        }

        let spread = self.jitter_fraction.min(1.0);
        let factor = rand::rng().random_range((1.0 - spread)..=(1.0 + spread));
        base.mul_f64(factor)
    }
}

/// Execute a call, retrying retryable failures according to `policy`
///
/// `op` receives the 1-based attempt number.
pub async fn with_retry<T, Op, Fut>(policy: &RetryPolicy, method: &str, mut op: Op) -> Result<T, Status>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Status>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(status) => {
                if attempt >= max_attempts || !policy.is_retryable(&status) {
                    return Err(status);
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    method,
                    attempt,
                    max_attempts,
                    code = ?status.code(),
                    ?delay,
                    "retrying geodb call"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Serialize status codes by their canonical names ("unavailable", ...)
mod code_names {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use tonic::Code;

    const CODES: [(Code, &str); 17] = [
        (Code::Ok, "ok"),
        (Code::Cancelled, "cancelled"),
        (Code::Unknown, "unknown"),
        (Code::InvalidArgument, "invalid_argument"),
        (Code::DeadlineExceeded, "deadline_exceeded"),
        (Code::NotFound, "not_found"),
        (Code::AlreadyExists, "already_exists"),
        (Code::PermissionDenied, "permission_denied"),
        (Code::ResourceExhausted, "resource_exhausted"),
        (Code::FailedPrecondition, "failed_precondition"),
        (Code::Aborted, "aborted"),
        (Code::OutOfRange, "out_of_range"),
        (Code::Unimplemented, "unimplemented"),
        (Code::Internal, "internal"),
        (Code::Unavailable, "unavailable"),
        (Code::DataLoss, "data_loss"),
        (Code::Unauthenticated, "unauthenticated"),
    ];

    pub fn name(code: Code) -> &'static str {
        CODES
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, n)| *n)
            .unwrap_or("unknown")
    }

    pub fn serialize<S: Serializer>(codes: &[Code], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(codes.iter().map(|c| name(*c)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Code>, D::Error> {
        let names = Vec::<String>::deserialize(deserializer)?;
        names
            .iter()
            .map(|n| {
                CODES
                    .iter()
                    .find(|(_, name)| name.eq_ignore_ascii_case(n))
                    .map(|(c, _)| *c)
                    .ok_or_else(|| D::Error::custom(format!("unknown status code: {}", n)))
            })
            .collect()
    }
}

pub(crate) use code_names::name as code_name;
