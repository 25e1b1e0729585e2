use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::warn;

use crate::error::TranslationFault;

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

pub(crate) fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    let code = status.as_u16();
    if code == 529 || code == 503 {
        return true;
    }
    let lower = body.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("overloaded")
}

pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    None
}

/// Exponential backoff: `base_delay * multiplier^attempt`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the 0-based `attempt` failed.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as usize) as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Policy delay, raised to the service's hint when it asks for longer.
    pub fn wait_for(&self, attempt: usize, hint: Option<Duration>) -> Duration {
        let delay = self.delay_for(attempt);
        match hint {
            Some(hint) if hint > delay => hint.min(self.max_delay),
            _ => delay,
        }
    }

    pub fn should_retry(&self, fault: &TranslationFault, attempt: usize) -> bool {
        fault.kind().is_transient() && attempt + 1 < self.max_attempts
    }
}

pub type SleepFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Sleep abstraction so backoff can be observed without real timers.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> SleepFuture<'_>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Runs `op` until it succeeds, fails with a non-transient fault, or the attempt cap is reached.
/// The last fault is returned unchanged so callers see its original kind.
pub async fn call_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    label: &str,
    mut op: F,
) -> Result<T, TranslationFault>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TranslationFault>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(fault) if policy.should_retry(&fault, attempt) => {
                let wait = policy.wait_for(attempt, fault.retry_after());
                warn!(
                    "{} failed ({}); retrying in {:.1}s (attempt {}/{})",
                    label,
                    fault,
                    wait.as_secs_f32(),
                    attempt + 1,
                    policy.max_attempts
                );
                sleeper.sleep(wait).await;
                attempt += 1;
            }
            Err(fault) => return Err(fault),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::RecordingSleeper;
    use std::sync::Mutex;

    fn rate_limited(hint: Option<u64>) -> TranslationFault {
        TranslationFault::RateLimited {
            message: "429".to_string(),
            retry_after: hint.map(Duration::from_secs),
        }
    }

    async fn run_script(
        policy: &RetryPolicy,
        sleeper: &RecordingSleeper,
        script: Vec<Result<&'static str, TranslationFault>>,
    ) -> (Result<&'static str, TranslationFault>, usize) {
        let script = Mutex::new(script.into_iter());
        let calls = Mutex::new(0usize);
        let result = call_with_policy(policy, sleeper, "test", || {
            *calls.lock().unwrap() += 1;
            let next = script
                .lock()
                .unwrap()
                .next()
                .unwrap_or(Err(TranslationFault::Other("script exhausted".to_string())));
            async move { next }
        })
        .await;
        let calls = *calls.lock().unwrap();
        (result, calls)
    }

    #[test]
    fn delays_grow_exponentially_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(60));
        assert_eq!(policy.delay_for(usize::MAX), Duration::from_secs(60));
    }

    #[test]
    fn retry_after_hint_only_lengthens_the_wait() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.wait_for(0, Some(Duration::from_secs(5))), Duration::from_secs(5));
        assert_eq!(policy.wait_for(2, Some(Duration::from_secs(1))), Duration::from_secs(4));
        assert_eq!(policy.wait_for(0, Some(Duration::from_secs(600))), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn rate_limit_then_success() {
        let sleeper = RecordingSleeper::default();
        let (result, calls) = run_script(
            &RetryPolicy::default(),
            &sleeper,
            vec![Err(rate_limited(None)), Err(rate_limited(Some(3))), Ok("done")],
        )
        .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(calls, 3);
        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_secs(1), Duration::from_secs(3)]
        );
    }

    #[tokio::test]
    async fn connection_failures_surface_after_the_cap() {
        let sleeper = RecordingSleeper::default();
        let failure = TranslationFault::ConnectionFailed("reset".to_string());
        let (result, calls) = run_script(
            &RetryPolicy::default(),
            &sleeper,
            vec![Err(failure.clone()), Err(failure.clone()), Err(failure.clone())],
        )
        .await;
        assert_eq!(result, Err(failure));
        assert_eq!(calls, 3);
        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn authentication_is_not_retried() {
        let sleeper = RecordingSleeper::default();
        let failure = TranslationFault::Unauthenticated("invalid x-api-key".to_string());
        let (result, calls) =
            run_script(&RetryPolicy::default(), &sleeper, vec![Err(failure.clone()), Ok("late")])
                .await;
        assert_eq!(result, Err(failure));
        assert_eq!(calls, 1);
        assert!(sleeper.recorded().is_empty());
    }

    #[tokio::test]
    async fn other_faults_fail_immediately() {
        let sleeper = RecordingSleeper::default();
        let failure = TranslationFault::Other("bad request".to_string());
        let (result, calls) =
            run_script(&RetryPolicy::default(), &sleeper, vec![Err(failure.clone()), Ok("late")])
                .await;
        assert_eq!(result, Err(failure));
        assert_eq!(calls, 1);
    }

    #[test]
    fn rate_limit_detection() {
        assert!(is_rate_limited(StatusCode::TOO_MANY_REQUESTS, ""));
        assert!(is_rate_limited(StatusCode::from_u16(529).unwrap(), ""));
        assert!(is_rate_limited(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"type":"rate_limit_error"}}"#
        ));
        assert!(!is_rate_limited(StatusCode::BAD_REQUEST, "invalid request"));
    }

    #[test]
    fn retry_after_parses_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert("retry-after", "7".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));
        headers.insert("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap());
        assert_eq!(retry_after(&headers), None);
    }
}
