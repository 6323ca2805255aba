//! Retry policy with randomized backoff and failure classification
//!
//! Every capability call funnels through [`RetryPolicy::run_with_retry`].
//! Failures are classified against the policy's terminal matchers first:
//! a terminal match stops immediately and yields the default value. Other
//! failures sleep for a duration drawn uniformly from the configured pause
//! window and try again, up to `max_attempts`. Rate-limit failures use the
//! longer rate-limit window instead.

use crate::error::{CapabilityError, TaskError, TransientKind};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Upstream rate limiting: a 429 status code in HTTP context, or the usual phrases
static RATE_LIMIT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\b(?:http|status|code|error)[\s:=]*429\b|\b429\s+too many\b|too many requests|rate[\s_-]?limit)")
        .unwrap()
});

/// Substrings (lowercase) that identify captcha failures
const CAPTCHA_MARKERS: &[&str] = &["captcha"];

/// Inclusive `[min, max]` pause window in seconds
///
/// Serialized as a two-element array, matching how pause windows are written
/// in the configuration file: `pause_between_attempts = [3, 10]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u64; 2]", into = "[u64; 2]")]
pub struct PauseWindow {
    /// Lower bound in seconds
    pub min_secs: u64,
    /// Upper bound in seconds
    pub max_secs: u64,
}

impl PauseWindow {
    /// Create a new pause window
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self { min_secs, max_secs }
    }

    /// A window that never sleeps
    pub fn zero() -> Self {
        Self::new(0, 0)
    }

    /// Whether the bounds are ordered
    pub fn is_valid(&self) -> bool {
        self.min_secs <= self.max_secs
    }

    /// Draw a pause uniformly from the window
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max_secs <= self.min_secs {
            return Duration::from_secs(self.min_secs);
        }
        Duration::from_secs(rng.gen_range(self.min_secs..=self.max_secs))
    }
}

impl Default for PauseWindow {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<[u64; 2]> for PauseWindow {
    fn from(bounds: [u64; 2]) -> Self {
        Self::new(bounds[0], bounds[1])
    }
}

impl From<PauseWindow> for [u64; 2] {
    fn from(window: PauseWindow) -> Self {
        [window.min_secs, window.max_secs]
    }
}

impl std::fmt::Display for PauseWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}s, {}s]", self.min_secs, self.max_secs)
    }
}

/// Matcher that marks an error as terminal
#[derive(Debug, Clone)]
pub enum ErrorMatcher {
    /// Plain substring match
    Contains(String),
    /// Regular expression match
    Pattern(Regex),
}

impl ErrorMatcher {
    /// Substring matcher
    pub fn contains(needle: impl Into<String>) -> Self {
        Self::Contains(needle.into())
    }

    /// Regex matcher
    pub fn pattern(pattern: &str) -> std::result::Result<Self, regex::Error> {
        Ok(Self::Pattern(Regex::new(pattern)?))
    }

    /// Check whether an error message matches
    pub fn matches(&self, message: &str) -> bool {
        match self {
            Self::Contains(needle) => message.contains(needle.as_str()),
            Self::Pattern(regex) => regex.is_match(message),
        }
    }
}

/// Ephemeral per-call retry bookkeeping
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Attempts made so far
    pub attempt: usize,
    /// Most recent classified failure
    pub last_error: Option<TaskError>,
    /// Total time spent sleeping between attempts
    pub backoff: Duration,
    /// How many attempts failed on captcha
    pub captcha_failures: usize,
}

impl RetryState {
    fn record_failure(&mut self, error: TaskError) {
        if matches!(
            error,
            TaskError::Transient {
                kind: TransientKind::Captcha,
                ..
            }
        ) {
            self.captcha_failures += 1;
        }
        self.last_error = Some(error);
    }
}

/// Result of a retried call that did not propagate
#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    /// Operation result, or the default value when every attempt failed
    pub value: T,
    /// Attempts made
    pub attempts: usize,
    /// Failure that produced the default value, if any
    pub error: Option<TaskError>,
    /// Total backoff slept
    pub backoff: Duration,
    /// Attempts that failed on captcha
    pub captcha_failures: usize,
}

impl<T> RetryOutcome<T> {
    fn finish(value: T, state: RetryState, error: Option<TaskError>) -> Self {
        Self {
            value,
            attempts: state.attempt,
            error,
            backoff: state.backoff,
            captcha_failures: state.captcha_failures,
        }
    }

    /// Whether the operation itself succeeded
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Bounded retry with randomized backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    pause: PauseWindow,
    rate_limit_pause: PauseWindow,
    terminal: Vec<ErrorMatcher>,
    must_propagate: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            pause: PauseWindow::new(1, 3),
            rate_limit_pause: PauseWindow::new(30, 60),
            terminal: Vec::new(),
            must_propagate: false,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given attempt budget (at least one attempt)
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// Set the inter-attempt pause window
    pub fn with_pause(mut self, pause: PauseWindow) -> Self {
        self.pause = pause;
        self
    }

    /// Set the pause window used after rate-limit failures
    pub fn with_rate_limit_pause(mut self, pause: PauseWindow) -> Self {
        self.rate_limit_pause = pause;
        self
    }

    /// Add a terminal matcher
    pub fn with_terminal_matcher(mut self, matcher: ErrorMatcher) -> Self {
        self.terminal.push(matcher);
        self
    }

    /// Add several terminal matchers
    pub fn with_terminal_matchers(mut self, matchers: impl IntoIterator<Item = ErrorMatcher>) -> Self {
        self.terminal.extend(matchers);
        self
    }

    /// Re-raise the final error once attempts are exhausted
    pub fn must_propagate(mut self, propagate: bool) -> Self {
        self.must_propagate = propagate;
        self
    }

    /// Attempt budget
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Whether exhausted errors are re-raised
    pub fn propagates(&self) -> bool {
        self.must_propagate
    }

    /// Classify a raw capability error
    pub fn classify(&self, error: &CapabilityError) -> TaskError {
        let message = error.message();
        if self.terminal.iter().any(|m| m.matches(message)) {
            return TaskError::Terminal(message.to_string());
        }

        let lowered = message.to_lowercase();
        let kind = if RATE_LIMIT_REGEX.is_match(message) {
            TransientKind::RateLimited
        } else if CAPTCHA_MARKERS.iter().any(|m| lowered.contains(m)) {
            TransientKind::Captcha
        } else {
            TransientKind::General
        };

        TaskError::Transient {
            kind,
            message: message.to_string(),
        }
    }

    /// Run `operation` under this policy
    ///
    /// Returns `Ok` with the operation's value on success, or with
    /// `default_value` plus the last error when the call failed terminally or
    /// ran out of attempts. Returns `Err` only when the policy is marked
    /// must-propagate and attempts were exhausted.
    pub async fn run_with_retry<T, F, Fut>(
        &self,
        label: &str,
        default_value: T,
        mut operation: F,
    ) -> std::result::Result<RetryOutcome<T>, TaskError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, CapabilityError>>,
    {
        let mut state = RetryState::default();

        loop {
            state.attempt += 1;

            let error = match operation().await {
                Ok(value) => {
                    if state.attempt > 1 {
                        debug!(task = %label, attempt = state.attempt, "Retry succeeded");
                    }
                    return Ok(RetryOutcome::finish(value, state, None));
                }
                Err(e) => self.classify(&e),
            };

            if error.is_terminal() {
                warn!(
                    task = %label,
                    attempt = state.attempt,
                    error = %error.message(),
                    "Terminal failure, not retrying"
                );
                state.record_failure(error.clone());
                return Ok(RetryOutcome::finish(default_value, state, Some(error)));
            }

            if state.attempt >= self.max_attempts {
                warn!(
                    task = %label,
                    attempt = state.attempt,
                    error = %error.message(),
                    "Operation failed, max attempts exhausted"
                );
                if self.must_propagate {
                    return Err(error);
                }
                state.record_failure(error.clone());
                return Ok(RetryOutcome::finish(default_value, state, Some(error)));
            }

            let window = if error.is_rate_limited() {
                self.rate_limit_pause
            } else {
                self.pause
            };
            let delay = window.sample(&mut rand::thread_rng());

            warn!(
                task = %label,
                attempt = state.attempt,
                max_attempts = self.max_attempts,
                delay_secs = delay.as_secs(),
                error = %error,
                "Operation failed, will retry"
            );

            state.record_failure(error);
            sleep(delay).await;
            state.backoff += delay;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy::new(max_attempts)
            .with_pause(PauseWindow::zero())
            .with_rate_limit_pause(PauseWindow::zero())
    }

    #[test]
    fn test_pause_window_sample_in_bounds() {
        let window = PauseWindow::new(2, 5);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let pause = window.sample(&mut rng);
            assert!(pause >= Duration::from_secs(2));
            assert!(pause <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_pause_window_degenerate() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(PauseWindow::new(4, 4).sample(&mut rng), Duration::from_secs(4));
        assert_eq!(PauseWindow::zero().sample(&mut rng), Duration::ZERO);
        assert!(!PauseWindow::new(5, 1).is_valid());
    }

    #[test]
    fn test_pause_window_deserializes_from_array() {
        #[derive(Deserialize)]
        struct Holder {
            pause: PauseWindow,
        }
        let holder: Holder = toml::from_str("pause = [3, 10]").unwrap();
        assert_eq!(holder.pause, PauseWindow::new(3, 10));
    }

    #[test]
    fn test_classify() {
        let policy = RetryPolicy::new(3)
            .with_terminal_matcher(ErrorMatcher::contains("Could not authenticate you"))
            .with_terminal_matcher(ErrorMatcher::pattern(r"(?i)token .* invalid").unwrap());

        let err = policy.classify(&CapabilityError::new("Twitter: Could not authenticate you (32)"));
        assert!(err.is_terminal());

        let err = policy.classify(&CapabilityError::new("discord token is invalid"));
        assert!(err.is_terminal());

        let err = policy.classify(&CapabilityError::new("HTTP 429 Too Many Requests"));
        assert!(err.is_rate_limited());

        let err = policy.classify(&CapabilityError::new("faucet returned status: 429"));
        assert!(err.is_rate_limited());

        let err = policy.classify(&CapabilityError::new("Rate-limited, try later"));
        assert!(err.is_rate_limited());

        for message in [
            "insufficient balance: have 14290 wei",
            "nonce 429 already used",
            "tx 0xab429f reverted",
        ] {
            let err = policy.classify(&CapabilityError::new(message));
            assert!(!err.is_rate_limited(), "{} classified as rate limited", message);
        }

        let err = policy.classify(&CapabilityError::new("Failed to solve Recaptcha challenge"));
        assert_eq!(
            err,
            TaskError::Transient {
                kind: TransientKind::Captcha,
                message: "Failed to solve Recaptcha challenge".to_string(),
            }
        );
    }

    #[test]
    fn test_new_clamps_attempts() {
        assert_eq!(RetryPolicy::new(0).max_attempts(), 1);
    }

    #[tokio::test]
    async fn test_fails_twice_then_succeeds() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let outcome = fast_policy(3)
            .run_with_retry("faucet", false, || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(CapabilityError::new("connection reset"))
                    } else {
                        Ok(true)
                    }
                }
            })
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert!(outcome.value);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_match_attempts_once() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let policy = fast_policy(5).with_terminal_matcher(ErrorMatcher::contains("token is invalid"));
        let outcome = policy
            .run_with_retry("connect_socials", "default", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<&str, _>(CapabilityError::new("twitter token is invalid"))
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome.value, "default");
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.error.as_ref().unwrap().is_terminal());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_returns_default_with_last_error() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let outcome = fast_policy(4)
            .run_with_retry("complete_quiz", 0u32, || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Err::<u32, _>(CapabilityError::new(format!("failure #{}", n)))
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome.value, 0);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.error.unwrap().message(), "failure #4");
    }

    #[tokio::test]
    async fn test_must_propagate_returns_error() {
        let result = fast_policy(2)
            .must_propagate(true)
            .run_with_retry("login", false, || async {
                Err::<bool, _>(CapabilityError::new("signin failed"))
            })
            .await;

        let err = result.unwrap_err();
        assert!(!err.is_terminal());
        assert_eq!(err.message(), "signin failed");
    }

    #[tokio::test]
    async fn test_captcha_failures_counted() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let outcome = fast_policy(3)
            .run_with_retry("faucet", (), || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(CapabilityError::new("Failed to solve Recaptcha challenge"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.captcha_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_uses_pause_window() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let policy = RetryPolicy::new(3)
            .with_pause(PauseWindow::new(5, 5))
            .with_rate_limit_pause(PauseWindow::new(100, 100));

        let start = tokio::time::Instant::now();
        let outcome = policy
            .run_with_retry("ozone_staking", (), || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(CapabilityError::new("upstream 502"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.backoff, Duration::from_secs(10));
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_uses_longer_window() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let policy = RetryPolicy::new(2)
            .with_pause(PauseWindow::new(1, 1))
            .with_rate_limit_pause(PauseWindow::new(100, 100));

        let outcome = policy
            .run_with_retry("tesseract_swaps", (), || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(CapabilityError::new("status 429: Too Many Requests"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.backoff, Duration::from_secs(100));
    }
}
