//! Bounded-retry supervisor wrapping any async operation, per spec §4.2.
//!
//! Mirrors the retry/backoff shape used by the CLI's
//! `execute_command_with_progress_and_retry` (linear backoff, capped
//! attempts, retryability classification by error string), generalized
//! into an injectable, testable supervisor.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::AutopilotError;

/// Options recognized by `with_retry`/`with_retry_result`.
pub struct RetryOptions<'a> {
    pub max_retries: u32,
    pub delay_ms: u64,
    pub step_name: &'a str,
    pub required: bool,
    /// Injectable sleep, so tests can assert call counts/delays without
    /// real waiting.
    pub sleep_fn: Box<dyn Fn(Duration) -> futures::future::BoxFuture<'static, ()> + Send + Sync + 'a>,
    /// Injectable retriability predicate; defaults to `AutopilotError::retriable`.
    pub is_retriable_fn: Option<Box<dyn Fn(&AutopilotError) -> bool + Send + Sync + 'a>>,
}

impl<'a> Default for RetryOptions<'a> {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay_ms: 1500,
            step_name: "step",
            required: true,
            sleep_fn: Box::new(|d| Box::pin(tokio::time::sleep(d))),
            is_retriable_fn: None,
        }
    }
}

impl<'a> RetryOptions<'a> {
    pub fn new(step_name: &'a str) -> Self {
        Self {
            step_name,
            ..Default::default()
        }
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn delay_ms(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    fn is_retriable(&self, err: &AutopilotError) -> bool {
        match &self.is_retriable_fn {
            Some(f) => f(err),
            None => err.retriable(),
        }
    }
}

/// Outcome of `with_retry_result`: distinguishes a successful value from a
/// deliberately skipped optional step (vs. propagating an error for a
/// required one).
pub enum RetryOutcome<T> {
    Success(T),
    Skipped { error: AutopilotError },
}

/// Runs `op` up to `max_retries + 1` times. A non-retriable error is
/// rethrown immediately without sleeping. Retriable errors sleep linearly
/// between attempts (never after the final attempt) and emit
/// `retry_attempt`; exhaustion emits `retry_exhausted` and fails with
/// `RetryExhausted` since `required` defaults to true.
pub async fn with_retry<T, F, Fut>(mut op: F, opts: RetryOptions<'_>) -> Result<T, AutopilotError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AutopilotError>>,
{
    match with_retry_result(&mut op, opts).await {
        RetryOutcome::Success(v) => Ok(v),
        RetryOutcome::Skipped { error } => Err(error),
    }
}

/// Same algorithm as `with_retry`, but on exhaustion of an optional
/// (`required: false`) step returns `RetryOutcome::Skipped` instead of
/// propagating `RetryExhausted`.
pub async fn with_retry_result<T, F, Fut>(op: &mut F, opts: RetryOptions<'_>) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AutopilotError>>,
{
    let attempts = opts.max_retries + 1;
    let mut last_err: Option<AutopilotError> = None;

    for attempt in 0..attempts {
        match op().await {
            Ok(v) => return RetryOutcome::Success(v),
            Err(err) => {
                if !opts.is_retriable(&err) {
                    return RetryOutcome::Skipped { error: err };
                }

                let is_last = attempt + 1 == attempts;
                if is_last {
                    warn!(
                        event_type = "retry_exhausted",
                        step = opts.step_name,
                        attempts = attempts,
                        "retry exhausted"
                    );
                    last_err = Some(err);
                    break;
                }

                debug!(
                    event_type = "retry_attempt",
                    step = opts.step_name,
                    attempt = attempt + 1,
                    "retrying after transient failure: {err}"
                );
                (opts.sleep_fn)(Duration::from_millis(opts.delay_ms * (attempt as u64 + 1))).await;
                last_err = Some(err);
            }
        }
    }

    let source = last_err.expect("loop always runs at least once");
    if opts.required {
        RetryOutcome::Skipped {
            error: AutopilotError::RetryExhausted {
                step: opts.step_name.to_string(),
                attempts,
                source: Box::new(source),
            },
        }
    } else {
        RetryOutcome::Skipped {
            error: AutopilotError::RetrySkipped {
                step: opts.step_name.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counting_sleep(
        counter: Arc<AtomicU32>,
    ) -> Box<dyn Fn(Duration) -> futures::future::BoxFuture<'static, ()> + Send + Sync> {
        Box::new(move |_d| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        })
    }

    #[tokio::test]
    async fn retry_success_on_second_attempt() {
        let call_count = Arc::new(AtomicU32::new(0));
        let sleep_calls = Arc::new(AtomicU32::new(0));

        let cc = call_count.clone();
        let op = move || {
            let cc = cc.clone();
            async move {
                let n = cc.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(AutopilotError::Timeout("first attempt".into()))
                } else {
                    Ok(42)
                }
            }
        };

        let opts = RetryOptions {
            max_retries: 2,
            sleep_fn: counting_sleep(sleep_calls.clone()),
            ..RetryOptions::new("demo")
        };

        let result = with_retry(op, opts).await.unwrap();
        assert_eq!(result, 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
        assert_eq!(sleep_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fatal_bypasses_retry() {
        let call_count = Arc::new(AtomicU32::new(0));
        let sleep_calls = Arc::new(AtomicU32::new(0));

        let cc = call_count.clone();
        let op = move || {
            let cc = cc.clone();
            async move {
                cc.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AutopilotError::BrowserCrash("gone".into()))
            }
        };

        let opts = RetryOptions {
            sleep_fn: counting_sleep(sleep_calls.clone()),
            ..RetryOptions::new("demo")
        };

        let result = with_retry(op, opts).await;
        assert!(matches!(result, Err(AutopilotError::BrowserCrash(_))));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert_eq!(sleep_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhaustion_with_n_retries_calls_n_plus_one_times() {
        for n in [0u32, 1, 2, 4] {
            let call_count = Arc::new(AtomicU32::new(0));
            let sleep_calls = Arc::new(AtomicU32::new(0));

            let cc = call_count.clone();
            let op = move || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(AutopilotError::Timeout("always".into()))
                }
            };

            let opts = RetryOptions {
                max_retries: n,
                sleep_fn: counting_sleep(sleep_calls.clone()),
                ..RetryOptions::new("demo")
            };

            let result = with_retry(op, opts).await;
            assert!(matches!(result, Err(AutopilotError::RetryExhausted { .. })));
            assert_eq!(call_count.load(Ordering::SeqCst), n + 1);
            assert_eq!(sleep_calls.load(Ordering::SeqCst), n);
        }
    }

    #[tokio::test]
    async fn optional_step_skips_instead_of_failing() {
        let op = || async { Err::<(), _>(AutopilotError::Timeout("always".into())) };
        let opts = RetryOptions {
            max_retries: 0,
            required: false,
            ..RetryOptions::new("optional-step")
        };
        let result = with_retry(op, opts).await;
        assert!(matches!(result, Err(AutopilotError::RetrySkipped { .. })));
    }
}
