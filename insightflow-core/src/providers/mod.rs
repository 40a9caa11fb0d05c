//! LLM provider implementations.
//!
//! All supported backends (OpenRouter, OpenAI, Groq, Ollama) speak the OpenAI
//! chat completions format, so a single `OpenAiCompatibleProvider` covers them.
//! Use `create_provider()` to instantiate it from config.

pub mod openai_compat;

use crate::brain::LlmProvider;
use crate::config::{LlmConfig, RetryConfig};
use crate::error::LlmError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub use openai_compat::OpenAiCompatibleProvider;

/// Call `operation` until it succeeds, fails permanently, or the retry budget
/// in `config` runs out.
///
/// Rate limits, dropped connections and timeouts are transient. A rate limit
/// waits at least as long as the provider asked.
pub async fn retry_transient<F, Fut, T>(config: &RetryConfig, mut operation: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut backoff = Backoff::new(config);
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let Some(delay) = backoff.next_delay(&err) else {
            return Err(err);
        };
        warn!(
            attempt = backoff.attempt,
            max_retries = config.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "LLM call failed, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Delay schedule for one logical call.
struct Backoff<'a> {
    config: &'a RetryConfig,
    attempt: u32,
}

impl<'a> Backoff<'a> {
    fn new(config: &'a RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` to give up on `err`.
    fn next_delay(&mut self, err: &LlmError) -> Option<Duration> {
        let transient = matches!(
            err,
            LlmError::RateLimited { .. } | LlmError::Connection { .. } | LlmError::Timeout { .. }
        );
        if !transient || self.attempt >= self.config.max_retries {
            return None;
        }
        let mut delay_ms = self.scheduled_ms();
        if let LlmError::RateLimited { retry_after_secs } = err {
            delay_ms = delay_ms.max(retry_after_secs.saturating_mul(1000));
        }
        self.attempt += 1;
        Some(Duration::from_millis(delay_ms))
    }

    /// `initial * multiplier^attempt`, capped, plus up to a quarter of jitter.
    fn scheduled_ms(&self) -> u64 {
        let grown = self.config.initial_backoff_ms as f64
            * self.config.backoff_multiplier.powi(self.attempt as i32);
        let capped = grown.min(self.config.max_backoff_ms as f64) as u64;
        if !self.config.jitter {
            return capped;
        }
        let spread = capped / 4;
        if spread == 0 {
            capped
        } else {
            capped + (uuid::Uuid::new_v4().as_u128() % u128::from(spread)) as u64
        }
    }
}

/// Create an LLM provider based on the configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "openrouter" | "openai" | "groq" | "ollama" | "openai-compatible" => {
            Ok(Arc::new(OpenAiCompatibleProvider::new(config)?))
        }
        other => Err(LlmError::ApiRequest {
            message: format!("Unsupported LLM provider '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(max_retries: u32, max_backoff_ms: u64) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1000,
            max_backoff_ms,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    fn connection_reset() -> LlmError {
        LlmError::Connection {
            message: "reset".into(),
        }
    }

    #[test]
    fn test_backoff_doubles_until_budget_is_spent() {
        let config = fixed(3, 60_000);
        let mut backoff = Backoff::new(&config);
        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay(&connection_reset()))
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000]);
    }

    #[test]
    fn test_backoff_respects_cap() {
        let config = fixed(5, 3000);
        let mut backoff = Backoff::new(&config);
        backoff.attempt = 4;
        assert_eq!(
            backoff.next_delay(&connection_reset()),
            Some(Duration::from_millis(3000))
        );
    }

    #[test]
    fn test_backoff_honours_retry_after() {
        let config = fixed(3, 60_000);
        let mut backoff = Backoff::new(&config);
        let delay = backoff.next_delay(&LlmError::RateLimited {
            retry_after_secs: 30,
        });
        assert_eq!(delay, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_backoff_gives_up_on_permanent_errors() {
        let config = fixed(3, 60_000);
        let mut backoff = Backoff::new(&config);
        assert!(backoff
            .next_delay(&LlmError::AuthFailed {
                provider: "test".into()
            })
            .is_none());
        assert!(backoff
            .next_delay(&LlmError::ResponseParse {
                message: "not json".into()
            })
            .is_none());
        assert!(backoff.next_delay(&LlmError::Timeout { timeout_secs: 30 }).is_some());
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let config = RetryConfig {
            jitter: true,
            ..fixed(3, 60_000)
        };
        for _ in 0..20 {
            let ms = Backoff::new(&config).scheduled_ms();
            assert!((1000..1250).contains(&ms), "jittered delay {ms}");
        }
    }

    #[test]
    fn test_create_provider_rejects_unknown() {
        let config = LlmConfig {
            provider: "carrier-pigeon".into(),
            api_key: Some("k".into()),
            ..Default::default()
        };
        assert!(create_provider(&config).is_err());
    }

    #[tokio::test]
    async fn test_retry_stops_on_auth_failure() {
        let mut calls = 0;
        let result: Result<(), _> = retry_transient(&fixed(3, 10), || {
            calls += 1;
            async {
                Err(LlmError::AuthFailed {
                    provider: "openrouter".into(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(LlmError::AuthFailed { .. })));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_dropped_connections() {
        let config = RetryConfig {
            initial_backoff_ms: 1,
            ..fixed(3, 10)
        };
        let mut calls = 0;
        let result = retry_transient(&config, || {
            calls += 1;
            let attempt = calls;
            async move {
                if attempt < 3 {
                    Err(connection_reset())
                } else {
                    Ok("plan")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "plan");
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_retry_surfaces_last_error_when_budget_runs_out() {
        let config = RetryConfig {
            initial_backoff_ms: 1,
            ..fixed(2, 5)
        };
        let mut calls = 0;
        let result: Result<(), _> = retry_transient(&config, || {
            calls += 1;
            async { Err(LlmError::Timeout { timeout_secs: 1 }) }
        })
        .await;
        assert!(matches!(result, Err(LlmError::Timeout { .. })));
        assert_eq!(calls, 3);
    }
}
