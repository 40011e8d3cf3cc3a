//! Timeout, retry and empty-completion policy around raw providers.
//!
//! Every pipeline stage calls the model through [`generate_checked`], so stage
//! code never sees transient transport failures, only completions or terminal
//! errors.

use std::time::Duration;
use tokio::time::sleep;

use crate::config::GenerationPolicy;

use super::{GenerationError, ModelProvider, ProviderError};

/// Delay before the retry that follows attempt `attempt` (1-indexed),
/// capped at 30 seconds
fn backoff_delay(attempt: usize, base_ms: u64) -> Duration {
    // Exponent is capped so the multiplier cannot overflow u64
    let exp = ((attempt - 1) as u32).min(15);
    let delay_ms = base_ms.saturating_mul(2_u64.pow(exp));
    Duration::from_millis(delay_ms.min(30_000))
}

/// Generate a completion under the policy.
///
/// Each attempt is bounded by `timeout_secs`; an elapsed timeout counts as a
/// failed attempt. Failed attempts retry with exponential backoff up to
/// `max_attempts` total. A blank completion is terminal: the model answered,
/// retrying the same prompt is pointless.
///
/// Returns the trimmed completion text.
pub async fn generate_checked(
    provider: &dyn ModelProvider,
    prompt: &str,
    policy: &GenerationPolicy,
) -> Result<String, GenerationError> {
    let timeout = Duration::from_secs(policy.timeout_secs);
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        let result = match tokio::time::timeout(timeout, provider.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout),
        };

        match result {
            Ok(response) => {
                let content = response.content.trim();
                if content.is_empty() {
                    return Err(GenerationError::EmptyCompletion {
                        model: response.model,
                    });
                }
                return Ok(content.to_string());
            }
            Err(e) => {
                if attempt < policy.max_attempts {
                    let delay = backoff_delay(attempt, policy.base_delay_ms);
                    tracing::warn!(
                        "Generation attempt {}/{} failed ({}), retrying in {:?}",
                        attempt,
                        policy.max_attempts,
                        e,
                        delay
                    );
                    sleep(delay).await;
                }
                last_error = Some(e);
            }
        }
    }

    Err(GenerationError::RetriesExhausted {
        attempts: policy.max_attempts,
        source: last_error
            .unwrap_or_else(|| ProviderError::ConnectionError("no attempts were made".to_string())),
    })
}
