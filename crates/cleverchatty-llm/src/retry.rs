//! Overload retry loop wrapped around every provider call.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::provider::{AssistantTurn, ChatRequest, Provider, ProviderError};

/// Overloaded responses are retried until this many attempts have failed;
/// the next attempt is never issued.
pub const MAX_OVERLOAD_ATTEMPTS: u32 = 5;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Call the provider, retrying overload errors with exponential backoff
/// (1s doubling to a 30s cap). Any other error surfaces immediately.
/// Cancellation aborts both in-flight calls and backoff sleeps.
pub async fn create_with_retry(
    provider: &dyn Provider,
    req: &ChatRequest,
    cancel: &CancellationToken,
) -> Result<AssistantTurn, ProviderError> {
    let mut delay = INITIAL_BACKOFF;
    let mut attempt: u32 = 0;

    loop {
        let result = tokio::select! {
            r = provider.create_message(req) => r,
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        };

        match result {
            Err(e) if e.is_overloaded() => {
                attempt += 1;
                if attempt >= MAX_OVERLOAD_ATTEMPTS {
                    warn!(
                        provider = %provider.name(),
                        attempt,
                        "provider still overloaded, giving up"
                    );
                    return Err(ProviderError::Overloaded);
                }
                warn!(
                    provider = %provider.name(),
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    "provider overloaded, backing off"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                }
                delay = (delay * 2).min(MAX_BACKOFF);
            }
            other => return other,
        }
    }
}
