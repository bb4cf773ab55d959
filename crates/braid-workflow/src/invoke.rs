//! Shared path from a declared member to an [`Outcome`].

use braid_cache::CapabilityCache;
use braid_capability::Capability;
use braid_types::{ErrorKind, Outcome};
use serde_json::Value;

use crate::budget::BudgetGuard;

/// Invoke `capability` for the member `name` under `guard`, through `cache`
/// when given.
///
/// Returns `Err` only when the budget refused to start the call. A started
/// call always yields an outcome: failures carry `on_failure(cause)`,
/// cancellations carry [`ErrorKind::Cancelled`], and both keep whatever the
/// capability reported spending.
pub(crate) async fn invoke(
    guard: &BudgetGuard,
    cache: Option<&CapabilityCache>,
    capability: &dyn Capability,
    name: &str,
    input: Value,
    on_failure: impl FnOnce(String) -> ErrorKind,
) -> Result<Outcome, ErrorKind> {
    let signal = guard.token().child_token();

    let (metered, cache_hit) = match cache {
        Some(cache) => {
            let metered = guard
                .run(cache.get_or_invoke(capability, input, &signal))
                .await?;
            let hit = matches!(&metered.result, Ok(cached) if !cached.is_fresh());
            (metered.map(|cached| cached.completion), hit)
        }
        None => (guard.run(capability.invoke(input, &signal)).await?, false),
    };

    let outcome = match metered.result {
        Ok(completion) => {
            let outcome = Outcome::success(
                name,
                completion.content,
                metered.cost,
                metered.tokens,
                metered.duration,
            );
            if cache_hit { outcome.as_cache_hit() } else { outcome }
        }
        Err(error) if error.is_cancelled() => {
            Outcome::cancelled(name, metered.cost, metered.tokens, metered.duration)
        }
        Err(error) => Outcome::failure(
            name,
            on_failure(error.to_string()),
            metered.cost,
            metered.tokens,
            metered.duration,
        ),
    };
    Ok(outcome)
}
