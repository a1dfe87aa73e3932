//! Batched state writes at the end of a content cycle.

use crate::error::{Error, Result};
use crate::relay::SubscriptionStore;
use crate::relay::dispatch::CycleResult;
use chrono::{DateTime, Utc};

/// Record the effects of confirmed deliveries
///
/// Watermarks of the succeeded subscriptions move to `cycle_start` and the
/// per-user counters are incremented, one batch each. Empty batches issue no
/// write. On failure the messages have already been sent; the returned
/// [`Error::Commit`] says how much was not recorded and the log line lists the
/// affected ids.
pub(crate) async fn commit(
    store: &dyn SubscriptionStore,
    cycle_start: DateTime<Utc>,
    result: &CycleResult,
) -> Result<()> {
    let subscriptions = &result.succeeded_subscriptions;
    let counters = &result.delivered_count;

    if !subscriptions.is_empty()
        && let Err(e) = store.advance_watermarks(subscriptions, cycle_start).await
    {
        tracing::error!(
            cycle_start = %cycle_start,
            subscription_ids = ?subscriptions,
            user_ids = ?counters.keys().collect::<Vec<_>>(),
            error = %e,
            "commit failed: watermarks and counters not recorded, items may be delivered again"
        );
        return Err(Error::Commit {
            cycle_start,
            subscriptions: subscriptions.len(),
            users: counters.len(),
            source: Box::new(e),
        });
    }

    if !counters.is_empty()
        && let Err(e) = store.increment_counters(counters).await
    {
        tracing::error!(
            cycle_start = %cycle_start,
            user_ids = ?counters.keys().collect::<Vec<_>>(),
            error = %e,
            "commit failed: delivery counters not recorded"
        );
        return Err(Error::Commit {
            cycle_start,
            subscriptions: 0,
            users: counters.len(),
            source: Box::new(e),
        });
    }

    tracing::debug!(
        cycle_start = %cycle_start,
        watermarks = subscriptions.len(),
        counters = counters.len(),
        "cycle committed"
    );

    Ok(())
}
