//! Fetch window planning.

use crate::types::{Provider, Subscription};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// The single content-source request a cycle makes
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FetchPlan {
    /// Every provider at least one active subscription follows
    pub(crate) providers: BTreeSet<Provider>,
    /// Oldest watermark among the subscriptions
    pub(crate) after: DateTime<Utc>,
}

/// Compute the minimal fetch window covering every subscription
///
/// Returns `None` when there is nothing to fetch for.
pub(crate) fn plan_fetch(subscriptions: &[Subscription]) -> Option<FetchPlan> {
    let after = subscriptions.iter().map(|s| s.watermark).min()?;
    let providers = subscriptions.iter().map(|s| s.provider).collect();
    Some(FetchPlan { providers, after })
}
