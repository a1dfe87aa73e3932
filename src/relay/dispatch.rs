//! Delivery of matched tasks with per-recipient failure isolation
//!
//! Tasks are grouped by recipient. A recipient's tasks are sent one after the
//! other, in matcher order; different recipients run concurrently up to the
//! configured limit. The first failed send for a recipient opens its circuit:
//! every remaining task for that recipient in this cycle is skipped.
//!
//! Each recipient produces a [`RecipientOutcome`]; the outcomes are folded into
//! a single [`CycleResult`] once every recipient is drained. No state is shared
//! between recipients while they run.

use crate::relay::{MessagingGateway, SubscriptionStore};
use crate::types::{DeliveryOutcome, DeliveryTask, Event, SubscriptionId, UserId};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::broadcast;

/// Why a recipient's circuit opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RecipientFailure {
    /// Permanent; the recipient was deactivated
    Unreachable(String),
    /// Temporary; retried next cycle
    Transient(String),
}

/// What happened to one recipient during a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecipientOutcome {
    pub(crate) user_id: UserId,
    /// Messages the gateway accepted
    pub(crate) delivered: u64,
    /// Tasks never attempted because the circuit was open
    pub(crate) skipped: u64,
    /// Subscriptions with at least one accepted message
    pub(crate) delivered_subscriptions: BTreeSet<SubscriptionId>,
    pub(crate) failure: Option<RecipientFailure>,
}

impl RecipientOutcome {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            delivered: 0,
            skipped: 0,
            delivered_subscriptions: BTreeSet::new(),
            failure: None,
        }
    }
}

/// Accumulated effects of one cycle's dispatch
///
/// Only what is in here is ever committed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleResult {
    /// Recipients whose circuit opened this cycle
    pub failed_users: BTreeSet<UserId>,
    /// Recipients found unreachable (subset of `failed_users`)
    pub unreachable_users: BTreeSet<UserId>,
    /// Subscriptions whose watermark may advance
    pub succeeded_subscriptions: BTreeSet<SubscriptionId>,
    /// Accepted messages per recipient
    pub delivered_count: BTreeMap<UserId, u64>,
    /// Tasks skipped behind an open circuit
    pub skipped: u64,
}

impl CycleResult {
    /// Combine two partial results
    ///
    /// Merging is associative and commutative, so partial results may be folded
    /// in any completion order.
    pub fn merge(mut self, other: CycleResult) -> CycleResult {
        self.failed_users.extend(other.failed_users);
        self.unreachable_users.extend(other.unreachable_users);
        self.succeeded_subscriptions
            .extend(other.succeeded_subscriptions);
        for (user, count) in other.delivered_count {
            *self.delivered_count.entry(user).or_insert(0) += count;
        }
        self.skipped += other.skipped;
        self
    }

    /// Total accepted messages
    pub fn delivered_total(&self) -> u64 {
        self.delivered_count.values().sum()
    }

    /// Recipients that hit a transient error
    pub fn transient_users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.failed_users.difference(&self.unreachable_users).copied()
    }
}

impl From<RecipientOutcome> for CycleResult {
    fn from(outcome: RecipientOutcome) -> Self {
        let mut result = CycleResult {
            skipped: outcome.skipped,
            ..CycleResult::default()
        };

        if outcome.delivered > 0 {
            result
                .delivered_count
                .insert(outcome.user_id, outcome.delivered);
        }

        result.succeeded_subscriptions = outcome.delivered_subscriptions;

        match outcome.failure {
            Some(RecipientFailure::Unreachable(_)) => {
                result.failed_users.insert(outcome.user_id);
                result.unreachable_users.insert(outcome.user_id);
            }
            Some(RecipientFailure::Transient(_)) => {
                result.failed_users.insert(outcome.user_id);
            }
            None => {}
        }

        result
    }
}

/// Group tasks by recipient, keeping each recipient's task order
fn group_by_recipient(tasks: Vec<DeliveryTask>) -> Vec<(UserId, Vec<DeliveryTask>)> {
    let mut groups: Vec<(UserId, Vec<DeliveryTask>)> = Vec::new();
    let mut index: HashMap<UserId, usize> = HashMap::new();

    for task in tasks {
        match index.get(&task.user_id) {
            Some(&i) => groups[i].1.push(task),
            None => {
                index.insert(task.user_id, groups.len());
                groups.push((task.user_id, vec![task]));
            }
        }
    }

    groups
}

/// Dispatch every task and fold the per-recipient outcomes
pub(crate) async fn dispatch(
    store: &dyn SubscriptionStore,
    gateway: &dyn MessagingGateway,
    event_tx: &broadcast::Sender<Event>,
    tasks: Vec<DeliveryTask>,
    max_concurrent_recipients: usize,
) -> CycleResult {
    let groups = group_by_recipient(tasks);
    let recipients = groups.len();

    let result = stream::iter(groups)
        .map(|(user_id, tasks)| deliver_to_recipient(store, gateway, event_tx, user_id, tasks))
        .buffer_unordered(max_concurrent_recipients.max(1))
        .fold(CycleResult::default(), |acc, outcome| async move {
            acc.merge(CycleResult::from(outcome))
        })
        .await;

    tracing::debug!(
        recipients,
        delivered = result.delivered_total(),
        failed = result.failed_users.len(),
        skipped = result.skipped,
        "dispatch drained"
    );

    result
}

/// Send one recipient's tasks in order, stopping at the first failure
async fn deliver_to_recipient(
    store: &dyn SubscriptionStore,
    gateway: &dyn MessagingGateway,
    event_tx: &broadcast::Sender<Event>,
    user_id: UserId,
    tasks: Vec<DeliveryTask>,
) -> RecipientOutcome {
    let mut outcome = RecipientOutcome::new(user_id);

    for task in tasks {
        if outcome.failure.is_some() {
            outcome.skipped += 1;
            continue;
        }

        match gateway.send(user_id, &task.text).await {
            DeliveryOutcome::Delivered => {
                outcome.delivered += 1;
                outcome.delivered_subscriptions.extend(task.subscription_id);
            }
            DeliveryOutcome::RecipientUnreachable(reason) => {
                tracing::info!(
                    user_id = %user_id,
                    subscription_id = ?task.subscription_id,
                    reason = %reason,
                    "recipient unreachable, deactivating"
                );
                deactivate(store, event_tx, user_id, &reason).await;
                outcome.failure = Some(RecipientFailure::Unreachable(reason));
            }
            DeliveryOutcome::TransientError(reason) => {
                tracing::warn!(
                    user_id = %user_id,
                    subscription_id = ?task.subscription_id,
                    reason = %reason,
                    "transient delivery failure, retrying next cycle"
                );
                outcome.failure = Some(RecipientFailure::Transient(reason));
            }
        }
    }

    outcome
}

/// Deactivate an unreachable recipient; a store failure is logged, never propagated
async fn deactivate(
    store: &dyn SubscriptionStore,
    event_tx: &broadcast::Sender<Event>,
    user_id: UserId,
    reason: &str,
) {
    match store.deactivate_user_and_subscriptions(user_id).await {
        Ok(()) => {
            event_tx
                .send(Event::RecipientDeactivated {
                    user_id,
                    reason: reason.to_string(),
                })
                .ok();
        }
        Err(e) => {
            tracing::error!(
                user_id = %user_id,
                error = %e,
                code = e.error_code(),
                "failed to deactivate unreachable recipient"
            );
        }
    }
}
