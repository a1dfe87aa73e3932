//! Fan-out of fetched items onto subscriptions.

use crate::types::{ContentItem, DeliveryTask, Subscription};

/// Pair every item with every subscription that has not seen it yet
///
/// An item matches a subscription when the providers agree and the item was
/// published strictly after the subscription's watermark. Items are walked
/// oldest-first (ties keep fetch order), subscriptions in the given order, so
/// each recipient's tasks come out in chronological order.
pub(crate) fn match_items(
    items: &[ContentItem],
    subscriptions: &[Subscription],
) -> Vec<DeliveryTask> {
    let mut ordered: Vec<&ContentItem> = items.iter().collect();
    ordered.sort_by_key(|item| item.published_at);

    ordered
        .into_iter()
        .flat_map(|item| {
            subscriptions
                .iter()
                .filter(move |sub| {
                    sub.provider == item.provider && item.published_at > sub.watermark
                })
                .map(move |sub| DeliveryTask {
                    user_id: sub.user_id,
                    text: item.body.clone(),
                    subscription_id: Some(sub.id),
                })
        })
        .collect()
}
