//! In-memory collaborators for exercising the relay without SQLite or HTTP.

use crate::error::{DatabaseError, Error, Result};
use crate::relay::{
    ContentSource, MessagingGateway, NewsRelay, StatisticsProvider, SubscriptionStore,
};
use crate::types::{
    ContentItem, DeliveryOutcome, Provider, Subscription, SubscriptionId, User, UserId, UserRole,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn store_unavailable(what: &str) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!("{what}: database is locked")))
}

/// Store state plus a log of every write the relay issued
#[derive(Default)]
pub(crate) struct StoreState {
    pub(crate) users: BTreeMap<UserId, User>,
    pub(crate) subscriptions: Vec<Subscription>,
    pub(crate) list_calls: usize,
    pub(crate) advance_calls: Vec<(BTreeSet<SubscriptionId>, DateTime<Utc>)>,
    pub(crate) increment_calls: Vec<BTreeMap<UserId, u64>>,
    pub(crate) deactivated: Vec<UserId>,
    pub(crate) fail_advance: bool,
    pub(crate) fail_increment: bool,
    pub(crate) fail_deactivate: bool,
}

impl StoreState {
    /// Number of write calls of any kind
    pub(crate) fn write_count(&self) -> usize {
        self.advance_calls.len() + self.increment_calls.len() + self.deactivated.len()
    }
}

#[derive(Default)]
pub(crate) struct FakeStore {
    pub(crate) state: Mutex<StoreState>,
}

impl FakeStore {
    pub(crate) fn add_user(&self, id: i64, role: UserRole) {
        let id = UserId(id);
        self.state.lock().unwrap().users.insert(
            id,
            User {
                id,
                role,
                active: true,
                items_received: 0,
                created_at: Utc::now(),
            },
        );
    }

    pub(crate) fn add_subscription(
        &self,
        id: i64,
        user: i64,
        provider: Provider,
        watermark: DateTime<Utc>,
    ) {
        self.state.lock().unwrap().subscriptions.push(Subscription {
            id: SubscriptionId(id),
            user_id: UserId(user),
            provider,
            active: true,
            watermark,
        });
    }

    pub(crate) fn watermark(&self, id: i64) -> DateTime<Utc> {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .find(|s| s.id == SubscriptionId(id))
            .map(|s| s.watermark)
            .unwrap()
    }

    pub(crate) fn user(&self, id: i64) -> User {
        self.state.lock().unwrap().users[&UserId(id)].clone()
    }
}

#[async_trait]
impl SubscriptionStore for FakeStore {
    async fn list_active_subscriptions(&self) -> Result<Vec<Subscription>> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| s.active && state.users.get(&s.user_id).is_some_and(|u| u.active))
            .cloned()
            .collect())
    }

    async fn advance_watermarks(
        &self,
        ids: &BTreeSet<SubscriptionId>,
        to: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.advance_calls.push((ids.clone(), to));
        if state.fail_advance {
            return Err(store_unavailable("advance watermarks"));
        }
        for sub in state.subscriptions.iter_mut() {
            if ids.contains(&sub.id) && sub.watermark < to {
                sub.watermark = to;
            }
        }
        Ok(())
    }

    async fn increment_counters(&self, deltas: &BTreeMap<UserId, u64>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.increment_calls.push(deltas.clone());
        if state.fail_increment {
            return Err(store_unavailable("increment counters"));
        }
        for (user, delta) in deltas {
            if let Some(u) = state.users.get_mut(user) {
                u.items_received += delta;
            }
        }
        Ok(())
    }

    async fn deactivate_user_and_subscriptions(&self, user_id: UserId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.deactivated.push(user_id);
        if state.fail_deactivate {
            return Err(store_unavailable("deactivate user"));
        }
        if let Some(u) = state.users.get_mut(&user_id) {
            u.active = false;
            u.role = UserRole::Guest;
        }
        for sub in state.subscriptions.iter_mut() {
            if sub.user_id == user_id {
                sub.active = false;
            }
        }
        Ok(())
    }

    async fn list_admins(&self) -> Result<Vec<User>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .users
            .values()
            .filter(|u| u.active && u.role == UserRole::Admin)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct FakeSource {
    pub(crate) items: Mutex<Vec<ContentItem>>,
    pub(crate) calls: Mutex<Vec<(BTreeSet<Provider>, DateTime<Utc>)>>,
    pub(crate) fail: Mutex<bool>,
}

impl FakeSource {
    pub(crate) fn push(&self, provider: Provider, published_at: DateTime<Utc>, body: &str) {
        self.items.lock().unwrap().push(ContentItem {
            provider,
            published_at,
            body: body.to_string(),
        });
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    async fn fetch_items(
        &self,
        providers: &BTreeSet<Provider>,
        after: DateTime<Utc>,
    ) -> Result<Vec<ContentItem>> {
        self.calls.lock().unwrap().push((providers.clone(), after));
        if *self.fail.lock().unwrap() {
            return Err(Error::ContentSource("content source returned HTTP 503".into()));
        }
        Ok(self.items.lock().unwrap().clone())
    }
}

/// Gateway that replays scripted outcomes per recipient (default: delivered)
#[derive(Default)]
pub(crate) struct FakeGateway {
    pub(crate) script: Mutex<HashMap<UserId, VecDeque<DeliveryOutcome>>>,
    pub(crate) sent: Mutex<Vec<(UserId, String)>>,
    /// Simulated latency per send
    pub(crate) latency: Mutex<Option<Duration>>,
    in_flight: Mutex<HashMap<UserId, usize>>,
    /// Highest number of concurrent sends seen for any single recipient
    pub(crate) max_in_flight_per_user: Mutex<usize>,
    in_flight_total: Mutex<usize>,
    /// Highest number of concurrent sends seen overall
    pub(crate) max_in_flight_total: Mutex<usize>,
}

impl FakeGateway {
    pub(crate) fn script(&self, user: i64, outcomes: Vec<DeliveryOutcome>) {
        self.script
            .lock()
            .unwrap()
            .insert(UserId(user), outcomes.into());
    }

    pub(crate) fn sent_to(&self, user: i64) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| *u == UserId(user))
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub(crate) fn attempts(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl MessagingGateway for FakeGateway {
    async fn send(&self, user_id: UserId, text: &str) -> DeliveryOutcome {
        {
            let mut per_user = self.in_flight.lock().unwrap();
            let n = per_user.entry(user_id).or_insert(0);
            *n += 1;
            let mut max = self.max_in_flight_per_user.lock().unwrap();
            *max = (*max).max(*n);

            let mut total = self.in_flight_total.lock().unwrap();
            *total += 1;
            let mut max_total = self.max_in_flight_total.lock().unwrap();
            *max_total = (*max_total).max(*total);
        }

        let latency = *self.latency.lock().unwrap();
        match latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }

        self.sent
            .lock()
            .unwrap()
            .push((user_id, text.to_string()));
        let outcome = self
            .script
            .lock()
            .unwrap()
            .get_mut(&user_id)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(DeliveryOutcome::Delivered);

        *self.in_flight.lock().unwrap().get_mut(&user_id).unwrap() -= 1;
        *self.in_flight_total.lock().unwrap() -= 1;

        outcome
    }
}

pub(crate) struct FakeStatistics {
    pub(crate) report: Mutex<Result<String>>,
}

impl Default for FakeStatistics {
    fn default() -> Self {
        Self {
            report: Mutex::new(Ok("-- Statistic report --".to_string())),
        }
    }
}

#[async_trait]
impl StatisticsProvider for FakeStatistics {
    async fn compute_statistics_report(&self) -> Result<String> {
        match &*self.report.lock().unwrap() {
            Ok(text) => Ok(text.clone()),
            Err(e) => Err(Error::Other(e.to_string())),
        }
    }
}

/// All four fakes, wired into a relay on demand
pub(crate) struct Harness {
    pub(crate) store: Arc<FakeStore>,
    pub(crate) source: Arc<FakeSource>,
    pub(crate) gateway: Arc<FakeGateway>,
    pub(crate) statistics: Arc<FakeStatistics>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self {
            store: Arc::new(FakeStore::default()),
            source: Arc::new(FakeSource::default()),
            gateway: Arc::new(FakeGateway::default()),
            statistics: Arc::new(FakeStatistics::default()),
        }
    }

    pub(crate) fn relay(&self) -> NewsRelay {
        self.relay_with_concurrency(4)
    }

    pub(crate) fn relay_with_concurrency(&self, max_concurrent_recipients: usize) -> NewsRelay {
        NewsRelay::new(
            self.store.clone(),
            self.statistics.clone(),
            self.source.clone(),
            self.gateway.clone(),
            max_concurrent_recipients,
        )
    }
}
