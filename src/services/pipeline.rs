use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::db::visit_repo;
use crate::models::{RawVisit, VisitMessage};
use crate::services::filter::filter_relevant;
use crate::services::matomo::MatomoClient;
use crate::services::rabbitmq::RabbitMqManager;

/// Fetch cycles run every other wall-clock minute.
const CYCLE_INTERVAL_SECS: i64 = 120;

/// Bounded record of visit ids already forwarded. Insertion-ordered; once
/// capacity is reached the oldest id is evicted, so an upstream re-delivery
/// older than the window can reappear as "new".
pub struct DedupWindow {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn insert(&mut self, id: String) {
        if self.seen.contains(&id) {
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(id.clone());
        self.order.push_back(id);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

struct CycleState {
    dedup: DedupWindow,
    last_fetch: Option<DateTime<Utc>>,
}

/// The Matomo `date` expression for a cycle: the full current day on the
/// first cycle, afterwards a relative window covering the whole-minute
/// ceiling of the time elapsed since the last successful cycle began.
fn date_range_param(last_fetch: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match last_fetch {
        None => "today".to_string(),
        Some(last) => {
            let elapsed_ms = (now - last).num_milliseconds().max(0);
            let minutes = (elapsed_ms + 59_999) / 60_000;
            format!("last{minutes}")
        }
    }
}

/// The next even-minute boundary strictly after `now`.
fn next_even_minute(now: DateTime<Utc>) -> DateTime<Utc> {
    let secs = now.timestamp();
    let next = secs - secs.rem_euclid(CYCLE_INTERVAL_SECS) + CYCLE_INTERVAL_SECS;
    DateTime::<Utc>::from_timestamp(next, 0).unwrap_or(now)
}

/// Fetched visits whose id has not been seen by an earlier cycle. With an
/// empty window this is the entire fetched set.
fn compute_delta(fetched: Vec<RawVisit>, window: &DedupWindow) -> Vec<RawVisit> {
    fetched
        .into_iter()
        .filter(|visit| !window.contains(&visit.id))
        .collect()
}

/// The fetch-dedup-publish loop: on a fixed schedule, pull visits from
/// Matomo, persist every one of them, and forward the unseen ones with
/// qualifying flight URLs to RabbitMQ.
pub struct FetchPipeline {
    matomo: MatomoClient,
    pool: PgPool,
    broker: Arc<RabbitMqManager>,
    state: Mutex<CycleState>,
}

impl FetchPipeline {
    pub fn new(
        matomo: MatomoClient,
        pool: PgPool,
        broker: Arc<RabbitMqManager>,
        dedup_capacity: usize,
    ) -> Self {
        Self {
            matomo,
            pool,
            broker,
            state: Mutex::new(CycleState {
                dedup: DedupWindow::new(dedup_capacity),
                last_fetch: None,
            }),
        }
    }

    /// Long-running task: one cycle immediately at startup, then one per
    /// even-minute boundary.
    pub async fn run(self) {
        self.tick().await;

        loop {
            let now = Utc::now();
            let next = next_even_minute(now);
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            self.tick().await;
        }
    }

    /// Cycle entry point. Cycles never overlap: a trigger that fires while
    /// the previous cycle is still running no-ops with a log line.
    async fn tick(&self) {
        match self.state.try_lock() {
            Ok(mut state) => self.run_cycle(&mut state).await,
            Err(_) => warn!("previous fetch cycle still running, skipping this trigger"),
        }
    }

    async fn run_cycle(&self, state: &mut CycleState) {
        info!("executing fetch cycle");
        let cycle_start = Utc::now();

        let date = date_range_param(state.last_fetch, cycle_start);
        let visits = match self.matomo.fetch_visits(&date).await {
            Ok(visits) => visits,
            Err(e) => {
                error!(error = %e, date = %date, "error fetching visits");
                return;
            }
        };

        for visit in &visits {
            match visit_repo::create_raw_visit(&self.pool, visit).await {
                Ok(_) => debug!(visitor_id = %visit.visitor_id, "saved raw visit"),
                Err(e) => {
                    error!(error = %e, visitor_id = %visit.visitor_id, "error saving raw visit")
                }
            }
        }

        let delta = compute_delta(visits, &state.dedup);
        if !delta.is_empty() {
            info!(count = delta.len(), "found new visits, forwarding to RabbitMQ");
            self.publish_delta(&delta).await;
        }

        for visit in &delta {
            state.dedup.insert(visit.id.clone());
        }
        state.last_fetch = Some(cycle_start);
    }

    /// Publish a message for every delta visit with at least one qualifying
    /// action. Publish failures are logged and never affect bookkeeping.
    async fn publish_delta(&self, delta: &[RawVisit]) {
        let mut total_visits = 0usize;
        let mut sent_messages = 0usize;

        for visit in delta {
            total_visits += 1;

            let qualifying = filter_relevant(&visit.action_details);
            if qualifying.is_empty() {
                continue;
            }

            let message = VisitMessage {
                visitor_id: visit.visitor_id.clone(),
                user_id: visit.user_id.clone(),
                action_details: qualifying,
            };

            let payload = match serde_json::to_vec(&message) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(error = %e, visitor_id = %visit.visitor_id, "error serializing message");
                    continue;
                }
            };

            match self.broker.publish(&payload).await {
                Ok(()) => {
                    sent_messages += 1;
                    debug!(
                        visitor_id = %visit.visitor_id,
                        urls = message.action_details.len(),
                        "published message with qualifying flight URLs"
                    );
                }
                Err(e) => {
                    error!(error = %e, visitor_id = %visit.visitor_id, "RabbitMQ publish error")
                }
            }
        }

        info!(
            total_visits,
            sent_messages, "filtered visits and forwarded messages to RabbitMQ"
        );
    }
}
