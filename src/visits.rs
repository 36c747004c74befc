//! Visit aggregates: per-country counts, a sliding window of recent
//! timestamps, and one write-only log record per visit.
//!
//! The three keys are written independently with no atomicity between them.
//! A partial failure can leave them inconsistent and concurrent updates can
//! lose an interleaved increment; both are accepted for analytics data.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::error;

use crate::{
    database::{KvStore, load_json},
    error::AppError,
    utils::{now_iso, visit_key},
};

pub const COUNTRY_VISITS_KEY: &str = "country_visits";
pub const RECENT_TIMESTAMPS_KEY: &str = "recent_timestamps";

/// Sliding-window bound on the recent-activity list.
pub const RECENT_TIMESTAMPS_LIMIT: usize = 200;

pub type CountryCounts = BTreeMap<String, u64>;

#[derive(Debug, Serialize)]
pub struct VisitSummary {
    pub total_visits: u64,
    pub countries: CountryCounts,
}

#[derive(Serialize)]
struct VisitLogEntry<'a> {
    timestamp: &'a str,
    country: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
}

/// The pending writes for one visit, computed up front so the handler can
/// answer before persistence runs.
pub struct VisitUpdate {
    writes: Vec<(String, String)>,
}

impl VisitUpdate {
    /// Read-modify-write phase: load both aggregates, merge in this visit,
    /// trim the timestamp window. A missing country is not an error; the
    /// timestamp is still recorded.
    pub async fn prepare(
        store: &dyn KvStore,
        country: Option<&str>,
        username: Option<&str>,
    ) -> Result<Self, AppError> {
        let mut counts: CountryCounts = load_json(store, COUNTRY_VISITS_KEY)
            .await?
            .unwrap_or_default();
        let mut timestamps: Vec<String> = load_json(store, RECENT_TIMESTAMPS_KEY)
            .await?
            .unwrap_or_default();

        if let Some(country) = country {
            *counts.entry(country.to_string()).or_insert(0) += 1;
        }

        let timestamp = now_iso();
        timestamps.push(timestamp.clone());
        if timestamps.len() > RECENT_TIMESTAMPS_LIMIT {
            let excess = timestamps.len() - RECENT_TIMESTAMPS_LIMIT;
            timestamps.drain(..excess);
        }

        let entry = VisitLogEntry {
            timestamp: &timestamp,
            country,
            username,
        };

        let writes = vec![
            (COUNTRY_VISITS_KEY.to_string(), serde_json::to_string(&counts)?),
            (
                RECENT_TIMESTAMPS_KEY.to_string(),
                serde_json::to_string(&timestamps)?,
            ),
            (visit_key(&timestamp), serde_json::to_string(&entry)?),
        ];

        Ok(Self { writes })
    }

    /// Write phase: three independent puts. Runs after the response when
    /// deferred through the task tracker.
    pub async fn persist(self, store: &dyn KvStore) -> Result<(), AppError> {
        for (key, value) in self.writes {
            store.put(&key, value).await?;
        }

        Ok(())
    }

    /// Deferred-write body: persist and log on failure, since there is no
    /// caller left to report to.
    pub async fn persist_logged(self, store: &dyn KvStore) {
        if let Err(e) = self.persist(store).await {
            error!("deferred visit write failed: {e}");
        }
    }
}

/// Prepare and persist in one step.
pub async fn record_visit(
    store: &dyn KvStore,
    country: Option<&str>,
    username: Option<&str>,
) -> Result<(), AppError> {
    VisitUpdate::prepare(store, country, username)
        .await?
        .persist(store)
        .await
}

pub async fn visit_summary(store: &dyn KvStore) -> Result<VisitSummary, AppError> {
    let countries: CountryCounts = load_json(store, COUNTRY_VISITS_KEY)
        .await?
        .unwrap_or_default();
    let total_visits = countries.values().sum();

    Ok(VisitSummary {
        total_visits,
        countries,
    })
}

pub async fn recent_activity(store: &dyn KvStore) -> Result<Vec<String>, AppError> {
    Ok(load_json(store, RECENT_TIMESTAMPS_KEY)
        .await?
        .unwrap_or_default())
}
