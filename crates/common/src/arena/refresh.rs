//! Pool refresh policy
//!
//! Decides when the pool must be topped up from the paper source and keeps
//! its size bounded with a FIFO retention window: once the pool has reached
//! its minimum size, every refresh evicts as many of the oldest papers as it
//! brings in new keys. Papers the source returns again keep their row.

use crate::config::PoolConfig;
use crate::db::models::Paper;
use crate::db::{PaperQuery, PaperStore, SortDirection, SortField};
use crate::errors::Result;
use crate::metrics;
use crate::source::{CandidatePaper, CandidateRejection, PaperSource};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one refresh run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    /// Candidates returned by the source
    pub fetched: usize,
    /// Stored papers deleted to make room
    pub evicted: usize,
    /// Candidates inserted as new papers
    pub inserted: usize,
    /// Candidates without an external key, or already present
    pub skipped: usize,
    /// Candidates whose upsert failed
    pub failed: usize,
}

/// Staleness rule.
///
/// The pool is stale when it holds fewer than `min_pool_size` papers (an
/// empty pool always is) or when its newest paper was created more than
/// `refresh_interval` before `now`.
pub fn is_stale(
    pool_size: u64,
    newest_created_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    min_pool_size: u64,
    refresh_interval: Duration,
) -> bool {
    if pool_size == 0 || pool_size < min_pool_size {
        return true;
    }
    match newest_created_at {
        Some(created_at) => now - created_at > refresh_interval,
        None => true,
    }
}

#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    min_pool_size: u64,
    refresh_interval: Duration,
    batch_size: usize,
    topic_query: String,
}

impl RefreshPolicy {
    pub fn new(pool: &PoolConfig, topic_query: impl Into<String>) -> Self {
        Self {
            min_pool_size: pool.min_pool_size,
            refresh_interval: pool.refresh_interval(),
            batch_size: pool.batch_size,
            topic_query: topic_query.into(),
        }
    }

    pub fn topic_query(&self) -> &str {
        &self.topic_query
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Whether the pool currently needs a refresh
    pub async fn needs_refresh(&self, store: &dyn PaperStore) -> Result<bool> {
        let pool_size = store.count().await?;
        let newest = store
            .find_first(SortField::CreatedAt, SortDirection::Desc)
            .await?;

        Ok(is_stale(
            pool_size,
            newest.map(|p| p.created_at.with_timezone(&Utc)),
            Utc::now(),
            self.min_pool_size,
            self.refresh_interval,
        ))
    }

    /// Refresh if stale. Returns whether a refresh ran.
    pub async fn maybe_refresh(
        &self,
        store: &dyn PaperStore,
        source: &dyn PaperSource,
    ) -> Result<bool> {
        if !self.needs_refresh(store).await? {
            debug!("Pool is fresh, skipping refresh");
            return Ok(false);
        }

        self.refresh(store, source).await?;
        Ok(true)
    }

    /// Pull a batch from the source, evict, then upsert.
    ///
    /// A failed fetch aborts before any store write.
    pub async fn refresh(
        &self,
        store: &dyn PaperStore,
        source: &dyn PaperSource,
    ) -> Result<RefreshReport> {
        let start = Instant::now();
        info!(
            source = source.name(),
            topic = %self.topic_query,
            batch_size = self.batch_size,
            "Refreshing paper pool"
        );

        let fetched = match source.fetch_batch(&self.topic_query, self.batch_size).await {
            Ok(fetched) => {
                metrics::record_source_fetch(start.elapsed().as_secs_f64(), source.name(), true);
                fetched
            }
            Err(e) => {
                metrics::record_source_fetch(start.elapsed().as_secs_f64(), source.name(), false);
                return Err(e);
            }
        };

        let mut report = RefreshReport {
            fetched: fetched.len(),
            ..RefreshReport::default()
        };

        let pool_size = store.count().await?;
        if pool_size >= self.min_pool_size && !fetched.is_empty() {
            let victims = self.eviction_victims(store, pool_size, &fetched).await?;
            report.evicted = self.evict(store, &victims).await;
        }

        for candidate in fetched {
            let external_id = candidate.external_id.clone();
            let paper = match candidate.into_new_paper() {
                Ok(paper) => paper,
                Err(CandidateRejection::MissingExternalId) => {
                    debug!("Skipping candidate without an external id");
                    report.skipped += 1;
                    continue;
                }
                Err(CandidateRejection::InvalidPublishedAt(raw)) => {
                    warn!(
                        external_id = ?external_id,
                        published = %raw,
                        "Candidate has an unparseable publication date"
                    );
                    report.failed += 1;
                    continue;
                }
            };

            let key = paper.external_id.clone();
            match store.insert_or_ignore(paper).await {
                Ok(true) => report.inserted += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!(external_id = %key, error = %e, "Failed to upsert candidate");
                    report.failed += 1;
                }
            }
        }

        metrics::record_refresh(&report, start.elapsed().as_secs_f64());
        info!(
            fetched = report.fetched,
            evicted = report.evicted,
            inserted = report.inserted,
            skipped = report.skipped,
            failed = report.failed,
            "Pool refresh complete"
        );

        Ok(report)
    }

    /// Oldest papers to make room for the batch.
    ///
    /// Papers the batch returns again are never evicted, and only keys not
    /// yet stored count towards the room needed.
    async fn eviction_victims(
        &self,
        store: &dyn PaperStore,
        pool_size: u64,
        fetched: &[CandidatePaper],
    ) -> Result<Vec<Paper>> {
        let fetched_keys: HashSet<&str> = fetched
            .iter()
            .filter_map(|c| c.external_id.as_deref())
            .filter(|key| !key.trim().is_empty())
            .collect();

        let stored = store.find_all(PaperQuery::oldest(pool_size)).await?;
        let refetched = stored
            .iter()
            .filter(|p| fetched_keys.contains(p.external_id.as_str()))
            .count();
        let incoming = fetched_keys.len().saturating_sub(refetched);

        debug!(incoming, refetched, "Sizing eviction for refresh batch");
        Ok(stored
            .into_iter()
            .filter(|p| !fetched_keys.contains(p.external_id.as_str()))
            .take(incoming)
            .collect())
    }

    async fn evict(&self, store: &dyn PaperStore, papers: &[Paper]) -> usize {
        let mut evicted = 0;
        for paper in papers {
            match store.delete(paper.id).await {
                Ok(true) => evicted += 1,
                Ok(false) => debug!(paper_id = %paper.id, "Paper already gone"),
                Err(e) => warn!(paper_id = %paper.id, error = %e, "Failed to evict paper"),
            }
        }
        evicted
    }
}
