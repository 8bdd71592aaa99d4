//! Comparison arena
//!
//! Ties the pool together behind one service:
//! - Rating updates for pairwise votes
//! - Rotation of which papers are shown next
//! - On-demand pool refresh from the paper source

pub mod rating;
pub mod refresh;
pub mod rotation;

pub use rating::{compute_updated_ratings, MatchOutcome, K_FACTOR, SEED_RATING};
pub use refresh::{RefreshPolicy, RefreshReport};
pub use rotation::RotationPolicy;

use crate::config::{PoolConfig, SourceConfig};
use crate::db::models::Paper;
use crate::db::{PaperQuery, PaperStore, RatingChange};
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::source::{CandidatePaper, PaperSource};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Compare-and-set attempts for a single vote
pub const MAX_VOTE_ATTEMPTS: u32 = 3;

/// Ratings after a vote was applied
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResult {
    pub winner_rating: f64,
    pub loser_rating: f64,
}

/// Pool service shared by every request handler
pub struct Arena {
    store: Arc<dyn PaperStore>,
    source: Arc<dyn PaperSource>,
    rotation: RotationPolicy,
    refresh: RefreshPolicy,
    max_refresh_attempts: u32,
}

impl Arena {
    pub fn new(
        store: Arc<dyn PaperStore>,
        source: Arc<dyn PaperSource>,
        pool: &PoolConfig,
        source_config: &SourceConfig,
    ) -> Self {
        Self {
            store,
            source,
            rotation: RotationPolicy::new(),
            refresh: RefreshPolicy::new(pool, source_config.topic_query.clone()),
            max_refresh_attempts: pool.max_refresh_attempts.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn PaperStore> {
        &self.store
    }

    /// Refresh the pool if stale, then deal the next pair.
    ///
    /// A failed refresh is tolerated as long as the existing pool can
    /// still supply a pair.
    pub async fn next_pair(&self) -> Result<(Paper, Paper)> {
        let mut last_refresh_error = None;

        for attempt in 1..=self.max_refresh_attempts {
            if let Err(e) = self
                .refresh
                .maybe_refresh(self.store.as_ref(), self.source.as_ref())
                .await
            {
                warn!(attempt, error = %e, "Pool refresh failed, falling back to existing pool");
                last_refresh_error = Some(e);
            }

            match self.rotation.select_next_pair(self.store.as_ref()).await {
                Ok(pair) => return Ok(pair),
                Err(AppError::InsufficientPapers { available }) => {
                    warn!(attempt, available, "Pool cannot supply a pair yet");
                    if attempt == self.max_refresh_attempts {
                        return Err(last_refresh_error
                            .unwrap_or(AppError::InsufficientPapers { available }));
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_refresh_error.unwrap_or(AppError::InsufficientPapers { available: 0 }))
    }

    /// Apply one comparison outcome to both papers atomically
    pub async fn record_vote(&self, outcome: MatchOutcome) -> Result<VoteResult> {
        if outcome.winner_id == outcome.loser_id {
            return Err(AppError::Validation {
                message: "winnerId and loserId must differ".to_string(),
                field: Some("loserId".to_string()),
            });
        }

        for attempt in 1..=MAX_VOTE_ATTEMPTS {
            let (winner, loser) = futures::try_join!(
                self.load_for_write(outcome.winner_id),
                self.load_for_write(outcome.loser_id)
            )?;

            let (winner_rating, loser_rating) =
                compute_updated_ratings(winner.rating, loser.rating);
            let changes = [
                RatingChange {
                    id: winner.id,
                    previous: winner.rating,
                    next: winner_rating,
                },
                RatingChange {
                    id: loser.id,
                    previous: loser.rating,
                    next: loser_rating,
                },
            ];

            if self.store.apply_ratings(&changes).await? {
                metrics::record_vote(winner_rating - winner.rating);
                info!(
                    winner = %winner.id,
                    loser = %loser.id,
                    winner_rating,
                    loser_rating,
                    "Vote recorded"
                );
                return Ok(VoteResult {
                    winner_rating,
                    loser_rating,
                });
            }

            warn!(attempt, "Ratings changed concurrently, retrying vote");
        }

        Err(AppError::Conflict {
            message: format!(
                "Ratings kept changing; vote not applied after {} attempts",
                MAX_VOTE_ATTEMPTS
            ),
        })
    }

    /// Highest rated papers, best first
    pub async fn top_papers(&self, limit: u64) -> Result<Vec<Paper>> {
        self.store.find_all(PaperQuery::top(limit)).await
    }

    pub async fn get_paper(&self, id: Uuid) -> Result<Paper> {
        self.load(id).await
    }

    /// Current source batch for the configured topic, not persisted
    pub async fn preview_feed(&self) -> Result<Vec<CandidatePaper>> {
        self.source
            .fetch_batch(self.refresh.topic_query(), self.refresh.batch_size())
            .await
    }

    /// Refresh regardless of staleness
    pub async fn force_refresh(&self) -> Result<RefreshReport> {
        self.refresh
            .refresh(self.store.as_ref(), self.source.as_ref())
            .await
    }

    async fn load(&self, id: Uuid) -> Result<Paper> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::PaperNotFound { id: id.to_string() })
    }

    /// Current ratings from the primary, ahead of a compare-and-set
    async fn load_for_write(&self, id: Uuid) -> Result<Paper> {
        self.store
            .find_by_id_for_write(id)
            .await?
            .ok_or_else(|| AppError::PaperNotFound { id: id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        InMemoryPaperStore, NewPaper, PaperChanges, PaperFilter, SortDirection, SortField,
    };
    use crate::db::fixtures::paper_created;
    use crate::source::tests::FailingSource;
    use crate::source::StaticSource;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::collections::HashSet;

    fn arena_with(store: Arc<dyn PaperStore>, source: Arc<dyn PaperSource>) -> Arena {
        let pool = PoolConfig {
            min_pool_size: 10,
            batch_size: 10,
            ..PoolConfig::default()
        };
        Arena::new(store, source, &pool, &SourceConfig::default())
    }

    fn memory_arena(source_size: usize) -> Arena {
        arena_with(
            Arc::new(InMemoryPaperStore::new()),
            Arc::new(StaticSource::generated(source_size)),
        )
    }

    /// Delegates to an in-memory store but always loses the rating race
    struct ContendedStore(InMemoryPaperStore);

    #[async_trait]
    impl PaperStore for ContendedStore {
        async fn find_all(&self, query: PaperQuery) -> Result<Vec<Paper>> {
            self.0.find_all(query).await
        }
        async fn find_by_id(&self, id: Uuid) -> Result<Option<Paper>> {
            self.0.find_by_id(id).await
        }
        async fn count(&self) -> Result<u64> {
            self.0.count().await
        }
        async fn find_first(
            &self,
            field: SortField,
            direction: SortDirection,
        ) -> Result<Option<Paper>> {
            self.0.find_first(field, direction).await
        }
        async fn insert_or_ignore(&self, paper: NewPaper) -> Result<bool> {
            self.0.insert_or_ignore(paper).await
        }
        async fn update(&self, id: Uuid, changes: PaperChanges) -> Result<Option<Paper>> {
            self.0.update(id, changes).await
        }
        async fn update_all(&self, filter: PaperFilter, changes: PaperChanges) -> Result<u64> {
            self.0.update_all(filter, changes).await
        }
        async fn delete(&self, id: Uuid) -> Result<bool> {
            self.0.delete(id).await
        }
        async fn claim_unshown(&self, ids: &[Uuid]) -> Result<bool> {
            self.0.claim_unshown(ids).await
        }
        async fn apply_ratings(&self, _changes: &[RatingChange]) -> Result<bool> {
            Ok(false)
        }
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Plain reads come from a replica frozen at construction; writes and
    /// primary reads see every change
    struct LaggingStore {
        primary: InMemoryPaperStore,
        replica: InMemoryPaperStore,
    }

    impl LaggingStore {
        fn with_papers(papers: Vec<Paper>) -> Self {
            Self {
                primary: InMemoryPaperStore::with_papers(papers.clone()),
                replica: InMemoryPaperStore::with_papers(papers),
            }
        }
    }

    #[async_trait]
    impl PaperStore for LaggingStore {
        async fn find_all(&self, query: PaperQuery) -> Result<Vec<Paper>> {
            self.replica.find_all(query).await
        }
        async fn find_by_id(&self, id: Uuid) -> Result<Option<Paper>> {
            self.replica.find_by_id(id).await
        }
        async fn find_all_for_write(&self, query: PaperQuery) -> Result<Vec<Paper>> {
            self.primary.find_all(query).await
        }
        async fn find_by_id_for_write(&self, id: Uuid) -> Result<Option<Paper>> {
            self.primary.find_by_id(id).await
        }
        async fn count(&self) -> Result<u64> {
            self.replica.count().await
        }
        async fn find_first(
            &self,
            field: SortField,
            direction: SortDirection,
        ) -> Result<Option<Paper>> {
            self.replica.find_first(field, direction).await
        }
        async fn insert_or_ignore(&self, paper: NewPaper) -> Result<bool> {
            self.primary.insert_or_ignore(paper).await
        }
        async fn update(&self, id: Uuid, changes: PaperChanges) -> Result<Option<Paper>> {
            self.primary.update(id, changes).await
        }
        async fn update_all(&self, filter: PaperFilter, changes: PaperChanges) -> Result<u64> {
            self.primary.update_all(filter, changes).await
        }
        async fn delete(&self, id: Uuid) -> Result<bool> {
            self.primary.delete(id).await
        }
        async fn claim_unshown(&self, ids: &[Uuid]) -> Result<bool> {
            self.primary.claim_unshown(ids).await
        }
        async fn apply_ratings(&self, changes: &[RatingChange]) -> Result<bool> {
            self.primary.apply_ratings(changes).await
        }
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    fn lagging_arena(papers: usize) -> Arena {
        // Fresh and large enough that no refresh is attempted
        let now = Utc::now();
        let pool = PoolConfig {
            min_pool_size: 2,
            ..PoolConfig::default()
        };
        let papers = (0..papers)
            .map(|i| paper_created(&format!("lag-{i}"), now))
            .collect();
        Arena::new(
            Arc::new(LaggingStore::with_papers(papers)),
            Arc::new(FailingSource),
            &pool,
            &SourceConfig::default(),
        )
    }

    fn stored_papers(count: usize) -> Arc<dyn PaperStore> {
        let created = Utc::now() - Duration::days(3);
        Arc::new(InMemoryPaperStore::with_papers(
            (0..count).map(|i| paper_created(&format!("kept-{i}"), created)),
        ))
    }

    #[tokio::test]
    async fn test_end_to_end_from_empty_pool() {
        let arena = memory_arena(10);

        let (a, b) = arena.next_pair().await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.shown && b.shown);
        assert_eq!(arena.store().count().await.unwrap(), 10);

        let before = a.rating + b.rating;
        let result = arena
            .record_vote(MatchOutcome {
                winner_id: a.id,
                loser_id: b.id,
            })
            .await
            .unwrap();
        assert!(result.winner_rating > a.rating);
        assert!(result.loser_rating < b.rating);
        assert!((result.winner_rating + result.loser_rating - before).abs() < 1e-9);

        let top = arena.top_papers(10).await.unwrap();
        assert_eq!(top.len(), 10);
        assert_eq!(top[0].id, a.id);
        assert_eq!(top[9].id, b.id);
        assert!(top.windows(2).all(|w| w[0].rating >= w[1].rating));
    }

    #[tokio::test]
    async fn test_empty_source_is_insufficient() {
        let arena = memory_arena(0);
        let err = arena.next_pair().await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientPapers { .. }));
        assert_eq!(err.to_string(), "Not enough papers available");
    }

    #[tokio::test]
    async fn test_single_paper_source_is_insufficient() {
        let arena = memory_arena(1);
        let err = arena.next_pair().await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientPapers { available: 1 }));
    }

    #[tokio::test]
    async fn test_vote_with_unknown_paper_is_not_found() {
        let arena = memory_arena(4);
        let (a, _) = arena.next_pair().await.unwrap();

        let err = arena
            .record_vote(MatchOutcome {
                winner_id: a.id,
                loser_id: Uuid::new_v4(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PaperNotFound { .. }));

        // The known paper must be untouched
        assert_eq!(arena.get_paper(a.id).await.unwrap().rating, SEED_RATING);
    }

    #[tokio::test]
    async fn test_vote_against_self_is_rejected() {
        let arena = memory_arena(4);
        let id = Uuid::new_v4();
        let err = arena
            .record_vote(MatchOutcome {
                winner_id: id,
                loser_id: id,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_contended_vote_is_conflict() {
        let arena = arena_with(
            Arc::new(ContendedStore(InMemoryPaperStore::new())),
            Arc::new(StaticSource::generated(4)),
        );
        let (a, b) = arena.next_pair().await.unwrap();

        let err = arena
            .record_vote(MatchOutcome {
                winner_id: a.id,
                loser_id: b.id,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_repeated_votes_read_current_ratings() {
        let arena = lagging_arena(2);
        let (a, b) = arena.next_pair().await.unwrap();
        let outcome = MatchOutcome {
            winner_id: a.id,
            loser_id: b.id,
        };

        let first = arena.record_vote(outcome).await.unwrap();
        let second = arena.record_vote(outcome).await.unwrap();

        let (winner, loser) = compute_updated_ratings(first.winner_rating, first.loser_rating);
        assert_eq!(second.winner_rating, winner);
        assert_eq!(second.loser_rating, loser);
        assert!(second.winner_rating > first.winner_rating);
    }

    #[tokio::test]
    async fn test_consecutive_deals_skip_papers_already_shown() {
        let arena = lagging_arena(4);

        let (a, b) = arena.next_pair().await.unwrap();
        let (c, d) = arena.next_pair().await.unwrap();

        let ids: HashSet<Uuid> = [a.id, b.id, c.id, d.id].into_iter().collect();
        assert_eq!(ids.len(), 4);
    }

    #[tokio::test]
    async fn test_failed_refresh_falls_back_to_existing_pool() {
        // Three papers is below the minimum, so every deal tries a refresh first
        let arena = arena_with(stored_papers(3), Arc::new(FailingSource));

        let (a, b) = arena.next_pair().await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(arena.store().count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_failed_refresh_on_empty_pool_surfaces_fetch_error() {
        let arena = arena_with(stored_papers(0), Arc::new(FailingSource));

        let err = arena.next_pair().await.unwrap_err();
        assert!(matches!(err, AppError::SourceFetch { .. }));
    }

    #[tokio::test]
    async fn test_preview_does_not_persist() {
        let arena = memory_arena(5);
        let feed = arena.preview_feed().await.unwrap();
        assert_eq!(feed.len(), 5);
        assert_eq!(arena.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_force_refresh_is_idempotent() {
        let arena = memory_arena(5);

        let first = arena.force_refresh().await.unwrap();
        assert_eq!(first.inserted, 5);

        let second = arena.force_refresh().await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped, 5);
        assert_eq!(arena.store().count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_get_missing_paper() {
        let arena = memory_arena(0);
        let err = arena.get_paper(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::PaperNotFound { .. }));
    }
}
