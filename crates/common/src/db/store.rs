//! Paper store abstraction
//!
//! The engine talks to persistence only through [`PaperStore`]. Two
//! implementations exist: the SeaORM-backed [`Repository`](super::Repository)
//! and [`InMemoryPaperStore`](super::InMemoryPaperStore).

use crate::db::models::Paper;
use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Columns a paper listing can be ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    PublishedAt,
    Rating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Row filter shared by reads and bulk updates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaperFilter {
    pub shown: Option<bool>,
}

impl PaperFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn shown(shown: bool) -> Self {
        Self { shown: Some(shown) }
    }

    pub fn matches(&self, paper: &Paper) -> bool {
        self.shown.map_or(true, |shown| paper.shown == shown)
    }
}

/// Listing query: filter, optional ordering, optional limit
#[derive(Debug, Clone, Copy, Default)]
pub struct PaperQuery {
    pub filter: PaperFilter,
    pub order: Option<(SortField, SortDirection)>,
    pub limit: Option<u64>,
}

impl PaperQuery {
    pub fn unshown() -> Self {
        Self {
            filter: PaperFilter::shown(false),
            ..Self::default()
        }
    }

    /// Highest rated first
    pub fn top(limit: u64) -> Self {
        Self {
            order: Some((SortField::Rating, SortDirection::Desc)),
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Oldest by creation time first
    pub fn oldest(limit: u64) -> Self {
        Self {
            order: Some((SortField::CreatedAt, SortDirection::Asc)),
            limit: Some(limit),
            ..Self::default()
        }
    }
}

/// A paper ready to be inserted. Rating, shown flag and timestamps are
/// assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPaper {
    pub external_id: String,
    pub title: String,
    pub authors: String,
    pub abstract_text: String,
    pub published_at: DateTime<Utc>,
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PaperChanges {
    pub rating: Option<f64>,
    pub shown: Option<bool>,
}

impl PaperChanges {
    pub fn shown(shown: bool) -> Self {
        Self {
            shown: Some(shown),
            ..Self::default()
        }
    }

    pub fn rating(rating: f64) -> Self {
        Self {
            rating: Some(rating),
            ..Self::default()
        }
    }
}

/// Compare-and-set of one paper's rating
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingChange {
    pub id: Uuid,
    /// Rating the caller read; the write only lands if it is still current
    pub previous: f64,
    pub next: f64,
}

/// Persistent keyed storage for papers
#[async_trait]
pub trait PaperStore: Send + Sync {
    /// List papers matching a query
    async fn find_all(&self, query: PaperQuery) -> Result<Vec<Paper>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Paper>>;

    /// Like [`find_all`](Self::find_all), but reads from the primary. Use
    /// before a compare-and-set so the expected values are current.
    async fn find_all_for_write(&self, query: PaperQuery) -> Result<Vec<Paper>> {
        self.find_all(query).await
    }

    /// Like [`find_by_id`](Self::find_by_id), but reads from the primary
    async fn find_by_id_for_write(&self, id: Uuid) -> Result<Option<Paper>> {
        self.find_by_id(id).await
    }

    async fn count(&self) -> Result<u64>;

    /// First paper in the given ordering, if any
    async fn find_first(&self, field: SortField, direction: SortDirection)
        -> Result<Option<Paper>>;

    /// Insert keyed by external id. Returns `false` without touching the
    /// existing row when the key is already present.
    async fn insert_or_ignore(&self, paper: NewPaper) -> Result<bool>;

    /// Partial update of one paper; `None` if it does not exist
    async fn update(&self, id: Uuid, changes: PaperChanges) -> Result<Option<Paper>>;

    /// Bulk update; returns affected row count
    async fn update_all(&self, filter: PaperFilter, changes: PaperChanges) -> Result<u64>;

    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Atomically flip `shown` from false to true on every id, or on none.
    /// Returns `false` if any id was missing or already shown.
    async fn claim_unshown(&self, ids: &[Uuid]) -> Result<bool>;

    /// Atomically apply every rating change, or none. Returns `false` if any
    /// paper is missing or its rating no longer equals `previous`.
    async fn apply_ratings(&self, changes: &[RatingChange]) -> Result<bool>;

    /// Connectivity check for readiness probes
    async fn ping(&self) -> Result<()>;
}
