//! In-memory paper store
//!
//! Same semantics as the SeaORM repository, held in a single map behind an
//! async lock. Used by tests and by `store.backend = "memory"`.

use crate::arena::rating::SEED_RATING;
use crate::db::models::Paper;
use crate::db::store::{
    NewPaper, PaperChanges, PaperFilter, PaperQuery, PaperStore, RatingChange, SortDirection,
    SortField,
};
use crate::errors::Result;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryPaperStore {
    papers: RwLock<HashMap<Uuid, Paper>>,
}

impl InMemoryPaperStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with fully-formed rows (timestamps included)
    pub fn with_papers(papers: impl IntoIterator<Item = Paper>) -> Self {
        Self {
            papers: RwLock::new(papers.into_iter().map(|p| (p.id, p)).collect()),
        }
    }
}

fn compare(a: &Paper, b: &Paper, field: SortField, direction: SortDirection) -> Ordering {
    let ord = match field {
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::PublishedAt => a.published_at.cmp(&b.published_at),
        SortField::Rating => a.rating.total_cmp(&b.rating),
    };
    let ord = match direction {
        SortDirection::Asc => ord,
        SortDirection::Desc => ord.reverse(),
    };
    // Same tie-break as the SQL repository
    ord.then_with(|| a.id.cmp(&b.id))
}

fn apply(paper: &mut Paper, changes: PaperChanges) {
    if let Some(rating) = changes.rating {
        paper.rating = rating;
    }
    if let Some(shown) = changes.shown {
        paper.shown = shown;
    }
    paper.updated_at = chrono::Utc::now().into();
}

#[async_trait]
impl PaperStore for InMemoryPaperStore {
    async fn find_all(&self, query: PaperQuery) -> Result<Vec<Paper>> {
        let papers = self.papers.read().await;
        let mut matching: Vec<Paper> = papers
            .values()
            .filter(|p| query.filter.matches(p))
            .cloned()
            .collect();

        if let Some((field, direction)) = query.order {
            matching.sort_by(|a, b| compare(a, b, field, direction));
        }
        if let Some(limit) = query.limit {
            matching.truncate(limit as usize);
        }

        Ok(matching)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Paper>> {
        Ok(self.papers.read().await.get(&id).cloned())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.papers.read().await.len() as u64)
    }

    async fn find_first(
        &self,
        field: SortField,
        direction: SortDirection,
    ) -> Result<Option<Paper>> {
        let papers = self.papers.read().await;
        Ok(papers
            .values()
            .min_by(|a, b| compare(a, b, field, direction))
            .cloned())
    }

    async fn insert_or_ignore(&self, paper: NewPaper) -> Result<bool> {
        let mut papers = self.papers.write().await;
        if papers.values().any(|p| p.external_id == paper.external_id) {
            return Ok(false);
        }

        let now = chrono::Utc::now();
        let row = Paper {
            id: Uuid::new_v4(),
            external_id: paper.external_id,
            title: paper.title,
            authors: paper.authors,
            abstract_text: paper.abstract_text,
            published_at: paper.published_at.into(),
            rating: SEED_RATING,
            shown: false,
            created_at: now.into(),
            updated_at: now.into(),
        };
        papers.insert(row.id, row);
        Ok(true)
    }

    async fn update(&self, id: Uuid, changes: PaperChanges) -> Result<Option<Paper>> {
        let mut papers = self.papers.write().await;
        Ok(papers.get_mut(&id).map(|paper| {
            apply(paper, changes);
            paper.clone()
        }))
    }

    async fn update_all(&self, filter: PaperFilter, changes: PaperChanges) -> Result<u64> {
        let mut papers = self.papers.write().await;
        let mut affected = 0;
        for paper in papers.values_mut().filter(|p| filter.matches(p)) {
            apply(paper, changes);
            affected += 1;
        }
        Ok(affected)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.papers.write().await.remove(&id).is_some())
    }

    async fn claim_unshown(&self, ids: &[Uuid]) -> Result<bool> {
        let mut papers = self.papers.write().await;
        let claimable = ids
            .iter()
            .enumerate()
            .all(|(i, id)| !ids[..i].contains(id) && papers.get(id).is_some_and(|p| !p.shown));
        if !claimable {
            return Ok(false);
        }

        for id in ids {
            if let Some(paper) = papers.get_mut(id) {
                apply(paper, PaperChanges::shown(true));
            }
        }
        Ok(true)
    }

    async fn apply_ratings(&self, changes: &[RatingChange]) -> Result<bool> {
        let mut papers = self.papers.write().await;
        let current = changes
            .iter()
            .all(|c| papers.get(&c.id).is_some_and(|p| p.rating == c.previous));
        if !current {
            return Ok(false);
        }

        for change in changes {
            if let Some(paper) = papers.get_mut(&change.id) {
                apply(paper, PaperChanges::rating(change.next));
            }
        }
        Ok(true)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
