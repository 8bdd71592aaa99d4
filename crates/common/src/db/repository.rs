//! Repository pattern for database operations
//!
//! SeaORM implementation of [`PaperStore`] with read/write connection split
//! and transactional compare-and-set for the engine's atomic operations.

use crate::arena::rating::SEED_RATING;
use crate::db::models::*;
use crate::db::store::{
    NewPaper, PaperChanges, PaperFilter, PaperQuery, PaperStore, RatingChange, SortDirection,
    SortField,
};
use crate::db::DbPool;
use crate::errors::Result;
use async_trait::async_trait;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, Order,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::debug;
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }
}

fn column(field: SortField) -> PaperColumn {
    match field {
        SortField::CreatedAt => PaperColumn::CreatedAt,
        SortField::PublishedAt => PaperColumn::PublishedAt,
        SortField::Rating => PaperColumn::Rating,
    }
}

fn order(direction: SortDirection) -> Order {
    match direction {
        SortDirection::Asc => Order::Asc,
        SortDirection::Desc => Order::Desc,
    }
}

fn filtered(filter: PaperFilter) -> sea_orm::Select<PaperEntity> {
    let mut select = PaperEntity::find();
    if let Some(shown) = filter.shown {
        select = select.filter(PaperColumn::Shown.eq(shown));
    }
    select
}

fn queried(query: PaperQuery) -> sea_orm::Select<PaperEntity> {
    let mut select = filtered(query.filter);

    if let Some((field, direction)) = query.order {
        select = select
            .order_by(column(field), order(direction))
            .order_by_asc(PaperColumn::Id);
    }

    if let Some(limit) = query.limit {
        select = select.limit(limit);
    }

    select
}

#[async_trait]
impl PaperStore for Repository {
    async fn find_all(&self, query: PaperQuery) -> Result<Vec<Paper>> {
        queried(query).all(self.read_conn()).await.map_err(Into::into)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Paper>> {
        PaperEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_all_for_write(&self, query: PaperQuery) -> Result<Vec<Paper>> {
        queried(query).all(self.write_conn()).await.map_err(Into::into)
    }

    async fn find_by_id_for_write(&self, id: Uuid) -> Result<Option<Paper>> {
        PaperEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn count(&self) -> Result<u64> {
        PaperEntity::find()
            .count(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_first(
        &self,
        field: SortField,
        direction: SortDirection,
    ) -> Result<Option<Paper>> {
        PaperEntity::find()
            .order_by(column(field), order(direction))
            .order_by_asc(PaperColumn::Id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn insert_or_ignore(&self, paper: NewPaper) -> Result<bool> {
        let now = chrono::Utc::now();

        let model = PaperActiveModel {
            id: Set(Uuid::new_v4()),
            external_id: Set(paper.external_id),
            title: Set(paper.title),
            authors: Set(paper.authors),
            abstract_text: Set(paper.abstract_text),
            published_at: Set(paper.published_at.into()),
            rating: Set(SEED_RATING),
            shown: Set(false),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        let result = PaperEntity::insert(model)
            .on_conflict(
                OnConflict::column(PaperColumn::ExternalId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(self.write_conn())
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(DbErr::RecordNotInserted) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, id: Uuid, changes: PaperChanges) -> Result<Option<Paper>> {
        let Some(paper) = PaperEntity::find_by_id(id).one(self.write_conn()).await? else {
            return Ok(None);
        };

        let mut active: PaperActiveModel = paper.into();
        if let Some(rating) = changes.rating {
            active.rating = Set(rating);
        }
        if let Some(shown) = changes.shown {
            active.shown = Set(shown);
        }
        active.updated_at = Set(chrono::Utc::now().into());

        Ok(Some(active.update(self.write_conn()).await?))
    }

    async fn update_all(&self, filter: PaperFilter, changes: PaperChanges) -> Result<u64> {
        let now: DateTimeWithTimeZone = chrono::Utc::now().into();

        let mut update = PaperEntity::update_many()
            .col_expr(PaperColumn::UpdatedAt, Expr::value(now));
        if let Some(rating) = changes.rating {
            update = update.col_expr(PaperColumn::Rating, Expr::value(rating));
        }
        if let Some(shown) = changes.shown {
            update = update.col_expr(PaperColumn::Shown, Expr::value(shown));
        }
        if let Some(shown) = filter.shown {
            update = update.filter(PaperColumn::Shown.eq(shown));
        }

        let result = update.exec(self.write_conn()).await?;
        Ok(result.rows_affected)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = PaperEntity::delete_by_id(id)
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn claim_unshown(&self, ids: &[Uuid]) -> Result<bool> {
        let now: DateTimeWithTimeZone = chrono::Utc::now().into();
        let txn = self.write_conn().begin().await?;

        let result = PaperEntity::update_many()
            .col_expr(PaperColumn::Shown, Expr::value(true))
            .col_expr(PaperColumn::UpdatedAt, Expr::value(now))
            .filter(PaperColumn::Id.is_in(ids.iter().copied()))
            .filter(PaperColumn::Shown.eq(false))
            .exec(&txn)
            .await?;

        if result.rows_affected != ids.len() as u64 {
            debug!(
                requested = ids.len(),
                claimed = result.rows_affected,
                "Claim lost to a concurrent selection"
            );
            txn.rollback().await?;
            return Ok(false);
        }

        txn.commit().await?;
        Ok(true)
    }

    async fn apply_ratings(&self, changes: &[RatingChange]) -> Result<bool> {
        let now: DateTimeWithTimeZone = chrono::Utc::now().into();
        let txn = self.write_conn().begin().await?;

        for change in changes {
            let result = PaperEntity::update_many()
                .col_expr(PaperColumn::Rating, Expr::value(change.next))
                .col_expr(PaperColumn::UpdatedAt, Expr::value(now))
                .filter(PaperColumn::Id.eq(change.id))
                .filter(PaperColumn::Rating.eq(change.previous))
                .exec(&txn)
                .await?;

            if result.rows_affected != 1 {
                debug!(paper_id = %change.id, "Rating changed since it was read");
                txn.rollback().await?;
                return Ok(false);
            }
        }

        txn.commit().await?;
        Ok(true)
    }

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}
