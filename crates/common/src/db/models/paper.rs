//! Paper entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "papers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Stable key from the source feed (e.g. arXiv id)
    #[sea_orm(column_type = "Text", unique)]
    pub external_id: String,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    /// Display string, authors joined with ", "
    #[sea_orm(column_type = "Text")]
    pub authors: String,

    #[sea_orm(column_type = "Text")]
    pub abstract_text: String,

    pub published_at: DateTimeWithTimeZone,

    #[sea_orm(column_type = "Double")]
    pub rating: f64,

    pub shown: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
