//! SeaORM entity models
//!
//! Database entities for PaperDuel

mod paper;

pub use paper::{
    Entity as PaperEntity,
    Model as Paper,
    ActiveModel as PaperActiveModel,
    Column as PaperColumn,
};
