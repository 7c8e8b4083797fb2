use sea_orm::entity::prelude::*;

use super::{chat, step};

/// Distance values are stored in meters.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "targets")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub chat_id: i64,
    pub name: String,
    pub initial_value: i64,
    pub target_value: i64,
    pub current_value: i64,
    pub target_date: Date,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {
    Chat,
    Step,
}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Self::Chat => Entity::belongs_to(chat::Entity)
                .from(Column::ChatId)
                .to(chat::Column::Id)
                .into(),
            Self::Step => Entity::has_many(step::Entity).into(),
        }
    }
}

impl Related<chat::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Chat.def()
    }
}

impl Related<step::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Step.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
