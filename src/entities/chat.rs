use sea_orm::entity::prelude::*;

use super::target;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "chats")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Opaque identifier assigned by the chat platform.
    pub chat_id: String,
    pub current_target_id: Option<i64>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {
    CurrentTarget,
}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Self::CurrentTarget => Entity::belongs_to(target::Entity)
                .from(Column::CurrentTargetId)
                .to(target::Column::Id)
                .into(),
        }
    }
}

impl Related<target::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CurrentTarget.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
