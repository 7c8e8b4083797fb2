use sea_orm::entity::prelude::*;

use super::target;

/// One user's distance entry for one calendar date. Logical key is
/// (user_id, target_id, date); resubmission updates the row in place.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "steps")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: String,
    pub target_id: i64,
    pub date: Date,
    pub steps: i64,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {
    Target,
}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Self::Target => Entity::belongs_to(target::Entity)
                .from(Column::TargetId)
                .to(target::Column::Id)
                .into(),
        }
    }
}

impl Related<target::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Target.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
