use std::fs;
use std::path::Path;

use sea_orm::sea_query::Index;
use sea_orm::{ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, Schema, Statement};

use crate::entities::{chat, step, target};
use crate::error::BotError;

pub fn ensure_parent_dir(path: &Path) -> Result<(), BotError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub async fn connect(path: &Path) -> Result<DatabaseConnection, BotError> {
    let url = format!("sqlite://{}?mode=rwc", path.display());
    Ok(Database::connect(&url).await?)
}

pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), BotError> {
    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        "PRAGMA foreign_keys = ON;",
    ))
    .await?;

    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut chat_stmt = schema.create_table_from_entity(chat::Entity);
    chat_stmt.if_not_exists();
    db.execute(builder.build(&chat_stmt)).await?;

    let mut target_stmt = schema.create_table_from_entity(target::Entity);
    target_stmt.if_not_exists();
    db.execute(builder.build(&target_stmt)).await?;

    let mut step_stmt = schema.create_table_from_entity(step::Entity);
    step_stmt.if_not_exists();
    db.execute(builder.build(&step_stmt)).await?;

    let mut chat_index = Index::create()
        .name("idx_chats_chat_id")
        .table(chat::Entity)
        .col(chat::Column::ChatId)
        .unique()
        .to_owned();
    chat_index.if_not_exists();
    db.execute(builder.build(&chat_index)).await?;

    let mut target_index = Index::create()
        .name("idx_targets_chat")
        .table(target::Entity)
        .col(target::Column::ChatId)
        .to_owned();
    target_index.if_not_exists();
    db.execute(builder.build(&target_index)).await?;

    // Backstop for the logical upsert key.
    let mut step_index = Index::create()
        .name("idx_steps_target_user_date")
        .table(step::Entity)
        .col(step::Column::TargetId)
        .col(step::Column::UserId)
        .col(step::Column::Date)
        .unique()
        .to_owned();
    step_index.if_not_exists();
    db.execute(builder.build(&step_index)).await?;

    let mut step_date_index = Index::create()
        .name("idx_steps_target_date")
        .table(step::Entity)
        .col(step::Column::TargetId)
        .col(step::Column::Date)
        .to_owned();
    step_date_index.if_not_exists();
    db.execute(builder.build(&step_date_index)).await?;

    Ok(())
}
