use chrono::{FixedOffset, NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};

use crate::entities::{chat, step, target};
use crate::error::BotError;
use crate::model::{NewTarget, TargetChanges};

/// Service layer over the persistent model. Every mutating operation is
/// its own transaction; recalculation runs on the caller's connection so
/// it sees rows written earlier in the same transaction.
#[derive(Clone)]
pub struct App {
    db: DatabaseConnection,
    tz: FixedOffset,
}

#[derive(Debug)]
pub struct StepUpsert {
    pub step: step::Model,
    /// Step count of the row that was replaced, if one existed.
    pub previous: Option<i64>,
}

impl App {
    pub fn new(db: DatabaseConnection, tz: FixedOffset) -> Self {
        Self { db, tz }
    }

    /// Current calendar date in the configured chat time zone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive()
    }

    pub fn tz(&self) -> FixedOffset {
        self.tz
    }

    pub async fn ensure_chat(&self, chat_id: &str) -> Result<(chat::Model, bool), BotError> {
        if let Some(existing) = chat::Entity::find()
            .filter(chat::Column::ChatId.eq(chat_id))
            .one(&self.db)
            .await?
        {
            return Ok((existing, false));
        }

        let active = chat::ActiveModel {
            chat_id: Set(chat_id.to_string()),
            current_target_id: Set(None),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        let insert = chat::Entity::insert(active).exec(&self.db).await?;
        let created = chat::Entity::find_by_id(insert.last_insert_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| BotError::NotFound("chat not found after insert".to_string()))?;
        Ok((created, true))
    }

    /// Rewrites the external identifier in place when the platform
    /// migrates a chat. An unknown chat is not an error.
    pub async fn migrate_chat(&self, chat_id: &str, new_chat_id: &str) -> Result<bool, BotError> {
        let Some(existing) = chat::Entity::find()
            .filter(chat::Column::ChatId.eq(chat_id))
            .one(&self.db)
            .await?
        else {
            return Ok(false);
        };

        let mut active: chat::ActiveModel = existing.into();
        active.chat_id = Set(new_chat_id.to_string());
        active.update(&self.db).await?;
        Ok(true)
    }

    /// NotFound when the chat is unknown; a missing target is the valid
    /// "no goal yet" case and comes back as None.
    pub async fn chat_with_target(
        &self,
        chat_id: &str,
    ) -> Result<(chat::Model, Option<target::Model>), BotError> {
        let chat = chat::Entity::find()
            .filter(chat::Column::ChatId.eq(chat_id))
            .one(&self.db)
            .await?
            .ok_or_else(|| BotError::NotFound(format!("chat {chat_id}")))?;

        let target = match chat.current_target_id {
            Some(target_id) => Some(
                target::Entity::find_by_id(target_id)
                    .one(&self.db)
                    .await?
                    .ok_or_else(|| BotError::NotFound(format!("target id {target_id}")))?,
            ),
            None => None,
        };

        Ok((chat, target))
    }

    /// Creates a goal and atomically repoints the chat's current target.
    /// The superseded target stays around for history.
    pub async fn create_target(
        &self,
        chat_id: &str,
        input: NewTarget,
    ) -> Result<target::Model, BotError> {
        ensure_positive_value(input.target_value)?;
        ensure_initial_value(input.initial_value)?;
        ensure_future_date(input.target_date, self.today())?;

        let txn = self.db.begin().await?;
        let result: Result<target::Model, BotError> = async {
            let chat = chat::Entity::find()
                .filter(chat::Column::ChatId.eq(chat_id))
                .one(&txn)
                .await?
                .ok_or_else(|| BotError::NotFound(format!("chat {chat_id}")))?;

            let now = Utc::now();
            let active = target::ActiveModel {
                chat_id: Set(chat.id),
                name: Set(input.name),
                initial_value: Set(input.initial_value),
                target_value: Set(input.target_value),
                current_value: Set(input.initial_value),
                target_date: Set(input.target_date),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            };
            let insert = target::Entity::insert(active).exec(&txn).await?;
            let created = target::Entity::find_by_id(insert.last_insert_id)
                .one(&txn)
                .await?
                .ok_or_else(|| BotError::NotFound("target not found after insert".to_string()))?;

            let mut chat_active: chat::ActiveModel = chat.into();
            chat_active.current_target_id = Set(Some(created.id));
            chat_active.update(&txn).await?;

            Ok(created)
        }
        .await;

        finalize_transaction(txn, result).await
    }

    pub async fn update_target(
        &self,
        target_id: i64,
        changes: TargetChanges,
    ) -> Result<target::Model, BotError> {
        if let Some(name) = changes.name.as_deref() {
            if name.trim().is_empty() {
                return Err(BotError::InvalidInput(
                    "target name cannot be empty".to_string(),
                ));
            }
        }
        if let Some(value) = changes.target_value {
            ensure_positive_value(value)?;
        }
        if let Some(initial) = changes.initial_value {
            ensure_initial_value(initial)?;
        }
        if let Some(date) = changes.target_date {
            ensure_future_date(date, self.today())?;
        }

        let recalc = changes.initial_value.is_some();
        let txn = self.db.begin().await?;
        let result: Result<target::Model, BotError> = async {
            let existing = target::Entity::find_by_id(target_id)
                .one(&txn)
                .await?
                .ok_or_else(|| BotError::NotFound(format!("target id {target_id}")))?;

            let mut active: target::ActiveModel = existing.into();
            if let Some(name) = changes.name {
                active.name = Set(name);
            }
            if let Some(value) = changes.target_value {
                active.target_value = Set(value);
            }
            if let Some(initial) = changes.initial_value {
                active.initial_value = Set(initial);
            }
            if let Some(date) = changes.target_date {
                active.target_date = Set(date);
            }
            active.updated_at = Set(Utc::now());
            let updated = active.update(&txn).await?;

            if recalc {
                return self.recalculate_with_conn(&txn, updated.id).await;
            }
            Ok(updated)
        }
        .await;

        finalize_transaction(txn, result).await
    }

    /// Insert-or-update on the logical (user, target, date) key, followed
    /// by recalculation, in one transaction.
    pub async fn upsert_step(
        &self,
        target_id: i64,
        user_id: &str,
        date: NaiveDate,
        steps: i64,
    ) -> Result<StepUpsert, BotError> {
        if steps < 0 {
            return Err(BotError::InvalidInput(
                "step count cannot be negative".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let result: Result<StepUpsert, BotError> = async {
            let target = target::Entity::find_by_id(target_id)
                .one(&txn)
                .await?
                .ok_or_else(|| BotError::NotFound(format!("target id {target_id}")))?;

            let target_created = target.created_at.with_timezone(&self.tz).date_naive();
            if date < target_created {
                return Err(BotError::InvalidInput(
                    "date is before the goal was created".to_string(),
                ));
            }
            if date > self.today() {
                return Err(BotError::InvalidInput(
                    "date is in the future".to_string(),
                ));
            }

            let now = Utc::now();
            let existing = step::Entity::find()
                .filter(step::Column::TargetId.eq(target_id))
                .filter(step::Column::UserId.eq(user_id))
                .filter(step::Column::Date.eq(date))
                .one(&txn)
                .await?;

            let (written, previous) = match existing {
                Some(row) => {
                    let previous = row.steps;
                    let mut active: step::ActiveModel = row.into();
                    active.steps = Set(steps);
                    active.updated_at = Set(now);
                    (active.update(&txn).await?, Some(previous))
                }
                None => {
                    let active = step::ActiveModel {
                        user_id: Set(user_id.to_string()),
                        target_id: Set(target_id),
                        date: Set(date),
                        steps: Set(steps),
                        created_at: Set(now),
                        updated_at: Set(now),
                        ..Default::default()
                    };
                    let insert = step::Entity::insert(active).exec(&txn).await?;
                    let created = step::Entity::find_by_id(insert.last_insert_id)
                        .one(&txn)
                        .await?
                        .ok_or_else(|| {
                            BotError::NotFound("step not found after insert".to_string())
                        })?;
                    (created, None)
                }
            };

            self.recalculate_with_conn(&txn, target_id).await?;
            Ok(StepUpsert {
                step: written,
                previous,
            })
        }
        .await;

        finalize_transaction(txn, result).await
    }

    pub async fn recalculate(&self, target_id: i64) -> Result<target::Model, BotError> {
        self.recalculate_with_conn(&self.db, target_id).await
    }

    /// current_value = initial_value + sum of step entries. The store
    /// never derives this on its own.
    async fn recalculate_with_conn<C: ConnectionTrait>(
        &self,
        db: &C,
        target_id: i64,
    ) -> Result<target::Model, BotError> {
        let target = target::Entity::find_by_id(target_id)
            .one(db)
            .await?
            .ok_or_else(|| BotError::NotFound(format!("target id {target_id}")))?;

        let steps = step::Entity::find()
            .filter(step::Column::TargetId.eq(target_id))
            .all(db)
            .await?;
        let total: i64 = target.initial_value + steps.iter().map(|row| row.steps).sum::<i64>();

        if target.current_value == total {
            return Ok(target);
        }
        let mut active: target::ActiveModel = target.into();
        active.current_value = Set(total);
        active.updated_at = Set(Utc::now());
        Ok(active.update(db).await?)
    }

    /// Sum of one user's entries against a target; zero when none exist.
    pub async fn contribution(&self, target_id: i64, user_id: &str) -> Result<i64, BotError> {
        let steps = step::Entity::find()
            .filter(step::Column::TargetId.eq(target_id))
            .filter(step::Column::UserId.eq(user_id))
            .all(&self.db)
            .await?;
        Ok(steps.iter().map(|row| row.steps).sum())
    }

    /// Sum of everyone's entries for one calendar date; zero when none.
    pub async fn steps_on_date(&self, target_id: i64, date: NaiveDate) -> Result<i64, BotError> {
        let steps = step::Entity::find()
            .filter(step::Column::TargetId.eq(target_id))
            .filter(step::Column::Date.eq(date))
            .all(&self.db)
            .await?;
        Ok(steps.iter().map(|row| row.steps).sum())
    }

    /// Every chat that currently points at a goal, for the notifier jobs.
    pub async fn chats_with_current_target(
        &self,
    ) -> Result<Vec<(chat::Model, target::Model)>, BotError> {
        let chats = chat::Entity::find()
            .filter(chat::Column::CurrentTargetId.is_not_null())
            .order_by_asc(chat::Column::Id)
            .all(&self.db)
            .await?;

        let mut pairs = Vec::with_capacity(chats.len());
        for chat in chats {
            let Some(target_id) = chat.current_target_id else {
                continue;
            };
            let target = target::Entity::find_by_id(target_id)
                .one(&self.db)
                .await?
                .ok_or_else(|| BotError::NotFound(format!("target id {target_id}")))?;
            pairs.push((chat, target));
        }
        Ok(pairs)
    }
}

fn ensure_positive_value(value: i64) -> Result<(), BotError> {
    if value <= 0 {
        return Err(BotError::InvalidInput(
            "target value must be positive".to_string(),
        ));
    }
    Ok(())
}

fn ensure_initial_value(value: i64) -> Result<(), BotError> {
    if value < 0 {
        return Err(BotError::InvalidInput(
            "initial value cannot be negative".to_string(),
        ));
    }
    Ok(())
}

fn ensure_future_date(date: NaiveDate, today: NaiveDate) -> Result<(), BotError> {
    if date < today {
        return Err(BotError::InvalidInput(
            "target date cannot be in the past".to_string(),
        ));
    }
    Ok(())
}

async fn finalize_transaction<T>(
    txn: DatabaseTransaction,
    result: Result<T, BotError>,
) -> Result<T, BotError> {
    match result {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                return Err(rollback_err.into());
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::model::is_complete;
    use chrono::Duration;
    use sea_orm::PaginatorTrait;
    use tempfile::TempDir;

    const CHAT: &str = "chat-100";
    const USER: &str = "user-1";

    async fn setup_app() -> (TempDir, App) {
        let dir = TempDir::new().expect("temp dir");
        let db_path = dir.path().join("stride_bot.db");
        db::ensure_parent_dir(&db_path).expect("ensure parent");
        let db = db::connect(&db_path).await.expect("connect db");
        db::ensure_schema(&db).await.expect("ensure schema");
        let tz = FixedOffset::east_opt(0).expect("offset");
        (dir, App::new(db, tz))
    }

    fn new_target_input(app: &App, km: i64) -> NewTarget {
        NewTarget {
            name: "New goal".to_string(),
            target_value: km * 1000,
            initial_value: 0,
            target_date: app.today() + Duration::days(90),
        }
    }

    async fn chat_with_goal(app: &App, km: i64) -> target::Model {
        app.ensure_chat(CHAT).await.expect("ensure chat");
        app.create_target(CHAT, new_target_input(app, km))
            .await
            .expect("create target")
    }

    #[tokio::test]
    async fn ensure_chat_is_idempotent() {
        let (_dir, app) = setup_app().await;
        let (first, created) = app.ensure_chat(CHAT).await.expect("first");
        assert!(created);
        let (second, created) = app.ensure_chat(CHAT).await.expect("second");
        assert!(!created);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn migrate_chat_rewrites_identifier() {
        let (_dir, app) = setup_app().await;
        app.ensure_chat(CHAT).await.expect("ensure chat");

        let moved = app.migrate_chat(CHAT, "chat-200").await.expect("migrate");
        assert!(moved);

        let err = app.chat_with_target(CHAT).await.unwrap_err();
        match err {
            BotError::NotFound(message) => assert!(message.contains(CHAT)),
            other => panic!("unexpected error: {other:?}"),
        }
        let (chat, _) = app.chat_with_target("chat-200").await.expect("lookup");
        assert_eq!(chat.chat_id, "chat-200");
    }

    #[tokio::test]
    async fn migrate_unknown_chat_is_not_an_error() {
        let (_dir, app) = setup_app().await;
        let moved = app.migrate_chat("ghost", "other").await.expect("migrate");
        assert!(!moved);
    }

    #[tokio::test]
    async fn create_target_replaces_current_pointer() {
        let (_dir, app) = setup_app().await;
        let first = chat_with_goal(&app, 100).await;
        let second = app
            .create_target(CHAT, new_target_input(&app, 200))
            .await
            .expect("second target");

        let (chat, current) = app.chat_with_target(CHAT).await.expect("lookup");
        assert_eq!(chat.current_target_id, Some(second.id));
        assert_eq!(current.expect("target").id, second.id);

        // The superseded target row is kept for history.
        let old = target::Entity::find_by_id(first.id)
            .one(&app.db)
            .await
            .expect("query")
            .expect("old target");
        assert_eq!(old.target_value, 100_000);
    }

    #[tokio::test]
    async fn create_target_rejects_bad_values() {
        let (_dir, app) = setup_app().await;
        app.ensure_chat(CHAT).await.expect("ensure chat");

        let mut zero = new_target_input(&app, 10);
        zero.target_value = 0;
        let err = app.create_target(CHAT, zero).await.unwrap_err();
        assert!(matches!(err, BotError::InvalidInput(_)));

        let mut negative_initial = new_target_input(&app, 10);
        negative_initial.initial_value = -1;
        let err = app.create_target(CHAT, negative_initial).await.unwrap_err();
        assert!(matches!(err, BotError::InvalidInput(_)));

        let mut past = new_target_input(&app, 10);
        past.target_date = app.today() - Duration::days(1);
        let err = app.create_target(CHAT, past).await.unwrap_err();
        assert!(matches!(err, BotError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn create_target_for_unknown_chat_fails() {
        let (_dir, app) = setup_app().await;
        let err = app
            .create_target("ghost", new_target_input(&app, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::NotFound(_)));
    }

    #[tokio::test]
    async fn first_submission_tracks_progress() {
        let (_dir, app) = setup_app().await;
        let target = chat_with_goal(&app, 40_000).await;

        let upsert = app
            .upsert_step(target.id, USER, app.today(), 5000)
            .await
            .expect("upsert");
        assert!(upsert.previous.is_none());

        let target = app.recalculate(target.id).await.expect("recalculate");
        assert_eq!(target.current_value, 5000);
        assert!(!is_complete(&target));
        assert_eq!(
            app.contribution(target.id, USER).await.expect("contribution"),
            5000
        );
    }

    #[tokio::test]
    async fn resubmission_updates_in_place() {
        let (_dir, app) = setup_app().await;
        let target = chat_with_goal(&app, 40_000).await;
        let today = app.today();

        app.upsert_step(target.id, USER, today, 5000)
            .await
            .expect("first");
        let second = app
            .upsert_step(target.id, USER, today, 7000)
            .await
            .expect("second");
        assert_eq!(second.previous, Some(5000));
        assert_eq!(second.step.steps, 7000);

        let rows = step::Entity::find()
            .filter(step::Column::TargetId.eq(target.id))
            .filter(step::Column::UserId.eq(USER))
            .count(&app.db)
            .await
            .expect("count");
        assert_eq!(rows, 1);

        let target = app.recalculate(target.id).await.expect("recalculate");
        assert_eq!(target.current_value, 7000);
    }

    #[tokio::test]
    async fn current_value_is_initial_plus_step_sum() {
        let (_dir, app) = setup_app().await;
        app.ensure_chat(CHAT).await.expect("ensure chat");
        let mut input = new_target_input(&app, 100);
        input.initial_value = 2000;
        let target = app.create_target(CHAT, input).await.expect("create");
        assert_eq!(target.current_value, 2000);

        app.upsert_step(target.id, USER, app.today(), 3000)
            .await
            .expect("user one");
        app.upsert_step(target.id, "user-2", app.today(), 4000)
            .await
            .expect("user two");

        let target = app.recalculate(target.id).await.expect("recalculate");
        assert_eq!(target.current_value, 2000 + 3000 + 4000);
    }

    #[tokio::test]
    async fn contribution_is_zero_without_entries() {
        let (_dir, app) = setup_app().await;
        let target = chat_with_goal(&app, 100).await;
        let total = app
            .contribution(target.id, "stranger")
            .await
            .expect("contribution");
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn steps_on_date_only_counts_that_day() {
        let (_dir, app) = setup_app().await;
        let target = chat_with_goal(&app, 100).await;
        let today = app.today();

        app.upsert_step(target.id, USER, today, 1000)
            .await
            .expect("today one");
        app.upsert_step(target.id, "user-2", today, 500)
            .await
            .expect("today two");

        assert_eq!(
            app.steps_on_date(target.id, today).await.expect("sum"),
            1500
        );
        assert_eq!(
            app.steps_on_date(target.id, today + Duration::days(1))
                .await
                .expect("empty sum"),
            0
        );
    }

    #[tokio::test]
    async fn upsert_rejects_out_of_window_dates() {
        let (_dir, app) = setup_app().await;
        let target = chat_with_goal(&app, 100).await;

        let err = app
            .upsert_step(target.id, USER, app.today() - Duration::days(1), 100)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::InvalidInput(_)));

        let err = app
            .upsert_step(target.id, USER, app.today() + Duration::days(1), 100)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::InvalidInput(_)));

        let rows = step::Entity::find()
            .filter(step::Column::TargetId.eq(target.id))
            .count(&app.db)
            .await
            .expect("count");
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn upsert_rejects_negative_count() {
        let (_dir, app) = setup_app().await;
        let target = chat_with_goal(&app, 100).await;
        let err = app
            .upsert_step(target.id, USER, app.today(), -1)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn update_initial_value_recalculates() {
        let (_dir, app) = setup_app().await;
        let target = chat_with_goal(&app, 100).await;
        app.upsert_step(target.id, USER, app.today(), 3000)
            .await
            .expect("upsert");

        let updated = app
            .update_target(
                target.id,
                TargetChanges {
                    initial_value: Some(10_000),
                    ..Default::default()
                },
            )
            .await
            .expect("update");
        assert_eq!(updated.current_value, 13_000);
    }

    #[tokio::test]
    async fn update_target_validates_fields() {
        let (_dir, app) = setup_app().await;
        let target = chat_with_goal(&app, 100).await;

        let err = app
            .update_target(
                target.id,
                TargetChanges {
                    target_value: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::InvalidInput(_)));

        let err = app
            .update_target(
                target.id,
                TargetChanges {
                    target_date: Some(app.today() - Duration::days(2)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::InvalidInput(_)));

        let err = app
            .update_target(
                target.id,
                TargetChanges {
                    name: Some("   ".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn update_missing_target_reports_not_found() {
        let (_dir, app) = setup_app().await;
        let err = app
            .update_target(9999, TargetChanges::default())
            .await
            .unwrap_err();
        match err {
            BotError::NotFound(message) => assert!(message.contains("9999")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn completion_at_exact_target() {
        let (_dir, app) = setup_app().await;
        app.ensure_chat(CHAT).await.expect("ensure chat");
        let input = NewTarget {
            name: "Short walk".to_string(),
            target_value: 1000,
            initial_value: 0,
            target_date: app.today() + Duration::days(7),
        };
        let target = app.create_target(CHAT, input).await.expect("create");

        app.upsert_step(target.id, USER, app.today(), 1000)
            .await
            .expect("upsert");
        let target = app.recalculate(target.id).await.expect("recalculate");
        assert!(is_complete(&target));
    }

    #[tokio::test]
    async fn chats_with_targets_skips_goalless_chats() {
        let (_dir, app) = setup_app().await;
        chat_with_goal(&app, 100).await;
        app.ensure_chat("chat-without-goal")
            .await
            .expect("ensure chat");

        let pairs = app.chats_with_current_target().await.expect("pairs");
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0.chat_id, CHAT);
    }
}
