use tracing::{error, info};

use crate::app::App;
use crate::error::BotError;
use crate::model::is_complete;
use crate::transport::Outbox;
use crate::util::{evening_reminder, evening_summary};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobKind {
    EveningReminder,
    EveningStat,
}

/// A recurring broadcast, fired once per day at a fixed local time.
pub struct Job {
    pub name: &'static str,
    pub hour: u32,
    pub minute: u32,
    pub kind: JobKind,
}

/// Every job the scheduler knows about. Registration is this table; there
/// is no other way to get a job scheduled.
pub const JOBS: &[Job] = &[
    Job {
        name: "evening_reminder",
        hour: 21,
        minute: 0,
        kind: JobKind::EveningReminder,
    },
    Job {
        name: "evening_stat",
        hour: 23,
        minute: 45,
        kind: JobKind::EveningStat,
    },
];

pub fn find(name: &str) -> Option<&'static Job> {
    JOBS.iter().find(|job| job.name == name)
}

impl JobKind {
    fn name(&self) -> &'static str {
        match self {
            Self::EveningReminder => "evening_reminder",
            Self::EveningStat => "evening_stat",
        }
    }
}

/// Runs one job across every chat with an active goal. A failure for one
/// chat is logged and the remaining chats still get their message; only
/// the initial chat listing can fail the whole run.
pub async fn run_job(app: &App, outbox: &Outbox, kind: JobKind) -> Result<(), BotError> {
    let pairs = app.chats_with_current_target().await?;
    info!(job = kind.name(), chats = pairs.len(), "running job");

    for (chat, target) in pairs {
        if is_complete(&target) {
            continue;
        }
        let outcome = match kind {
            JobKind::EveningReminder => {
                outbox.send_text(&chat.chat_id, evening_reminder());
                Ok(())
            }
            JobKind::EveningStat => app
                .steps_on_date(target.id, app.today())
                .await
                .map(|total| outbox.send_text(&chat.chat_id, evening_summary(total))),
        };
        if let Err(err) = outcome {
            error!(chat_id = %chat.chat_id, job = kind.name(), error = %err, "job delivery failed");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::model::NewTarget;
    use crate::transport::OutboundMessage;
    use chrono::{Duration, FixedOffset};
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn setup_app() -> (TempDir, App) {
        let dir = TempDir::new().expect("temp dir");
        let db_path = dir.path().join("stride_bot.db");
        let db = db::connect(&db_path).await.expect("connect db");
        db::ensure_schema(&db).await.expect("ensure schema");
        (dir, App::new(db, FixedOffset::east_opt(0).expect("offset")))
    }

    async fn goal_for(app: &App, chat_id: &str, target_meters: i64) -> i64 {
        app.ensure_chat(chat_id).await.expect("ensure chat");
        let target = app
            .create_target(
                chat_id,
                NewTarget {
                    name: "New goal".to_string(),
                    target_value: target_meters,
                    initial_value: 0,
                    target_date: app.today() + Duration::days(30),
                },
            )
            .await
            .expect("create target");
        target.id
    }

    fn drain(rx: &mut UnboundedReceiver<OutboundMessage>) -> Vec<OutboundMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn registry_names_resolve() {
        assert_eq!(find("evening_reminder").expect("job").kind, JobKind::EveningReminder);
        assert_eq!(find("evening_stat").expect("job").kind, JobKind::EveningStat);
        assert!(find("morning_stat").is_none());
    }

    #[tokio::test]
    async fn reminder_skips_chats_without_goal_and_completed_goals() {
        let (_dir, app) = setup_app().await;
        goal_for(&app, "active", 100_000).await;
        let done = goal_for(&app, "done", 1000).await;
        app.upsert_step(done, "u1", app.today(), 1000)
            .await
            .expect("complete the goal");
        app.ensure_chat("idle").await.expect("ensure chat");

        let (outbox, mut rx) = Outbox::channel();
        run_job(&app, &outbox, JobKind::EveningReminder)
            .await
            .expect("run job");

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].chat_id, "active");
        assert!(messages[0].text.contains("reported your steps"));
    }

    #[tokio::test]
    async fn evening_stat_sums_the_day() {
        let (_dir, app) = setup_app().await;
        let target_id = goal_for(&app, "active", 100_000).await;
        app.upsert_step(target_id, "u1", app.today(), 4000)
            .await
            .expect("u1 entry");
        app.upsert_step(target_id, "u2", app.today(), 2500)
            .await
            .expect("u2 entry");

        let (outbox, mut rx) = Outbox::channel();
        run_job(&app, &outbox, JobKind::EveningStat)
            .await
            .expect("run job");

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].text.contains("6500 steps"));
        assert!(messages[0].text.contains("6.50 km"));
    }

    #[tokio::test]
    async fn evening_stat_reports_a_quiet_day() {
        let (_dir, app) = setup_app().await;
        goal_for(&app, "active", 100_000).await;

        let (outbox, mut rx) = Outbox::channel();
        run_job(&app, &outbox, JobKind::EveningStat)
            .await
            .expect("run job");

        let messages = drain(&mut rx);
        assert!(messages[0].text.contains("0 steps"));
    }
}
