use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::app::App;
use crate::conversation::{ConversationManager, Flow, FlowState, Session, SessionKey};
use crate::entities::{chat, target};
use crate::error::BotError;
use crate::model::{NewTarget, StatsReport, TargetChanges, UpdateField, METERS_PER_KM};
use crate::transport::{Capabilities, Event, Outbox};
use crate::util::{
    format_date, format_km, greeting, member_greeting, new_target_set, parse_date, parse_steps,
    prompt_steps_for, stats_text, step_recorded, step_updated, usage_line, MSG_ADMIN_ONLY,
    MSG_BAD_DATE, MSG_BAD_STEPS, MSG_DATE_BEFORE_TARGET, MSG_DATE_IN_FUTURE, MSG_GROUPS_ONLY,
    MSG_INTERNAL_ERROR, MSG_NO_TARGET, MSG_PROMPT_DAY, MSG_PROMPT_TODAY,
};

pub struct CommandSpec {
    pub name: &'static str,
    pub usage: &'static str,
    pub admin_only: bool,
}

/// The registered commands. Guards (admin, target-required) are shared
/// wrappers around these descriptors, not per-command subclasses.
pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "new_target",
        usage: "<kilometres> <dd.mm.yyyy>",
        admin_only: true,
    },
    CommandSpec {
        name: "update_target",
        usage: "<value|initial|date|name> <new value>",
        admin_only: true,
    },
    CommandSpec {
        name: "stat",
        usage: "",
        admin_only: false,
    },
    CommandSpec {
        name: "today",
        usage: "",
        admin_only: false,
    },
    CommandSpec {
        name: "day",
        usage: "",
        admin_only: false,
    },
];

fn command_spec(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.name == name)
}

/// Routes inbound events to command handlers, conversation turns, and
/// membership bookkeeping. One instance lives for the process; events are
/// handled independently and no error escapes [`Self::handle_event`].
pub struct Dispatcher<C: Capabilities> {
    app: App,
    outbox: Outbox,
    caps: C,
    conversations: Mutex<ConversationManager>,
}

impl<C: Capabilities> Dispatcher<C> {
    pub fn new(app: App, outbox: Outbox, caps: C) -> Self {
        Self {
            app,
            outbox,
            caps,
            conversations: Mutex::new(ConversationManager::new()),
        }
    }

    pub fn with_conversation_timeout(
        app: App,
        outbox: Outbox,
        caps: C,
        timeout: Duration,
    ) -> Self {
        Self {
            app,
            outbox,
            caps,
            conversations: Mutex::new(ConversationManager::with_timeout(timeout)),
        }
    }

    pub async fn handle_event(&self, event: Event) {
        match event {
            Event::Command {
                chat_id,
                user_id,
                command,
                args,
                message_id,
            } => {
                self.run_command(&chat_id, &user_id, &command, &args, message_id)
                    .await;
            }
            Event::Text {
                chat_id,
                user_id,
                text,
            } => {
                self.handle_text(&chat_id, &user_id, &text).await;
            }
            Event::ChatCreated { chat_id } => {
                if let Err(err) = self.register_chat(&chat_id).await {
                    error!(chat_id, error = %err, "chat registration failed");
                }
            }
            Event::ChatMigrated {
                chat_id,
                new_chat_id,
            } => match self.app.migrate_chat(&chat_id, &new_chat_id).await {
                Ok(true) => info!(chat_id, new_chat_id, "chat migrated"),
                Ok(false) => debug!(chat_id, "migration for unknown chat ignored"),
                Err(err) => error!(chat_id, error = %err, "chat migration failed"),
            },
            Event::MembersAdded {
                chat_id,
                member_names,
                includes_self,
            } => {
                if includes_self {
                    if let Err(err) = self.register_chat(&chat_id).await {
                        error!(chat_id, error = %err, "chat registration failed");
                    }
                }
                if !member_names.is_empty() {
                    self.outbox
                        .send_text(&chat_id, member_greeting(&member_names));
                }
            }
            Event::Private { chat_id } => {
                self.outbox.send_text(&chat_id, MSG_GROUPS_ONLY);
            }
        }
    }

    /// Drops expired conversations. Invoked from the scheduler loop.
    pub fn sweep_conversations(&self) {
        self.lock_conversations().sweep();
    }

    async fn run_command(
        &self,
        chat_id: &str,
        user_id: &str,
        command: &str,
        args: &[String],
        message_id: Option<i64>,
    ) {
        let Some(spec) = command_spec(command) else {
            debug!(command, "ignoring unknown command");
            return;
        };
        if spec.admin_only && !self.caps.is_admin(chat_id, user_id) {
            self.outbox.send_text(chat_id, MSG_ADMIN_ONLY);
            return;
        }

        let result = match spec.name {
            "new_target" => self.cmd_new_target(chat_id, args).await,
            "update_target" => self.cmd_update_target(chat_id, args).await,
            "stat" => self.cmd_stat(chat_id, user_id, message_id).await,
            "today" => self.start_flow(chat_id, user_id, Flow::Today).await,
            "day" => self.start_flow(chat_id, user_id, Flow::Day).await,
            _ => Ok(()),
        };

        match result {
            Ok(()) => {}
            Err(BotError::InvalidInput(detail)) => {
                debug!(chat_id, command, detail, "command rejected");
                self.outbox
                    .send_text(chat_id, usage_line(spec.name, spec.usage));
            }
            Err(err) => {
                error!(chat_id, command, error = %err, "command failed");
                self.outbox.send_text(chat_id, MSG_INTERNAL_ERROR);
            }
        }
    }

    async fn cmd_new_target(&self, chat_id: &str, args: &[String]) -> Result<(), BotError> {
        let [km, date] = args else {
            return Err(BotError::InvalidInput(
                "number of arguments incorrect".to_string(),
            ));
        };
        let km: i64 = km
            .parse()
            .map_err(|_| BotError::InvalidInput("kilometres must be a number".to_string()))?;
        let date = parse_date(date)
            .ok_or_else(|| BotError::InvalidInput("end date must be dd.mm.yyyy".to_string()))?;

        let created = self
            .app
            .create_target(
                chat_id,
                NewTarget {
                    name: "New goal".to_string(),
                    target_value: km.saturating_mul(METERS_PER_KM),
                    initial_value: 0,
                    target_date: date,
                },
            )
            .await?;

        info!(chat_id, target_id = created.id, "new target set");
        self.outbox.send_text(chat_id, new_target_set(&created));
        Ok(())
    }

    async fn cmd_update_target(&self, chat_id: &str, args: &[String]) -> Result<(), BotError> {
        let Some((field, rest)) = args.split_first() else {
            return Err(BotError::InvalidInput(
                "number of arguments incorrect".to_string(),
            ));
        };
        let field = UpdateField::parse(field)
            .ok_or_else(|| BotError::InvalidInput(format!("unknown field '{field}'")))?;

        let changes = match field {
            UpdateField::Name => {
                if rest.is_empty() {
                    return Err(BotError::InvalidInput("name is missing".to_string()));
                }
                TargetChanges {
                    name: Some(rest.join(" ")),
                    ..Default::default()
                }
            }
            UpdateField::Value | UpdateField::Initial | UpdateField::Date => {
                let [value] = rest else {
                    return Err(BotError::InvalidInput(
                        "number of arguments incorrect".to_string(),
                    ));
                };
                match field {
                    UpdateField::Value => TargetChanges {
                        target_value: Some(parse_km(value)?),
                        ..Default::default()
                    },
                    UpdateField::Initial => TargetChanges {
                        initial_value: Some(parse_km(value)?),
                        ..Default::default()
                    },
                    UpdateField::Date => TargetChanges {
                        target_date: Some(parse_date(value).ok_or_else(|| {
                            BotError::InvalidInput("date must be dd.mm.yyyy".to_string())
                        })?),
                        ..Default::default()
                    },
                    UpdateField::Name => unreachable!(),
                }
            }
        };

        let Some((_, current)) = self.require_target(chat_id).await? else {
            return Ok(());
        };
        let updated = self.app.update_target(current.id, changes).await?;

        let confirmation = match field {
            UpdateField::Value => format!(
                "The goal changed! Now we need to cover: {} km",
                format_km(updated.target_value)
            ),
            UpdateField::Initial => format!(
                "Head start set to {} km, progress recalculated.",
                format_km(updated.initial_value)
            ),
            UpdateField::Date => {
                format!("New finish date: {}", format_date(updated.target_date))
            }
            UpdateField::Name => format!("Our goal is now called: {}", updated.name),
        };
        self.outbox.send_text(chat_id, confirmation);
        Ok(())
    }

    async fn cmd_stat(
        &self,
        chat_id: &str,
        user_id: &str,
        message_id: Option<i64>,
    ) -> Result<(), BotError> {
        let Some((_, target)) = self.require_target(chat_id).await? else {
            return Ok(());
        };
        let user_contribution = self.app.contribution(target.id, user_id).await?;
        let report = StatsReport {
            name: target.name.clone(),
            target_value: target.target_value,
            current_value: target.current_value,
            target_date: target.target_date,
            user_contribution,
        };
        self.outbox
            .reply(chat_id, message_id, stats_text(&report, &target));
        Ok(())
    }

    async fn start_flow(
        &self,
        chat_id: &str,
        user_id: &str,
        flow: Flow,
    ) -> Result<(), BotError> {
        // Entry guard; re-checked again on every later turn.
        if self.require_target(chat_id).await?.is_none() {
            return Ok(());
        }

        let key = SessionKey::new(chat_id, user_id);
        let state = match flow {
            Flow::Today => {
                self.outbox.send_text(chat_id, MSG_PROMPT_TODAY);
                FlowState::AwaitingSteps { date: None }
            }
            Flow::Day => {
                self.outbox.send_text(chat_id, MSG_PROMPT_DAY);
                FlowState::AwaitingDate
            }
        };
        self.lock_conversations().begin(key, flow, state);
        debug!(chat_id, user_id, command = flow.command(), "conversation started");
        Ok(())
    }

    async fn handle_text(&self, chat_id: &str, user_id: &str, text: &str) {
        let key = SessionKey::new(chat_id, user_id);
        let session = self.lock_conversations().resume(&key);
        let Some(session) = session else {
            // Free text outside a conversation is none of our business.
            return;
        };

        match self.advance_flow(chat_id, user_id, text, &session).await {
            Ok(Some(next)) => self.lock_conversations().begin(key, session.flow, next),
            Ok(None) => {}
            Err(err) => {
                error!(chat_id, user_id, error = %err, "conversation turn failed");
                self.outbox.send_text(chat_id, MSG_INTERNAL_ERROR);
            }
        }
    }

    /// One turn of a guided-input conversation. Returns the state to keep
    /// the session alive with, or None when the conversation ends.
    async fn advance_flow(
        &self,
        chat_id: &str,
        user_id: &str,
        text: &str,
        session: &Session,
    ) -> Result<Option<FlowState>, BotError> {
        // Never trust the entry guard from a previous turn.
        let (_, target) = self.app.chat_with_target(chat_id).await?;
        let Some(target) = target else {
            self.outbox.send_text(chat_id, MSG_NO_TARGET);
            return Ok(None);
        };

        match session.state {
            FlowState::AwaitingDate => Ok(Some(self.date_turn(chat_id, text, &target))),
            FlowState::AwaitingSteps { date } => {
                self.steps_turn(chat_id, user_id, text, &target, date).await
            }
        }
    }

    fn date_turn(&self, chat_id: &str, text: &str, target: &target::Model) -> FlowState {
        let Some(date) = parse_date(text) else {
            self.outbox.send_text(chat_id, MSG_BAD_DATE);
            return FlowState::AwaitingDate;
        };
        let target_created = target.created_at.with_timezone(&self.app.tz()).date_naive();
        if date < target_created {
            self.outbox.send_text(chat_id, MSG_DATE_BEFORE_TARGET);
            return FlowState::AwaitingDate;
        }
        if date > self.app.today() {
            self.outbox.send_text(chat_id, MSG_DATE_IN_FUTURE);
            return FlowState::AwaitingDate;
        }
        self.outbox.send_text(chat_id, prompt_steps_for(date));
        FlowState::AwaitingSteps { date: Some(date) }
    }

    async fn steps_turn(
        &self,
        chat_id: &str,
        user_id: &str,
        text: &str,
        target: &target::Model,
        date: Option<chrono::NaiveDate>,
    ) -> Result<Option<FlowState>, BotError> {
        let Some(steps) = parse_steps(text) else {
            self.outbox.send_text(chat_id, MSG_BAD_STEPS);
            // A previously captured date stays stashed across re-prompts.
            return Ok(Some(FlowState::AwaitingSteps { date }));
        };

        let entry_date = date.unwrap_or_else(|| self.app.today());
        match self.app.upsert_step(target.id, user_id, entry_date, steps).await {
            Ok(upsert) => {
                let confirmation = match upsert.previous {
                    Some(previous) => step_updated(entry_date, steps, previous),
                    None => step_recorded(entry_date, steps),
                };
                info!(
                    chat_id,
                    user_id,
                    target_id = target.id,
                    steps,
                    date = %entry_date,
                    "step entry written"
                );
                self.outbox.send_text(chat_id, confirmation);
                Ok(None)
            }
            Err(BotError::InvalidInput(detail)) => {
                self.outbox.send_text(chat_id, detail);
                Ok(Some(FlowState::AwaitingSteps { date }))
            }
            Err(err) => Err(err),
        }
    }

    async fn register_chat(&self, chat_id: &str) -> Result<(), BotError> {
        let (_, created) = self.app.ensure_chat(chat_id).await?;
        if created {
            info!(chat_id, "registered new chat");
            self.outbox.send_text(chat_id, greeting());
        }
        Ok(())
    }

    /// "No target set" guard shared by every command that needs a goal.
    async fn require_target(
        &self,
        chat_id: &str,
    ) -> Result<Option<(chat::Model, target::Model)>, BotError> {
        let (chat, target) = self.app.chat_with_target(chat_id).await?;
        match target {
            Some(target) => Ok(Some((chat, target))),
            None => {
                self.outbox.send_text(chat_id, MSG_NO_TARGET);
                Ok(None)
            }
        }
    }

    fn lock_conversations(&self) -> std::sync::MutexGuard<'_, ConversationManager> {
        self.conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn parse_km(value: &str) -> Result<i64, BotError> {
    let km: i64 = value
        .parse()
        .map_err(|_| BotError::InvalidInput("kilometres must be a number".to_string()))?;
    Ok(km.saturating_mul(METERS_PER_KM))
}
