use chrono::NaiveDate;

use crate::entities::target;
use crate::model::{progress_percent, StatsReport, METERS_PER_KM};

pub const DATE_FORMAT: &str = "%d.%m.%Y";

pub const MSG_INTERNAL_ERROR: &str = "Oops! Something went wrong, please tell the developers!";
pub const MSG_NO_TARGET: &str = "Looks like this group has no goal yet :( Set one first!";
pub const MSG_ADMIN_ONLY: &str = "Only chat administrators can change the goal.";
pub const MSG_GROUPS_ONLY: &str = "I only work in group chats! Add me to a group first!";
pub const MSG_PROMPT_TODAY: &str = "How many steps did you walk today?";
pub const MSG_PROMPT_DAY: &str = "Which day? Send it as dd.mm.yyyy.";
pub const MSG_BAD_STEPS: &str =
    "That does not look like a step count. Send a non-negative whole number.";
pub const MSG_BAD_DATE: &str = "That does not look like a date. Send it as dd.mm.yyyy.";
pub const MSG_DATE_BEFORE_TARGET: &str =
    "That day is before this goal was created. Pick a later one.";
pub const MSG_DATE_IN_FUTURE: &str = "Nice try, but that day has not happened yet!";

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Non-negative whole number of steps. Rejects signs and junk outright.
pub fn parse_steps(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse::<i64>().ok()
}

pub fn format_km(meters: i64) -> String {
    if meters % METERS_PER_KM == 0 {
        (meters / METERS_PER_KM).to_string()
    } else {
        format!("{:.2}", meters as f64 / METERS_PER_KM as f64)
    }
}

pub fn usage_line(command: &str, usage: &str) -> String {
    format!("Wrong parameters!\n\nUsage: /{command} {usage}")
}

pub fn greeting() -> String {
    "Hi everyone!\n\nI am StrideBot and I will remember this chat!\nNow set a goal for this fine team!"
        .to_string()
}

pub fn member_greeting(names: &[String]) -> String {
    match names {
        [single] => format!("{single}, welcome!"),
        _ => "Welcome, everyone!".to_string(),
    }
}

pub fn new_target_set(target: &target::Model) -> String {
    format!(
        "A new goal is set for this chat!\n\n{}: {} km by {}",
        target.name,
        format_km(target.target_value),
        format_date(target.target_date)
    )
}

pub fn stats_text(report: &StatsReport, target: &target::Model) -> String {
    format!(
        "Our goal {} is {} km by {}\nSo far we have covered: {} km ({:.2}% of the goal)\n\nYour contribution is {} km!",
        report.name,
        format_km(report.target_value),
        format_date(report.target_date),
        format_km(report.current_value),
        progress_percent(target),
        format_km(report.user_contribution)
    )
}

pub fn prompt_steps_for(date: NaiveDate) -> String {
    format!("Got it, {}. How many steps?", format_date(date))
}

pub fn step_recorded(date: NaiveDate, steps: i64) -> String {
    format!(
        "Recorded {steps} steps for {}. Keep it up!",
        format_date(date)
    )
}

pub fn step_updated(date: NaiveDate, steps: i64, previous: i64) -> String {
    format!(
        "Updated your entry for {}: {steps} steps (was {previous}).",
        format_date(date)
    )
}

pub fn evening_reminder() -> String {
    "Have you reported your steps today?!".to_string()
}

pub fn evening_summary(steps_today: i64) -> String {
    format!(
        "Today the team logged {steps_today} steps ({} km). Good night!",
        format_km(steps_today)
    )
}
