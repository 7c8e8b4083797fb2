use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::entities::target;

/// Meters per kilometre; command input is given in km, storage is meters.
pub const METERS_PER_KM: i64 = 1000;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewTarget {
    pub name: String,
    pub target_value: i64,
    pub initial_value: i64,
    pub target_date: NaiveDate,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TargetChanges {
    pub name: Option<String>,
    pub target_value: Option<i64>,
    pub initial_value: Option<i64>,
    pub target_date: Option<NaiveDate>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum UpdateField {
    Value,
    Initial,
    Date,
    Name,
}

impl UpdateField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Initial => "initial",
            Self::Date => "date",
            Self::Name => "name",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "value" => Some(Self::Value),
            "initial" => Some(Self::Initial),
            "date" => Some(Self::Date),
            "name" => Some(Self::Name),
            _ => None,
        }
    }
}

/// Everything the /stat reply needs, gathered in one place.
#[derive(Clone, Debug)]
pub struct StatsReport {
    pub name: String,
    pub target_value: i64,
    pub current_value: i64,
    pub target_date: NaiveDate,
    pub user_contribution: i64,
}

pub fn is_complete(target: &target::Model) -> bool {
    target.current_value >= target.target_value
}

/// Display percentage. Creation and update both reject non-positive
/// target values, so the denominator is always positive here.
pub fn progress_percent(target: &target::Model) -> f64 {
    target.current_value as f64 / target.target_value as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn target(current: i64, total: i64) -> target::Model {
        let now = Utc::now();
        target::Model {
            id: 1,
            chat_id: 1,
            name: "Goal".to_string(),
            initial_value: 0,
            target_value: total,
            current_value: current,
            target_date: NaiveDate::from_ymd_opt(2030, 1, 1).expect("date"),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn completion_is_reached_at_exact_value() {
        assert!(!is_complete(&target(999, 1000)));
        assert!(is_complete(&target(1000, 1000)));
        assert!(is_complete(&target(1001, 1000)));
    }

    #[test]
    fn percent_is_floating_point() {
        let t = target(500, 40_000_000);
        assert!((progress_percent(&t) - 0.00125).abs() < 1e-9);
    }

    #[test]
    fn update_field_parses_known_names() {
        assert_eq!(UpdateField::parse("value"), Some(UpdateField::Value));
        assert_eq!(UpdateField::parse(" Date "), Some(UpdateField::Date));
        assert_eq!(UpdateField::parse("NAME"), Some(UpdateField::Name));
        assert_eq!(UpdateField::parse("initial"), Some(UpdateField::Initial));
        assert_eq!(UpdateField::parse("distance"), None);
    }
}
