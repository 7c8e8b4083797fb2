use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum BotError {
    Io(std::io::Error),
    Db(sea_orm::DbErr),
    Json(serde_json::Error),
    NotFound(String),
    InvalidInput(String),
}

impl fmt::Display for BotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotError::Io(err) => write!(f, "io error: {err}"),
            BotError::Db(err) => write!(f, "database error: {err}"),
            BotError::Json(err) => write!(f, "json error: {err}"),
            BotError::NotFound(message) => write!(f, "not found: {message}"),
            BotError::InvalidInput(message) => write!(f, "invalid input: {message}"),
        }
    }
}

impl Error for BotError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BotError::Io(err) => Some(err),
            BotError::Db(err) => Some(err),
            BotError::Json(err) => Some(err),
            BotError::NotFound(_) | BotError::InvalidInput(_) => None,
        }
    }
}

impl From<std::io::Error> for BotError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<sea_orm::DbErr> for BotError {
    fn from(value: sea_orm::DbErr) -> Self {
        Self::Db(value)
    }
}

impl From<serde_json::Error> for BotError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
