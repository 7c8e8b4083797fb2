pub mod chat;
pub mod step;
pub mod target;
