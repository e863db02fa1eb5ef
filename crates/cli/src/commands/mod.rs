pub mod chat;
pub mod config_cmd;
pub mod confirm;
pub mod skills;
