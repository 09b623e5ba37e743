pub mod config;
pub mod db;
pub mod delivery;
pub mod extract;
pub mod fanout;
pub mod format;
pub mod handlers;
pub mod model;
pub mod queue;
pub mod scanner;
pub mod scheduler;
pub mod source;
pub mod telegram;
pub mod timeago;
pub mod tree;
pub mod update;
