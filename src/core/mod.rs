pub mod config;
pub mod content;
pub mod conversation;
pub mod extract;
pub mod maintenance;
pub mod notify;
pub mod runner;
pub mod schedule;
pub mod store;
pub mod terminal;
pub mod wire;

#[cfg(test)]
pub mod testutil;
