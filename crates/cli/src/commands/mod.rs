//! CLI Commands

pub mod account;
pub mod console;
pub mod server;
