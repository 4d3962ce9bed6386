//! CraftCloud CLI
//!
//! Terminal client for the CraftCloud API: accounts, power control, the
//! live server console and the resource overview.

pub mod client;
pub mod commands;
pub mod console;
pub mod output;
pub mod overview;
