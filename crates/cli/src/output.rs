//! Terminal output: server cards, log listings and status messages

use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use serde::Serialize;

use craftcloud_common::ServerState;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// Plain text format
    Plain,
}

/// Something that renders as a row of labelled cells.
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;

    /// Header and cell pairs, in column order.
    fn fields(&self) -> Vec<(&'static str, String)> {
        Self::headers().into_iter().zip(self.row()).collect()
    }
}

fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Print one record. Tables are drawn as a field/value card since a single
/// server row is too wide for most terminals.
pub fn print_item<T: Serialize + TableDisplay>(item: &T, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let mut card = table();
            for (field, value) in item.fields() {
                card.add_row(vec![Cell::new(field), Cell::new(value)]);
            }
            println!("{card}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(item).unwrap_or_default());
        }
        OutputFormat::Plain => {
            for (field, value) in item.fields() {
                println!("{}: {}", field, value);
            }
        }
    }
}

/// Print records one per row. Plain output is the bare rows, tab separated,
/// so it pipes cleanly into grep.
pub fn print_rows<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let mut rows = table();
            rows.set_header(T::headers());
            for item in items {
                rows.add_row(item.row());
            }
            println!("{rows}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
        OutputFormat::Plain => {
            for item in items {
                println!("{}", item.row().join("\t"));
            }
        }
    }
}

/// Power state coloured by how settled it is.
pub fn paint_state(state: ServerState) -> ColoredString {
    let label = state.to_string();
    match state {
        ServerState::Running => label.green(),
        ServerState::Offline => label.red(),
        ServerState::Starting | ServerState::Stopping => label.yellow(),
    }
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "!".yellow(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "i".blue(), message);
}
