//! Terminal styling helpers.

use comfy_table::{Cell, Color};
use console::Style;

use pkgmend_core::models::UnitStatus;

/// Green check mark plus message.
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Red cross plus message.
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Table cell for a per-PR status.
pub fn status_cell(status: &UnitStatus) -> Cell {
    match status {
        UnitStatus::Resolved => Cell::new("✓ resolved").fg(Color::Green),
        UnitStatus::Unresolved => Cell::new("✗ unresolved").fg(Color::Red),
        UnitStatus::Failed => Cell::new("✗ failed").fg(Color::Red),
        UnitStatus::Skipped => Cell::new("⧗ skipped").fg(Color::Yellow),
        UnitStatus::Clean => Cell::new("clean"),
        UnitStatus::NoConflict => Cell::new("no conflict"),
    }
}
