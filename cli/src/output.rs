//! file: cli/src/output.rs
//! description: output utilities for the CLI.
//!
//! Table rendering for plugin descriptions and batch results, ledger
//! summaries, and styled error lines.

use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use console::style;
use inproc_host::abi::{CALL_SYMBOL, FREE_SYMBOL, NAME_SYMBOL, guess_binary_arch};
use inproc_host::{Ledger, Level, OwnerTag, PluginError, PluginHandle, generate_error_report};

/// One row of `inproc batch` output.
pub struct CallRow {
    pub plugin: String,
    pub function: String,
    pub outcome: Result<String, String>,
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn plugin_table(handle: &PluginHandle) -> Table {
    let arch = if handle.is_dynamic() {
        guess_binary_arch(std::path::Path::new(handle.origin()))
            .unwrap_or_else(|| "unknown".to_string())
    } else {
        "host".to_string()
    };
    let mut table = new_table();
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec![Cell::new("name"), Cell::new(handle.name()).fg(Color::Green)]);
    table.add_row(vec!["id".to_string(), handle.id().to_string()]);
    table.add_row(vec!["origin", handle.origin()]);
    table.add_row(vec!["arch".to_string(), arch]);
    table.add_row(vec![
        "symbols".to_string(),
        format!("{}, {}, {}", NAME_SYMBOL, CALL_SYMBOL, FREE_SYMBOL),
    ]);
    table.add_row(vec![
        "call policy".to_string(),
        format!("{:?}", handle.call_policy()).to_lowercase(),
    ]);
    table.add_row(vec!["loaded at".to_string(), handle.loaded_at().to_rfc3339()]);
    table
}

pub fn calls_table(rows: &[CallRow]) -> Table {
    let mut table = new_table();
    table.set_header(vec!["Plugin", "Function", "Status", "Response"]);
    for row in rows {
        let (status, body) = match &row.outcome {
            Ok(body) => (Cell::new("ok").fg(Color::Green), body.as_str()),
            Err(err) => (Cell::new("failed").fg(Color::Red), err.as_str()),
        };
        table.add_row(vec![
            Cell::new(&row.plugin),
            Cell::new(&row.function),
            status,
            Cell::new(body),
        ]);
    }
    table
}

pub fn ledger_summary(ledger: &Ledger) -> String {
    let entries = ledger.entries();
    if entries.is_empty() {
        return format!("{} all buffers released", style("ledger:").bold());
    }
    let mut out = format!(
        "{} {} buffer(s) outstanding",
        style("ledger:").bold(),
        style(entries.len()).yellow()
    );
    for entry in entries {
        let owner = match entry.owner {
            OwnerTag::Plugin(id) => id.to_string(),
            OwnerTag::Host => "host".to_string(),
        };
        out.push_str(&format!(
            "\n  {} {} bytes owned by {} since {}",
            entry.id,
            entry.len,
            owner,
            entry.acquired_at.to_rfc3339()
        ));
    }
    out
}

pub fn error_line(err: &PluginError) -> String {
    let report = generate_error_report(err);
    match err.level() {
        Level::Critical => style(report).red().bold().to_string(),
        Level::Error => style(report).red().to_string(),
        Level::Warning => style(report).yellow().to_string(),
        Level::Info => report,
    }
}
