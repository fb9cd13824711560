//! Output formatting for command results.
//!
//! Every result type implements [`TableDisplay`]; JSON output is its serde
//! representation.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;
use std::str::FromStr;
use tabled::builder::Builder;
use tabled::settings::Style;

/// Output format for CLI results
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format (default)
    #[default]
    Table,
    /// JSON format for machine consumption
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: '{}'", s)),
        }
    }
}

/// A result that knows how to lay itself out for a terminal.
pub trait TableDisplay: Serialize {
    fn to_table(&self) -> String;
}

/// Render `value` in `format`.
pub fn render<T: TableDisplay>(value: &T, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(value.to_table()),
        OutputFormat::Json => {
            serde_json::to_string_pretty(value).context("Failed to serialize output")
        }
    }
}

/// Two-column table of field names and values.
pub fn key_value_table<K: AsRef<str>>(rows: &[(K, String)]) -> String {
    let mut builder = Builder::default();
    for (key, value) in rows {
        builder.push_record([key.as_ref().to_string(), value.clone()]);
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

/// Table with a header row.
pub fn list_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return "(no results)".to_string();
    }
    let mut builder = Builder::default();
    builder.push_record(headers.iter().map(|h| h.to_string()));
    for row in rows {
        builder.push_record(row.clone());
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}
