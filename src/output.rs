//! Output formatting for byteguard
//!
//! This module provides formatters for displaying tracker state in different
//! formats:
//! - Table format for human-readable terminal output
//! - JSON format for machine-readable output and scripting
//!
//! It also holds [`ConsoleNotifier`], which prints notifications to stderr.
//!
//! # Examples
//!
//! ```
//! use byteguard::output::get_formatter;
//! use byteguard_blocking::LowDataStatus;
//!
//! let status = LowDataStatus { enabled: true, blocked_domains: vec![] };
//! let formatter = get_formatter(true);
//! assert!(formatter.format_low_data(&status).contains("\"enabled\": true"));
//! ```

use byteguard_blocking::LowDataStatus;
use byteguard_core::byte_format::format_bytes;
use byteguard_core::notify::{Notification, Notifier};
use byteguard_core::types::{BudgetSettings, Severity, UsageState};
use colored::Colorize;
use prettytable::{Table, format, row};
use serde_json::json;

use crate::budget::usage_percentage;
use crate::feed::FeedSummary;

/// Number of domains listed in the status table
pub const TOP_DOMAINS: usize = 10;

/// Everything the `status` command shows
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub usage: UsageState,
    pub settings: BudgetSettings,
    pub low_data: LowDataStatus,
    pub auto_low_data: bool,
    pub timezone: String,
}

/// Trait for output formatters
pub trait OutputFormatter {
    /// Usage, budget and blocking overview
    fn format_status(&self, report: &StatusReport) -> String;

    /// Low-data mode and blocked domains
    fn format_low_data(&self, status: &LowDataStatus) -> String;

    /// Budget settings
    fn format_settings(&self, settings: &BudgetSettings) -> String;

    /// Result of feeding an event file or stream
    fn format_feed_summary(&self, summary: &FeedSummary, report: &StatusReport) -> String;
}

/// Table formatter for human-readable output
pub struct TableFormatter;

impl TableFormatter {
    fn on_off(enabled: bool) -> &'static str {
        if enabled { "ON" } else { "OFF" }
    }

    fn budget_line(usage: &UsageState, settings: &BudgetSettings) -> String {
        match usage_percentage(usage.total_today, settings.daily_budget) {
            Some(percentage) => format!(
                "{} of {} ({}%)",
                format_bytes(usage.total_today, 2),
                format_bytes(settings.daily_budget, 2),
                percentage
            ),
            None => format!("{} (no daily budget)", format_bytes(usage.total_today, 2)),
        }
    }

    fn domains_table(usage: &UsageState) -> String {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
        table.set_titles(row![b -> "Domain", b -> "Usage", b -> "Share"]);

        let total = usage.domains_total();
        for (domain, bytes) in usage.top_domains(TOP_DOMAINS) {
            let share = usage_percentage(bytes, total)
                .map(|p| format!("{p}%"))
                .unwrap_or_else(|| "-".to_string());
            table.add_row(row![domain.as_str(), r -> format_bytes(bytes, 2), r -> share]);
        }
        table.to_string()
    }

    fn hourly_table(usage: &UsageState) -> String {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
        table.set_titles(row![b -> "Hour", b -> "Usage"]);
        for (hour, bytes) in &usage.hourly {
            table.add_row(row![format!("{hour:02}:00"), r -> format_bytes(*bytes, 2)]);
        }
        table.to_string()
    }
}

impl OutputFormatter for TableFormatter {
    fn format_status(&self, report: &StatusReport) -> String {
        let mut output = String::new();

        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_CLEAN);
        table.add_row(row![b -> "Today", Self::budget_line(&report.usage, &report.settings)]);
        table.add_row(row![b -> "Monthly budget", format_bytes(report.settings.monthly_budget, 2)]);
        table.add_row(row![b -> "Open tabs", report.usage.tabs.len()]);
        table.add_row(row![b -> "Low-data mode", Self::on_off(report.low_data.enabled)]);
        table.add_row(row![b -> "Auto low-data", Self::on_off(report.auto_low_data)]);
        table.add_row(row![b -> "Blocked domains", report.low_data.blocked_domains.len()]);
        table.add_row(row![b -> "Timezone", report.timezone]);
        output.push_str(&table.to_string());

        if !report.usage.domains.is_empty() {
            output.push('\n');
            output.push_str(&Self::domains_table(&report.usage));
        }
        if !report.usage.hourly.is_empty() {
            output.push('\n');
            output.push_str(&Self::hourly_table(&report.usage));
        }
        output
    }

    fn format_low_data(&self, status: &LowDataStatus) -> String {
        let mut output = format!("Low-data mode: {}\n", Self::on_off(status.enabled));
        if status.blocked_domains.is_empty() {
            output.push_str("No blocked domains\n");
        } else {
            output.push_str("Blocked domains:\n");
            for domain in &status.blocked_domains {
                output.push_str(&format!("  {domain}\n"));
            }
        }
        output
    }

    fn format_settings(&self, settings: &BudgetSettings) -> String {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_CLEAN);
        table.add_row(row![b -> "Daily budget", format_bytes(settings.daily_budget, 2)]);
        table.add_row(row![b -> "Monthly budget", format_bytes(settings.monthly_budget, 2)]);
        table.add_row(row![b -> "Alert threshold", format!("{}%", settings.alert_threshold)]);
        table.add_row(row![b -> "Alerts", Self::on_off(settings.alerts_enabled)]);
        table.to_string()
    }

    fn format_feed_summary(&self, summary: &FeedSummary, report: &StatusReport) -> String {
        let mut output = format!(
            "Processed {} events: {} requests, {} dropped, {} tabs closed, {} alerts, {} errors\n\n",
            summary.lines,
            summary.requests,
            summary.dropped,
            summary.tabs_closed,
            summary.alerts,
            summary.errors
        );
        output.push_str(&self.format_status(report));
        output
    }
}

/// JSON formatter for machine-readable output
pub struct JsonFormatter;

impl JsonFormatter {
    fn status_json(report: &StatusReport) -> serde_json::Value {
        json!({
            "usage": report.usage,
            "percentage": usage_percentage(report.usage.total_today, report.settings.daily_budget),
            "settings": report.settings,
            "lowDataMode": report.low_data.enabled,
            "autoLowData": report.auto_low_data,
            "blockedDomains": report.low_data.blocked_domains,
            "timezone": report.timezone,
        })
    }
}

impl OutputFormatter for JsonFormatter {
    fn format_status(&self, report: &StatusReport) -> String {
        serde_json::to_string_pretty(&Self::status_json(report)).unwrap_or_default()
    }

    fn format_low_data(&self, status: &LowDataStatus) -> String {
        serde_json::to_string_pretty(status).unwrap_or_default()
    }

    fn format_settings(&self, settings: &BudgetSettings) -> String {
        serde_json::to_string_pretty(settings).unwrap_or_default()
    }

    fn format_feed_summary(&self, summary: &FeedSummary, report: &StatusReport) -> String {
        let output = json!({
            "summary": summary,
            "status": Self::status_json(report),
        });
        serde_json::to_string_pretty(&output).unwrap_or_default()
    }
}

/// Get the appropriate formatter
pub fn get_formatter(json: bool) -> Box<dyn OutputFormatter> {
    if json {
        Box::new(JsonFormatter)
    } else {
        Box::new(TableFormatter)
    }
}

/// Prints notifications to stderr, colored by severity
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    /// Render a notification as a single line
    pub fn render(notification: &Notification) -> String {
        let title = match notification.severity {
            Severity::Info => notification.title.as_str().cyan(),
            Severity::Warning => notification.title.as_str().yellow(),
            Severity::High => notification.title.as_str().red(),
            Severity::Exceeded => notification.title.as_str().red().bold(),
        };
        format!("{}: {}", title, notification.message)
    }
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, notification: Notification) {
        eprintln!("{}", Self::render(&notification));
    }
}
