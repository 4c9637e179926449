// Output formatting and display for CLI

use crate::config::ProjectFile;
use crate::events::{LogKind, LogRecord, Notification};
use crate::process::{ExitInfo, ProcessId, ResourceUsage};
use colored::*;
use std::collections::HashMap;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print one notification, as a JSON line or in human form
pub fn print_notification(
    notification: &Notification,
    names: &HashMap<ProcessId, String>,
    json: bool,
) {
    if json {
        match serde_json::to_string(notification) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::error!("Failed to serialize {}: {}", notification.name(), e),
        }
        return;
    }

    match notification {
        Notification::LogBatch(records) => {
            for record in records {
                print_log_record(record, names);
            }
        }

        Notification::ProcessCrash(crash) => {
            let exit = ExitInfo {
                code: crash.exit_code,
                signal: crash.signal.clone(),
            };
            let follow_up = if crash.will_restart {
                "restarting".yellow()
            } else {
                "not restarting".red()
            };
            println!(
                "{} {} crashed ({}), {}",
                "✗".red().bold(),
                display_name(&crash.process_id, names).bold(),
                exit,
                follow_up
            );
        }

        Notification::ProcessRestart(restart) => {
            println!(
                "{} {} restarted (attempt {}/{})",
                "↻".yellow().bold(),
                display_name(&restart.process_id, names).bold(),
                restart.retry_count,
                restart.max_retries
            );
        }
    }
}

fn print_log_record(record: &LogRecord, names: &HashMap<ProcessId, String>) {
    let prefix = format!("[{}]", display_name(&record.process_id, names)).cyan();

    match record.kind {
        LogKind::Stdout => {
            print!("{} {}", prefix, record.output.as_deref().unwrap_or_default());
        }
        LogKind::Stderr => {
            print!(
                "{} {}",
                prefix,
                record.output.as_deref().unwrap_or_default().red()
            );
        }
        LogKind::Exit => {
            let exit = ExitInfo {
                code: record.code,
                signal: record.signal.clone(),
            };
            println!("{} {}", prefix, format!("exited with {}", exit).dimmed());
        }
    }
}

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

pub fn print_started(name: &str, id: &ProcessId) {
    println!(
        "{} Started {} {}",
        "✓".green().bold(),
        name.cyan(),
        format!("({})", id).dimmed()
    );
}

/// Print a formatted table of sampled resource usage
pub fn print_resource_table(
    usage: &HashMap<ProcessId, ResourceUsage>,
    names: &HashMap<ProcessId, String>,
) {
    #[derive(Tabled)]
    struct UsageRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "CPU")]
        cpu: String,
        #[tabled(rename = "Memory")]
        memory: String,
    }

    let mut rows: Vec<UsageRow> = usage
        .iter()
        .map(|(id, u)| UsageRow {
            name: truncate(&display_name(id, names), 20),
            cpu: format!("{:.1}%", u.cpu),
            memory: format_memory(u.memory_bytes),
        })
        .collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
}

/// Print the resolved processes of a project
pub fn print_definitions(project: &ProjectFile) {
    #[derive(Tabled)]
    struct DefinitionRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Group")]
        group: String,
        #[tabled(rename = "Directory")]
        cwd: String,
        #[tabled(rename = "Command")]
        command: String,
        #[tabled(rename = "Restart")]
        restart: String,
    }

    let rows: Vec<DefinitionRow> = project
        .processes
        .iter()
        .map(|p| DefinitionRow {
            name: p.name.clone(),
            group: p.group.clone().unwrap_or_else(|| "-".to_string()),
            cwd: p.resolve_cwd(&project.root).display().to_string(),
            command: truncate(&p.command_line(), 40),
            restart: match p.restart {
                Some(ref policy) if policy.enabled => format!(
                    "{} x {}ms",
                    policy.max_retries, policy.delay_ms
                ),
                _ => "off".to_string(),
            },
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("{} {}", "✓".green().bold(), project.project_name.bold());
    println!("\n{}\n", table);
    println!(
        "{}",
        format!("Total: {} process(es)", project.processes.len())
            .dimmed()
            .italic()
    );
}

fn display_name(id: &ProcessId, names: &HashMap<ProcessId, String>) -> String {
    names
        .get(id)
        .cloned()
        .unwrap_or_else(|| id.as_str().chars().take(8).collect())
}

/// Format memory usage in human-readable format
fn format_memory(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{}B", bytes)
    } else if bytes < MB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    }
}

/// Truncate a string to a maximum number of characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
