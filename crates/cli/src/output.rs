//! Plain-text and JSON rendering of results for the terminal.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use dedup_core::{DeletedFileRecord, FileDescriptor, TaskResult, TaskStatus};
use serde::Serialize;
use std::fmt::Write;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn status_line(status: &TaskStatus) -> String {
    match status {
        TaskStatus::Pending {
            progress: Some(progress),
        } => format!("pending ({}%)", progress),
        TaskStatus::Pending { progress: None } => "pending".to_string(),
        TaskStatus::Completed { result } => {
            format!("completed: {} group(s)", result.groups.len())
        }
        TaskStatus::Failed { reason } => format!("failed: {}", reason),
    }
}

pub fn groups_text(result: &TaskResult) -> String {
    if result.groups.is_empty() {
        return "no similar images found\n".to_string();
    }
    let mut out = String::new();
    for (i, group) in result.groups.iter().enumerate() {
        let _ = writeln!(out, "group {} ({} files)", i + 1, group.members.len());
        for (j, file) in group.members.iter().enumerate() {
            let _ = writeln!(
                out,
                "  {}. {:>10}  {}",
                j + 1,
                human_size(file.size),
                file.path.display()
            );
        }
        for pair in &group.distances {
            let _ = writeln!(out, "  distance {}-{}: {}", pair.a + 1, pair.b + 1, pair.distance);
        }
    }
    out
}

pub fn files_text(files: &[FileDescriptor]) -> String {
    let mut out = String::new();
    for file in files {
        let _ = writeln!(
            out,
            "{:>10}  {}  {}",
            human_size(file.size),
            timestamp(&file.modified_at),
            file.path.display()
        );
    }
    out
}

pub fn deleted_text(records: &[DeletedFileRecord]) -> String {
    let mut out = String::new();
    for record in records {
        let when = record
            .deleted_at
            .as_ref()
            .map(timestamp)
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(out, "{}  {}  {}", record.id, when, record.original_path.display());
    }
    out
}

/// Turns a task's status into the command's outcome: a failed task is an
/// error so the process exits non-zero.
pub fn task_outcome(status: &TaskStatus) -> Result<()> {
    match status {
        TaskStatus::Failed { reason } => bail!("analysis failed: {}", reason),
        _ => Ok(()),
    }
}

/// Prints a task status, with its groups when it completed. Fails after
/// printing if the task failed.
pub fn print_status(status: &TaskStatus, json: bool) -> Result<()> {
    if json {
        print_json(status)?;
    } else {
        println!("{}", status_line(status));
        if let Some(result) = status.result() {
            print!("{}", groups_text(result));
        }
    }
    task_outcome(status)
}
