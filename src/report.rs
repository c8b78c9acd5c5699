//! Output formatting for the inspection tool
//!
//! Human readable output is styled with `console`; byte counts are
//! formatted with `humansize`. Every printer also has a JSON form.

use crate::lock::LockInfo;
use crate::types::{Metric, MetricName, PrefixInfo};
use console::style;
use humansize::{format_size, BINARY};
use serde::Serialize;
use serde_json::json;
use std::path::Path;

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Format a metric value in its natural unit
pub fn format_metric(metric: MetricName, value: u64) -> String {
    match metric {
        MetricName::TotalDiskUsage => format_size(value, BINARY),
        MetricName::TotalFileCount | MetricName::TotalPrefixCount => format_number(value),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_title(title: &str) {
    println!();
    println!("{}", style(title).green().bold());
    println!("{}", style("─".repeat(50)).dim());
}

fn scope_label(user: Option<&str>) -> String {
    match user {
        Some(user) => format!("user {}", user),
        None => "all users".to_string(),
    }
}

/// Print the total of one metric
pub fn print_total(metric: MetricName, user: Option<&str>, value: u64, as_json: bool) -> serde_json::Result<()> {
    if as_json {
        return print_json(&json!({
            "metric": metric.as_str(),
            "user": user,
            "value": value,
        }));
    }
    println!(
        "  {} {} ({})",
        style(format!("{}:", metric)).bold(),
        format_metric(metric, value),
        scope_label(user)
    );
    Ok(())
}

/// Print a top-N ranking
pub fn print_top(metric: MetricName, user: Option<&str>, top: &[Metric], as_json: bool) -> serde_json::Result<()> {
    if as_json {
        return print_json(top);
    }

    print_title(&format!("Top {} by {} ({})", top.len(), metric, scope_label(user)));
    let width = top.iter().map(|m| format_metric(metric, m.value).len()).max().unwrap_or(0);
    for (i, m) in top.iter().enumerate() {
        println!(
            "  {:>3}. {:>width$}  {}",
            i + 1,
            format_metric(metric, m.value),
            m.prefix,
            width = width
        );
    }
    println!();
    Ok(())
}

/// Print one stored prefix record
pub fn print_prefix(prefix: &str, info: &PrefixInfo, as_json: bool) -> serde_json::Result<()> {
    if as_json {
        return print_json(&json!({ "prefix": prefix, "info": info }));
    }

    print_title(prefix);
    println!("  {} {}", style("User:").bold(), info.user_id);
    println!("  {} {}", style("Files:").bold(), format_number(info.file_count));
    println!("  {} {}", style("Children:").bold(), format_number(info.child_count));
    println!("  {} {}", style("Disk Usage:").bold(), format_size(info.disk_usage, BINARY));
    if info.has_error() {
        println!("  {} {}", style("Error:").yellow().bold(), info.err);
    }
    println!();
    Ok(())
}

/// Print a list of records, one per line
pub fn print_records(records: &[(String, PrefixInfo)], errors: bool, as_json: bool) -> serde_json::Result<()> {
    if as_json {
        let rows: Vec<_> = records
            .iter()
            .map(|(prefix, info)| json!({ "prefix": prefix, "info": info }))
            .collect();
        return print_json(&rows);
    }

    for (prefix, info) in records {
        if errors {
            println!("{}: {}", style(prefix).bold(), style(&info.err).yellow());
        } else {
            println!(
                "{}  files={} children={} disk={} user={}",
                style(prefix).bold(),
                format_number(info.file_count),
                format_number(info.child_count),
                format_size(info.disk_usage, BINARY),
                info.user_id
            );
        }
    }
    Ok(())
}

/// Print a plain list of names
pub fn print_list<S: AsRef<str> + Serialize>(items: &[S], as_json: bool) -> serde_json::Result<()> {
    if as_json {
        return print_json(items);
    }
    for item in items {
        println!("{}", item.as_ref());
    }
    Ok(())
}

/// Print the current lock holder, if any
pub fn print_lock_info(dir: &Path, holder: Option<&LockInfo>, as_json: bool) -> serde_json::Result<()> {
    if as_json {
        return print_json(&holder);
    }

    match holder {
        Some(info) => {
            print_title("Write Lock Held");
            println!("  {} {}", style("Database:").bold(), dir.display());
            println!("  {} {}", style("User:").bold(), info.user);
            println!("  {} {}", style("Directory:").bold(), info.cwd);
            println!("  {} {}", style("PID:").bold(), info.pid);
            println!("  {} {}", style("Parent PID:").bold(), info.ppid);
            println!();
        }
        None => println!("{}: no writer holds the lock", dir.display()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_format_metric() {
        assert_eq!(format_metric(MetricName::TotalFileCount, 12345), "12,345");
        assert_eq!(format_metric(MetricName::TotalDiskUsage, 1024), "1 KiB");
        assert_eq!(format_metric(MetricName::TotalDiskUsage, 10), "10 B");
    }
}
