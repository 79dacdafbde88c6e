//! Status command implementation.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Status report from the server.
#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    pending_records: u64,
    #[serde(default)]
    partitions: u64,
    #[serde(default)]
    seconds_since_last_flush: u64,
    config: Option<Thresholds>,
    #[serde(default)]
    components: BTreeMap<String, ComponentStatus>,
}

#[derive(Debug, Deserialize)]
struct Thresholds {
    flush_interval_seconds: u64,
    max_lines_per_flush: u64,
}

/// Component status from the server.
#[derive(Debug, Deserialize)]
struct ComponentStatus {
    status: String,
    message: Option<String>,
}

/// Show status and health.
pub async fn run(url: &str) -> Result<()> {
    let base = url.trim_end_matches('/').trim_end_matches("/health");
    println!("Checking health at {}...\n", base);

    let client = reqwest::Client::new();
    let health_url = format!("{}/health", base);

    let response = match client.get(&health_url).send().await {
        Ok(response) => response,
        Err(e) => {
            println!("Failed to connect to health endpoint: {}", e);
            println!("\nIs the r2b ingester running?");
            println!("Start it with: r2b ingest --config <path-to-config>");
            return Err(anyhow!("health endpoint unreachable at {}", health_url));
        }
    };

    let status_code = response.status();
    let status: StatusResponse = response
        .json()
        .await
        .with_context(|| format!("Failed to parse health response (HTTP {})", status_code))?;
    print_status(&status, status_code.as_u16());

    let metrics_url = format!("{}/metrics", base);
    println!("\n--- Metrics ---");

    match client.get(&metrics_url).send().await {
        Ok(response) => {
            let text = response.text().await.context("Failed to read metrics")?;
            print_metrics(&text);
        }
        Err(e) => {
            println!("Failed to fetch metrics: {}", e);
        }
    }

    if status.status == "unhealthy" {
        return Err(anyhow!("health endpoint reports unhealthy"));
    }
    Ok(())
}

fn badge(status: &str) -> &'static str {
    match status {
        "healthy" => "[OK]",
        "degraded" => "[WARN]",
        "unhealthy" => "[FAIL]",
        _ => "[?]",
    }
}

fn print_status(status: &StatusResponse, status_code: u16) {
    println!(
        "{} Overall Status: {} (HTTP {})",
        badge(&status.status),
        status.status.to_uppercase(),
        status_code
    );
    println!();
    println!("Pending records:   {}", format_number(status.pending_records));
    println!("Partition keys:    {}", status.partitions);
    println!("Since last flush:  {}s", status.seconds_since_last_flush);
    if let Some(config) = &status.config {
        println!(
            "Thresholds:        {} records or {}s",
            config.max_lines_per_flush, config.flush_interval_seconds
        );
    }

    if !status.components.is_empty() {
        println!();
        println!("Components:");
        for (name, component) in &status.components {
            let badge = badge(&component.status);
            if let Some(msg) = &component.message {
                println!("  {} {}: {} ({})", badge, name, component.status, msg);
            } else {
                println!("  {} {}: {}", badge, name, component.status);
            }
        }
    }
}

fn parse_metrics(metrics_text: &str) -> HashMap<&str, u64> {
    let mut values = HashMap::new();

    for line in metrics_text.lines() {
        if line.starts_with('#') || line.is_empty() {
            continue;
        }

        // Parse "metric_name value" format
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 2 {
            if let Ok(value) = parts[1].parse::<u64>() {
                values.insert(parts[0], value);
            }
        }
    }

    values
}

fn print_metrics(metrics_text: &str) {
    let values = parse_metrics(metrics_text);

    let rows = [
        ("r2b_records_ingested_total", "Records Ingested:"),
        ("r2b_records_flushed_total", "Records Flushed: "),
        ("r2b_records_dropped_total", "Records Dropped: "),
        ("r2b_flushes_total", "Buffer Flushes:  "),
        ("r2b_sink_failures_total", "Sink Failures:   "),
    ];
    for (metric, label) in rows {
        if let Some(v) = values.get(metric) {
            println!("{} {}", label, format_number(*v));
        }
    }

    if values.is_empty() {
        println!("No metrics available yet.");
    }
}

fn format_number(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1_000_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}
