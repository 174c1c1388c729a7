// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Result formatting for CLI output

use super::commands::OutputFormat;
use super::runner::{NodeStats, RunReport};
use colored::*;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use distflow::{Datum, Row};

/// Formats the rows a flow returned
pub struct ResultFormatter;

impl ResultFormatter {
    pub fn format(report: &RunReport, format: OutputFormat) -> String {
        match format {
            OutputFormat::Table => Self::format_table(report),
            OutputFormat::Json => Self::format_json(report),
            OutputFormat::Csv => Self::format_csv(report),
        }
    }

    fn format_table(report: &RunReport) -> String {
        let mut output = String::new();
        if report.rows.is_empty() {
            output.push_str(&format!("{}\n", "No rows returned".yellow()));
        } else {
            output.push_str(&format!("{}\n", "Flow Results".bold().green()));
            output.push_str(&format!("Flow: {}\n", report.flow_id));
            output.push_str(&format!("Execution time: {} ms\n", report.execution_time_ms));
            output.push_str(&format!("Rows returned: {}\n\n", report.rows.len()));

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            let width = report.rows.iter().map(Vec::len).max().unwrap_or(0);
            table.set_header(
                (0..width)
                    .map(|i| Cell::new(format!("col{}", i)).fg(Color::Green))
                    .collect::<Vec<_>>(),
            );
            for row in &report.rows {
                table.add_row(Self::padded(row, width, Self::datum_to_string));
            }
            output.push_str(&table.to_string());
            output.push('\n');
        }

        if !report.remote_errors.is_empty() {
            output.push_str(&format!("\n{}\n", "Errors:".bold().red()));
            for (i, err) in report.remote_errors.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, err.message.red()));
            }
        }
        output
    }

    fn format_json(report: &RunReport) -> String {
        let rows: Vec<serde_json::Value> = report
            .rows
            .iter()
            .map(|row| serde_json::Value::Array(row.iter().map(Self::datum_to_json).collect()))
            .collect();
        let errors: Vec<&str> = report
            .remote_errors
            .iter()
            .map(|e| e.message.as_str())
            .collect();
        let json = serde_json::json!({
            "status": if errors.is_empty() { "success" } else { "error" },
            "flow_id": report.flow_id.to_string(),
            "rows": rows,
            "row_count": report.rows.len(),
            "errors": errors,
            "execution_time_ms": report.execution_time_ms,
        });
        let mut out = serde_json::to_string_pretty(&json).unwrap_or_else(|_| {
            "{\"status\": \"error\", \"error\": \"Could not serialize results to JSON\"}"
                .to_string()
        });
        out.push('\n');
        out
    }

    fn format_csv(report: &RunReport) -> String {
        let mut output = String::new();
        for row in &report.rows {
            let values: Vec<String> = row.iter().map(Self::datum_to_csv_string).collect();
            output.push_str(&values.join(","));
            output.push('\n');
        }
        if !report.remote_errors.is_empty() {
            output.push_str("\n# Errors:\n");
            for (i, err) in report.remote_errors.iter().enumerate() {
                output.push_str(&format!("# {}. {}\n", i + 1, err.message));
            }
        }
        output
    }

    /// Per-node server counters and memory usage
    pub fn format_metrics(stats: &[NodeStats], format: OutputFormat) -> String {
        match format {
            OutputFormat::Json => {
                let nodes: serde_json::Map<String, serde_json::Value> = stats
                    .iter()
                    .map(|s| {
                        (
                            s.node.to_string(),
                            serde_json::json!({ "counters": s.counters, "memory": s.memory }),
                        )
                    })
                    .collect();
                let mut out = serde_json::to_string_pretty(&serde_json::json!({ "nodes": nodes }))
                    .unwrap_or_default();
                out.push('\n');
                out
            }
            OutputFormat::Csv => {
                let mut out = String::from(
                    "node,flows_setup,setup_failures,flows_scheduled,sync_flows_run,inbound_streams_connected,inbound_stream_failures,peak_memory_bytes\n",
                );
                for s in stats {
                    let m = &s.counters;
                    out.push_str(&format!(
                        "{},{},{},{},{},{},{},{}\n",
                        s.node,
                        m.flows_setup,
                        m.setup_failures,
                        m.flows_scheduled,
                        m.sync_flows_run,
                        m.inbound_streams_connected,
                        m.inbound_stream_failures,
                        s.memory.peak
                    ));
                }
                out
            }
            OutputFormat::Table => {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(
                    ["node", "set up", "setup failures", "scheduled", "sync", "inbound", "inbound failures", "memory"]
                        .iter()
                        .map(|h| Cell::new(h).fg(Color::Green))
                        .collect::<Vec<_>>(),
                );
                for s in stats {
                    let m = &s.counters;
                    table.add_row(vec![
                        s.node.to_string(),
                        m.flows_setup.to_string(),
                        m.setup_failures.to_string(),
                        m.flows_scheduled.to_string(),
                        m.sync_flows_run.to_string(),
                        m.inbound_streams_connected.to_string(),
                        m.inbound_stream_failures.to_string(),
                        s.memory.format_human_readable(),
                    ]);
                }
                format!("\n{}\n{}\n", "Node Counters".bold().green(), table)
            }
        }
    }

    fn padded(row: &Row, width: usize, render: fn(&Datum) -> String) -> Vec<String> {
        let mut values: Vec<String> = row.iter().map(render).collect();
        values.resize(width, String::new());
        values
    }

    fn datum_to_string(datum: &Datum) -> String {
        match datum {
            Datum::Null => "NULL".to_string(),
            Datum::Bool(b) => b.to_string(),
            Datum::Int(i) => i.to_string(),
            Datum::Float(f) => f.to_string(),
            Datum::String(s) => s.clone(),
            Datum::Bytes(b) => Self::hex(b),
        }
    }

    fn datum_to_csv_string(datum: &Datum) -> String {
        match datum {
            Datum::Null => String::new(),
            Datum::String(s) if s.contains(',') || s.contains('"') => {
                format!("\"{}\"", s.replace('"', "\"\""))
            }
            other => Self::datum_to_string(other),
        }
    }

    fn datum_to_json(datum: &Datum) -> serde_json::Value {
        match datum {
            Datum::Null => serde_json::Value::Null,
            Datum::Bool(b) => serde_json::Value::Bool(*b),
            Datum::Int(i) => serde_json::json!(i),
            Datum::Float(f) => serde_json::json!(f),
            Datum::String(s) => serde_json::Value::String(s.clone()),
            Datum::Bytes(b) => serde_json::Value::String(Self::hex(b)),
        }
    }

    fn hex(bytes: &[u8]) -> String {
        let digits: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        format!("\\x{}", digits)
    }
}
