use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use sensorlink_caps::{CapabilityRegistry, Feature};
use sensorlink_peer::ControllerEvent;
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize, Debug, PartialEq)]
struct EventOutput {
    event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    values: Vec<String>,
    timestamp: String,
}

fn describe(event: &ControllerEvent) -> EventOutput {
    let (name, detail, values) = match event {
        ControllerEvent::Completed { .. } => ("completed", None, Vec::new()),
        ControllerEvent::Errored { message, .. } => ("errored", Some(message.clone()), Vec::new()),
        ControllerEvent::Unsupported { sensor, .. } => {
            ("unsupported", Some(sensor.clone()), Vec::new())
        }
        ControllerEvent::SegmentSaved { chunk_index, .. } => {
            ("segment", Some(format!("chunk {chunk_index}")), Vec::new())
        }
        ControllerEvent::Reading { values, .. } => ("reading", None, values.clone()),
        ControllerEvent::Features { sensor, .. } => ("features", Some(sensor.to_string()), Vec::new()),
        ControllerEvent::Proximity { message } => ("proximity", Some(message.clone()), Vec::new()),
        ControllerEvent::Pong { .. } => ("pong", None, Vec::new()),
    };
    EventOutput {
        event: name,
        task_id: event.task_id(),
        detail,
        values,
        timestamp: now_unix_seconds(),
    }
}

pub fn print_event(event: &ControllerEvent, format: OutputFormat) {
    let out = describe(event);
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "TASK", "DETAIL"])
                .add_row(vec![
                    out.event.to_string(),
                    out.task_id.map_or_else(|| "-".to_string(), |id| id.to_string()),
                    detail_text(&out),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let task = out
                .task_id
                .map_or_else(|| "-".to_string(), |id| id.to_string());
            println!("{} task={} {}", out.event, task, detail_text(&out));
        }
    }
}

fn detail_text(out: &EventOutput) -> String {
    match (&out.detail, out.values.is_empty()) {
        (Some(detail), _) => detail.clone(),
        (None, false) => out.values.join(", "),
        (None, true) => String::new(),
    }
}

#[derive(Serialize)]
struct SensorOutput<'a> {
    sensor: String,
    features: &'a [Feature],
}

pub fn print_capabilities(registry: &CapabilityRegistry, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out: Vec<SensorOutput<'_>> = registry
                .iter()
                .map(|caps| SensorOutput {
                    sensor: caps.sensor().to_string(),
                    features: caps.features(),
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SENSOR", "FEATURE", "TYPE", "LIMITER", "VALUES", "CURRENT"]);
            for caps in registry.iter() {
                for feature in caps.features() {
                    table.add_row(vec![
                        caps.sensor().to_string(),
                        feature.name.clone(),
                        feature.data_type.to_string(),
                        feature.limiter.to_string(),
                        feature.allowed_values.join(", "),
                        feature.current.clone(),
                    ]);
                }
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for caps in registry.iter() {
                println!("{}:", caps.sensor());
                for feature in caps.features() {
                    println!(
                        "  {} = {} ({} {} [{}])",
                        feature.name,
                        feature.current,
                        feature.data_type,
                        feature.limiter,
                        feature.allowed_values.join(", ")
                    );
                }
            }
        }
    }
}

/// One-line status for long-running commands.
pub fn print_status(status: &str, detail: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = serde_json::json!({
                "status": status,
                "detail": detail,
                "timestamp": now_unix_seconds(),
            });
            println!("{out}");
        }
        OutputFormat::Table | OutputFormat::Pretty => println!("{status}: {detail}"),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
