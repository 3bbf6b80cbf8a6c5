//! Renders a [`CycleResult`] as one console line.
//!
//! ```text
//! 2024-05-01T10:00:00.000Z Write 5 to a ✅(    3ms) Read 5 from a ✅(    1ms) 5 from b ✅(    2ms) 3 from c 🚫(    2ms)
//! ```
//!
//! Latencies are right-aligned to five characters. Read values are
//! right-aligned to the width of the expected value so columns line up from
//! one line to the next.

use std::time::Duration;

use chrono::SecondsFormat;

use crate::cycle::{CycleResult, NodeRead, ReadStatus, WriteOutcome};

const MATCH: &str = "✅";
const MISMATCH: &str = "🚫";
const ERROR: &str = "⛔️";

pub fn format_line(result: &CycleResult) -> String {
    let timestamp = result
        .started_at
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    let width = result.expected.to_string().len();
    let reads: Vec<String> = result
        .reads
        .iter()
        .map(|read| format_read(read, width))
        .collect();

    format!(
        "{timestamp} Write {} Read {}",
        format_write(&result.write),
        reads.join(" ")
    )
}

fn format_write(write: &WriteOutcome) -> String {
    match write {
        WriteOutcome::NoPrimary => "write error: no primary".to_string(),
        WriteOutcome::Written {
            node,
            value,
            latency,
            consistent,
            ..
        } => {
            let marker = if *consistent { MATCH } else { MISMATCH };
            format!("{value} to {node} {marker}({})", millis(*latency))
        }
        WriteOutcome::Failed {
            node,
            value,
            latency,
            ..
        } => {
            let blank = " ".repeat(value.to_string().len());
            format!("{blank} to {node} {ERROR}({})", millis(*latency))
        }
    }
}

fn format_read(read: &NodeRead, width: usize) -> String {
    let (value, marker) = match &read.status {
        ReadStatus::Observed { value, matches } => {
            let value = value.map(|v| v.to_string()).unwrap_or_default();
            (value, if *matches { MATCH } else { MISMATCH })
        }
        ReadStatus::Failed { .. } => (String::new(), ERROR),
    };
    format!(
        "{value:>width$} from {} {marker}({})",
        read.node,
        millis(read.latency)
    )
}

fn millis(latency: Duration) -> String {
    format!("{:>5}ms", latency.as_millis())
}
