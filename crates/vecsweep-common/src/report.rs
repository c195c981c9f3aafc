use std::io::{self, Write};

use serde::Serialize;

use crate::cache::millions_label;
use crate::harness::{MeasurementResult, SweepConfig};

pub fn summary_line(result: &MeasurementResult) -> String {
    format!(
        "Dimension: {}, Number of Queries: {}, Avg. Search Time: {:.6} s",
        result.dimension, result.query_count, result.average_search_seconds
    )
}

/// Human-readable table, one line per result in sweep order.
pub fn write_summary(out: &mut dyn Write, results: &[MeasurementResult]) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "Summary of Results:")?;
    for result in results {
        writeln!(out, "{}", summary_line(result))?;
    }
    Ok(())
}

pub fn format_summary(results: &[MeasurementResult]) -> String {
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_summary(&mut buf, results);
    String::from_utf8_lossy(&buf).into_owned()
}

pub fn data_size_banner(database_rows: usize) -> String {
    format!("data size: {} M", millions_label(database_rows))
}

#[derive(Debug, Serialize)]
pub struct SweepReport<'a> {
    pub index: String,
    pub sweep: &'a SweepConfig,
    pub completed: bool,
    pub error: Option<String>,
    pub results: &'a [MeasurementResult],
}

impl SweepReport<'_> {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
