//! Value stage: extract a sample vector from a test's output isolate.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::args::{ArgumentError, JobArguments};
use crate::kernel::EngineDeps;
use crate::quest::execution::StepResult;
use crate::quest::ResultArguments;

const OUTPUT_FILENAME: &str = "chartjson-output.json";

/// Histogram expansion emits at most this many samples; larger histograms
/// are scaled down proportionally.
const MAX_HISTOGRAM_VALUES: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ReadValueError {
    #[error("no output isolate to read values from")]
    MissingIsolate,
    #[error("the test didn't produce {0}")]
    MissingFile(String),
    #[error("the chart \"{0}\" is not in the results")]
    ChartNotFound(String),
    #[error("the trace \"{0}\" is not in the results")]
    TraceNotFound(String),
    #[error("malformed results data: {0}")]
    Malformed(String),
}

/// Quest: read values from telemetry chart JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadChartJson {
    chart: String,
    tir_label: Option<String>,
    trace: Option<String>,
}

impl ReadChartJson {
    pub fn new(
        chart: impl Into<String>,
        tir_label: Option<String>,
        trace: Option<String>,
    ) -> Self {
        Self {
            chart: chart.into(),
            tir_label,
            trace,
        }
    }

    pub fn from_args(arguments: &JobArguments) -> Result<Option<Self>, ArgumentError> {
        let Some(chart) = &arguments.chart else {
            return Ok(None);
        };
        Ok(Some(Self::new(
            chart.clone(),
            arguments.tir_label.clone(),
            arguments.trace.clone(),
        )))
    }

    pub(crate) fn start(&self, arguments: &ResultArguments) -> ReadChartJsonRun {
        ReadChartJsonRun {
            chart: self.chart.clone(),
            tir_label: self.tir_label.clone(),
            trace: self.trace.clone(),
            isolate_server: arguments.get("isolate_server").cloned(),
            isolate_hash: arguments.get("isolate_hash").cloned(),
            trace_urls: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceUrl {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadChartJsonRun {
    chart: String,
    tir_label: Option<String>,
    trace: Option<String>,
    isolate_server: Option<String>,
    isolate_hash: Option<String>,
    trace_urls: Vec<TraceUrl>,
}

impl ReadChartJsonRun {
    pub(crate) async fn poll(&mut self, deps: &EngineDeps) -> Result<StepResult> {
        let chartjson = retrieve_output_json(
            deps,
            self.isolate_server.as_deref(),
            self.isolate_hash.as_deref(),
        )
        .await?;

        // Capture any trace URLs, ordered by page id, for observability.
        if let Some(traces) = chartjson
            .get("charts")
            .and_then(|charts| charts.get("trace"))
            .and_then(Value::as_object)
        {
            let mut entries: Vec<_> = traces.iter().collect();
            entries.sort_by_key(|(_, details)| {
                details.get("page_id").and_then(Value::as_i64).unwrap_or(0)
            });
            self.trace_urls = entries
                .into_iter()
                .map(|(name, details)| TraceUrl {
                    name: name.clone(),
                    url: details
                        .get("cloud_url")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect();
        }

        let chart_name = match &self.tir_label {
            Some(tir_label) => format!("{}@@{}", tir_label, self.chart),
            None => self.chart.clone(),
        };
        let chart = chartjson
            .get("charts")
            .and_then(|charts| charts.get(&chart_name))
            .ok_or_else(|| ReadValueError::ChartNotFound(chart_name.clone()))?;

        let trace_name = self.trace.clone().unwrap_or_else(|| "summary".to_string());
        let entry = chart
            .get(&trace_name)
            .ok_or(ReadValueError::TraceNotFound(trace_name))?;

        let values = values_from_entry(entry)?;
        Ok(StepResult::Complete {
            values,
            arguments: ResultArguments::new(),
        })
    }

    pub(crate) fn details(&self) -> serde_json::Value {
        if self.trace_urls.is_empty() {
            return json!({});
        }
        json!({ "traces": self.trace_urls })
    }
}

/// Quest: read a single value from graph JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadGraphJson {
    chart: String,
    trace: String,
}

impl ReadGraphJson {
    pub fn new(chart: impl Into<String>, trace: impl Into<String>) -> Self {
        Self {
            chart: chart.into(),
            trace: trace.into(),
        }
    }

    pub fn from_args(arguments: &JobArguments) -> Result<Option<Self>, ArgumentError> {
        match (&arguments.chart, &arguments.trace) {
            (Some(chart), Some(trace)) => Ok(Some(Self::new(chart.clone(), trace.clone()))),
            _ => Ok(None),
        }
    }

    pub(crate) fn start(&self, arguments: &ResultArguments) -> ReadGraphJsonRun {
        ReadGraphJsonRun {
            chart: self.chart.clone(),
            trace: self.trace.clone(),
            isolate_server: arguments.get("isolate_server").cloned(),
            isolate_hash: arguments.get("isolate_hash").cloned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadGraphJsonRun {
    chart: String,
    trace: String,
    isolate_server: Option<String>,
    isolate_hash: Option<String>,
}

impl ReadGraphJsonRun {
    pub(crate) async fn poll(&mut self, deps: &EngineDeps) -> Result<StepResult> {
        let graphjson = retrieve_output_json(
            deps,
            self.isolate_server.as_deref(),
            self.isolate_hash.as_deref(),
        )
        .await?;

        let chart = graphjson
            .get(&self.chart)
            .ok_or_else(|| ReadValueError::ChartNotFound(self.chart.clone()))?;
        let trace = chart
            .get("traces")
            .and_then(|traces| traces.get(&self.trace))
            .ok_or_else(|| ReadValueError::TraceNotFound(self.trace.clone()))?;

        let value = trace
            .get(0)
            .and_then(as_f64)
            .ok_or_else(|| ReadValueError::Malformed(format!("trace \"{}\"", self.trace)))?;
        Ok(StepResult::Complete {
            values: vec![value],
            arguments: ResultArguments::new(),
        })
    }
}

/// Fetch and parse the test's output JSON: the outer digest is the isolate
/// manifest listing files; the named file's digest holds the data.
async fn retrieve_output_json(
    deps: &EngineDeps,
    isolate_server: Option<&str>,
    isolate_hash: Option<&str>,
) -> Result<Value> {
    let (Some(server), Some(digest)) = (isolate_server, isolate_hash) else {
        return Err(ReadValueError::MissingIsolate.into());
    };

    let manifest = fetch_json(deps, server, digest).await?;
    let file = manifest
        .get("files")
        .and_then(|files| files.get(OUTPUT_FILENAME))
        .ok_or_else(|| ReadValueError::MissingFile(OUTPUT_FILENAME.to_string()))?;
    let file_digest = file
        .get("h")
        .and_then(Value::as_str)
        .ok_or_else(|| ReadValueError::Malformed("file entry has no digest".to_string()))?;

    fetch_json(deps, server, file_digest).await
}

async fn fetch_json(deps: &EngineDeps, server: &str, digest: &str) -> Result<Value> {
    let bytes = deps.isolates.retrieve(server, digest).await?;
    serde_json::from_slice(&bytes)
        .map_err(|err| ReadValueError::Malformed(format!("invalid JSON: {err}")).into())
}

fn values_from_entry(entry: &Value) -> Result<Vec<f64>, ReadValueError> {
    match entry.get("type").and_then(Value::as_str) {
        Some("list_of_scalar_values") => entry
            .get("values")
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(as_f64).collect())
            .ok_or_else(|| ReadValueError::Malformed("list entry has no values".to_string())),
        Some("scalar") => entry
            .get("value")
            .and_then(as_f64)
            .map(|value| vec![value])
            .ok_or_else(|| ReadValueError::Malformed("scalar entry has no value".to_string())),
        Some("histogram") => entry
            .get("buckets")
            .and_then(Value::as_array)
            .map(|buckets| values_from_histogram(buckets))
            .ok_or_else(|| ReadValueError::Malformed("histogram has no buckets".to_string())),
        other => Err(ReadValueError::Malformed(format!(
            "unsupported entry type {:?}",
            other
        ))),
    }
}

/// Expand histogram buckets into individual samples at the bucket midpoint.
/// Bucket counts are scaled by integer division once the total exceeds the
/// cap, so huge histograms stay proportionate.
fn values_from_histogram(buckets: &[Value]) -> Vec<f64> {
    let total: u64 = buckets
        .iter()
        .filter_map(|bucket| bucket.get("count").and_then(Value::as_u64))
        .sum();

    let mut values = Vec::new();
    for bucket in buckets {
        let Some(low) = bucket.get("low").and_then(as_f64) else {
            continue;
        };
        let high = bucket.get("high").and_then(as_f64).unwrap_or(low);
        let count = bucket.get("count").and_then(Value::as_u64).unwrap_or(0);

        let count = if total > MAX_HISTOGRAM_VALUES {
            MAX_HISTOGRAM_VALUES * count / total
        } else {
            count
        };

        let midpoint = (low + high) / 2.0;
        values.extend(std::iter::repeat(midpoint).take(count as usize));
    }
    values
}

/// Charts sometimes carry numbers as strings; accept both.
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_entry_becomes_single_value() {
        let entry = json!({"type": "scalar", "value": 42.5});
        assert_eq!(values_from_entry(&entry).unwrap(), vec![42.5]);
    }

    #[test]
    fn list_entry_is_taken_verbatim() {
        let entry = json!({"type": "list_of_scalar_values", "values": [1.0, 2.0, 3.0]});
        assert_eq!(values_from_entry(&entry).unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn unsupported_entry_type_is_an_error() {
        let entry = json!({"type": "unsupported"});
        assert!(values_from_entry(&entry).is_err());
    }

    #[test]
    fn histogram_expands_buckets_to_midpoints() {
        let entry = json!({"type": "histogram", "buckets": [
            {"low": 0.0, "high": 2.0, "count": 3},
            {"low": 4.0, "count": 2},
        ]});
        assert_eq!(
            values_from_entry(&entry).unwrap(),
            vec![1.0, 1.0, 1.0, 4.0, 4.0]
        );
    }

    #[test]
    fn histogram_scales_counts_over_the_cap() {
        let buckets = vec![
            json!({"low": 0.0, "count": 30_000}),
            json!({"low": 1.0, "count": 10_000}),
        ];
        let values = values_from_histogram(&buckets);
        // 10_000 * 30_000 / 40_000 and 10_000 * 10_000 / 40_000.
        assert_eq!(values.iter().filter(|&&v| v == 0.0).count(), 7_500);
        assert_eq!(values.iter().filter(|&&v| v == 1.0).count(), 2_500);
    }

    #[test]
    fn histogram_cap_uses_integer_truncation() {
        let buckets = vec![
            json!({"low": 0.0, "count": 10_001}),
            json!({"low": 1.0, "count": 2}),
        ];
        let values = values_from_histogram(&buckets);
        assert_eq!(
            values.iter().filter(|&&v| v == 0.0).count(),
            (10_000u64 * 10_001 / 10_003) as usize
        );
        assert_eq!(values.iter().filter(|&&v| v == 1.0).count(), 1);
    }
}
