//! Model outputs, per-item results and the assembled result table.

use super::{Label, WorkItem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured answer expected from the graded-answer variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// The answer to the question
    pub answer: Label,
    /// The reason for the answer
    #[serde(default)]
    pub reason: String,
}

/// Output of one successful router invocation.
///
/// `parsed` and `parsing_error` are only meaningful for graded calls. A graded
/// call whose text cannot be parsed still succeeds: the raw text is kept and
/// `parsing_error` says why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    /// Text returned by the model
    pub raw: String,
    /// Extracted answer (graded mode)
    pub parsed: Option<Answer>,
    /// Why extraction failed (graded mode)
    pub parsing_error: Option<String>,
    /// Region that served the call
    pub region: String,
    /// Fully-qualified endpoint id that served the call
    pub model_id: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Why the model stopped generating, as reported by the endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl ModelOutput {
    /// Extracted label, if any.
    pub fn label(&self) -> Option<Label> {
        self.parsed.as_ref().map(|a| a.answer)
    }
}

/// Terminal state of a result slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Succeeded,
    FailedPermanently,
}

/// Outcome recorded for one work item index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationResult {
    pub index: usize,
    pub status: SlotStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<ModelOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Units of work spent on this index (1 + resubmissions)
    pub units: u32,
    pub completed_at: DateTime<Utc>,
}

impl InvocationResult {
    pub fn succeeded(index: usize, output: ModelOutput, units: u32) -> Self {
        Self {
            index,
            status: SlotStatus::Succeeded,
            output: Some(output),
            error: None,
            units,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(index: usize, error: impl Into<String>, units: u32) -> Self {
        Self {
            index,
            status: SlotStatus::FailedPermanently,
            output: None,
            error: Some(error.into()),
            units,
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SlotStatus::Succeeded
    }

    /// Value written to the `model_response` column.
    pub fn response_json(&self) -> String {
        let value = match (&self.output, &self.error) {
            (Some(output), _) => serde_json::json!({
                "raw": output.raw,
                "parsed": output.parsed,
                "parsing_error": output.parsing_error,
            }),
            (None, error) => serde_json::json!({ "error": error }),
        };
        value.to_string()
    }
}

/// A work item joined with its result.
#[derive(Debug, Clone)]
pub struct ResultRow {
    pub item: WorkItem,
    pub result: InvocationResult,
}

impl ResultRow {
    /// Whether the extracted answer matches the expected label.
    pub fn is_correct(&self) -> bool {
        self.result
            .output
            .as_ref()
            .and_then(ModelOutput::label)
            .is_some_and(|label| label == self.item.expected)
    }
}

/// Batch outcome counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Units of work re-enqueued after a failure
    pub resubmissions: usize,
    /// Units of work executed, including resubmissions
    pub units: usize,
    pub runtime_secs: f64,
}

impl DispatchStats {
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.succeeded == self.total
    }
}

/// Results in dataset order, one row per work item.
#[derive(Debug, Clone, Default)]
pub struct ResultTable {
    pub rows: Vec<ResultRow>,
    pub stats: DispatchStats,
}

impl ResultTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Indices in row order.
    pub fn indices(&self) -> Vec<usize> {
        self.rows.iter().map(|r| r.item.index).collect()
    }

    /// Rows whose slot failed permanently.
    pub fn failures(&self) -> impl Iterator<Item = &ResultRow> {
        self.rows.iter().filter(|r| !r.result.is_success())
    }

    /// Fraction of rows answered correctly.
    pub fn accuracy(&self) -> f64 {
        if self.rows.is_empty() {
            return 0.0;
        }
        let correct = self.rows.iter().filter(|r| r.is_correct()).count();
        correct as f64 / self.rows.len() as f64
    }
}
