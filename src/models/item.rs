//! Dataset records and the work items built from them.

use super::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Multiple-choice answer label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    A,
    B,
    C,
    D,
}

impl Label {
    pub const ALL: [Label; 4] = [Label::A, Label::B, Label::C, Label::D];

    /// Convert a 1-based answer index (dataset convention) to a label.
    pub fn from_one_based(index: u8) -> Result<Self> {
        match index {
            1..=4 => Ok(Self::ALL[usize::from(index - 1)]),
            other => Err(EvalError::ParseError(format!(
                "answer index {other} out of range 1..=4"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            other => Err(EvalError::ParseError(format!("not an answer label: {other:?}"))),
        }
    }
}

/// One raw row from the dataset source.
///
/// Column names follow the KMMLU CSV layout; extra columns are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub question: String,
    /// 1-based index of the correct option
    pub answer: u8,
    #[serde(rename = "A")]
    pub a: String,
    #[serde(rename = "B")]
    pub b: String,
    #[serde(rename = "C")]
    pub c: String,
    #[serde(rename = "D")]
    pub d: String,
}

/// A question to evaluate, pinned to its position in the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable position in the source dataset
    pub index: usize,
    pub question: String,
    /// Options in A, B, C, D order
    pub options: [String; 4],
    pub expected: Label,
}

impl WorkItem {
    pub fn new(index: usize, question: impl Into<String>, options: [String; 4], expected: Label) -> Self {
        Self {
            index,
            question: question.into(),
            options,
            expected,
        }
    }

    /// Build a work item from the `index`-th dataset record.
    pub fn from_record(index: usize, record: Record) -> Result<Self> {
        let expected = Label::from_one_based(record.answer)
            .map_err(|e| EvalError::ParseError(format!("record {index}: {e}")))?;
        Ok(Self {
            index,
            question: record.question,
            options: [record.a, record.b, record.c, record.d],
            expected,
        })
    }

    /// Build work items for a whole category, indices following input order.
    pub fn from_records(records: Vec<Record>) -> Result<Vec<Self>> {
        records
            .into_iter()
            .enumerate()
            .map(|(index, record)| Self::from_record(index, record))
            .collect()
    }
}
