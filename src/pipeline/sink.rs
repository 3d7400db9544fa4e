//! CSV sink for result tables.

use crate::models::{EvalError, Result, ResultTable};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// One output row.
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    question: &'a str,
    #[serde(rename = "A")]
    a: &'a str,
    #[serde(rename = "B")]
    b: &'a str,
    #[serde(rename = "C")]
    c: &'a str,
    #[serde(rename = "D")]
    d: &'a str,
    correct_answer: &'static str,
    model_response: String,
}

/// Output file for a category inside `dir`.
pub fn result_path(dir: &Path, category: &str) -> PathBuf {
    dir.join(format!("{category}_results.csv"))
}

/// Write one row per table row, in table order, replacing any existing file.
pub fn write_table(table: &ResultTable, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| EvalError::io(format!("creating {}", parent.display()), e))?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    for row in &table.rows {
        let [a, b, c, d] = &row.item.options;
        writer.serialize(CsvRow {
            question: &row.item.question,
            a,
            b,
            c,
            d,
            correct_answer: row.item.expected.as_str(),
            model_response: row.result.response_json(),
        })?;
    }
    writer
        .flush()
        .map_err(|e| EvalError::io(format!("flushing {}", path.display()), e))?;

    info!(path = %path.display(), rows = table.len(), "Results written");
    Ok(())
}
