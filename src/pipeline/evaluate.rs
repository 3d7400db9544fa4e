//! Evaluation pipeline.
//!
//! Pipeline flow:
//! Dataset category → WorkItems → Dispatcher (→ retry → router) → ResultTable → CSV

use crate::client::{EndpointRouter, RegionStats};
use crate::dataset::DatasetSource;
use crate::models::{Config, DispatchStats, Result, WorkItem};
use crate::pipeline::{result_path, write_table};
use crate::pool::{DispatchConfig, Dispatcher};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Summary of one evaluated category.
#[derive(Debug, Clone)]
pub struct CategoryReport {
    pub run_id: Uuid,
    pub category: String,
    pub path: PathBuf,
    pub stats: DispatchStats,
    pub accuracy: f64,
    /// Router counters for this category only, sorted by region
    pub regions: Vec<(String, RegionStats)>,
}

/// Evaluates dataset categories against one model and writes a table per category.
pub struct EvalPipeline {
    run_id: Uuid,
    config: Config,
    router: Arc<EndpointRouter>,
    source: Box<dyn DatasetSource>,
    show_progress: bool,
}

impl EvalPipeline {
    pub fn new(config: Config, router: Arc<EndpointRouter>, source: Box<dyn DatasetSource>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            config,
            router,
            source,
            show_progress: false,
        }
    }

    /// Draw a progress bar per category.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Identifier shared by every category of this run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn progress_bar(&self, category: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
        {
            pb.set_style(style.progress_chars("##-"));
        }
        pb.set_prefix(format!("Processing {category}"));
        pb
    }

    /// Evaluate one category and return the path written.
    pub async fn evaluate(&self, category: &str) -> Result<CategoryReport> {
        let eval = &self.config.evaluation;

        // Configuration errors abort before the dataset is fetched.
        self.router.resolve(&eval.model)?;

        let mut records = self
            .source
            .load(&eval.dataset_id, category, &eval.split)
            .await?;
        if let Some(limit) = eval.limit {
            records.truncate(limit);
        }
        let items = WorkItem::from_records(records)?;

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.router),
            eval.model.clone(),
            eval.mode,
            DispatchConfig::from_evaluation(eval),
        )
        .with_progress(self.progress_bar(category));

        let before: HashMap<String, RegionStats> = self.router.region_stats().into_iter().collect();
        let table = dispatcher.run(items).await?;
        let regions: Vec<(String, RegionStats)> = self
            .router
            .region_stats()
            .into_iter()
            .map(|(region, now)| {
                let delta = before.get(&region).map_or_else(|| now.clone(), |b| now.since(b));
                (region, delta)
            })
            .filter(|(_, delta)| delta.attempts > 0)
            .collect();

        let path = result_path(&self.config.output.dir, category);
        write_table(&table, &path)?;

        let report = CategoryReport {
            run_id: self.run_id,
            category: category.to_string(),
            path,
            accuracy: table.accuracy(),
            stats: table.stats,
            regions,
        };

        info!(
            run_id = %self.run_id,
            category = category,
            path = %report.path.display(),
            accuracy = format!("{:.1}%", report.accuracy * 100.0),
            failed = report.stats.failed,
            "Category complete"
        );
        for (region, stats) in &report.regions {
            debug!(
                region = %region,
                attempts = stats.attempts,
                throttled = stats.throttled,
                succeeded = stats.succeeded,
                failed = stats.failed,
                "Region usage"
            );
        }

        Ok(report)
    }

    /// Evaluate every configured category.
    ///
    /// A category that fails is logged and skipped; the remaining categories
    /// still run.
    pub async fn run(&self) -> Vec<(String, Result<CategoryReport>)> {
        let mut reports = Vec::with_capacity(self.config.evaluation.categories.len());
        info!(
            run_id = %self.run_id,
            model = %self.config.evaluation.model,
            categories = self.config.evaluation.categories.len(),
            "Starting evaluation run"
        );

        for category in &self.config.evaluation.categories {
            let result = self.evaluate(category).await;
            if let Err(e) = &result {
                error!(category = %category, error = %e, "Category aborted");
            }
            reports.push((category.clone(), result));
        }

        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ConverseOutput, ConverseRequest, ModelRegistry, ModelSpec, Transport};
    use crate::dataset::LocalSource;
    use crate::models::{CallError, EvalError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const ACCOUNTING: &str = "question,answer,A,B,C,D,Category,Human Accuracy\n\
q0,1,a,b,c,d,Accounting,0.5\n\
q1,2,a,b,c,d,Accounting,0.5\n\
q2,2,a,b,c,d,Accounting,0.5\n";

    /// Answers `A` to every question and counts calls.
    #[derive(Default)]
    struct AlwaysA {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for AlwaysA {
        async fn converse(
            &self,
            _region: &str,
            _request: &ConverseRequest,
        ) -> std::result::Result<ConverseOutput, CallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ConverseOutput {
                text: r#"```json
{"answer": "A", "reason": "first option"}
```"#
                    .to_string(),
                input_tokens: 1,
                output_tokens: 1,
                stop_reason: None,
            })
        }
    }

    fn pipeline(dir: &TempDir, model: &str, transport: Arc<AlwaysA>) -> EvalPipeline {
        std::fs::write(dir.path().join("Accounting-test.csv"), ACCOUNTING).unwrap();

        let mut config = Config::default();
        config.evaluation.model = model.to_string();
        config.evaluation.categories = vec!["Accounting".to_string(), "Law".to_string()];
        config.evaluation.retry_budget = 1;
        config.evaluation.max_resubmissions = 0;
        config.output.dir = dir.path().join("out");

        let registry = ModelRegistry::new(vec![
            ModelSpec::new("solo", "vendor.solo-v1:0").region("r1", "p1"),
        ]);
        let router = EndpointRouter::new(registry.into_shared(), transport)
            .with_failover_backoff(std::time::Duration::ZERO);

        EvalPipeline::new(config, Arc::new(router), Box::new(LocalSource::new(dir.path())))
    }

    #[tokio::test]
    async fn test_evaluate_writes_category_csv() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(AlwaysA::default());
        let pipeline = pipeline(&dir, "solo", Arc::clone(&transport));

        let report = pipeline.evaluate("Accounting").await.unwrap();
        assert_eq!(report.path, dir.path().join("out").join("Accounting_results.csv"));
        assert_eq!(report.run_id, pipeline.run_id());
        assert_eq!(report.stats.succeeded, 3);
        assert!((report.accuracy - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);

        let mut reader = csv::Reader::from_path(&report.path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        let questions: Vec<&str> = rows.iter().map(|r| &r[0]).collect();
        assert_eq!(questions, vec!["q0", "q1", "q2"]);
        assert_eq!(&rows[1][5], "B");
    }

    #[tokio::test]
    async fn test_region_usage_is_per_category() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir, "solo", Arc::new(AlwaysA::default()));
        std::fs::write(dir.path().join("Law-test.csv"), ACCOUNTING).unwrap();

        let first = pipeline.evaluate("Accounting").await.unwrap();
        let second = pipeline.evaluate("Law").await.unwrap();
        assert_eq!(first.regions.len(), 1);
        assert_eq!(first.regions[0].1.attempts, 3);
        assert_eq!(second.regions[0].0, "r1");
        assert_eq!(second.regions[0].1.attempts, 3);
        assert_eq!(second.regions[0].1.succeeded, 3);

        // The router itself keeps run totals.
        assert_eq!(pipeline.router.region_stats()[0].1.attempts, 6);
    }

    #[tokio::test]
    async fn test_run_continues_past_missing_category() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir, "solo", Arc::new(AlwaysA::default()));

        let reports = pipeline.run().await;
        assert_eq!(reports.len(), 2);
        assert!(reports[0].1.is_ok());
        assert!(matches!(reports[1].1, Err(EvalError::Io { .. })));
    }

    #[tokio::test]
    async fn test_unknown_model_aborts_before_loading() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(AlwaysA::default());
        let pipeline = pipeline(&dir, "Nova Pro", Arc::clone(&transport));

        let err = pipeline.evaluate("Accounting").await.unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_limit_truncates_items() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = pipeline(&dir, "solo", Arc::new(AlwaysA::default()));
        pipeline.config.evaluation.limit = Some(2);

        let report = pipeline.evaluate("Accounting").await.unwrap();
        assert_eq!(report.stats.total, 2);
    }
}
