//! Batch dispatcher: bounded-concurrency evaluation of a whole item set.
//!
//! Every item starts as one unit of work. A unit holds a pool permit for its
//! whole lifetime, drives the router through the retry wrapper, and on
//! success writes the item's slot. A failed unit is resubmitted into the same
//! pool until the item's resubmission cap is reached, after which the slot is
//! marked failed and the batch moves on.

use crate::client::EndpointRouter;
use crate::models::{
    DispatchStats, EvalError, EvaluationConfig, InvocationRequest, InvocationResult, OutputMode,
    Result, ResultRow, ResultTable, WorkItem,
};
use crate::pool::RetryPolicy;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use indicatif::ProgressBar;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Dispatcher tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Maximum concurrent units of work
    pub concurrency: usize,
    /// In-place retry policy for each unit
    pub retry: RetryPolicy,
    /// Resubmissions per item before its slot is marked failed
    pub max_resubmissions: u32,
}

impl DispatchConfig {
    pub fn new(concurrency: usize, retry_budget: u32) -> Self {
        Self {
            concurrency: concurrency.max(1),
            retry: RetryPolicy::fixed(retry_budget, Duration::from_secs(30)),
            max_resubmissions: 5,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry.delay = delay;
        self
    }

    pub fn with_max_resubmissions(mut self, max: u32) -> Self {
        self.max_resubmissions = max;
        self
    }

    pub fn from_evaluation(config: &EvaluationConfig) -> Self {
        Self::new(config.concurrency, config.retry_budget)
            .with_retry_delay(Duration::from_secs(config.retry_delay_secs))
            .with_max_resubmissions(config.max_resubmissions)
    }
}

/// Slots shared by all units. Keys are disjoint per unit; first write wins.
type Slots = Arc<DashMap<usize, InvocationResult>>;

/// Aborts the wrapped task when dropped, so aborting a unit also stops its call.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// What a finished unit reports back to the dispatcher loop.
struct UnitOutcome {
    index: usize,
    /// `Ok(true)` if this unit filled the slot, `Ok(false)` if it was already filled
    result: Result<bool>,
}

/// Runs a batch of work items against one model.
pub struct Dispatcher {
    router: Arc<EndpointRouter>,
    model: String,
    mode: OutputMode,
    config: DispatchConfig,
    progress: ProgressBar,
}

impl Dispatcher {
    /// Create a dispatcher with a hidden progress bar.
    pub fn new(
        router: Arc<EndpointRouter>,
        model: impl Into<String>,
        mode: OutputMode,
        config: DispatchConfig,
    ) -> Self {
        Self {
            router,
            model: model.into(),
            mode,
            config,
            progress: ProgressBar::hidden(),
        }
    }

    /// Report progress on `progress`: one tick per item on its first success.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> &ProgressBar {
        &self.progress
    }

    /// Evaluate every item. The returned table is in input order.
    ///
    /// Fails only on configuration errors (unknown model, duplicate indices)
    /// or a broken internal invariant; per-item failures end up in the table.
    pub async fn run(&self, items: Vec<WorkItem>) -> Result<ResultTable> {
        let start = Instant::now();

        // Unknown models abort before any unit is spawned.
        self.router.resolve(&self.model)?;

        let mut seen = HashSet::with_capacity(items.len());
        if let Some(dup) = items.iter().find(|item| !seen.insert(item.index)) {
            return Err(EvalError::InvalidInput(format!(
                "duplicate work item index {}",
                dup.index
            )));
        }

        let total = items.len();
        let slots: Slots = Arc::new(DashMap::with_capacity(total));
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut units = JoinSet::new();
        let mut resubmissions: HashMap<usize, u32> = HashMap::new();
        let mut stats = DispatchStats {
            total,
            ..Default::default()
        };

        info!(
            model = %self.model,
            items = total,
            concurrency = self.config.concurrency,
            retry_budget = self.config.retry.max_attempts,
            "Starting batch"
        );

        self.progress.set_length(total as u64);
        let by_index: HashMap<usize, &WorkItem> = items.iter().map(|i| (i.index, i)).collect();
        for item in &items {
            self.spawn_unit(&mut units, item.clone(), 1, &semaphore, &slots);
        }

        while let Some(joined) = units.join_next().await {
            stats.units += 1;

            let UnitOutcome { index, result } = joined.map_err(|e| {
                EvalError::Internal(format!("unit supervisor failed: {e}"))
            })?;

            match result {
                Ok(true) => self.progress.inc(1),
                Ok(false) => debug!(index = index, "Slot already filled, discarding completion"),
                Err(e) if e.is_configuration() => {
                    units.abort_all();
                    self.progress.abandon();
                    return Err(e);
                }
                Err(e) => {
                    let count = resubmissions.entry(index).or_insert(0);
                    if *count >= self.config.max_resubmissions {
                        error!(
                            index = index,
                            resubmissions = *count,
                            kind = ?e.call_kind(),
                            error = %e,
                            "Item failed permanently"
                        );
                        slots
                            .entry(index)
                            .or_insert_with(|| InvocationResult::failed(index, e.to_string(), *count + 1));
                        stats.failed += 1;
                        self.progress
                            .set_message(format!("failed: {}", stats.failed));
                        continue;
                    }

                    *count += 1;
                    stats.resubmissions += 1;
                    warn!(
                        index = index,
                        resubmission = *count,
                        kind = ?e.call_kind(),
                        error = %e,
                        "Unit failed, resubmitting"
                    );
                    let item = by_index
                        .get(&index)
                        .ok_or_else(|| EvalError::Internal(format!("unknown item index {index}")))?;
                    let unit = *count + 1;
                    self.spawn_unit(&mut units, WorkItem::clone(item), unit, &semaphore, &slots);
                }
            }
        }

        let mut rows = Vec::with_capacity(total);
        for item in items {
            let (_, result) = slots.remove(&item.index).ok_or_else(|| {
                EvalError::Internal(format!("no result recorded for index {}", item.index))
            })?;
            rows.push(ResultRow { item, result });
        }

        stats.succeeded = rows.iter().filter(|r| r.result.is_success()).count();
        stats.failed = total - stats.succeeded;
        stats.runtime_secs = start.elapsed().as_secs_f64();

        self.progress.finish_with_message(format!(
            "done: {} succeeded, {} failed",
            stats.succeeded, stats.failed
        ));

        info!(
            model = %self.model,
            succeeded = stats.succeeded,
            failed = stats.failed,
            resubmissions = stats.resubmissions,
            units = stats.units,
            runtime_secs = format!("{:.1}", stats.runtime_secs),
            "Batch complete"
        );

        Ok(ResultTable { rows, stats })
    }

    /// Spawn one unit of work for `item`.
    ///
    /// The supervising task never panics: a panic inside the unit is turned
    /// into a failed outcome so the item can be resubmitted.
    fn spawn_unit(
        &self,
        units: &mut JoinSet<UnitOutcome>,
        item: WorkItem,
        unit: u32,
        semaphore: &Arc<Semaphore>,
        slots: &Slots,
    ) {
        let index = item.index;
        let router = Arc::clone(&self.router);
        let semaphore = Arc::clone(semaphore);
        let slots = Arc::clone(slots);
        let request = InvocationRequest::for_item(&item, &self.model, self.mode);
        let retry = self.config.retry;

        units.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return UnitOutcome {
                        index,
                        result: Err(EvalError::Internal("Semaphore closed".to_string())),
                    };
                }
            };

            let handle = tokio::spawn(async move {
                let output = retry.run(|| router.invoke(&request)).await?;
                let filled = match slots.entry(index) {
                    Entry::Occupied(_) => false,
                    Entry::Vacant(slot) => {
                        slot.insert(InvocationResult::succeeded(index, output, unit));
                        true
                    }
                };
                Ok::<_, EvalError>(filled)
            });
            let _call = AbortOnDrop(handle.abort_handle());

            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(EvalError::TaskFailed(e.to_string())),
            };
            UnitOutcome { index, result }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ConverseOutput, ConverseRequest, ModelRegistry, ModelSpec, Transport};
    use crate::models::{CallError, Label, SlotStatus};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Single-region transport keyed on the question line of the prompt.
    ///
    /// Each question fails its first `failures` calls, then answers `A`.
    /// Calls sleep for the question's latency, so tests run with paused time.
    #[derive(Default)]
    struct FlakyTransport {
        failures: HashMap<String, u32>,
        panics: HashSet<String>,
        latency: HashMap<String, Duration>,
        calls: Mutex<HashMap<String, u32>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FlakyTransport {
        fn fail(mut self, question: &str, times: u32) -> Self {
            self.failures.insert(question.to_string(), times);
            self
        }

        fn panic_once(mut self, question: &str) -> Self {
            self.panics.insert(question.to_string());
            self
        }

        fn latency(mut self, question: &str, latency: Duration) -> Self {
            self.latency.insert(question.to_string(), latency);
            self
        }

        fn calls(&self, question: &str) -> u32 {
            self.calls.lock().unwrap().get(question).copied().unwrap_or(0)
        }

        fn total_calls(&self) -> u32 {
            self.calls.lock().unwrap().values().sum()
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn converse(
            &self,
            _region: &str,
            request: &ConverseRequest,
        ) -> std::result::Result<ConverseOutput, CallError> {
            let question = request.messages[0]
                .content
                .lines()
                .next()
                .unwrap_or_default()
                .to_string();
            let call = {
                let mut calls = self.calls.lock().unwrap();
                let count = calls.entry(question.clone()).or_insert(0);
                *count += 1;
                *count
            };

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let latency = self
                .latency
                .get(&question)
                .copied()
                .unwrap_or(Duration::from_millis(10));
            tokio::time::sleep(latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if call == 1 && self.panics.contains(&question) {
                panic!("transport blew up on {question}");
            }
            if call <= self.failures.get(&question).copied().unwrap_or(0) {
                return Err(CallError::transient("connection reset"));
            }
            Ok(ConverseOutput {
                text: format!(r#"{{"answer":"A","reason":"{question}"}}"#),
                input_tokens: 10,
                output_tokens: 5,
                stop_reason: Some("end_turn".to_string()),
            })
        }
    }

    fn router(transport: Arc<FlakyTransport>) -> Arc<EndpointRouter> {
        let registry = ModelRegistry::new(vec![
            ModelSpec::new("solo", "vendor.solo-v1:0").region("r1", "p1"),
        ]);
        Arc::new(
            EndpointRouter::new(registry.into_shared(), transport)
                .with_failover_backoff(Duration::ZERO),
        )
    }

    fn items(count: usize) -> Vec<WorkItem> {
        (0..count)
            .map(|i| {
                WorkItem::new(
                    i,
                    format!("q{i}"),
                    ["w".into(), "x".into(), "y".into(), "z".into()],
                    Label::A,
                )
            })
            .collect()
    }

    fn dispatcher(
        transport: &Arc<FlakyTransport>,
        concurrency: usize,
        retry_budget: u32,
    ) -> Dispatcher {
        Dispatcher::new(
            router(Arc::clone(transport)),
            "solo",
            OutputMode::Graded,
            DispatchConfig::new(concurrency, retry_budget).with_retry_delay(Duration::ZERO),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_rows_follow_input_order() {
        // Item 0 finishes last, item 3 first.
        let transport = Arc::new(
            FlakyTransport::default()
                .latency("q0", Duration::from_millis(400))
                .latency("q1", Duration::from_millis(300))
                .latency("q2", Duration::from_millis(200))
                .latency("q3", Duration::from_millis(100)),
        );
        let table = dispatcher(&transport, 4, 1).run(items(4)).await.unwrap();

        assert_eq!(table.indices(), vec![0, 1, 2, 3]);
        for row in &table.rows {
            let output = row.result.output.as_ref().unwrap();
            assert_eq!(output.parsed.as_ref().unwrap().reason, row.item.question);
        }
        assert!(table.stats.is_complete());
        assert_eq!(table.accuracy(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let transport = Arc::new(FlakyTransport::default());
        let table = dispatcher(&transport, 2, 1).run(items(7)).await.unwrap();

        assert_eq!(table.len(), 7);
        assert_eq!(transport.peak.load(Ordering::SeqCst), 2);
        assert_eq!(transport.total_calls(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_within_unit() {
        let transport = Arc::new(FlakyTransport::default().fail("q1", 2));
        let table = dispatcher(&transport, 2, 3).run(items(3)).await.unwrap();

        assert!(table.stats.is_complete());
        assert_eq!(transport.calls("q1"), 3);
        assert_eq!(table.rows[1].result.units, 1);
        assert_eq!(table.stats.resubmissions, 0);
        assert_eq!(table.stats.units, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_unit_is_resubmitted() {
        // Budget of 2 is spent by the first unit; the resubmitted unit succeeds.
        let transport = Arc::new(FlakyTransport::default().fail("q2", 2));
        let dispatcher = dispatcher(&transport, 2, 2);
        let table = dispatcher.run(items(4)).await.unwrap();

        assert_eq!(table.indices(), vec![0, 1, 2, 3]);
        assert!(table.stats.is_complete());
        assert_eq!(transport.calls("q2"), 3);
        assert_eq!(table.rows[2].result.units, 2);
        assert_eq!(table.stats.resubmissions, 1);
        assert_eq!(table.stats.units, 5);
        assert_eq!(dispatcher.progress().position(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_fails_permanently_after_cap() {
        let transport = Arc::new(FlakyTransport::default().fail("q0", u32::MAX));
        let dispatcher = Dispatcher::new(
            router(Arc::clone(&transport)),
            "solo",
            OutputMode::Graded,
            DispatchConfig::new(2, 2)
                .with_retry_delay(Duration::ZERO)
                .with_max_resubmissions(2),
        );
        let table = dispatcher.run(items(3)).await.unwrap();

        assert_eq!(table.len(), 3);
        let failed = &table.rows[0].result;
        assert_eq!(failed.status, SlotStatus::FailedPermanently);
        assert_eq!(failed.units, 3);
        assert!(failed.error.as_deref().unwrap().contains("connection reset"));

        // Three units of two attempts each.
        assert_eq!(transport.calls("q0"), 6);
        assert_eq!(table.stats.failed, 1);
        assert_eq!(table.stats.succeeded, 2);
        assert_eq!(table.stats.resubmissions, 2);
        assert_eq!(table.failures().count(), 1);
        assert_eq!(dispatcher.progress().position(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_unit_is_resubmitted() {
        let transport = Arc::new(FlakyTransport::default().panic_once("q1"));
        let table = dispatcher(&transport, 2, 1).run(items(2)).await.unwrap();

        assert!(table.stats.is_complete());
        assert_eq!(table.rows[1].result.units, 2);
        assert_eq!(table.stats.resubmissions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_model_aborts_without_calls() {
        let transport = Arc::new(FlakyTransport::default());
        let dispatcher = Dispatcher::new(
            router(Arc::clone(&transport)),
            "Nova Pro",
            OutputMode::Graded,
            DispatchConfig::new(2, 3),
        );

        let err = dispatcher.run(items(3)).await.unwrap_err();
        assert!(matches!(err, EvalError::InvalidModel(_)));
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_indices_rejected() {
        let transport = Arc::new(FlakyTransport::default());
        let mut batch = items(2);
        batch[1].index = 0;

        let err = dispatcher(&transport, 2, 1).run(batch).await.unwrap_err();
        assert!(matches!(err, EvalError::InvalidInput(_)));
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_runs_have_same_shape() {
        let transport = Arc::new(FlakyTransport::default());
        let dispatcher = dispatcher(&transport, 3, 2);

        let first = dispatcher.run(items(5)).await.unwrap();
        let second = dispatcher.run(items(5)).await.unwrap();
        assert_eq!(first.indices(), second.indices());
        assert_eq!(first.stats.succeeded, second.stats.succeeded);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let transport = Arc::new(FlakyTransport::default());
        let table = dispatcher(&transport, 2, 1).run(Vec::new()).await.unwrap();
        assert!(table.is_empty());
        assert!(table.stats.is_complete());
    }

    #[tokio::test]
    async fn test_dropping_guard_aborts_call_task() {
        let handle = tokio::spawn(std::future::pending::<()>());
        let guard = AbortOnDrop(handle.abort_handle());
        drop(guard);
        assert!(handle.await.unwrap_err().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_unit_stops_its_call() {
        let transport = Arc::new(
            FlakyTransport::default().latency("q0", Duration::from_secs(3600)),
        );
        let dispatcher = dispatcher(&transport, 1, 1);
        let semaphore = Arc::new(Semaphore::new(1));
        let slots: Slots = Arc::new(DashMap::new());
        let mut units = JoinSet::new();

        dispatcher.spawn_unit(&mut units, items(1).remove(0), 1, &semaphore, &slots);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.in_flight.load(Ordering::SeqCst), 1);

        units.abort_all();
        while units.join_next().await.is_some() {}
        tokio::task::yield_now().await;
        // The call never completes and its permit is back in the pool.
        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert!(slots.is_empty());
        assert_eq!(semaphore.available_permits(), 1);
        assert_eq!(transport.calls("q0"), 1);
    }

    #[test]
    fn test_dispatch_config_from_evaluation() {
        let eval = EvaluationConfig {
            concurrency: 0,
            retry_budget: 4,
            retry_delay_secs: 7,
            max_resubmissions: 9,
            ..Default::default()
        };
        let config = DispatchConfig::from_evaluation(&eval);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.delay, Duration::from_secs(7));
        assert_eq!(config.max_resubmissions, 9);
    }
}
