//! Harvest orchestration
//!
//! Sizes the result set, splits it into page batches, runs the batches on a
//! bounded pool of tasks, retries what failed and hands the aggregate to the
//! store. Batches share the delay estimator, the admission controller, the
//! failure tracker and the progress counters; everything else is local to the
//! batch.

use crate::config::Config;
use crate::extract::{
    DetailExtractor, ExtractedRecord, FpdsClient, PageExtractor, RawRecord, SearchQuery,
    TotalRecordCounter,
};
use crate::harvester::plan::HarvestPlan;
use crate::state::{
    FailedRequest, FailureCounts, FailureKind, FailureTracker, ProgressSnapshot, ProgressState,
};
use crate::storage::{BulkStore, FailureSink, JsonFailureSink};
use crate::throttle::{BatchAdmissionController, DelayEstimator, DelaySettings, DelayStats};
use crate::{ExtractError, ExtractResult, HarvestError};
use std::ops::Range;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

/// Cooperative stop flag
///
/// Checked between pages and between batch submissions. In-flight requests
/// are never aborted.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Run parameters
#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub worker_count: u32,
    pub batch_target_multiplier: u32,
    pub records_per_page: u32,
    pub target_records: u64,
    pub enable_retry: bool,
    pub max_retries: u32,
    /// Fixed pause between two retry attempts
    pub retry_delay: Duration,
    /// Directory receiving the failure file
    pub failed_dir: PathBuf,
}

impl From<&Config> for HarvestSettings {
    fn from(config: &Config) -> Self {
        Self {
            worker_count: config.harvester.worker_count,
            batch_target_multiplier: config.harvester.batch_target_multiplier,
            records_per_page: config.harvester.records_per_page,
            target_records: config.harvester.target_records,
            enable_retry: config.retry.enable_retry,
            max_retries: config.retry.max_retries,
            retry_delay: config.retry.retry_delay(),
            failed_dir: PathBuf::from(&config.output.failed_dir),
        }
    }
}

/// The site-facing collaborators of a run
#[derive(Clone)]
pub struct Collaborators {
    pub counter: Arc<dyn TotalRecordCounter>,
    pub pages: Arc<dyn PageExtractor>,
    pub details: Arc<dyn DetailExtractor>,
}

impl Collaborators {
    /// Uses one implementation for all three roles
    pub fn shared<T>(site: Arc<T>) -> Self
    where
        T: TotalRecordCounter + PageExtractor + DetailExtractor + 'static,
    {
        Self {
            counter: site.clone(),
            pages: site.clone(),
            details: site,
        }
    }

    pub fn from_client(client: FpdsClient) -> Self {
        Self::shared(Arc::new(client))
    }
}

/// Retry attempts made after the main pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryTally {
    pub passes: u32,
    pub attempted: usize,
    pub recovered: usize,
}

/// Outcome of a run
#[derive(Debug)]
pub struct HarvestReport {
    /// Finished records in page order
    pub records: Vec<ExtractedRecord>,
    /// Sizing decisions; `None` for a retry-only run
    pub plan: Option<HarvestPlan>,
    /// Failures left after the retry passes
    pub failures: FailureCounts,
    pub failed_file: Option<PathBuf>,
    pub failure_file_error: Option<String>,
    /// Number of records the store accepted
    pub stored: usize,
    pub store_error: Option<String>,
    /// Batches lost to a task panic
    pub failed_batches: usize,
    pub retries: RetryTally,
    pub delay: DelayStats,
    pub progress: ProgressSnapshot,
    pub elapsed: Duration,
    pub interrupted: bool,
    pub target_reached: bool,
}

impl HarvestReport {
    /// Records that made it into the aggregate with a detail map
    pub fn records_with_detail(&self) -> usize {
        self.records.iter().filter(|r| r.detail().is_some()).count()
    }
}

/// Records produced by one batch
#[derive(Debug)]
struct BatchOutcome {
    batch_id: usize,
    records: Vec<ExtractedRecord>,
    pages_failed: usize,
}

/// Records produced by one successfully fetched page
#[derive(Debug)]
struct PageYield {
    records: Vec<ExtractedRecord>,
    target_reached: bool,
}

/// State shared by every batch of one run
struct RunContext {
    query: SearchQuery,
    pages: Arc<dyn PageExtractor>,
    details: Arc<dyn DetailExtractor>,
    delay: Arc<DelayEstimator>,
    admission: Arc<BatchAdmissionController>,
    failures: FailureTracker,
    progress: ProgressState,
    stop: StopHandle,
}

impl RunContext {
    fn should_stop(&self) -> bool {
        self.stop.is_stopped() || self.progress.target_reached()
    }

    async fn run_batch(&self, batch_id: usize, pages: Range<u64>) -> BatchOutcome {
        let _slot = self.admission.acquire().await;
        tracing::debug!(active = self.admission.active_batches(), "Batch admitted");

        let mut outcome = BatchOutcome {
            batch_id,
            records: Vec::new(),
            pages_failed: 0,
        };

        for page in pages {
            if self.should_stop() {
                tracing::info!(page, "Stopping batch before page");
                break;
            }

            self.delay.wait().await;

            match self.process_page(page, &self.query).await {
                Ok(page_yield) => {
                    outcome.records.extend(page_yield.records);
                    if page_yield.target_reached {
                        tracing::info!(page, "Target record count reached");
                        break;
                    }
                }
                Err(error) => {
                    tracing::warn!(page, %error, "Search page failed");
                    outcome.pages_failed += 1;
                    self.failures.track(
                        FailureKind::IndexPage,
                        page,
                        &self.query,
                        None,
                        Some(error.to_string()),
                    );
                }
            }
        }

        outcome
    }

    /// Fetches one search page and the detail of every record on it
    ///
    /// Records whose detail fails are tracked and left out of the result, but
    /// still count toward the target.
    async fn process_page(&self, page: u64, query: &SearchQuery) -> ExtractResult<PageYield> {
        let raw = match self.pages.extract_page(page, query).await {
            Ok(raw) => {
                self.delay.record_request(true, false);
                raw
            }
            Err(error) => {
                self.delay.record_request(false, error.is_blocked());
                return Err(error);
            }
        };

        if raw.is_empty() {
            tracing::warn!(page, "Search page returned no records");
        }

        let processed = raw.len();
        let mut records = Vec::with_capacity(processed);
        for record in raw {
            if let Some(record) = self.attach_detail(record, query).await {
                records.push(record);
            }
        }

        let target_reached = self.progress.record_page(page, processed);
        Ok(PageYield {
            records,
            target_reached,
        })
    }

    async fn attach_detail(&self, raw: RawRecord, query: &SearchQuery) -> Option<ExtractedRecord> {
        let Some(reference) = raw.detail_ref.clone() else {
            tracing::debug!(page = raw.page, position = raw.position, "Record has no detail link");
            return Some(ExtractedRecord::new(raw, None));
        };

        match self.details.extract_detail(&reference).await {
            Ok(detail) => Some(ExtractedRecord::new(raw, Some(detail))),
            Err(error) => {
                tracing::warn!(page = raw.page, position = raw.position, %error, "Detail page failed");
                let page = raw.page;
                self.failures.track(
                    FailureKind::DetailPage,
                    page,
                    query,
                    Some(raw),
                    Some(error.to_string()),
                );
                None
            }
        }
    }

    /// Attempts one tracked failure again
    ///
    /// A request that fails again goes back into the tracker with a fresh
    /// timestamp.
    async fn retry_one(&self, request: FailedRequest) -> Option<Vec<ExtractedRecord>> {
        match request.kind {
            FailureKind::IndexPage => {
                let query = request.query();
                match self.process_page(request.page_number, &query).await {
                    Ok(page_yield) => Some(page_yield.records),
                    Err(error) => {
                        self.failures.retrack(request, Some(error.to_string()));
                        None
                    }
                }
            }
            FailureKind::DetailPage => {
                let Some((partial, reference)) = request
                    .partial_record
                    .clone()
                    .and_then(|raw| raw.detail_ref.clone().map(|reference| (raw, reference)))
                else {
                    let error = ExtractError::MissingDetailReference;
                    self.failures.retrack(request, Some(error.to_string()));
                    return None;
                };

                match self.details.extract_detail(&reference).await {
                    Ok(detail) => Some(vec![ExtractedRecord::new(partial, Some(detail))]),
                    Err(error) => {
                        self.failures.retrack(request, Some(error.to_string()));
                        None
                    }
                }
            }
        }
    }
}

/// Drives a harvest run
///
/// One orchestrator owns one delay estimator and one admission controller;
/// reusing it for several runs keeps the learned delay.
pub struct ExtractionOrchestrator {
    settings: HarvestSettings,
    query: SearchQuery,
    collaborators: Collaborators,
    delay: Arc<DelayEstimator>,
    admission: Arc<BatchAdmissionController>,
    failure_sink: Box<dyn FailureSink>,
    stop: StopHandle,
}

impl ExtractionOrchestrator {
    /// Creates an orchestrator from a validated configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `query` - Date range and filters to harvest
    /// * `collaborators` - Count, page and detail extractors
    pub fn new(config: &Config, query: SearchQuery, collaborators: Collaborators) -> Self {
        Self::with_parts(
            HarvestSettings::from(config),
            query,
            collaborators,
            DelayEstimator::new(DelaySettings::from(&config.rate_limit)),
            BatchAdmissionController::from_config(&config.batching),
        )
    }

    /// Creates an orchestrator from explicit parts
    pub fn with_parts(
        settings: HarvestSettings,
        query: SearchQuery,
        collaborators: Collaborators,
        delay: DelayEstimator,
        admission: BatchAdmissionController,
    ) -> Self {
        Self {
            settings,
            query,
            collaborators,
            delay: Arc::new(delay),
            admission: Arc::new(admission),
            failure_sink: Box::new(JsonFailureSink::new()),
            stop: StopHandle::new(),
        }
    }

    /// Replaces the default JSON failure file writer
    pub fn with_failure_sink(mut self, sink: impl FailureSink + 'static) -> Self {
        self.failure_sink = Box::new(sink);
        self
    }

    /// Handle that stops the run at the next page boundary
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn settings(&self) -> &HarvestSettings {
        &self.settings
    }

    pub fn query(&self) -> &SearchQuery {
        &self.query
    }

    /// Sizes the result set and partitions it into batches
    ///
    /// # Returns
    ///
    /// * `Ok(HarvestPlan)` - The plan; a count that is hidden or unreadable
    ///   yields a plan sized from the requested target
    /// * `Err(HarvestError::Sizing)` - The site could not be reached
    pub async fn plan(&self) -> crate::Result<HarvestPlan> {
        let total_available = match self.collaborators.counter.count(&self.query).await {
            Ok(total) => total,
            Err(source) if source.is_unreachable() => {
                return Err(HarvestError::Sizing { source });
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not read total record count");
                0
            }
        };

        if total_available == 0 {
            tracing::warn!(
                target_records = self.settings.target_records,
                "Total record count unavailable, sizing from requested target"
            );
        }

        let plan = HarvestPlan::new(
            self.settings.target_records,
            total_available,
            self.settings.records_per_page,
            self.settings.worker_count,
            self.settings.batch_target_multiplier,
        );

        tracing::info!(
            query = %self.query.to_query_string(),
            total_available = plan.total_available,
            target = plan.actual_target,
            pages = plan.total_pages,
            batch_size = plan.batch_size,
            batches = plan.batches.len(),
            workers = self.settings.worker_count,
            "Harvest planned"
        );

        Ok(plan)
    }

    /// Runs a full harvest
    ///
    /// Per-page and per-batch failures never fail the run. They are tracked,
    /// retried and reported. A store failure is logged and reported as
    /// well, leaving the records in the returned report.
    ///
    /// # Returns
    ///
    /// * `Ok(HarvestReport)` - What was harvested, stored and left failed
    /// * `Err(HarvestError)` - Sizing failed; nothing was fetched
    pub async fn run(&self, store: &mut dyn BulkStore) -> crate::Result<HarvestReport> {
        let started = Instant::now();
        let plan = self.plan().await?;

        let context = Arc::new(self.context(
            plan.total_pages,
            plan.actual_target,
            FailureTracker::new(),
        ));

        let (mut records, failed_batches) = self.dispatch(&context, &plan).await;
        let interrupted = self.stop.is_stopped();
        let target_reached = context.progress.target_reached();

        if interrupted {
            tracing::warn!("Harvest interrupted, finishing with what was collected");
        }

        let retries = if self.settings.enable_retry {
            self.retry_failures(&context, self.settings.max_retries, &mut records)
                .await
        } else {
            RetryTally::default()
        };

        let mut report = self.conclude(&context, records, store, started);
        report.plan = Some(plan);
        report.failed_batches = failed_batches;
        report.retries = retries;
        report.interrupted = interrupted;
        report.target_reached = target_reached;
        Ok(report)
    }

    /// Retries previously persisted failures without a main pass
    ///
    /// At least one pass is made even when retries are disabled in the
    /// configuration.
    pub async fn retry_only(
        &self,
        failed: Vec<FailedRequest>,
        store: &mut dyn BulkStore,
    ) -> crate::Result<HarvestReport> {
        let started = Instant::now();
        tracing::info!(pending = failed.len(), "Retrying saved failures");

        let context = Arc::new(self.context(0, u64::MAX, FailureTracker::from_requests(failed)));
        let mut records = Vec::new();
        let retries = self
            .retry_failures(&context, self.settings.max_retries.max(1), &mut records)
            .await;

        let mut report = self.conclude(&context, records, store, started);
        report.retries = retries;
        report.interrupted = self.stop.is_stopped();
        Ok(report)
    }

    fn context(&self, total_pages: u64, target: u64, failures: FailureTracker) -> RunContext {
        RunContext {
            query: self.query.clone(),
            pages: self.collaborators.pages.clone(),
            details: self.collaborators.details.clone(),
            delay: self.delay.clone(),
            admission: self.admission.clone(),
            failures,
            progress: ProgressState::new(total_pages, target),
            stop: self.stop.clone(),
        }
    }

    /// Submits every batch to the pool and collects their records
    ///
    /// # Returns
    ///
    /// The collected records and the number of batches lost to a panic
    async fn dispatch(
        &self,
        context: &Arc<RunContext>,
        plan: &HarvestPlan,
    ) -> (Vec<ExtractedRecord>, usize) {
        let pool = Arc::new(Semaphore::new(self.settings.worker_count.max(1) as usize));
        let mut batches = JoinSet::new();

        for (batch_id, pages) in plan.batches.iter().cloned().enumerate() {
            let Ok(permit) = pool.clone().acquire_owned().await else {
                break;
            };
            if context.should_stop() {
                tracing::info!(
                    submitted = batch_id,
                    remaining = plan.batches.len() - batch_id,
                    "No further batches submitted"
                );
                break;
            }

            let span = tracing::info_span!("batch", batch_id, pages = ?pages);
            let context = Arc::clone(context);
            batches.spawn(
                async move {
                    let _permit = permit;
                    context.run_batch(batch_id, pages).await
                }
                .instrument(span),
            );
        }

        let mut records = Vec::new();
        let mut failed_batches = 0;
        while let Some(joined) = batches.join_next().await {
            match joined {
                Ok(outcome) => {
                    tracing::debug!(
                        batch_id = outcome.batch_id,
                        records = outcome.records.len(),
                        pages_failed = outcome.pages_failed,
                        "Batch finished"
                    );
                    records.extend(outcome.records);
                }
                Err(error) => {
                    failed_batches += 1;
                    tracing::error!(%error, "Batch task failed, its records are lost");
                }
            }
        }

        (records, failed_batches)
    }

    /// Runs up to `passes` retry passes over the tracked failures
    async fn retry_failures(
        &self,
        context: &RunContext,
        passes: u32,
        records: &mut Vec<ExtractedRecord>,
    ) -> RetryTally {
        let mut tally = RetryTally::default();

        for pass in 1..=passes {
            let pending = context.failures.drain_for_retry();
            if pending.is_empty() {
                break;
            }

            tally.passes = pass;
            tracing::info!(pass, max_passes = passes, pending = pending.len(), "Retry pass");

            for request in pending {
                if tally.attempted > 0 {
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                tally.attempted += 1;

                let kind = request.kind;
                let page = request.page_number;
                if let Some(recovered) = context.retry_one(request).await {
                    tracing::info!(%kind, page, records = recovered.len(), "Retry succeeded");
                    tally.recovered += 1;
                    records.extend(recovered);
                }
            }
        }

        let left = context.failures.count_by_kind();
        if left.total() > 0 {
            tracing::warn!("Failures left after retries: {}", left);
        }
        tally
    }

    /// Orders the aggregate, stores it and persists leftover failures
    fn conclude(
        &self,
        context: &RunContext,
        mut records: Vec<ExtractedRecord>,
        store: &mut dyn BulkStore,
        started: Instant,
    ) -> HarvestReport {
        records.sort_by_key(ExtractedRecord::sort_key);

        let (stored, store_error) = if records.is_empty() {
            (0, None)
        } else {
            match store.store_many(&records[..]) {
                Ok(ids) => (ids.len(), None),
                Err(error) => {
                    tracing::error!(%error, records = records.len(), "Failed to store records");
                    (0, Some(error.to_string()))
                }
            }
        };

        let (failed_file, failure_file_error) = match context
            .failures
            .persist(self.failure_sink.as_ref(), &self.settings.failed_dir)
        {
            Ok(path) => (path, None),
            Err(error) => {
                tracing::error!(%error, "Failed to save failed requests");
                (None, Some(error.to_string()))
            }
        };

        let report = HarvestReport {
            records,
            plan: None,
            failures: context.failures.count_by_kind(),
            failed_file,
            failure_file_error,
            stored,
            store_error,
            failed_batches: 0,
            retries: RetryTally::default(),
            delay: self.delay.get_stats(),
            progress: context.progress.snapshot(),
            elapsed: started.elapsed(),
            interrupted: false,
            target_reached: false,
        };

        tracing::info!(
            records = report.records.len(),
            stored = report.stored,
            failures = report.failures.total(),
            delay_ms = report.delay.current_delay.as_millis() as u64,
            mode = %report.delay.mode,
            elapsed = ?report.elapsed,
            "Harvest finished"
        );
        report
    }
}
