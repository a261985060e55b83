//! Integration tests for the harvester
//!
//! The first group drives the orchestrator with in-memory collaborators; the
//! last test runs a full harvest against a wiremock-served FPDS look-alike
//! into a SQLite database.

use async_trait::async_trait;
use fpds_harvester::config::{parse_config, validate};
use fpds_harvester::extract::{
    DetailExtractor, DetailMap, DetailReference, FpdsClient, PageExtractor, RawRecord,
    TotalRecordCounter,
};
use fpds_harvester::harvester::{Collaborators, ExtractionOrchestrator, HarvestSettings};
use fpds_harvester::output::{format_report, load_statistics};
use fpds_harvester::storage::{
    load_failed_requests, BulkStore, RunStatus, SqliteStore, StorageResult,
};
use fpds_harvester::throttle::{BatchAdmissionController, DelayEstimator, DelaySettings};
use fpds_harvester::{
    DateRange, ExtractError, ExtractResult, ExtractedRecord, FailureKind, HarvestError,
    SearchQuery,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// In-memory site: `per_page` records on every page, scripted failures
struct ScriptedSite {
    total: ExtractResult<u64>,
    per_page: usize,
    /// Remaining failures per page
    page_failures: Mutex<HashMap<u64, u32>>,
    /// Remaining failures per (page, position)
    detail_failures: Mutex<HashMap<(u64, usize), u32>>,
    page_calls: Mutex<Vec<u64>>,
}

impl ScriptedSite {
    fn new(total: u64, per_page: usize) -> Self {
        Self {
            total: Ok(total),
            per_page,
            page_failures: Mutex::new(HashMap::new()),
            detail_failures: Mutex::new(HashMap::new()),
            page_calls: Mutex::new(Vec::new()),
        }
    }

    fn fail_page(self, page: u64, times: u32) -> Self {
        self.page_failures.lock().unwrap().insert(page, times);
        self
    }

    fn fail_detail(self, page: u64, position: usize, times: u32) -> Self {
        self.detail_failures
            .lock()
            .unwrap()
            .insert((page, position), times);
        self
    }

    fn page_calls(&self) -> Vec<u64> {
        let mut calls = self.page_calls.lock().unwrap().clone();
        calls.sort();
        calls
    }
}

fn take_failure<K: std::hash::Hash + Eq>(failures: &Mutex<HashMap<K, u32>>, key: K) -> bool {
    let mut failures = failures.lock().unwrap();
    match failures.get_mut(&key) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

#[async_trait]
impl TotalRecordCounter for ScriptedSite {
    async fn count(&self, _: &SearchQuery) -> ExtractResult<u64> {
        self.total.clone()
    }
}

#[async_trait]
impl PageExtractor for ScriptedSite {
    async fn extract_page(&self, page: u64, _: &SearchQuery) -> ExtractResult<Vec<RawRecord>> {
        self.page_calls.lock().unwrap().push(page);
        if take_failure(&self.page_failures, page) {
            return Err(ExtractError::Http { status: 503 });
        }

        Ok((0..self.per_page)
            .map(|position| {
                let mut raw = RawRecord::new(page, position);
                raw.fields
                    .insert("award_id".into(), format!("P{}-{}", page, position));
                let mut reference = DetailReference::new();
                reference.insert("PIID".into(), format!("{}:{}", page, position));
                raw.detail_ref = Some(reference);
                raw
            })
            .collect())
    }
}

#[async_trait]
impl DetailExtractor for ScriptedSite {
    async fn extract_detail(&self, reference: &DetailReference) -> ExtractResult<DetailMap> {
        let (page, position) = reference["PIID"].split_once(':').unwrap();
        let key = (page.parse().unwrap(), position.parse().unwrap());
        if take_failure(&self.detail_failures, key) {
            return Err(ExtractError::Timeout);
        }

        let mut detail = DetailMap::new();
        detail.insert("piid".into(), reference["PIID"].clone());
        Ok(detail)
    }
}

#[derive(Default)]
struct MemoryStore {
    stored: Vec<ExtractedRecord>,
}

impl BulkStore for MemoryStore {
    fn store_many(&mut self, records: &[ExtractedRecord]) -> StorageResult<Vec<i64>> {
        self.stored.extend_from_slice(records);
        Ok((1..=records.len() as i64).collect())
    }
}

fn query() -> SearchQuery {
    SearchQuery::new(DateRange::parse("2026/02/01", "2026/02/28").unwrap())
}

fn settings(dir: &TempDir, target_records: u64, records_per_page: u32) -> HarvestSettings {
    HarvestSettings {
        worker_count: 4,
        batch_target_multiplier: 2,
        records_per_page,
        target_records,
        enable_retry: true,
        max_retries: 3,
        retry_delay: Duration::ZERO,
        failed_dir: dir.path().join("failed"),
    }
}

fn orchestrator(site: Arc<ScriptedSite>, settings: HarvestSettings) -> ExtractionOrchestrator {
    let delay = DelayEstimator::new(DelaySettings {
        initial_delay: Duration::from_millis(1),
        min_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        ..DelaySettings::default()
    });
    let admission = BatchAdmissionController::new(8, Duration::ZERO, Duration::from_millis(1));
    ExtractionOrchestrator::with_parts(
        settings,
        query(),
        Collaborators::shared(site),
        delay,
        admission,
    )
}

#[tokio::test]
async fn test_transient_page_failure_is_retried() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(ScriptedSite::new(16_366, 30).fail_page(2, 1));
    let orchestrator = orchestrator(site.clone(), settings(&dir, 120, 30));
    let mut store = MemoryStore::default();

    let report = orchestrator.run(&mut store).await.unwrap();

    let plan = report.plan.as_ref().unwrap();
    assert_eq!(plan.total_pages, 4);
    assert_eq!(plan.batches.len(), 4);

    assert_eq!(report.failures.total(), 0);
    assert_eq!(report.retries.recovered, 1);
    assert_eq!(report.records.len(), 120);
    assert_eq!(report.stored, 120);
    assert!(report.failed_file.is_none());
    // page 2 was fetched twice, every other page once
    assert_eq!(site.page_calls(), vec![0, 1, 2, 2, 3]);

    let pages: Vec<u64> = store.stored.iter().map(|r| r.page()).collect();
    let mut sorted = pages.clone();
    sorted.sort();
    assert_eq!(pages, sorted);
}

#[tokio::test]
async fn test_target_reached_stops_new_pages() {
    let dir = TempDir::new().unwrap();
    // the site returns more records per page than the plan assumed
    let site = Arc::new(ScriptedSite::new(1_000, 30));
    let mut settings = settings(&dir, 50, 10);
    settings.worker_count = 1;
    settings.batch_target_multiplier = 1;
    let orchestrator = orchestrator(site.clone(), settings);

    let report = orchestrator.run(&mut MemoryStore::default()).await.unwrap();

    assert_eq!(report.plan.as_ref().unwrap().total_pages, 5);
    assert!(report.target_reached);
    assert_eq!(report.records.len(), 60);
    assert_eq!(site.page_calls(), vec![0, 1]);
}

#[tokio::test]
async fn test_withheld_details_still_count_toward_target() {
    let dir = TempDir::new().unwrap();
    let site = (0..25).fold(ScriptedSite::new(1_000, 30), |site, position| {
        site.fail_detail(1, position, u32::MAX)
    });
    let site = Arc::new(site);
    let mut settings = settings(&dir, 50, 10);
    settings.worker_count = 1;
    settings.batch_target_multiplier = 1;
    settings.enable_retry = false;
    let orchestrator = orchestrator(site.clone(), settings);

    let report = orchestrator.run(&mut MemoryStore::default()).await.unwrap();

    // 60 records processed after page 1, even though 25 were withheld
    assert_eq!(site.page_calls(), vec![0, 1]);
    assert!(report.target_reached);
    assert_eq!(report.progress.total_processed, 60);
    assert_eq!(report.failures.detail_page, 25);
    assert_eq!(report.records.len(), 35);
}

#[tokio::test]
async fn test_failed_page_is_tracked_once_before_retry() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(ScriptedSite::new(16_366, 30).fail_page(2, 1));
    let mut first_settings = settings(&dir, 150, 30);
    first_settings.enable_retry = false;
    let orchestrator = orchestrator(site.clone(), first_settings);

    let report = orchestrator.run(&mut MemoryStore::default()).await.unwrap();
    assert_eq!(report.plan.as_ref().unwrap().total_pages, 5);
    assert_eq!(site.page_calls(), vec![0, 1, 2, 3, 4]);
    assert_eq!(report.records.len(), 120);
    assert_eq!(report.failures.index_page, 1);
    assert_eq!(report.failures.detail_page, 0);

    let saved = load_failed_requests(&dir.path().join("failed"))
        .unwrap()
        .requests;
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].kind, FailureKind::IndexPage);
    assert_eq!(saved[0].page_number, 2);

    let mut store = MemoryStore::default();
    let retry = orchestrator.retry_only(saved, &mut store).await.unwrap();
    assert_eq!(retry.retries.recovered, 1);
    assert_eq!(retry.failures.total(), 0);
    assert_eq!(store.stored.len(), 30);
    assert!(store.stored.iter().all(|r| r.page() == 2));
    assert_eq!(site.page_calls(), vec![0, 1, 2, 2, 3, 4]);
}

#[tokio::test]
async fn test_failed_detail_is_withheld_until_retried() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(ScriptedSite::new(1_000, 5).fail_detail(1, 3, 2));
    let orchestrator = orchestrator(site, settings(&dir, 20, 5));

    let report = orchestrator.run(&mut MemoryStore::default()).await.unwrap();

    assert_eq!(report.failures.total(), 0);
    assert_eq!(report.retries.passes, 2);
    assert_eq!(report.records.len(), 20);
    assert_eq!(report.records_with_detail(), 20);

    let recovered = report
        .records
        .iter()
        .filter(|r| r.sort_key() == (1, 3))
        .count();
    assert_eq!(recovered, 1);
}

#[tokio::test]
async fn test_unrecovered_failures_round_trip_through_retry_only() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(ScriptedSite::new(1_000, 10).fail_page(1, 1));
    let mut first_settings = settings(&dir, 30, 10);
    first_settings.enable_retry = false;
    let first = orchestrator(site.clone(), first_settings);

    let report = first.run(&mut MemoryStore::default()).await.unwrap();
    assert_eq!(report.records.len(), 20);
    assert_eq!(report.failures.index_page, 1);
    assert_eq!(report.retries.attempted, 0);
    let saved_path = report.failed_file.clone().unwrap();
    assert!(saved_path.starts_with(dir.path().join("failed")));

    let saved = load_failed_requests(&dir.path().join("failed"))
        .unwrap()
        .requests;
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].kind, FailureKind::IndexPage);
    assert_eq!(saved[0].page_number, 1);

    // retries are disabled in the settings, retry_only still makes a pass
    let mut store = MemoryStore::default();
    let retry = first.retry_only(saved, &mut store).await.unwrap();
    assert!(retry.plan.is_none());
    assert_eq!(retry.retries.recovered, 1);
    assert_eq!(retry.failures.total(), 0);
    assert_eq!(store.stored.len(), 10);
    assert!(store.stored.iter().all(|r| r.page() == 1));
}

#[tokio::test]
async fn test_unreachable_site_fails_sizing() {
    let dir = TempDir::new().unwrap();
    let mut site = ScriptedSite::new(0, 30);
    site.total = Err(ExtractError::Network("connection refused".into()));
    let site = Arc::new(site);
    let orchestrator = orchestrator(site.clone(), settings(&dir, 100, 30));

    let result = orchestrator.run(&mut MemoryStore::default()).await;

    assert!(matches!(result, Err(HarvestError::Sizing { .. })));
    assert!(site.page_calls().is_empty());
}

#[tokio::test]
async fn test_unreadable_total_falls_back_to_target() {
    let dir = TempDir::new().unwrap();
    let mut site = ScriptedSite::new(0, 30);
    site.total = Err(ExtractError::Parse("no result count in heading".into()));
    let orchestrator = orchestrator(Arc::new(site), settings(&dir, 60, 30));

    let report = orchestrator.run(&mut MemoryStore::default()).await.unwrap();

    let plan = report.plan.as_ref().unwrap();
    assert_eq!(plan.total_available, 0);
    assert_eq!(plan.actual_target, 60);
    assert_eq!(report.records.len(), 60);
}

#[tokio::test]
async fn test_unknown_total_falls_back_to_target() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(ScriptedSite::new(0, 30));
    let orchestrator = orchestrator(site, settings(&dir, 90, 30));

    let report = orchestrator.run(&mut MemoryStore::default()).await.unwrap();

    let plan = report.plan.as_ref().unwrap();
    assert_eq!(plan.actual_target, 90);
    assert_eq!(plan.total_pages, 3);
    assert_eq!(report.records.len(), 90);
}

// ===== End to end over HTTP =====

fn results_page(total: u64, awards: &[&str]) -> String {
    let mut html = format!(
        r#"<html><body>
<table><tr>
  <td><span class="results_heading">List Of Contract Actions Matching Your Criteria</span></td>
  <td>Results <b>1</b> - <b>{}</b> of <b>{}</b></td>
</tr></table>"#,
        awards.len(),
        total
    );
    for award in awards {
        html.push_str(&format!(
            r#"
<table class="resultbox1">
  <tr><td>Award ID:</td><td>{award}</td><td>Vendor Name:</td><td>ACME CORP</td></tr>
  <tr><td>Action Obligation:</td><td>$12,500.00</td></tr>
  <tr><td><a title="View" href="javascript:go('viewLinkController.jsp?PIID={award}&agencyID=9700')">View</a></td></tr>
</table>"#
        ));
    }
    html.push_str("</body></html>");
    html
}

const DETAIL_PAGE: &str = r#"
<html><body><table>
  <tr><td><span>Date Signed:</span></td><td><input type="text" title="signed" value="02/14/2026"></td></tr>
  <tr><td><span>Status:</span></td><td class="displayText">Final</td></tr>
</table>
<span id="contractingOfficeName">  NAVSEA  </span>
</body></html>
"#;

#[tokio::test]
async fn test_full_harvest_into_sqlite() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    // page 1 fails once, then serves the second half
    Mock::given(method("GET"))
        .and(path("/ezsearch/fpdsportal"))
        .and(query_param("start", "2"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ezsearch/fpdsportal"))
        .and(query_param("start", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(results_page(4, &["W91-0003", "W91-0004"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ezsearch/fpdsportal"))
        .respond_with(ResponseTemplate::new(200).set_body_string(results_page(4, &["W91-0001", "W91-0002"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ezsearch/jsp/viewLinkController.jsp"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DETAIL_PAGE))
        .expect(4)
        .mount(&server)
        .await;

    let toml = format!(
        r##"
[harvester]
worker-count = 2
records-per-page = 2
target-records = 100

[rate-limit]
initial-delay-ms = 1
min-delay-ms = 1
max-delay-ms = 10

[batching]
batch-delay-ms = 0
poll-interval-ms = 1

[retry]
retry-delay-ms = 0

[query]
start-date = "2026/02/01"
end-date = "2026/02/28"
vendor = "ACME"

[site]
base-url = "{}"
timeout-seconds = 5

[output]
database-path = "{}"
failed-dir = "{}"

[[detail-field]]
name = "contracting_office"
selector = "#contractingOfficeName"
transform = "trim"
"##,
        server.uri(),
        dir.path().join("fpds.db").display(),
        dir.path().join("failed").display()
    );
    let config = parse_config(&toml).unwrap();
    validate(&config).unwrap();

    let query = config.query.search_query().unwrap();
    let client = FpdsClient::from_config(&config).unwrap();
    let orchestrator =
        ExtractionOrchestrator::new(&config, query.clone(), Collaborators::from_client(client));

    let mut store = SqliteStore::open(&dir.path().join("fpds.db")).unwrap();
    let run_id = store.begin_run("test-hash", &query).unwrap();
    let report = orchestrator.run(&mut store).await.unwrap();
    store.finish_run(run_id, RunStatus::Completed).unwrap();

    // the site reports 4 matches, so the target is clamped
    let plan = report.plan.as_ref().unwrap();
    assert_eq!(plan.actual_target, 4);
    assert_eq!(plan.total_pages, 2);

    assert_eq!(report.records.len(), 4);
    assert_eq!(report.stored, 4);
    assert_eq!(report.failures.total(), 0);
    assert_eq!(report.retries.recovered, 1);

    let first = &report.records[0];
    assert_eq!(first.award_key(), Some("W91-0001"));
    assert_eq!(first.fields()["vendor_name"], "ACME CORP");
    let detail = first.detail().unwrap();
    assert_eq!(detail["status_display"], "Final");
    assert_eq!(detail["contracting_office"], "NAVSEA");

    let awards = store.award_keys(run_id).unwrap();
    assert_eq!(
        awards,
        vec![
            Some("W91-0001".to_string()),
            Some("W91-0002".to_string()),
            Some("W91-0003".to_string()),
            Some("W91-0004".to_string()),
        ]
    );

    let stats = load_statistics(&store).unwrap().unwrap();
    assert_eq!(stats.run.status, RunStatus::Completed);
    assert_eq!(stats.contracts, 4);
    assert_eq!(stats.contracts_with_detail, 4);
    assert_eq!(stats.pages, 2);

    let printed = format_report(&report);
    assert!(printed.contains("Harvested: 4"));
    assert!(printed.contains("Stored: 4"));
}
