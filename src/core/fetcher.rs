//! Download scheduling and request lifecycle. One invocation resolves
//! the candidate set, then walks it strictly sequentially: submit a
//! request, poll until the service has compiled the report or attempts
//! run out, persist every transition.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::policy;
use crate::core::service::ReportService;
use crate::core::store::types::{ReportDefinition, RequestStatus};
use crate::core::store::{ReportStore, now_local, parse_stamp};
use crate::core::terminal::{print_info, print_status, print_success, print_warn};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("report {0} is not tracked; add it with 'flexfetch report add {0}'")]
    NotFound(String),
    #[error("the service rejected the request for report {0}")]
    Submission(String),
    #[error("report not available after {attempts} attempts")]
    PollTimeout { attempts: u32 },
    #[error("could not write report to {path}: {source}")]
    OutputWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Validation(String),
    #[error("store error: {0}")]
    Store(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchTarget {
    All,
    One(String),
}

/// Validated options for one invocation, assembled once at the CLI
/// boundary from flags and stored defaults.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub target: FetchTarget,
    pub force: bool,
    pub output: Option<String>,
    pub output_dir: PathBuf,
    pub poll_interval_secs: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ItemOutcome {
    Downloaded,
    SkippedFresh,
}

#[derive(Debug, Default)]
pub struct FetchSummary {
    pub downloaded: usize,
    pub skipped: usize,
    pub failures: Vec<(String, FetchError)>,
}

impl FetchSummary {
    pub fn ok(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Fetcher {
    store: ReportStore,
    service: Arc<dyn ReportService>,
}

impl Fetcher {
    pub fn new(store: ReportStore, service: Arc<dyn ReportService>) -> Self {
        Self { store, service }
    }

    /// Run one scheduling pass. Per-item failures are collected in the
    /// summary and never abort the remaining candidates; an `Err` means
    /// the invocation could not start at all.
    pub async fn run(&self, opts: &FetchOptions) -> Result<FetchSummary> {
        let candidates = self.resolve_candidates(opts).await?;

        let mut summary = FetchSummary::default();
        if candidates.is_empty() {
            return Ok(summary);
        }

        if opts.output.is_some() && candidates.len() > 1 {
            return Err(FetchError::Validation(
                "--output cannot be used when more than one report is fetched; \
                 use --output-dir instead"
                    .to_string(),
            )
            .into());
        }

        if !opts.output_dir.exists() {
            std::fs::create_dir_all(&opts.output_dir)?;
            print_info(&format!(
                "Created output directory: {}",
                opts.output_dir.display()
            ));
        }

        let single = candidates.len() == 1;
        for definition in &candidates {
            println!();
            print_status(
                "Fetching",
                &format!("{} (ID: {})", definition.display_name(), definition.id),
            );
            match self.fetch_one(definition, opts, single).await {
                Ok(ItemOutcome::Downloaded) => summary.downloaded += 1,
                Ok(ItemOutcome::SkippedFresh) => summary.skipped += 1,
                Err(e) => {
                    print_warn(&format!("{}", e));
                    summary.failures.push((definition.id.clone(), e));
                }
            }
        }
        Ok(summary)
    }

    async fn resolve_candidates(&self, opts: &FetchOptions) -> Result<Vec<ReportDefinition>> {
        match &opts.target {
            FetchTarget::One(id) => {
                let definition = self
                    .store
                    .get_definition(id)
                    .await?
                    .ok_or_else(|| FetchError::NotFound(id.clone()))?;
                Ok(vec![definition])
            }
            FetchTarget::All if opts.force => {
                let all = self.store.list_definitions().await?;
                if all.is_empty() {
                    print_info("No reports tracked. Add one with 'flexfetch report add <id>'.");
                } else {
                    print_info(&format!("Force fetching all {} reports", all.len()));
                }
                Ok(all)
            }
            FetchTarget::All => {
                let due = self.store.due_definitions(now_local()).await?;
                if due.is_empty() {
                    print_success("All reports are up to date. Use --force to fetch anyway.");
                } else {
                    print_info(&format!("{} reports need updating", due.len()));
                }
                Ok(due)
            }
        }
    }

    async fn fetch_one(
        &self,
        definition: &ReportDefinition,
        opts: &FetchOptions,
        single: bool,
    ) -> Result<ItemOutcome, FetchError> {
        if !opts.force && let Some(path) = self.fresh_output_path(definition).await {
            let hours =
                policy::effective_interval_hours(&definition.category, definition.interval_hours);
            print_info(&format!("Skipped: fetched within the last {}h.", hours));
            print_status("Output file", path.as_deref().unwrap_or("unknown"));
            print_info("Use --force to fetch again.");
            return Ok(ItemOutcome::SkippedFresh);
        }

        let Some(request_id) = self.service.submit_request(&definition.id).await else {
            return Err(FetchError::Submission(definition.id.clone()));
        };
        self.store
            .add_request(&request_id, &definition.id)
            .await
            .map_err(|e| FetchError::Store(e.to_string()))?;
        info!("Submitted request {} for report {}", request_id, definition.id);

        let output_file = if single && let Some(name) = &opts.output {
            opts.output_dir.join(name)
        } else {
            opts.output_dir.join(derived_filename(definition))
        };

        print_info(&format!(
            "Polling (max {} attempts, {}s interval)...",
            opts.max_attempts, opts.poll_interval_secs
        ));
        let content = self
            .poll_until_ready(&request_id, opts.max_attempts, opts.poll_interval_secs)
            .await;

        let Some(content) = content else {
            self.mark_failed(&request_id).await;
            return Err(FetchError::PollTimeout {
                attempts: opts.max_attempts,
            });
        };

        if let Err(e) = tokio::fs::write(&output_file, &content).await {
            self.mark_failed(&request_id).await;
            return Err(FetchError::OutputWrite {
                path: output_file.display().to_string(),
                source: e,
            });
        }

        let path_str = output_file.display().to_string();
        self.store
            .update_request_status(&request_id, RequestStatus::Completed, Some(&path_str))
            .await
            .map_err(|e| FetchError::Store(e.to_string()))?;
        print_success(&format!("Saved to {}", path_str));
        Ok(ItemOutcome::Downloaded)
    }

    /// Poll the same request id up to `max_attempts` times. The first
    /// attempt waits half an interval up front so the service has time
    /// to start compiling; each not-ready attempt except the last waits
    /// a full interval. No wait follows the final attempt.
    async fn poll_until_ready(
        &self,
        request_id: &str,
        max_attempts: u32,
        poll_interval_secs: u64,
    ) -> Option<String> {
        for attempt in 1..=max_attempts {
            if attempt == 1 {
                tokio::time::sleep(Duration::from_secs(poll_interval_secs) / 2).await;
            }
            print_status("Attempt", &format!("{}/{}", attempt, max_attempts));
            if let Some(content) = self.service.fetch_report(request_id).await
                && !content.trim().is_empty()
            {
                return Some(content);
            }
            if attempt < max_attempts {
                tokio::time::sleep(Duration::from_secs(poll_interval_secs)).await;
            }
        }
        None
    }

    /// Most recent completed request if it is still inside the
    /// effective interval. Returns its recorded output path.
    async fn fresh_output_path(&self, definition: &ReportDefinition) -> Option<Option<String>> {
        let latest = self.store.latest_request(&definition.id).await.ok()??;
        if latest.status != RequestStatus::Completed {
            return None;
        }
        let completed_at = parse_stamp(latest.completed_at.as_deref()?)?;
        let hours =
            policy::effective_interval_hours(&definition.category, definition.interval_hours);
        let cutoff = now_local() - chrono::Duration::hours(hours);
        if completed_at > cutoff {
            Some(latest.output_path)
        } else {
            None
        }
    }

    async fn mark_failed(&self, request_id: &str) {
        if let Err(e) = self
            .store
            .update_request_status(request_id, RequestStatus::Failed, None)
            .await
        {
            warn!("Could not record failure for request {}: {}", request_id, e);
        }
    }
}

/// Deterministic per-day filename: the display name (or id) with
/// non-alphanumerics flattened to underscores, suffixed with the date.
/// Same-day reruns overwrite.
fn derived_filename(definition: &ReportDefinition) -> String {
    let safe: String = definition
        .display_name()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}_{}.xml", safe, now_local().format("%Y%m%d"))
}

#[cfg(test)]
mod tests {
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::core::store::test_store;

    #[derive(Default)]
    struct MockService {
        reject_submit: Mutex<HashSet<String>>,
        submits: Mutex<Vec<String>>,
        fetch_script: Mutex<VecDeque<Option<String>>>,
        fetch_calls: Mutex<Vec<String>>,
    }

    impl MockService {
        fn scripted(responses: Vec<Option<String>>) -> Arc<Self> {
            let svc = Self::default();
            *svc.fetch_script.lock().unwrap() = responses.into();
            Arc::new(svc)
        }

        fn rejecting(mut self, definition_id: &str) -> Self {
            self.reject_submit
                .lock()
                .unwrap()
                .insert(definition_id.to_string());
            self
        }

        fn submit_count(&self) -> usize {
            self.submits.lock().unwrap().len()
        }

        fn fetch_count(&self) -> usize {
            self.fetch_calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ReportService for MockService {
        async fn submit_request(&self, definition_id: &str) -> Option<String> {
            self.submits.lock().unwrap().push(definition_id.to_string());
            if self.reject_submit.lock().unwrap().contains(definition_id) {
                None
            } else {
                Some(format!("REQ-{}", definition_id))
            }
        }

        async fn fetch_report(&self, request_id: &str) -> Option<String> {
            self.fetch_calls.lock().unwrap().push(request_id.to_string());
            self.fetch_script.lock().unwrap().pop_front().flatten()
        }
    }

    fn opts_in(dir: &std::path::Path) -> FetchOptions {
        FetchOptions {
            target: FetchTarget::All,
            force: false,
            output: None,
            output_dir: dir.to_path_buf(),
            poll_interval_secs: 30,
            max_attempts: 3,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn content_on_second_poll_waits_half_then_full_interval() {
        let (store, dir) = test_store();
        store.add_definition("111", "Activity", "activity", None).await.unwrap();
        let svc = MockService::scripted(vec![None, Some("<FlexQueryResponse/>".to_string())]);
        let fetcher = Fetcher::new(store.clone(), svc.clone());

        let mut opts = opts_in(dir.path());
        opts.target = FetchTarget::One("111".to_string());

        let started = tokio::time::Instant::now();
        let summary = fetcher.run(&opts).await.unwrap();

        assert!(summary.ok());
        assert_eq!(summary.downloaded, 1);
        assert_eq!(svc.fetch_count(), 2);
        // Warm-up of interval/2, one full wait after the not-ready
        // attempt, nothing after the successful one.
        assert_eq!(started.elapsed(), Duration::from_secs(45));

        let rec = store.latest_request("111").await.unwrap().unwrap();
        assert_eq!(rec.status, RequestStatus::Completed);
        assert!(rec.output_path.is_some());
        assert!(std::path::Path::new(rec.output_path.as_deref().unwrap()).exists());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_mark_request_failed() {
        let (store, dir) = test_store();
        store.add_definition("111", "Activity", "activity", None).await.unwrap();
        let svc = MockService::scripted(vec![None, None]);
        let fetcher = Fetcher::new(store.clone(), svc.clone());

        let mut opts = opts_in(dir.path());
        opts.target = FetchTarget::One("111".to_string());
        opts.max_attempts = 2;

        let started = tokio::time::Instant::now();
        let summary = fetcher.run(&opts).await.unwrap();

        assert!(!summary.ok());
        assert_eq!(summary.failures.len(), 1);
        assert!(matches!(
            summary.failures[0].1,
            FetchError::PollTimeout { attempts: 2 }
        ));
        assert_eq!(svc.fetch_count(), 2);
        // Half-interval warm-up plus one inter-attempt wait; no
        // trailing wait after the final attempt.
        assert_eq!(started.elapsed(), Duration::from_secs(45));

        let rec = store.latest_request("111").await.unwrap().unwrap();
        assert_eq!(rec.status, RequestStatus::Failed);
        assert!(rec.output_path.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn force_fetches_every_definition_even_when_fresh() {
        let (store, dir) = test_store();
        store.add_definition("a", "A", "activity", None).await.unwrap();
        store.add_definition("b", "B", "trade-confirmation", None).await.unwrap();
        for id in ["a", "b"] {
            let req = format!("OLD-{}", id);
            store.add_request(&req, id).await.unwrap();
            store
                .update_request_status(&req, RequestStatus::Completed, Some("old.xml"))
                .await
                .unwrap();
        }
        assert!(store.due_definitions(now_local()).await.unwrap().is_empty());

        let svc = MockService::scripted(vec![
            Some("<a/>".to_string()),
            Some("<b/>".to_string()),
        ]);
        let fetcher = Fetcher::new(store.clone(), svc.clone());
        let mut opts = opts_in(dir.path());
        opts.force = true;

        let summary = fetcher.run(&opts).await.unwrap();
        assert!(summary.ok());
        assert_eq!(summary.downloaded, 2);
        assert_eq!(svc.submit_count(), 2);
    }

    #[tokio::test]
    async fn named_output_with_multiple_candidates_is_rejected_before_network() {
        let (store, dir) = test_store();
        store.add_definition("a", "A", "activity", None).await.unwrap();
        store.add_definition("b", "B", "activity", None).await.unwrap();

        let svc = MockService::scripted(vec![]);
        let fetcher = Fetcher::new(store.clone(), svc.clone());
        let mut opts = opts_in(dir.path());
        opts.output = Some("single.xml".to_string());

        let err = fetcher.run(&opts).await.unwrap_err();
        assert!(err.to_string().contains("--output"));
        assert_eq!(svc.submit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn submission_failure_does_not_abort_the_batch() {
        let (store, dir) = test_store();
        store.add_definition("A", "Activity", "activity", None).await.unwrap();
        store
            .add_definition("B", "Trades", "trade-confirmation", Some(2))
            .await
            .unwrap();

        let svc = Arc::new(
            MockService::default().rejecting("B"),
        );
        *svc.fetch_script.lock().unwrap() = vec![Some("<a/>".to_string())].into();
        let fetcher = Fetcher::new(store.clone(), svc.clone());

        let summary = fetcher.run(&opts_in(dir.path())).await.unwrap();
        assert!(!summary.ok());
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].0, "B");
        assert!(matches!(summary.failures[0].1, FetchError::Submission(_)));

        // A completed despite B's failure; B has no lifecycle row
        // because nothing was submitted.
        let a = store.latest_request("A").await.unwrap().unwrap();
        assert_eq!(a.status, RequestStatus::Completed);
        assert!(store.latest_request("B").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fresh_single_target_skips_without_contacting_service() {
        let (store, dir) = test_store();
        store.add_definition("111", "Activity", "activity", None).await.unwrap();
        store.add_request("R", "111").await.unwrap();
        store
            .update_request_status("R", RequestStatus::Completed, Some("prev.xml"))
            .await
            .unwrap();

        let svc = MockService::scripted(vec![]);
        let fetcher = Fetcher::new(store.clone(), svc.clone());
        let mut opts = opts_in(dir.path());
        opts.target = FetchTarget::One("111".to_string());

        let summary = fetcher.run(&opts).await.unwrap();
        assert!(summary.ok());
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.downloaded, 0);
        assert_eq!(svc.submit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unwritable_output_marks_request_failed() {
        let (store, dir) = test_store();
        store.add_definition("111", "Activity", "activity", None).await.unwrap();
        // A directory squatting on the target filename makes the write fail.
        std::fs::create_dir(dir.path().join("custom.xml")).unwrap();

        let svc = MockService::scripted(vec![Some("<FlexQueryResponse/>".to_string())]);
        let fetcher = Fetcher::new(store.clone(), svc.clone());

        let mut opts = opts_in(dir.path());
        opts.target = FetchTarget::One("111".to_string());
        opts.output = Some("custom.xml".to_string());
        opts.max_attempts = 1;

        let summary = fetcher.run(&opts).await.unwrap();
        assert!(!summary.ok());
        assert_eq!(summary.downloaded, 0);
        assert!(matches!(
            summary.failures[0].1,
            FetchError::OutputWrite { .. }
        ));
        assert_eq!(svc.submit_count(), 1);

        let rec = store.latest_request("111").await.unwrap().unwrap();
        assert_eq!(rec.status, RequestStatus::Failed);
        assert!(rec.output_path.is_none());
        assert!(rec.completed_at.is_none());
    }

    #[tokio::test]
    async fn unknown_single_target_is_an_error() {
        let (store, dir) = test_store();
        let svc = MockService::scripted(vec![]);
        let fetcher = Fetcher::new(store, svc.clone());
        let mut opts = opts_in(dir.path());
        opts.target = FetchTarget::One("nope".to_string());

        let err = fetcher.run(&opts).await.unwrap_err();
        assert!(err.downcast_ref::<FetchError>().is_some());
        assert!(err.to_string().contains("nope"));
        assert_eq!(svc.submit_count(), 0);
    }

    #[tokio::test]
    async fn nothing_due_is_a_success_without_network() {
        let (store, dir) = test_store();
        store.add_definition("a", "A", "activity", None).await.unwrap();
        store.add_request("R", "a").await.unwrap();
        store
            .update_request_status("R", RequestStatus::Completed, Some("a.xml"))
            .await
            .unwrap();

        let svc = MockService::scripted(vec![]);
        let fetcher = Fetcher::new(store, svc.clone());

        let summary = fetcher.run(&opts_in(dir.path())).await.unwrap();
        assert!(summary.ok());
        assert_eq!(summary.downloaded + summary.skipped, 0);
        assert_eq!(svc.submit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn single_target_honors_custom_output_name() {
        let (store, dir) = test_store();
        store.add_definition("111", "Activity", "activity", None).await.unwrap();
        let svc = MockService::scripted(vec![Some("<xml/>".to_string())]);
        let fetcher = Fetcher::new(store.clone(), svc);

        let mut opts = opts_in(dir.path());
        opts.target = FetchTarget::One("111".to_string());
        opts.output = Some("custom.xml".to_string());
        opts.max_attempts = 1;

        fetcher.run(&opts).await.unwrap();
        assert!(dir.path().join("custom.xml").exists());
        let rec = store.latest_request("111").await.unwrap().unwrap();
        assert!(rec.output_path.unwrap().ends_with("custom.xml"));
    }

    #[test]
    fn derived_filename_flattens_punctuation_and_stamps_the_date() {
        let definition = ReportDefinition {
            id: "42".to_string(),
            name: Some("My Report (2024)!".to_string()),
            category: "activity".to_string(),
            interval_hours: None,
        };
        let name = derived_filename(&definition);
        let date = now_local().format("%Y%m%d").to_string();
        assert_eq!(name, format!("My_Report__2024___{}.xml", date));
    }

    #[test]
    fn derived_filename_falls_back_to_id() {
        let definition = ReportDefinition {
            id: "987654".to_string(),
            name: None,
            category: "activity".to_string(),
            interval_hours: None,
        };
        assert!(derived_filename(&definition).starts_with("987654_"));
    }
}
