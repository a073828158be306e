// src/publication.rs

use chrono::{DateTime, Local, NaiveDate};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::PipelineError;
use crate::extract::{Region, TableExtractor};
use crate::fetch::DocumentSource;
use crate::plan::{
    filter_entries, format_report, parse_entries, resolve_date_with_policy, ResolvedDate,
    RowWarning, ScheduleEntry, Subscription, YearPolicy,
};

/// One fetched, extracted and parsed plan document.
#[derive(Debug, Clone)]
pub struct Publication {
    pub date: ResolvedDate,
    pub entries: Vec<ScheduleEntry>,
    pub warnings: Vec<RowWarning>,
    /// The downloaded file, for attaching to messages.
    pub document: PathBuf,
    pub fetched_at: DateTime<Local>,
}

impl Publication {
    /// Report text for one subscriber.
    pub fn report_for(&self, subscription: &Subscription) -> String {
        format_report(self.date, &filter_entries(&self.entries, subscription))
    }
}

struct Cached {
    cycle: NaiveDate,
    stored: Instant,
    publication: Arc<Publication>,
}

pub type RunResult = Result<Arc<Publication>, Arc<PipelineError>>;
type SharedRun = Shared<BoxFuture<'static, RunResult>>;

enum Slot {
    Empty,
    Running {
        cycle: NaiveDate,
        id: u64,
        run: SharedRun,
    },
    Ready(Cached),
}

impl Slot {
    fn fresh(&self, cycle: NaiveDate, ttl: Duration) -> Option<Arc<Publication>> {
        match self {
            Slot::Ready(c) if c.cycle == cycle && c.stored.elapsed() < ttl => {
                Some(c.publication.clone())
            }
            _ => None,
        }
    }

    fn in_flight(&self, cycle: NaiveDate) -> Option<SharedRun> {
        match self {
            Slot::Running { cycle: c, run, .. } if *c == cycle => Some(run.clone()),
            _ => None,
        }
    }
}

struct Inner<S, E> {
    source: S,
    extractor: E,
    pdf_path: PathBuf,
    year_policy: YearPolicy,
    slot: Mutex<Slot>,
    runs: AtomicU64,
}

impl<S: DocumentSource, E: TableExtractor> Inner<S, E> {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store the outcome of run `id`, unless a newer run has taken the slot.
    fn settle(&self, id: u64, cycle: NaiveDate, result: &RunResult) {
        let mut slot = self.slot();
        if !matches!(&*slot, Slot::Running { id: current, .. } if *current == id) {
            return;
        }
        *slot = match result {
            Ok(publication) => Slot::Ready(Cached {
                cycle,
                stored: Instant::now(),
                publication: publication.clone(),
            }),
            Err(e) => {
                warn!(cycle = %cycle, error = %e, "run failed, nothing cached");
                Slot::Empty
            }
        };
    }

    #[instrument(level = "info", skip(self))]
    async fn run_pipeline(&self, today: NaiveDate) -> Result<Publication, PipelineError> {
        let document = self.source.fetch(&self.pdf_path).await?;

        let (header, body) = futures::future::try_join(
            self.extractor.extract(&document, Region::Header),
            self.extractor.extract(&document, Region::Body),
        )
        .await?;

        let date = resolve_date_with_policy(&header, today, self.year_policy);
        let parsed = parse_entries(&body);
        info!(
            %date,
            entries = parsed.entries.len(),
            skipped_rows = parsed.warnings.len(),
            "publication ready"
        );

        Ok(Publication {
            date,
            entries: parsed.entries,
            warnings: parsed.warnings,
            document,
            fetched_at: Local::now(),
        })
    }
}

/// Fetches and parses the plan at most once per cycle.
///
/// Callers arriving while a run is in flight await that same run and share
/// its result, success or error. A failed run leaves nothing cached, so the
/// next caller after it finishes starts over.
pub struct PlanService<S, E> {
    inner: Arc<Inner<S, E>>,
    ttl: Duration,
}

impl<S, E> PlanService<S, E>
where
    S: DocumentSource + 'static,
    E: TableExtractor + 'static,
{
    pub fn new(
        source: S,
        extractor: E,
        pdf_path: impl Into<PathBuf>,
        ttl: Duration,
        year_policy: YearPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                extractor,
                pdf_path: pdf_path.into(),
                year_policy,
                slot: Mutex::new(Slot::Empty),
                runs: AtomicU64::new(0),
            }),
            ttl,
        }
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    /// The publication for the cycle `today`, reusing a fresh cached one or
    /// joining a run already in flight for the same cycle.
    pub async fn current(&self, today: NaiveDate) -> RunResult {
        let run = {
            let mut slot = self.inner.slot();
            if let Some(publication) = slot.fresh(today, self.ttl) {
                debug!(cycle = %today, "publication cache hit");
                return Ok(publication);
            }
            match slot.in_flight(today) {
                Some(run) => {
                    debug!(cycle = %today, "joining run in flight");
                    run
                }
                None => {
                    let id = self.inner.runs.fetch_add(1, Ordering::SeqCst);
                    let inner = self.inner.clone();
                    let run = async move {
                        let result = inner
                            .run_pipeline(today)
                            .await
                            .map(Arc::new)
                            .map_err(Arc::new);
                        inner.settle(id, today, &result);
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Slot::Running {
                        cycle: today,
                        id,
                        run: run.clone(),
                    };
                    run
                }
            }
        };
        run.await
    }

    /// Fetch, extract both regions and parse, bypassing the cache.
    pub async fn run_pipeline(&self, today: NaiveDate) -> Result<Publication, PipelineError> {
        self.inner.run_pipeline(today).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{ExtractError, FetchError};
    use crate::plan::RowDataset;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    /// Counts fetches; fails while `fail` is set.
    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub calls: AtomicUsize,
        pub fail: AtomicBool,
    }

    #[async_trait]
    impl DocumentSource for FakeSource {
        async fn fetch(&self, dest: &Path) -> Result<PathBuf, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(FetchError::Login { status: 503 });
            }
            Ok(dest.to_path_buf())
        }
    }

    /// Serves fixed header/body rows.
    pub(crate) struct FakeExtractor {
        pub header: RowDataset,
        pub body: RowDataset,
    }

    impl FakeExtractor {
        pub fn for_date(header_cell: &str) -> Self {
            let header: RowDataset = vec![vec![header_cell.to_string()]].into_iter().collect();
            let body: RowDataset = vec![
                vec!["Klasse", "Stunde", "Lehrer", "Vertretung", "Raum", "Fach", "Entfall", "Bemerkung"],
                vec!["6c", "3", "SCH", "", "", "Englisch", "x", ""],
                vec!["7a", "5", "BER", "Bio", "B12", "Chemie", "", ""],
                vec!["6c", "broken"],
            ]
            .into_iter()
            .collect();
            Self { header, body }
        }
    }

    #[async_trait]
    impl TableExtractor for FakeExtractor {
        async fn extract(&self, _pdf: &Path, region: Region) -> Result<RowDataset, ExtractError> {
            Ok(match region {
                Region::Header => self.header.clone(),
                Region::Body => self.body.clone(),
            })
        }
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn service(ttl: Duration) -> PlanService<FakeSource, FakeExtractor> {
        PlanService::new(
            FakeSource::default(),
            FakeExtractor::for_date("Klasse_moodle 7.3."),
            "plan.pdf",
            ttl,
            YearPolicy::CurrentYear,
        )
    }

    #[tokio::test]
    async fn test_pipeline_builds_publication() {
        let svc = service(Duration::from_secs(60));
        let p = svc.run_pipeline(ymd(2024, 3, 6)).await.unwrap();

        assert_eq!(p.date, ResolvedDate::Known(ymd(2024, 3, 7)));
        assert_eq!(p.entries.len(), 2);
        assert_eq!(p.warnings.len(), 1);
        assert_eq!(p.document, PathBuf::from("plan.pdf"));
        assert_eq!(
            p.report_for(&Subscription::from_tokens(["6C"])),
            "07.03.2024: 1 Eintrag gefunden:\n6c: 3. Stunde Englisch *Entfall*"
        );
        assert_eq!(
            p.report_for(&Subscription::default()),
            "07.03.2024: keine Einträge gefunden"
        );
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let svc = Arc::new(service(Duration::from_secs(60)));
        let today = ymd(2024, 3, 6);

        let results = futures::future::join_all((0..8).map(|_| {
            let svc = svc.clone();
            async move { svc.current(today).await.unwrap() }
        }))
        .await;

        assert_eq!(svc.source().calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|p| Arc::ptr_eq(p, &results[0])));
    }

    #[tokio::test]
    async fn test_cache_expires_and_is_keyed_by_cycle() {
        let svc = service(Duration::from_secs(60));
        svc.current(ymd(2024, 3, 6)).await.unwrap();
        svc.current(ymd(2024, 3, 6)).await.unwrap();
        assert_eq!(svc.source().calls.load(Ordering::SeqCst), 1);

        svc.current(ymd(2024, 3, 7)).await.unwrap();
        assert_eq!(svc.source().calls.load(Ordering::SeqCst), 2);

        let expired = service(Duration::ZERO);
        expired.current(ymd(2024, 3, 6)).await.unwrap();
        expired.current(ymd(2024, 3, 6)).await.unwrap();
        assert_eq!(expired.source().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let svc = service(Duration::from_secs(60));
        svc.source().fail.store(true, Ordering::SeqCst);
        let err = svc.current(ymd(2024, 3, 6)).await.unwrap_err();
        assert!(matches!(&*err, PipelineError::Fetch(FetchError::Login { status: 503 })));

        svc.source().fail.store(false, Ordering::SeqCst);
        let p = svc.current(ymd(2024, 3, 6)).await.unwrap();
        assert_eq!(p.entries.len(), 2);
        assert_eq!(svc.source().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_failed_run() {
        let svc = Arc::new(service(Duration::from_secs(60)));
        svc.source().fail.store(true, Ordering::SeqCst);
        let today = ymd(2024, 3, 6);

        let results = futures::future::join_all((0..8).map(|_| {
            let svc = svc.clone();
            async move { svc.current(today).await }
        }))
        .await;

        assert_eq!(svc.source().calls.load(Ordering::SeqCst), 1);
        let errors: Vec<_> = results.into_iter().map(|r| r.unwrap_err()).collect();
        assert!(errors.iter().all(|e| Arc::ptr_eq(e, &errors[0])));

        // a caller arriving after the failed run starts a new one
        svc.source().fail.store(false, Ordering::SeqCst);
        svc.current(today).await.unwrap();
        assert_eq!(svc.source().calls.load(Ordering::SeqCst), 2);
    }
}
