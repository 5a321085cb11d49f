use crate::aggregate::{aggregate_rows, observed_channels};
use crate::error::{HistoryError, HistoryResult};
use crate::partitions::{plan_partitions, PartitionPlan};
use crate::query::build_history_query;
use crate::request::{resolve_plan, HistoryRequest, QueryDefaults, QueryPlan};
use crate::store::{HistoryStore, SqliteStore};
use crate::types::ResultSet;
use chrono::Utc;
use rusqlite::InterruptHandle;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tracing::Instrument;
use uuid::Uuid;

/// Runs history requests against the SQLite database at `db_path`, one
/// read-only connection per request.
#[derive(Debug, Clone)]
pub struct HistoryQueryService {
    db_path: PathBuf,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
    defaults: Arc<QueryDefaults>,
}

impl HistoryQueryService {
    pub fn new(
        db_path: PathBuf,
        max_concurrent: usize,
        timeout: Duration,
        defaults: QueryDefaults,
    ) -> Self {
        Self {
            db_path,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
            defaults: Arc::new(defaults),
        }
    }

    pub async fn run(&self, request: HistoryRequest) -> HistoryResult<ResultSet> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("history_query", %request_id);
        self.run_inner(request).instrument(span).await
    }

    async fn run_inner(&self, request: HistoryRequest) -> HistoryResult<ResultSet> {
        let plan = resolve_plan(&request, &self.defaults, Utc::now().timestamp_millis())?;
        tracing::debug!(
            from_ms = plan.window.from_ms,
            to_ms = plan.window.to_ms,
            channels = plan.selector.channels().len(),
            category = plan.selector.category().unwrap_or("none"),
            aggregation = %plan.aggregation.label(),
            "resolved history query"
        );

        let db_path = self.db_path.clone();
        self.run_plan(plan, move || SqliteStore::open_read_only(&db_path))
            .await
    }

    /// Opens a store with `open` and executes `plan` on the blocking pool.
    ///
    /// The permit and the store live on the blocking task, so both are held
    /// until the statement actually stops. When the timeout fires first the
    /// running statement is interrupted; a store that has not been opened yet
    /// is never queried.
    async fn run_plan<S, F>(&self, plan: QueryPlan, open: F) -> HistoryResult<ResultSet>
    where
        S: HistoryStore,
        F: FnOnce() -> HistoryResult<S> + Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| HistoryError::Internal("history query gate closed".to_string()))?;

        let (interrupt_tx, mut interrupt_rx) = oneshot::channel::<InterruptHandle>();
        let timeout = self.timeout;
        let span = tracing::Span::current();
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _entered = span.enter();
            let store = open()?;
            if let Some(handle) = store.interrupt_handle() {
                if interrupt_tx.send(handle).is_err() {
                    tracing::debug!("history query abandoned before it started");
                    return Err(HistoryError::Timeout(timeout));
                }
            }
            execute(&store, &plan)
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(HistoryError::Internal(join_err.to_string())),
            Err(_) => {
                interrupt_rx.close();
                if let Ok(handle) = interrupt_rx.try_recv() {
                    handle.interrupt();
                }
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "history query timed out; interrupted"
                );
                Err(HistoryError::Timeout(timeout))
            }
        }
    }
}

/// Runs a resolved plan against `store`.
///
/// Missing partitions or an empty working set yield an empty result set. A
/// failed metadata lookup is logged and the summaries carry no metadata.
pub fn execute<S>(store: &S, plan: &QueryPlan) -> HistoryResult<ResultSet>
where
    S: HistoryStore + ?Sized,
{
    let partitions = match plan_partitions(store, &plan.window)? {
        PartitionPlan::Scan(partitions) => partitions,
        PartitionPlan::NoData => {
            tracing::warn!(
                from_ms = plan.window.from_ms,
                to_ms = plan.window.to_ms,
                "no data partitions for this period"
            );
            return Ok(ResultSet::new());
        }
    };

    let query = build_history_query(&partitions, &plan.window, &plan.selector, &plan.aggregation);
    let rows = store.fetch_rows(&query)?;
    if rows.is_empty() {
        tracing::debug!(partitions = partitions.len(), "no rows matched");
        return Ok(ResultSet::new());
    }

    let channels = observed_channels(&rows);
    let metadata = match store.channel_metadata(&channels) {
        Ok(metadata) => metadata,
        Err(err) => {
            tracing::warn!(error = %err, "failed to fetch channel metadata; sending raw data");
            vec![]
        }
    };

    let row_count = rows.len();
    let result = aggregate_rows(rows, &metadata);
    tracing::info!(
        partitions = partitions.len(),
        rows = row_count,
        channels = result.len(),
        "history query complete"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryStage;
    use crate::query::{AggregateFunction, Aggregation, HistoryQuery};
    use crate::selector::{ChannelSelector, NO_CATEGORY};
    use crate::store::is_interrupted;
    use crate::test_support::{utc_ms, HistoryDbFixture};
    use crate::types::{ChannelMetadata, RawRow, SampleRecord};
    use crate::window::TimeWindow;
    use rusqlite::Connection;
    use std::cell::Cell;
    use std::sync::mpsc;

    fn plan(window: TimeWindow, selector: ChannelSelector, aggregation: Aggregation) -> QueryPlan {
        QueryPlan {
            window,
            selector,
            aggregation,
        }
    }

    fn jan_window() -> TimeWindow {
        TimeWindow::new(utc_ms(2026, 1, 1, 0, 0, 0), utc_ms(2026, 1, 31, 0, 0, 0)).unwrap()
    }

    #[test]
    fn raw_round_trip_over_one_partition() {
        let fixture = HistoryDbFixture::new();
        let t0 = utc_ms(2026, 1, 2, 0, 0, 0);
        fixture
            .sample("hai_data_202601", t0 + 100, "a", 5.0)
            .sample("hai_data_202601", t0 + 200, "a", 9.0)
            .var("a", "C", "boiler", "temp");

        let store = SqliteStore::open_read_only(&fixture.path).unwrap();
        let result = execute(
            &store,
            &plan(jan_window(), ChannelSelector::new(["a"], NO_CATEGORY), Aggregation::Raw),
        )
        .unwrap();

        assert_eq!(result.len(), 1);
        let a = &result["a"];
        assert_eq!((a.min, a.max, a.avg), (Some(5.0), Some(9.0), Some(7.0)));
        assert_eq!(
            a.records,
            vec![
                SampleRecord { ts: t0 + 100, value: Some(5.0) },
                SampleRecord { ts: t0 + 200, value: Some(9.0) },
            ]
        );
        assert_eq!(a.unit.as_deref(), Some("C"));
        assert_eq!(a.category.as_deref(), Some("temp"));
        assert_eq!(a.start_time.as_deref(), Some("2026-01-02 00:00:00 UTC"));
    }

    #[test]
    fn category_selection_spans_partitions_and_widens_metadata() {
        let fixture = HistoryDbFixture::new();
        fixture
            .sample("hai_data_202512", utc_ms(2025, 12, 31, 23, 0, 0), "t1", 20.0)
            .sample("hai_data_202601", utc_ms(2026, 1, 1, 1, 0, 0), "t1", 22.0)
            .sample("hai_data_202601", utc_ms(2026, 1, 1, 1, 0, 0), "t2", 18.0)
            .sample("hai_data_202601", utc_ms(2026, 1, 1, 1, 0, 0), "p1", 1.0)
            .var("t1", "C", "boiler", "temp")
            .var("t2", "C", "room", "temp")
            .var("p1", "bar", "line", "pressure");

        let window =
            TimeWindow::new(utc_ms(2025, 12, 31, 0, 0, 0), utc_ms(2026, 1, 2, 0, 0, 0)).unwrap();
        let store = SqliteStore::open_read_only(&fixture.path).unwrap();
        let result = execute(
            &store,
            &plan(
                window,
                ChannelSelector::new(Vec::<String>::new(), "temp"),
                Aggregation::Raw,
            ),
        )
        .unwrap();

        assert_eq!(result.keys().collect::<Vec<_>>(), vec!["t1", "t2"]);
        assert_eq!(result["t1"].records.len(), 2);
        assert_eq!(result["t2"].description.as_deref(), Some("room"));
    }

    #[test]
    fn last_value_returns_one_record_per_channel() {
        let fixture = HistoryDbFixture::new();
        let t0 = utc_ms(2026, 1, 3, 0, 0, 0);
        fixture
            .sample("hai_data_202601", t0 + 100, "a", 1.0)
            .sample("hai_data_202601", t0 + 200, "a", 2.0);

        let store = SqliteStore::open_read_only(&fixture.path).unwrap();
        let result = execute(
            &store,
            &plan(jan_window(), ChannelSelector::new(["a"], NO_CATEGORY), Aggregation::LastValue),
        )
        .unwrap();
        assert_eq!(
            result["a"].records,
            vec![SampleRecord { ts: t0 + 200, value: Some(2.0) }]
        );
    }

    #[test]
    fn bucketed_delta_feeds_the_summary() {
        let fixture = HistoryDbFixture::new();
        let t0 = utc_ms(2026, 1, 4, 10, 0, 0);
        fixture
            .sample("hai_data_202601", t0 + 1_000, "a", 3.0)
            .sample("hai_data_202601", t0 + 2_000, "a", 7.0)
            .sample("hai_data_202601", t0 + 3_000, "a", 5.0);

        let store = SqliteStore::open_read_only(&fixture.path).unwrap();
        let result = execute(
            &store,
            &plan(
                jan_window(),
                ChannelSelector::new(["a"], NO_CATEGORY),
                Aggregation::Bucketed {
                    interval_format: "%Y-%m-%d %H".to_string(),
                    function: AggregateFunction::Delta,
                },
            ),
        )
        .unwrap();
        let a = &result["a"];
        assert_eq!(a.records, vec![SampleRecord { ts: t0 + 1_000, value: Some(4.0) }]);
        assert_eq!(a.avg, Some(4.0));
    }

    #[test]
    fn window_without_partitions_is_empty_not_an_error() {
        let fixture = HistoryDbFixture::new();
        fixture.sample("hai_data_202401", utc_ms(2024, 1, 5, 0, 0, 0), "a", 1.0);
        let store = SqliteStore::open_read_only(&fixture.path).unwrap();
        let result = execute(
            &store,
            &plan(jan_window(), ChannelSelector::new(["a"], NO_CATEGORY), Aggregation::Raw),
        )
        .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn unmatched_channels_yield_an_empty_result() {
        let fixture = HistoryDbFixture::new();
        fixture.sample("hai_data_202601", utc_ms(2026, 1, 5, 0, 0, 0), "a", 1.0);
        let store = SqliteStore::open_read_only(&fixture.path).unwrap();
        let result = execute(
            &store,
            &plan(jan_window(), ChannelSelector::new(["zz"], NO_CATEGORY), Aggregation::Raw),
        )
        .unwrap();
        assert!(result.is_empty());
    }

    struct FlakyMetadataStore {
        metadata_calls: Cell<usize>,
    }

    impl HistoryStore for FlakyMetadataStore {
        fn partition_tables(&self, first: &str, _last: &str) -> HistoryResult<Vec<String>> {
            Ok(vec![first.to_string()])
        }

        fn fetch_rows(&self, _query: &HistoryQuery) -> HistoryResult<Vec<RawRow>> {
            Ok(vec![RawRow::new(100, "a", Some(1.0)), RawRow::new(200, "a", Some(3.0))])
        }

        fn channel_metadata(&self, channels: &[String]) -> HistoryResult<Vec<ChannelMetadata>> {
            assert_eq!(channels, ["a".to_string()]);
            self.metadata_calls.set(self.metadata_calls.get() + 1);
            Err(HistoryError::query(
                QueryStage::Metadata,
                rusqlite::Error::InvalidQuery,
            ))
        }
    }

    #[test]
    fn metadata_failure_degrades_to_null_metadata() {
        let store = FlakyMetadataStore {
            metadata_calls: Cell::new(0),
        };
        let result = execute(
            &store,
            &plan(
                TimeWindow::new(0, 1_000).unwrap(),
                ChannelSelector::new(["a"], NO_CATEGORY),
                Aggregation::Raw,
            ),
        )
        .unwrap();
        assert_eq!(store.metadata_calls.get(), 1);
        let a = &result["a"];
        assert_eq!(a.avg, Some(2.0));
        assert_eq!((a.unit.clone(), a.description.clone()), (None, None));
    }

    #[test]
    fn data_query_failure_is_fatal() {
        let fixture = HistoryDbFixture::new();
        // Partition with the wrong column layout.
        fixture
            .conn
            .execute_batch("CREATE TABLE hai_data_202601 (ts INTEGER, name TEXT)")
            .unwrap();
        let store = SqliteStore::open_read_only(&fixture.path).unwrap();
        let err = execute(
            &store,
            &plan(jan_window(), ChannelSelector::new(["a"], NO_CATEGORY), Aggregation::Raw),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            HistoryError::Query {
                stage: QueryStage::Data,
                ..
            }
        ));
    }

    #[test]
    fn multi_millennium_window_still_finds_recent_partitions() {
        let fixture = HistoryDbFixture::new();
        let t0 = utc_ms(2026, 1, 2, 0, 0, 0);
        fixture
            .sample("hai_data_197001", 5_000, "a", 1.0)
            .sample("hai_data_202601", t0, "a", 3.0);

        let store = SqliteStore::open_read_only(&fixture.path).unwrap();
        let window = TimeWindow::new(1, utc_ms(4800, 1, 1, 0, 0, 0)).unwrap();
        let result = execute(
            &store,
            &plan(window, ChannelSelector::new(["a"], NO_CATEGORY), Aggregation::Raw),
        )
        .unwrap();
        assert_eq!(
            result["a"].records,
            vec![
                SampleRecord { ts: 5_000, value: Some(1.0) },
                SampleRecord { ts: t0, value: Some(3.0) },
            ]
        );
    }

    /// Answers every data query with a statement that never finishes and
    /// reports whether it ended by interruption.
    struct StalledStore {
        inner: SqliteStore,
        interrupted: mpsc::Sender<bool>,
    }

    impl HistoryStore for StalledStore {
        fn partition_tables(&self, first: &str, _last: &str) -> HistoryResult<Vec<String>> {
            Ok(vec![first.to_string()])
        }

        fn fetch_rows(&self, _query: &HistoryQuery) -> HistoryResult<Vec<RawRow>> {
            let endless = HistoryQuery {
                sql: "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) \
                      SELECT x, x, 'a' FROM n WHERE x < 0"
                    .to_string(),
                params: vec![],
            };
            let result = self.inner.fetch_rows(&endless);
            let interrupted = matches!(&result, Err(err) if is_interrupted(err));
            self.interrupted.send(interrupted).unwrap();
            result
        }

        fn channel_metadata(&self, _channels: &[String]) -> HistoryResult<Vec<ChannelMetadata>> {
            Ok(vec![])
        }

        fn interrupt_handle(&self) -> Option<InterruptHandle> {
            self.inner.interrupt_handle()
        }
    }

    #[tokio::test]
    async fn timeout_interrupts_the_running_statement() {
        let service = HistoryQueryService::new(
            PathBuf::from(":memory:"),
            1,
            Duration::from_millis(200),
            QueryDefaults::default(),
        );
        let (interrupted_tx, interrupted_rx) = mpsc::channel();
        let stalled = plan(
            TimeWindow::new(0, 1_000).unwrap(),
            ChannelSelector::new(["a"], NO_CATEGORY),
            Aggregation::Raw,
        );

        let err = service
            .run_plan(stalled, move || {
                Ok(StalledStore {
                    inner: SqliteStore::from_connection(Connection::open_in_memory().unwrap()),
                    interrupted: interrupted_tx,
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HistoryError::Timeout(timeout) if timeout == Duration::from_millis(200)));

        let interrupted = tokio::task::spawn_blocking(move || {
            interrupted_rx.recv_timeout(Duration::from_secs(10))
        })
        .await
        .unwrap()
        .unwrap();
        assert!(interrupted);

        // The permit returns once the interrupted statement has unwound.
        let permit = tokio::time::timeout(Duration::from_secs(10), service.semaphore.acquire())
            .await
            .unwrap();
        assert!(permit.is_ok());
    }

    fn service_for(fixture: &HistoryDbFixture, timeout: Duration) -> HistoryQueryService {
        HistoryQueryService::new(fixture.path.clone(), 2, timeout, QueryDefaults::default())
    }

    #[tokio::test]
    async fn service_runs_a_request_end_to_end() {
        let fixture = HistoryDbFixture::new();
        let now = Utc::now().timestamp_millis();
        let table = crate::partitions::candidate_partitions(&TimeWindow::new(now, now).unwrap())
            .next()
            .unwrap();
        fixture.sample(&table, now - 60_000, "a", 4.0);

        let service = service_for(&fixture, Duration::from_secs(5));
        let request = HistoryRequest {
            channels: vec!["a".to_string()],
            time_range: Some("15m".to_string()),
            agg_interval: Some("none".to_string()),
            ..Default::default()
        };
        let result = service.run(request).await.unwrap();
        assert_eq!(result["a"].records.len(), 1);
    }

    #[tokio::test]
    async fn service_rejects_empty_selector_before_opening_storage() {
        let service = HistoryQueryService::new(
            PathBuf::from("/nonexistent/history.db"),
            1,
            Duration::from_secs(1),
            QueryDefaults::default(),
        );
        let err = service.run(HistoryRequest::default()).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn service_reports_connection_errors() {
        let service = HistoryQueryService::new(
            PathBuf::from("/nonexistent/history.db"),
            1,
            Duration::from_secs(1),
            QueryDefaults::default(),
        );
        let request = HistoryRequest {
            channels: vec!["a".to_string()],
            ..Default::default()
        };
        let err = service.run(request).await.unwrap_err();
        assert!(matches!(err, HistoryError::Connection { .. }));
    }
}
