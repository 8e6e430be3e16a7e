use crate::ingest::{Endpoint, Transport};
use crate::model::{parse_lines, Dataset, LineSummary, Parsed};
use crate::store::{SnapshotKind, SnapshotWriter};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use collector_core::backoff::{retry_with_backoff, ResponseClass, RetryPolicy, RetryState, Sleeper};
use collector_core::batch::{partition, Batch, CollectionTarget};
use collector_core::dedupe::dedupe;
use collector_core::{Config, Error, Result};
use futures::stream::{self, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use metrics::{counter, histogram};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Stages of one collection run. `Failed` can follow any other stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", content = "detail", rename_all = "snake_case")]
pub enum RunStage {
    Start,
    BatchesBuilt(usize),
    Fetching(usize),
    Merged,
    Deduped,
    Written,
    Done,
    Failed(String),
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStage::Start => write!(f, "start"),
            RunStage::BatchesBuilt(n) => write!(f, "batches_built({n})"),
            RunStage::Fetching(i) => write!(f, "fetching({i})"),
            RunStage::Merged => write!(f, "merged"),
            RunStage::Deduped => write!(f, "deduped"),
            RunStage::Written => write!(f, "written"),
            RunStage::Done => write!(f, "done"),
            RunStage::Failed(reason) => write!(f, "failed({reason})"),
        }
    }
}

#[derive(Debug, Default)]
struct StageLog {
    stages: Vec<RunStage>,
}

impl StageLog {
    fn enter(&mut self, stage: RunStage) {
        debug!(stage = %stage, "Run stage");
        self.stages.push(stage);
    }

    fn fail(&mut self, err: Error) -> Error {
        self.enter(RunStage::Failed(err.kind().to_string()));
        err
    }
}

/// An identifier left out of the snapshot and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingTarget {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub kind: SnapshotKind,
    pub capture: DateTime<Utc>,
    pub path: PathBuf,
    pub rows: usize,
    pub duplicates_dropped: usize,
    pub quarantined: usize,
    pub batches_total: usize,
    pub batches_succeeded: usize,
    pub missing: Vec<MissingTarget>,
    pub stages: Vec<RunStage>,
}

impl RunReport {
    pub fn is_partial(&self) -> bool {
        !self.missing.is_empty()
    }
}

struct BatchOutcome<R> {
    batch: Batch,
    result: Result<Parsed<R>>,
}

pub struct Pipeline {
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    limiter: Arc<DefaultDirectRateLimiter>,
    policy: RetryPolicy,
    config: Config,
}

impl Pipeline {
    pub fn new(transport: Arc<dyn Transport>, sleeper: Arc<dyn Sleeper>, config: Config) -> Self {
        let per_second =
            NonZeroU32::new(config.api.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Self {
            transport,
            sleeper,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
            policy: RetryPolicy::from_config(&config.retry),
            config,
        }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.api.timeout_secs)
    }

    /// One paced GET, classified for the retry loop.
    async fn request(
        &self,
        url: &str,
        dataset: &'static str,
    ) -> std::result::Result<Bytes, ResponseClass> {
        self.limiter.until_ready().await;

        let started = Instant::now();
        let response = self.transport.fetch(url, self.request_timeout()).await;
        let class = response.class();

        histogram!("tfl_collector_fetch_duration_ms", "dataset" => dataset)
            .record(started.elapsed().as_millis() as f64);
        counter!("tfl_collector_requests_total", "dataset" => dataset, "class" => class.label())
            .increment(1);

        if let crate::ingest::RawResponse::NetworkError(details) = &response {
            debug!(url, details = %details, "Network error");
        }

        response.into_result()
    }

    /// List lines for the configured modes via `/Line/Mode/{modes}`.
    pub async fn discover_lines(&self, seed: u64) -> Result<Vec<LineSummary>> {
        let modes = self.config.collect.modes.join(",");
        let url = Endpoint::LinesByMode(modes.clone()).url(&self.config.api.base_url);
        let mut state = RetryState::new(seed);

        let body = retry_with_backoff(
            || self.request(&url, "lines"),
            &self.policy,
            &mut state,
            self.sleeper.as_ref(),
            "discover_lines",
        )
        .await
        .map_err(|failure| failure.into_error(format!("modes:{modes}")))?;

        let parsed = parse_lines(&body).map_err(|e| Error::MalformedPayload {
            batch: format!("modes:{modes}"),
            details: e.to_string(),
        })?;

        if parsed.quarantined > 0 {
            warn!(quarantined = parsed.quarantined, "Skipped malformed line entries");
        }
        info!(modes = %modes, lines = parsed.records.len(), "Discovered lines");

        Ok(parsed.records)
    }

    /// Configured line ids, or discovered ones when none are configured.
    /// Repeated ids are dropped, first occurrence kept.
    async fn resolve_targets<D: Dataset>(&self, seed: u64) -> Result<Vec<CollectionTarget>> {
        let ids = if self.config.collect.line_ids.is_empty() {
            self.discover_lines(seed)
                .await?
                .into_iter()
                .map(|line| line.id)
                .collect()
        } else {
            self.config.collect.line_ids.clone()
        };

        let mut seen = HashSet::new();
        Ok(ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .map(|id| CollectionTarget::new(id, Some(D::RESOURCE)))
            .collect())
    }

    async fn fetch_batch<D: Dataset>(
        &self,
        batch: Batch,
        capture: DateTime<Utc>,
        seed: u64,
    ) -> BatchOutcome<D::Record> {
        let url = D::endpoint(&batch).url(&self.config.api.base_url);
        let label = batch.ids_csv();
        let mut state = RetryState::new(seed);

        let fetched = retry_with_backoff(
            || self.request(&url, D::KIND.as_str()),
            &self.policy,
            &mut state,
            self.sleeper.as_ref(),
            &label,
        )
        .await;

        let result = match fetched {
            Ok(body) => D::parse(&body, capture).map_err(|e| Error::MalformedPayload {
                batch: label.clone(),
                details: e.to_string(),
            }),
            Err(failure) => Err(failure.into_error(label.clone())),
        };

        if let Err(e) = &result {
            error!(
                batch = %label,
                attempts = state.attempts(),
                last = %state.last().map(|c| c.to_string()).unwrap_or_else(|| "success".into()),
                error = %e,
                "Batch failed"
            );
            counter!(
                "tfl_collector_batches_failed_total",
                "dataset" => D::KIND.as_str(),
                "kind" => e.kind()
            )
            .increment(1);
        }

        BatchOutcome { batch, result }
    }

    /// Collect one snapshot of dataset `D` stamped with `capture`.
    pub async fn collect<D: Dataset>(&self, capture: DateTime<Utc>) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("collect", %run_id, kind = D::KIND.as_str(), capture = %capture);
        self.run::<D>(run_id, capture).instrument(span).await
    }

    async fn run<D: Dataset>(&self, run_id: Uuid, capture: DateTime<Utc>) -> Result<RunReport> {
        let mut log = StageLog::default();
        log.enter(RunStage::Start);

        let seed = self.config.retry.seed.unwrap_or_else(rand::random);
        let targets = self.resolve_targets::<D>(seed).await.map_err(|e| log.fail(e))?;
        if targets.is_empty() {
            return Err(log.fail(Error::Config("no collection targets".to_string())));
        }

        let batches = partition(&targets, D::batch_size(&self.config.collect))
            .map_err(|e| log.fail(e))?;
        let batches_total = batches.len();
        log.enter(RunStage::BatchesBuilt(batches_total));
        info!(
            targets = targets.len(),
            batches = batches_total,
            "Starting collection"
        );

        let mut pending: BTreeMap<usize, Batch> =
            batches.iter().map(|b| (b.index, b.clone())).collect();
        let mut outcomes = Vec::with_capacity(batches_total);
        let deadline = tokio::time::Instant::now()
            .checked_add(Duration::from_secs(self.config.collect.run_deadline_secs))
            .ok_or_else(|| {
                log.fail(Error::Config(
                    "collect.run_deadline_secs is out of range".to_string(),
                ))
            })?;

        {
            // Batches enter `Fetching` as the stream pulls them into flight
            let mut in_flight = stream::iter(batches.into_iter().map(|batch| {
                log.enter(RunStage::Fetching(batch.index));
                let batch_seed = seed.wrapping_add(1 + batch.index as u64);
                self.fetch_batch::<D>(batch, capture, batch_seed)
            }))
            .buffer_unordered(self.config.collect.max_concurrent_batches.max(1));

            loop {
                match tokio::time::timeout_at(deadline, in_flight.next()).await {
                    Ok(Some(outcome)) => {
                        pending.remove(&outcome.batch.index);
                        outcomes.push(outcome);
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!(
                            outstanding = pending.len(),
                            "Run deadline reached, abandoning outstanding batches"
                        );
                        break;
                    }
                }
            }
        }

        for (_, batch) in pending {
            let err = Error::DeadlineExceeded {
                batch: batch.ids_csv(),
            };
            counter!(
                "tfl_collector_batches_failed_total",
                "dataset" => D::KIND.as_str(),
                "kind" => err.kind()
            )
            .increment(1);
            outcomes.push(BatchOutcome {
                batch,
                result: Err(err),
            });
        }

        // Merge in batch order so the snapshot does not depend on completion order
        outcomes.sort_by_key(|o| o.batch.index);

        let mut records = Vec::new();
        let mut missing = Vec::new();
        let mut quarantined = 0;
        let mut batches_succeeded = 0;
        for outcome in outcomes {
            match outcome.result {
                Ok(parsed) => {
                    batches_succeeded += 1;
                    quarantined += parsed.quarantined;
                    records.extend(parsed.records);
                }
                Err(e) => missing.extend(outcome.batch.targets.into_iter().map(|t| MissingTarget {
                    id: t.id,
                    reason: e.kind().to_string(),
                })),
            }
        }

        if batches_succeeded == 0 {
            return Err(log.fail(Error::NoSnapshot {
                missing: missing.into_iter().map(|m| m.id).collect(),
            }));
        }
        log.enter(RunStage::Merged);

        if quarantined > 0 {
            warn!(quarantined, "Quarantined malformed upstream entries");
            counter!("tfl_collector_records_quarantined_total", "dataset" => D::KIND.as_str())
                .increment(quarantined as u64);
        }

        let merged = records.len();
        let mut records = dedupe(records);
        let duplicates_dropped = merged - records.len();
        D::finalize(&mut records);
        log.enter(RunStage::Deduped);
        if duplicates_dropped > 0 {
            debug!(duplicates_dropped, "Dropped duplicate records");
            counter!("tfl_collector_duplicates_dropped_total", "dataset" => D::KIND.as_str())
                .increment(duplicates_dropped as u64);
        }

        let writer = SnapshotWriter::new(
            D::output_dir(&self.config.output),
            self.config.output.partition_by_day,
        );
        let rows = records.len();
        let path = tokio::task::spawn_blocking(move || writer.write(&records, capture, D::KIND))
            .await
            .map_err(|e| Error::Internal(format!("snapshot writer task panicked: {e}")))
            .and_then(|written| written)
            .map_err(|e| log.fail(e))?;
        log.enter(RunStage::Written);
        histogram!("tfl_collector_snapshot_rows", "dataset" => D::KIND.as_str())
            .record(rows as f64);

        if !missing.is_empty() {
            let ids: Vec<_> = missing.iter().map(|m| m.id.as_str()).collect();
            warn!(
                missing = %ids.join(","),
                batches_failed = batches_total - batches_succeeded,
                "Snapshot written without some identifiers"
            );
        }

        log.enter(RunStage::Done);
        info!(
            path = %path.display(),
            rows,
            duplicates_dropped,
            batches_succeeded,
            batches_total,
            "Collection run finished"
        );

        Ok(RunReport {
            run_id,
            kind: D::KIND,
            capture,
            path,
            rows,
            duplicates_dropped,
            quarantined,
            batches_total,
            batches_succeeded,
            missing,
            stages: log.stages,
        })
    }
}
