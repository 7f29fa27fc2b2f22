//! Query engine.
//!
//! Resolves the model run, maps parameters onto dataset files, selects the file that answers
//! each requested valid time and assembles the result. Only an unknown model run, an invalid
//! request or an elapsed timeout fail a query; every other problem becomes a no-data marker.

use chrono::{Duration, NaiveDateTime};
use hashbrown::HashMap;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;
use validator::Validate;

use crate::accessor::{GridAccessor, HandlePool, TimedValue};
use crate::error::WxError;
use crate::index::{
    DatasetFile, DatasetIndex, RunIndex, RunSummary, ScanCache, DEFAULT_RUN_PATTERN,
};
use crate::metrics;
use crate::models::{
    ModelRun, NoDataReason, Point, QueryRequest, SpatialInterpolation, TimeInterpolation,
    TimeRange,
};
use crate::parameters::ParameterTable;
use crate::resource_manager::ResourceManager;
use crate::result::{ParameterSeries, QueryResult, Sample, Value};

/// Default number of pooled dataset file handles.
pub const DEFAULT_HANDLE_CAPACITY: usize = 64;

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Data root directory
    pub data_root: PathBuf,
    /// `strftime` pattern of run directories relative to the data root
    pub run_pattern: String,
    /// Maximum number of pooled dataset file handles
    pub handle_capacity: NonZeroUsize,
    pub time_interpolation: TimeInterpolation,
    pub spatial_interpolation: SpatialInterpolation,
    /// Maximum number of concurrent dataset file reads
    pub file_read_limit: Option<usize>,
    /// Maximum memory in bytes used to decode variables
    pub memory_limit: Option<usize>,
    /// Maximum number of concurrent queries
    pub query_limit: Option<usize>,
    /// Whether to decode on rayon rather than the tokio blocking pool
    pub use_rayon: bool,
}

impl EngineConfig {
    /// Returns a configuration with defaults for everything but the data root.
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        EngineConfig {
            data_root: data_root.into(),
            run_pattern: DEFAULT_RUN_PATTERN.to_string(),
            handle_capacity: NonZeroUsize::new(DEFAULT_HANDLE_CAPACITY)
                .unwrap_or(NonZeroUsize::MIN),
            time_interpolation: TimeInterpolation::default(),
            spatial_interpolation: SpatialInterpolation::default(),
            file_read_limit: None,
            memory_limit: None,
            query_limit: None,
            use_rayon: false,
        }
    }
}

/// Answers [QueryRequest]s from the dataset files below a data root.
#[derive(Debug)]
pub struct QueryEngine {
    index: DatasetIndex,
    accessor: GridAccessor,
    resource_manager: Arc<ResourceManager>,
}

impl QueryEngine {
    /// Returns a new QueryEngine from its parts.
    pub fn new(
        index: DatasetIndex,
        accessor: GridAccessor,
        resource_manager: Arc<ResourceManager>,
    ) -> Self {
        QueryEngine {
            index,
            accessor,
            resource_manager,
        }
    }

    /// Returns a new QueryEngine for `config`, sharing `cache` for run scans.
    pub fn from_config(config: &EngineConfig, table: ParameterTable, cache: Arc<ScanCache>) -> Self {
        let resource_manager = Arc::new(ResourceManager::new(
            config.file_read_limit,
            config.memory_limit,
            config.query_limit,
        ));
        let index = DatasetIndex::new(&config.data_root, &config.run_pattern, cache);
        let accessor = GridAccessor::new(
            Arc::new(table),
            Arc::new(HandlePool::new(config.handle_capacity)),
            resource_manager.clone(),
        )
        .with_interpolation(config.time_interpolation, config.spatial_interpolation)
        .with_rayon(config.use_rayon);
        Self::new(index, accessor, resource_manager)
    }

    pub fn index(&self) -> &DatasetIndex {
        &self.index
    }

    pub fn parameters(&self) -> &ParameterTable {
        self.accessor.table()
    }

    /// Forget everything cached about `run`. Returns whether its scan was cached.
    pub fn invalidate(&self, run: &ModelRun) -> bool {
        self.accessor.pool().evict_run(run);
        self.index.invalidate(run)
    }

    /// Summarise every model run below the data root, ascending.
    ///
    /// Runs whose directory holds no dataset files are listed without coverage.
    pub async fn runs(&self) -> Result<Vec<RunSummary>, WxError> {
        let mut summaries = vec![];
        for run in self.index.runs().await? {
            let summary = match self.index.resolve(run).await {
                Ok(index) => RunSummary::new(run, &index),
                Err(WxError::UnknownModelRun(_)) => RunSummary::empty(run),
                Err(err) => return Err(err),
            };
            summaries.push(summary);
        }
        Ok(summaries)
    }

    /// Answer `request`.
    ///
    /// Fails with [WxError::UnknownModelRun] if the model run has no dataset files, or with a
    /// validation error if the request is invalid.
    #[tracing::instrument(
        level = "INFO",
        skip(self, request),
        fields(query_id = %Uuid::new_v4(), model_run = %request.model_run)
    )]
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResult, WxError> {
        let timer = metrics::QUERY_TIME_COLLECTOR
            .with_label_values(&[])
            .start_timer();
        let result = self.run_query(request).await;
        timer.observe_duration();
        let outcome = match &result {
            Ok(_) => "ok",
            Err(WxError::UnknownModelRun(_)) => "unknown_model_run",
            Err(WxError::RequestValidation(_)) | Err(WxError::RequestValidationSingle(_)) => {
                "invalid"
            }
            Err(_) => "error",
        };
        metrics::QUERIES.with_label_values(&[outcome]).inc();
        result
    }

    /// Answer `request`, failing with [WxError::Timeout] if it takes longer than `timeout`.
    ///
    /// A query that times out is dropped; caches stay consistent.
    pub async fn query_with_timeout(
        &self,
        request: &QueryRequest,
        timeout: std::time::Duration,
    ) -> Result<QueryResult, WxError> {
        match tokio::time::timeout(timeout, self.query(request)).await {
            Ok(result) => result,
            Err(elapsed) => {
                metrics::QUERIES.with_label_values(&["timeout"]).inc();
                Err(elapsed.into())
            }
        }
    }

    async fn run_query(&self, request: &QueryRequest) -> Result<QueryResult, WxError> {
        request.validate()?;
        let _task = self.resource_manager.task().await?;
        let run_index = self.index.resolve(request.model_run).await?;
        let range = request.time_range();
        let times = requested_times(request, &run_index);
        let point = request.point();
        debug!(times = times.len(), "resolved model run");

        let mut series = vec![];
        for parameter in request.unique_parameters() {
            let samples = self
                .parameter_series(request.model_run, &parameter, &range, &times, point)
                .await?;
            for sample in &samples.samples {
                if let Value::NoData(reason) = sample.value {
                    metrics::NO_DATA_RECORDS
                        .with_label_values(&[reason.to_string().as_str()])
                        .inc();
                }
            }
            series.push(samples);
        }
        Ok(QueryResult {
            model_run: request.model_run,
            latitude: request.latitude,
            longitude: request.longitude,
            series,
            warnings: run_index.issues.clone(),
        })
    }

    /// Resolve one parameter at every requested time.
    async fn parameter_series(
        &self,
        run: ModelRun,
        parameter: &str,
        range: &TimeRange,
        times: &[NaiveDateTime],
        point: Point,
    ) -> Result<ParameterSeries, WxError> {
        let table = self.accessor.table();
        let unit = table.get(parameter).map(|p| p.unit.clone());
        if !table.contains(parameter) {
            return Ok(ParameterSeries::no_data(
                parameter,
                unit,
                times,
                NoDataReason::UnknownParameter,
            ));
        }
        let mut files = match self
            .index
            .find_files_covering(run, range, &[parameter.to_string()], table)
            .await
        {
            Ok(files) => files,
            Err(err) => match err.no_data_reason() {
                Some(reason) => return Ok(ParameterSeries::no_data(parameter, unit, times, reason)),
                None => return Err(err),
            },
        };
        sort_by_precedence(&mut files);

        let mut resolved: BTreeMap<NaiveDateTime, Option<f64>> = BTreeMap::new();
        let mut failures: HashMap<NaiveDateTime, NoDataReason> = HashMap::new();
        for file in &files {
            let wanted: Vec<NaiveDateTime> = times
                .iter()
                .filter(|time| !resolved.contains_key(*time) && file.spans(time))
                .copied()
                .collect();
            if wanted.is_empty() {
                continue;
            }
            match self.extract(file, parameter, &wanted, point).await {
                Ok(values) => resolved.extend(values),
                Err(err) => {
                    let reason = match err.no_data_reason() {
                        Some(reason) => reason,
                        None => return Err(err),
                    };
                    warn!(path = %file.path.display(), parameter, "{}", err);
                    for time in wanted {
                        failures.entry(time).or_insert(reason);
                    }
                }
            }
            if resolved.len() == times.len() {
                break;
            }
        }

        let samples = times
            .iter()
            .map(|time| {
                let value = match resolved.get(time) {
                    Some(Some(value)) => Value::Value(*value),
                    Some(None) => Value::NoData(NoDataReason::MissingValue),
                    None => Value::NoData(
                        failures
                            .get(time)
                            .copied()
                            .unwrap_or(NoDataReason::NoCoverage),
                    ),
                };
                Sample {
                    valid_time: *time,
                    value,
                }
            })
            .collect();
        Ok(ParameterSeries {
            parameter: parameter.to_string(),
            unit,
            samples,
        })
    }

    async fn extract(
        &self,
        file: &Arc<DatasetFile>,
        parameter: &str,
        times: &[NaiveDateTime],
        point: Point,
    ) -> Result<Vec<TimedValue>, WxError> {
        let handle = self.accessor.open(file).await?;
        self.accessor
            .extract_at(&handle, parameter, times, point)
            .await
    }
}

/// Valid times a request asks for, ascending.
///
/// With an interval, the stepped times from start to end. Otherwise the axis times of the run
/// within the range, or the range bounds if the run has none there.
pub fn requested_times(request: &QueryRequest, run_index: &RunIndex) -> Vec<NaiveDateTime> {
    let range = request.time_range();
    if let Some(hours) = request.interval_hours {
        // Validated requests always have a representable interval.
        return range.steps(Duration::try_hours(hours).unwrap_or(Duration::MAX));
    }
    let times = run_index.valid_times_within(&range);
    if !times.is_empty() {
        return times;
    }
    let mut bounds = vec![range.start, range.end];
    bounds.dedup();
    bounds
}

/// Order candidate files: shorter lead time first, then manifest path.
pub fn sort_by_precedence(files: &mut [Arc<DatasetFile>]) {
    files.sort_by(|a, b| {
        a.lead_time()
            .cmp(&b.lead_time())
            .then_with(|| a.path.cmp(&b.path))
    });
}
