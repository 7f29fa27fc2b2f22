//! Dataset index.
//!
//! Maps a model run onto the dataset files found in its run directory below the data root, and
//! exposes their time and spatial coverage without reading any payload.

use chrono::format::{Item, StrftimeItems};
use chrono::{Duration, NaiveDateTime};
use hashbrown::HashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::axis::RegularAxis;
use crate::error::WxError;
use crate::manifest::{GridManifest, MANIFEST_SUFFIX};
use crate::metrics;
use crate::models::{timestamp, ModelRun, TimeRange};
use crate::parameters::ParameterTable;

/// Default layout of run directories below the data root.
pub const DEFAULT_RUN_PATTERN: &str = "gfs.%Y%m%d/%H";

/// Horizontal coverage of a dataset file.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SpatialExtent {
    pub latitude: RegularAxis,
    pub longitude: RegularAxis,
}

impl SpatialExtent {
    /// Bounding box as `[south, north, west, east]` in the file's longitude convention.
    pub fn bounds(&self) -> [f64; 4] {
        [
            self.latitude.min(),
            self.latitude.max(),
            self.longitude.min(),
            self.longitude.max(),
        ]
    }

    /// Grid resolution as `(latitude, longitude)` spacing in degrees.
    pub fn resolution(&self) -> (f64, f64) {
        (self.latitude.step.abs(), self.longitude.step.abs())
    }
}

/// One gridded file of a model run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DatasetFile {
    /// Path of the manifest
    pub path: PathBuf,
    pub model_run: ModelRun,
    pub product: String,
    /// Valid times covered, ascending
    #[serde(with = "timestamp::vec")]
    pub valid_times: Vec<NaiveDateTime>,
    /// Names of the stored variables
    pub variables: BTreeSet<String>,
    pub extent: SpatialExtent,
}

impl DatasetFile {
    fn from_manifest(path: PathBuf, manifest: &GridManifest) -> Self {
        DatasetFile {
            path,
            model_run: manifest.model_run,
            product: manifest.product.clone(),
            valid_times: manifest.valid_times.clone(),
            variables: manifest.variables.keys().cloned().collect(),
            extent: SpatialExtent {
                latitude: manifest.latitude,
                longitude: manifest.longitude,
            },
        }
    }

    /// First valid time covered.
    pub fn first_valid_time(&self) -> NaiveDateTime {
        self.valid_times[0]
    }

    /// Last valid time covered.
    pub fn last_valid_time(&self) -> NaiveDateTime {
        self.valid_times[self.valid_times.len() - 1]
    }

    /// Forecast lead time of the first valid time.
    pub fn lead_time(&self) -> Duration {
        self.model_run.lead_time(self.first_valid_time())
    }

    /// Whether `time` lies within the span of the file's time axis.
    pub fn spans(&self, time: &NaiveDateTime) -> bool {
        self.first_valid_time() <= *time && *time <= self.last_valid_time()
    }

    /// Whether the file's time axis intersects `range`.
    pub fn intersects(&self, range: &TimeRange) -> bool {
        range.intersects(&self.first_valid_time(), &self.last_valid_time())
    }

    /// Variable holding `parameter` in this file, if any.
    pub fn variable_for<'a>(&self, parameter: &str, table: &'a ParameterTable) -> Option<&'a str> {
        table
            .variable_for(parameter, &self.product)
            .filter(|variable| self.variables.contains(*variable))
    }
}

/// The files registered for one model run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunIndex {
    pub model_run: Option<ModelRun>,
    /// Valid files, ordered by manifest path
    pub files: Vec<Arc<DatasetFile>>,
    /// Integrity problems with files that were excluded
    pub issues: Vec<String>,
}

impl RunIndex {
    /// Union of the valid times of all files within `range`, ascending.
    pub fn valid_times_within(&self, range: &TimeRange) -> Vec<NaiveDateTime> {
        let times: BTreeSet<NaiveDateTime> = self
            .files
            .iter()
            .flat_map(|file| file.valid_times.iter())
            .filter(|time| range.contains(time))
            .copied()
            .collect();
        times.into_iter().collect()
    }
}

/// Coverage of one model run as listed to clients.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    pub model_run: ModelRun,
    /// Number of valid files
    pub files: usize,
    /// Products of the valid files
    pub products: BTreeSet<String>,
    /// Span of valid times over all files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_times: Option<TimeRange>,
    /// Number of excluded files
    pub issues: usize,
}

impl RunSummary {
    /// Summary of a run without any valid files.
    pub fn empty(model_run: ModelRun) -> Self {
        RunSummary {
            model_run,
            files: 0,
            products: BTreeSet::new(),
            valid_times: None,
            issues: 0,
        }
    }

    /// Summarise the scan of `model_run`.
    pub fn new(model_run: ModelRun, index: &RunIndex) -> Self {
        let first = index.files.iter().map(|file| file.first_valid_time()).min();
        let last = index.files.iter().map(|file| file.last_valid_time()).max();
        RunSummary {
            model_run,
            files: index.files.len(),
            products: index.files.iter().map(|file| file.product.clone()).collect(),
            valid_times: first.zip(last).map(|(first, last)| TimeRange::new(first, last)),
            issues: index.issues.len(),
        }
    }
}

/// Cache of run scans, shared between queries.
///
/// Entries are only replaced after [ScanCache::invalidate] or [ScanCache::clear].
#[derive(Debug, Default)]
pub struct ScanCache {
    runs: RwLock<HashMap<ModelRun, Arc<RunIndex>>>,
}

impl ScanCache {
    /// Returns a new, empty ScanCache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached scan of `run`.
    pub fn get(&self, run: &ModelRun) -> Option<Arc<RunIndex>> {
        let runs = self.runs.read().unwrap_or_else(|err| err.into_inner());
        runs.get(run).cloned()
    }

    /// Insert the scan of `run`, unless one is already cached. Returns the cached scan.
    pub fn insert(&self, run: ModelRun, index: RunIndex) -> Arc<RunIndex> {
        let mut runs = self.runs.write().unwrap_or_else(|err| err.into_inner());
        runs.entry(run).or_insert_with(|| Arc::new(index)).clone()
    }

    /// Forget the scan of `run`. Returns whether it was cached.
    pub fn invalidate(&self, run: &ModelRun) -> bool {
        let mut runs = self.runs.write().unwrap_or_else(|err| err.into_inner());
        runs.remove(run).is_some()
    }

    /// Forget all scans.
    pub fn clear(&self) {
        let mut runs = self.runs.write().unwrap_or_else(|err| err.into_inner());
        runs.clear();
    }

    /// Number of cached scans.
    pub fn len(&self) -> usize {
        self.runs.read().unwrap_or_else(|err| err.into_inner()).len()
    }

    /// Whether no scans are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Index of the dataset files below a data root.
#[derive(Debug)]
pub struct DatasetIndex {
    root: PathBuf,
    run_pattern: String,
    cache: Arc<ScanCache>,
}

impl DatasetIndex {
    /// Returns a new DatasetIndex.
    ///
    /// # Arguments
    ///
    /// * `root`: Data root directory
    /// * `run_pattern`: `strftime` pattern of run directories relative to `root`
    /// * `cache`: Scan cache
    pub fn new(root: impl Into<PathBuf>, run_pattern: &str, cache: Arc<ScanCache>) -> Self {
        DatasetIndex {
            root: root.into(),
            run_pattern: run_pattern.to_string(),
            cache,
        }
    }

    /// Directory holding the files of `run`.
    ///
    /// Fails with [WxError::Config] if the run pattern is not a valid `strftime` pattern.
    pub fn run_dir(&self, run: &ModelRun) -> Result<PathBuf, WxError> {
        let relative = format_run_dir(&run.init_time(), &self.run_pattern)
            .ok_or_else(|| invalid_run_pattern(&self.run_pattern))?;
        Ok(self.root.join(relative))
    }

    /// Returns the files registered for `run`, scanning its directory on first access.
    ///
    /// Fails with [WxError::UnknownModelRun] if nothing is registered for the run.
    #[tracing::instrument(level = "DEBUG", skip(self))]
    pub async fn resolve(&self, run: ModelRun) -> Result<Arc<RunIndex>, WxError> {
        if let Some(index) = self.cache.get(&run) {
            metrics::cache_lookup("scan", true);
            return Ok(index);
        }
        metrics::cache_lookup("scan", false);
        let dir = self.run_dir(&run)?;
        let index = tokio::task::spawn_blocking(move || scan_run(&dir, run)).await??;
        Ok(self.cache.insert(run, index))
    }

    /// Returns the files of `run` that intersect `range` and provide at least one of
    /// `parameters`, ordered by manifest path.
    ///
    /// Fails with [WxError::NoCoverage] if there are none.
    pub async fn find_files_covering(
        &self,
        run: ModelRun,
        range: &TimeRange,
        parameters: &[String],
        table: &ParameterTable,
    ) -> Result<Vec<Arc<DatasetFile>>, WxError> {
        let index = self.resolve(run).await?;
        let files: Vec<Arc<DatasetFile>> = index
            .files
            .iter()
            .filter(|file| file.intersects(range))
            .filter(|file| {
                parameters
                    .iter()
                    .any(|parameter| file.variable_for(parameter, table).is_some())
            })
            .cloned()
            .collect();
        if files.is_empty() {
            return Err(WxError::NoCoverage {
                model_run: run,
                parameters: parameters.join(", "),
            });
        }
        Ok(files)
    }

    /// Forget the scan of `run`, so that the next access rescans its directory.
    pub fn invalidate(&self, run: &ModelRun) -> bool {
        self.cache.invalidate(run)
    }

    /// Forget all scans.
    pub fn clear(&self) {
        self.cache.clear()
    }

    /// Lists the model runs with a directory below the data root, ascending.
    #[tracing::instrument(level = "DEBUG", skip(self))]
    pub async fn runs(&self) -> Result<Vec<ModelRun>, WxError> {
        validate_run_pattern(&self.run_pattern)?;
        let root = self.root.clone();
        let pattern = self.run_pattern.clone();
        Ok(tokio::task::spawn_blocking(move || list_runs(&root, &pattern)).await??)
    }
}

/// Scan a run directory for manifests.
fn scan_run(dir: &Path, run: ModelRun) -> Result<RunIndex, WxError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(WxError::UnknownModelRun(run))
        }
        Err(err) => return Err(err.into()),
    };
    let mut paths = vec![];
    for entry in entries {
        let path = entry?.path();
        let is_manifest = path
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| name.ends_with(MANIFEST_SUFFIX));
        if is_manifest && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    let mut index = RunIndex {
        model_run: Some(run),
        ..Default::default()
    };
    for path in paths {
        match check_file(&path, run) {
            Ok(file) => index.files.push(Arc::new(file)),
            Err(err) => {
                warn!(path = %path.display(), "excluding dataset file: {}", err);
                metrics::corrupt_file("scan");
                index.issues.push(err.to_string());
            }
        }
    }
    if index.files.is_empty() && index.issues.is_empty() {
        return Err(WxError::UnknownModelRun(run));
    }
    debug!(
        files = index.files.len(),
        issues = index.issues.len(),
        "scanned {}",
        dir.display()
    );
    Ok(index)
}

/// Read a manifest and check that it belongs to `run` and that its payload holds every variable.
fn check_file(path: &Path, run: ModelRun) -> Result<DatasetFile, WxError> {
    let manifest = GridManifest::read(path)?;
    if manifest.model_run != run {
        return Err(WxError::CorruptFile {
            path: path.to_path_buf(),
            reason: format!("belongs to model run {}", manifest.model_run),
        });
    }
    let data_path = manifest.data_path(path);
    let payload_len = std::fs::metadata(&data_path)
        .map_err(|err| WxError::corrupt(path, &WxError::Io(err)))?
        .len();
    if payload_len < manifest.payload_len() {
        return Err(WxError::CorruptFile {
            path: path.to_path_buf(),
            reason: format!(
                "payload {} holds {} bytes, variables need {}",
                data_path.display(),
                payload_len,
                manifest.payload_len()
            ),
        });
    }
    Ok(DatasetFile::from_manifest(path.to_path_buf(), &manifest))
}

/// Check that `pattern` is a valid `strftime` pattern for run directories.
pub fn validate_run_pattern(pattern: &str) -> Result<(), WxError> {
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(invalid_run_pattern(pattern));
    }
    Ok(())
}

fn invalid_run_pattern(pattern: &str) -> WxError {
    WxError::Config(format!("invalid run directory pattern {}", pattern))
}

/// Format `time` with `pattern`, or `None` if the pattern is invalid.
fn format_run_dir(time: &NaiveDateTime, pattern: &str) -> Option<String> {
    let mut relative = String::new();
    write!(relative, "{}", time.format(pattern)).ok()?;
    Some(relative)
}

/// Completes a run directory pattern with the fields needed to parse a full timestamp.
fn parse_run_dir(relative: &str, pattern: &str) -> Option<ModelRun> {
    let mut value = relative.to_string();
    let mut format = pattern.to_string();
    for field in ["%H", "%M"] {
        if !pattern.contains(field) {
            value.push_str(" 00");
            format.push(' ');
            format.push_str(field);
        }
    }
    let time = NaiveDateTime::parse_from_str(&value, &format).ok()?;
    // Reject directories that only parse leniently, such as missing zero padding.
    (format_run_dir(&time, pattern)? == relative).then(|| ModelRun::new(time))
}

/// Find run directories below `root`.
fn list_runs(root: &Path, pattern: &str) -> Result<Vec<ModelRun>, WxError> {
    let depth = pattern.split('/').count();
    let mut dirs = vec![PathBuf::new()];
    for _ in 0..depth {
        let mut next = vec![];
        for relative in dirs {
            let entries = match std::fs::read_dir(root.join(&relative)) {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            for entry in entries {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    next.push(relative.join(entry.file_name()));
                }
            }
        }
        dirs = next;
    }
    let mut runs: Vec<ModelRun> = dirs
        .iter()
        .filter_map(|relative| relative.to_str())
        .filter_map(|relative| parse_run_dir(relative, pattern))
        .collect();
    runs.sort();
    runs.dedup();
    Ok(runs)
}
