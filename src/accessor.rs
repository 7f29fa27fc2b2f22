//! Grid accessor.
//!
//! Opens dataset files through a pool of handles and extracts point time series from them.
//! Payload reads and decoding run on blocking threads; locks are only held to look up or insert
//! cache entries.

use bytes::Bytes;
use chrono::NaiveDateTime;
use hashbrown::HashMap;
use lru::LruCache;
use ndarray::{Array3, Axis};
use std::fs::File;
use std::num::NonZeroUsize;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::SemaphorePermit;
use tracing::debug;

use crate::array::decode_variable;
use crate::axis::{self, RegularAxis, TimePosition};
use crate::error::WxError;
use crate::index::DatasetFile;
use crate::interpolation::{self, Stencil};
use crate::manifest::GridManifest;
use crate::metrics;
use crate::models::{ModelRun, Point, SpatialInterpolation, TimeInterpolation, TimeRange};
use crate::parameters::ParameterTable;
use crate::resource_manager::ResourceManager;

/// A value extracted at one valid time. `None` where the stored value is missing.
pub type TimedValue = (NaiveDateTime, Option<f64>);

/// Read exactly `buf.len()` bytes at `offset` without moving a shared file cursor.
#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(std::io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => (),
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// An open dataset file.
#[derive(Debug)]
pub struct GridHandle {
    dataset: Arc<DatasetFile>,
    manifest: GridManifest,
    payload: File,
    /// Decoded variables
    variables: Mutex<HashMap<String, Arc<Array3<f64>>>>,
}

impl GridHandle {
    /// Open a dataset file. Blocking.
    pub fn open(dataset: Arc<DatasetFile>) -> Result<Self, WxError> {
        let path = dataset.path.clone();
        let manifest = GridManifest::read(&path)?;
        if manifest.model_run != dataset.model_run || manifest.valid_times != dataset.valid_times {
            return Err(WxError::CorruptFile {
                path,
                reason: "manifest changed since the model run was indexed".to_string(),
            });
        }
        let payload = File::open(manifest.data_path(&path))
            .map_err(|err| WxError::corrupt(&path, &WxError::Io(err)))?;
        Ok(GridHandle {
            dataset,
            manifest,
            payload,
            variables: Mutex::new(HashMap::new()),
        })
    }

    /// The indexed file this handle was opened from.
    pub fn dataset(&self) -> &Arc<DatasetFile> {
        &self.dataset
    }

    /// Path of the manifest.
    pub fn path(&self) -> &Path {
        &self.dataset.path
    }

    pub fn valid_times(&self) -> &[NaiveDateTime] {
        &self.manifest.valid_times
    }

    pub fn latitude(&self) -> &RegularAxis {
        &self.manifest.latitude
    }

    pub fn longitude(&self) -> &RegularAxis {
        &self.manifest.longitude
    }

    /// Number of bytes held while decoding `variable`.
    fn decode_size(&self, variable: &str) -> usize {
        let stored = self
            .manifest
            .variables
            .get(variable)
            .map_or(0, |encoding| usize::try_from(encoding.size).unwrap_or(usize::MAX));
        stored.saturating_add(
            self.manifest
                .len()
                .saturating_mul(std::mem::size_of::<f64>()),
        )
    }

    /// Returns the decoded `[time, latitude, longitude]` array of `variable`. Blocking.
    ///
    /// Decoding failures are reported as [WxError::CorruptFile].
    pub fn variable(&self, variable: &str) -> Result<Arc<Array3<f64>>, WxError> {
        if let Some(array) = self.cached(variable) {
            return Ok(array);
        }
        let encoding = self
            .manifest
            .variables
            .get(variable)
            .ok_or_else(|| WxError::UnknownParameter(variable.to_string()))?;
        let decoded = self
            .read_encoded(encoding.offset, encoding.size)
            .and_then(|data| decode_variable(encoding, &data, self.manifest.shape()))
            .map_err(|err| {
                metrics::corrupt_file("decode");
                WxError::corrupt(self.path(), &err)
            })?;
        debug!(path = %self.path().display(), variable, "decoded variable");
        let mut variables = self.variables.lock().unwrap_or_else(|err| err.into_inner());
        Ok(variables
            .entry(variable.to_string())
            .or_insert_with(|| Arc::new(decoded))
            .clone())
    }

    fn cached(&self, variable: &str) -> Option<Arc<Array3<f64>>> {
        let variables = self.variables.lock().unwrap_or_else(|err| err.into_inner());
        variables.get(variable).cloned()
    }

    fn read_encoded(&self, offset: u64, size: u64) -> Result<Bytes, WxError> {
        let size = usize::try_from(size)?;
        let mut buf = maligned::align_first::<u8, maligned::A8>(size);
        buf.resize(size, 0);
        read_exact_at(&self.payload, &mut buf, offset)?;
        Ok(buf.into())
    }
}

/// A pool of open handles with least-recently-used eviction.
///
/// Evicting a handle never affects correctness: it is reopened on the next access, and queries
/// still holding it keep it alive until they finish.
#[derive(Debug)]
pub struct HandlePool {
    handles: Mutex<LruCache<PathBuf, Arc<GridHandle>>>,
}

impl HandlePool {
    /// Returns a new HandlePool holding up to `capacity` handles.
    pub fn new(capacity: NonZeroUsize) -> Self {
        HandlePool {
            handles: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<PathBuf, Arc<GridHandle>>> {
        self.handles.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Returns the pooled handle for the manifest at `path`.
    pub fn get(&self, path: &Path) -> Option<Arc<GridHandle>> {
        self.lock().get(path).cloned()
    }

    /// Pool `handle`, unless a handle for the same file is already pooled. Returns the pooled
    /// handle.
    pub fn get_or_insert(&self, handle: GridHandle) -> Arc<GridHandle> {
        let mut handles = self.lock();
        if let Some(existing) = handles.get(handle.path()) {
            return existing.clone();
        }
        let handle = Arc::new(handle);
        handles.put(handle.path().to_path_buf(), handle.clone());
        handle
    }

    /// Remove the handles of files belonging to `run`.
    pub fn evict_run(&self, run: &ModelRun) {
        let mut handles = self.lock();
        let paths: Vec<PathBuf> = handles
            .iter()
            .filter(|(_, handle)| handle.dataset.model_run == *run)
            .map(|(path, _)| path.clone())
            .collect();
        for path in paths {
            handles.pop(&path);
        }
    }

    /// Remove all handles.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of pooled handles.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no handles are pooled.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scoped access to an open handle.
///
/// Holds a file read permit until dropped.
#[derive(Debug)]
pub struct HandleGuard<'a> {
    handle: Arc<GridHandle>,
    _permit: Option<SemaphorePermit<'a>>,
}

impl Deref for HandleGuard<'_> {
    type Target = GridHandle;

    fn deref(&self) -> &GridHandle {
        &self.handle
    }
}

/// Run blocking work on the blocking thread pool, or on rayon.
async fn run_blocking<F, T>(use_rayon: bool, work: F) -> Result<T, WxError>
where
    F: FnOnce() -> Result<T, WxError> + Send + 'static,
    T: Send + 'static,
{
    if use_rayon {
        tokio_rayon::spawn(work).await
    } else {
        tokio::task::spawn_blocking(work).await?
    }
}

/// Extracts point time series from dataset files.
#[derive(Debug)]
pub struct GridAccessor {
    table: Arc<ParameterTable>,
    pool: Arc<HandlePool>,
    resource_manager: Arc<ResourceManager>,
    time_interpolation: TimeInterpolation,
    spatial_interpolation: SpatialInterpolation,
    use_rayon: bool,
}

impl GridAccessor {
    /// Returns a new GridAccessor with default interpolation.
    pub fn new(
        table: Arc<ParameterTable>,
        pool: Arc<HandlePool>,
        resource_manager: Arc<ResourceManager>,
    ) -> Self {
        GridAccessor {
            table,
            pool,
            resource_manager,
            time_interpolation: TimeInterpolation::default(),
            spatial_interpolation: SpatialInterpolation::default(),
            use_rayon: false,
        }
    }

    /// Set the interpolation methods.
    pub fn with_interpolation(
        mut self,
        time_interpolation: TimeInterpolation,
        spatial_interpolation: SpatialInterpolation,
    ) -> Self {
        self.time_interpolation = time_interpolation;
        self.spatial_interpolation = spatial_interpolation;
        self
    }

    /// Run blocking work on rayon rather than the tokio blocking pool.
    pub fn with_rayon(mut self, use_rayon: bool) -> Self {
        self.use_rayon = use_rayon;
        self
    }

    pub fn table(&self) -> &ParameterTable {
        &self.table
    }

    pub fn pool(&self) -> &HandlePool {
        &self.pool
    }

    /// Open `dataset`, reusing a pooled handle where possible.
    #[tracing::instrument(level = "DEBUG", skip_all, fields(path = %dataset.path.display()))]
    pub async fn open(&self, dataset: &Arc<DatasetFile>) -> Result<HandleGuard<'_>, WxError> {
        let permit = self.resource_manager.file_read().await?;
        if let Some(handle) = self.pool.get(&dataset.path) {
            metrics::cache_lookup("handle", true);
            return Ok(HandleGuard {
                handle,
                _permit: permit,
            });
        }
        metrics::cache_lookup("handle", false);
        let dataset = dataset.clone();
        let handle = run_blocking(self.use_rayon, move || GridHandle::open(dataset))
            .await
            .map_err(|err| {
                metrics::corrupt_file("open");
                err
            })?;
        Ok(HandleGuard {
            handle: self.pool.get_or_insert(handle),
            _permit: permit,
        })
    }

    /// Values of `parameter` at `point` for each axis time of the file within `range`.
    pub async fn extract(
        &self,
        handle: &HandleGuard<'_>,
        parameter: &str,
        range: &TimeRange,
        point: Point,
    ) -> Result<Vec<TimedValue>, WxError> {
        let times: Vec<NaiveDateTime> = handle
            .valid_times()
            .iter()
            .filter(|time| range.contains(time))
            .copied()
            .collect();
        self.extract_at(handle, parameter, &times, point).await
    }

    /// Values of `parameter` at `point` for each of `times` within the span of the file's time
    /// axis. Times outside the span are omitted.
    #[tracing::instrument(level = "DEBUG", skip(self, handle, times), fields(path = %handle.path().display()))]
    pub async fn extract_at(
        &self,
        handle: &HandleGuard<'_>,
        parameter: &str,
        times: &[NaiveDateTime],
        point: Point,
    ) -> Result<Vec<TimedValue>, WxError> {
        let variable = handle
            .dataset
            .variable_for(parameter, &self.table)
            .ok_or_else(|| WxError::UnknownParameter(parameter.to_string()))?
            .to_string();
        let point = point.normalised();
        let stencil = locate(handle.latitude(), handle.longitude(), point, self.spatial_interpolation)?;
        let times: Vec<NaiveDateTime> = times
            .iter()
            .filter(|time| handle.dataset.spans(time))
            .copied()
            .collect();
        if times.is_empty() {
            return Ok(vec![]);
        }
        let _memory = self
            .resource_manager
            .memory(handle.decode_size(&variable))
            .await?;
        let handle = handle.handle.clone();
        let time_interpolation = self.time_interpolation;
        run_blocking(self.use_rayon, move || {
            let array = handle.variable(&variable)?;
            Ok(sample(
                &array,
                handle.valid_times(),
                &times,
                &stencil,
                time_interpolation,
            ))
        })
        .await
    }
}

/// Locate `point` on a grid. Fails with [WxError::OutOfBounds] outside the grid.
pub fn locate(
    latitude: &RegularAxis,
    longitude: &RegularAxis,
    point: Point,
    method: SpatialInterpolation,
) -> Result<Stencil, WxError> {
    let out_of_bounds = || WxError::OutOfBounds {
        latitude: point.latitude,
        longitude: point.longitude,
    };
    let lat = latitude.locate(point.latitude).ok_or_else(out_of_bounds)?;
    let lon = longitude
        .locate_longitude(point.longitude)
        .ok_or_else(out_of_bounds)?;
    Ok(Stencil::new(method, lat, lon))
}

/// Sample a `[time, latitude, longitude]` array at `times`. Times outside `axis` are omitted.
pub fn sample(
    array: &Array3<f64>,
    axis: &[NaiveDateTime],
    times: &[NaiveDateTime],
    stencil: &Stencil,
    method: TimeInterpolation,
) -> Vec<TimedValue> {
    let at = |index: usize| stencil.apply(array.index_axis(Axis(0), index));
    times
        .iter()
        .filter_map(|time| {
            let value = match axis::locate_time(axis, time)? {
                TimePosition::Exact(index) => at(index),
                TimePosition::Between { lower, fraction } => match method {
                    TimeInterpolation::Linear => {
                        interpolation::linear(at(lower), at(lower + 1), fraction)
                    }
                    // Ties go to the earlier time.
                    TimeInterpolation::Nearest if fraction <= 0.5 => at(lower),
                    TimeInterpolation::Nearest => at(lower + 1),
                },
            };
            Some((*time, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{DatasetIndex, ScanCache, DEFAULT_RUN_PATTERN};
    use crate::test_utils::{self, datetime, GridFixture};
    use ndarray::array;

    fn run() -> ModelRun {
        ModelRun::new(datetime(2022, 11, 6, 18))
    }

    fn accessor(capacity: usize) -> GridAccessor {
        GridAccessor::new(
            Arc::new(ParameterTable::default()),
            Arc::new(HandlePool::new(NonZeroUsize::new(capacity).unwrap())),
            Arc::new(ResourceManager::default()),
        )
    }

    async fn dataset_files(root: &Path) -> Vec<Arc<DatasetFile>> {
        let index = DatasetIndex::new(root, DEFAULT_RUN_PATTERN, Arc::new(ScanCache::new()));
        index.resolve(run()).await.unwrap().files.clone()
    }

    /// Three hourly fields of 2m temperature on a 3x3 grid around 45N 84E.
    fn write_temperature(root: &Path) {
        let dir = test_utils::run_dir(root, &run());
        GridFixture::surface(run(), &[0, 1, 2])
            .with_f32("tmp2m", |t, y, x| 270.0 + t as f32 + 0.5 * y as f32 + 0.25 * x as f32)
            .write(&dir, "f000");
    }

    #[test]
    fn test_sample_linear_and_nearest() {
        let array = array![[[1.0]], [[3.0]], [[f64::NAN]]];
        let axis = [
            datetime(2022, 11, 6, 18),
            datetime(2022, 11, 6, 20),
            datetime(2022, 11, 6, 22),
        ];
        let stencil = Stencil::nearest(
            crate::axis::RegularAxis::new(0.0, 1.0, 1).locate(0.0).unwrap(),
            crate::axis::RegularAxis::new(0.0, 1.0, 1).locate(0.0).unwrap(),
        );
        let times = [
            datetime(2022, 11, 6, 17),
            datetime(2022, 11, 6, 18),
            datetime(2022, 11, 6, 19),
            datetime(2022, 11, 6, 21),
        ];
        assert_eq!(
            vec![
                (times[1], Some(1.0)),
                (times[2], Some(2.0)),
                (times[3], None),
            ],
            sample(&array, &axis, &times, &stencil, TimeInterpolation::Linear)
        );
        assert_eq!(
            vec![
                (times[1], Some(1.0)),
                (times[2], Some(1.0)),
                (times[3], Some(3.0)),
            ],
            sample(&array, &axis, &times, &stencil, TimeInterpolation::Nearest)
        );
    }

    #[test]
    fn test_locate_out_of_bounds() {
        let latitude = RegularAxis::new(46.0, -1.0, 3);
        let longitude = RegularAxis::new(83.0, 1.0, 3);
        let method = SpatialInterpolation::Bilinear;
        assert!(locate(&latitude, &longitude, Point::new(46.0, 85.0), method).is_ok());
        assert!(matches!(
            locate(&latitude, &longitude, Point::new(47.0, 84.0), method),
            Err(WxError::OutOfBounds { .. })
        ));
        assert!(matches!(
            locate(&latitude, &longitude, Point::new(45.0, 86.0), method),
            Err(WxError::OutOfBounds { .. })
        ));
    }

    #[tokio::test]
    async fn test_extract_round_trip() {
        let root = tempfile::tempdir().unwrap();
        write_temperature(root.path());
        let files = dataset_files(root.path()).await;
        let accessor = accessor(4);
        let handle = accessor.open(&files[0]).await.unwrap();
        let range = TimeRange::new(datetime(2022, 11, 6, 18), datetime(2022, 11, 6, 19));
        let values = accessor
            .extract(&handle, "temperature", &range, Point::new(45.0, 84.0))
            .await
            .unwrap();
        assert_eq!(
            vec![
                (datetime(2022, 11, 6, 18), Some(270.75)),
                (datetime(2022, 11, 6, 19), Some(271.75)),
            ],
            values
        );
    }

    #[tokio::test]
    async fn test_extract_at_interpolates() {
        let root = tempfile::tempdir().unwrap();
        write_temperature(root.path());
        let files = dataset_files(root.path()).await;
        let accessor = accessor(4);
        let handle = accessor.open(&files[0]).await.unwrap();
        let times = [
            datetime(2022, 11, 6, 18) + chrono::Duration::minutes(30),
            datetime(2022, 11, 6, 21),
        ];
        let values = accessor
            .extract_at(&handle, "temperature", &times, Point::new(44.5, 83.5))
            .await
            .unwrap();
        assert_eq!(1, values.len());
        let value = values[0].1.unwrap();
        // 270 + 0.5 (time) + 0.5 * 1.5 (latitude index) + 0.25 * 0.5 (longitude index)
        assert!((value - 271.375).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_extract_unknown_parameter() {
        let root = tempfile::tempdir().unwrap();
        write_temperature(root.path());
        let files = dataset_files(root.path()).await;
        let accessor = accessor(4);
        let handle = accessor.open(&files[0]).await.unwrap();
        let range = TimeRange::new(datetime(2022, 11, 6, 18), datetime(2022, 11, 6, 18));
        match accessor
            .extract(&handle, "relative_humidity", &range, Point::new(45.0, 84.0))
            .await
            .unwrap_err()
        {
            WxError::UnknownParameter(name) => assert_eq!("relative_humidity", name),
            err => panic!("unexpected error {}", err),
        }
    }

    #[tokio::test]
    async fn test_extract_corrupt_payload() {
        let root = tempfile::tempdir().unwrap();
        let dir = test_utils::run_dir(root.path(), &run());
        let path = GridFixture::surface(run(), &[0])
            .with_encoded_f32("tmp2m", |_, _, _| 270.0, test_utils::Encoding::Gzip)
            .write(&dir, "f000");
        let data_path = path.with_file_name("f000.bin");
        let size = std::fs::metadata(&data_path).unwrap().len() as usize;
        std::fs::write(&data_path, vec![0xff; size]).unwrap();
        let files = dataset_files(root.path()).await;
        let accessor = accessor(4);
        let handle = accessor.open(&files[0]).await.unwrap();
        let range = TimeRange::new(datetime(2022, 11, 6, 18), datetime(2022, 11, 6, 18));
        match accessor
            .extract(&handle, "temperature", &range, Point::new(45.0, 84.0))
            .await
            .unwrap_err()
        {
            WxError::CorruptFile { path: p, reason } => {
                assert_eq!(path, p);
                assert!(reason.starts_with("failed to decompress data"));
            }
            err => panic!("unexpected error {}", err),
        }
    }

    #[tokio::test]
    async fn test_handle_pool_reuse_and_eviction() {
        let root = tempfile::tempdir().unwrap();
        let dir = test_utils::run_dir(root.path(), &run());
        for (stem, lead) in [("f000", 0), ("f001", 1), ("f002", 2)] {
            GridFixture::surface(run(), &[lead])
                .with_f32("tmp2m", |_, _, _| 270.0)
                .write(&dir, stem);
        }
        let files = dataset_files(root.path()).await;
        let accessor = accessor(2);
        let first = accessor.open(&files[0]).await.unwrap().handle.clone();
        let again = accessor.open(&files[0]).await.unwrap().handle.clone();
        assert!(Arc::ptr_eq(&first, &again));
        accessor.open(&files[1]).await.unwrap();
        accessor.open(&files[2]).await.unwrap();
        assert_eq!(2, accessor.pool().len());
        assert!(accessor.pool().get(&files[0].path).is_none());
        // An evicted handle remains usable by its holder.
        assert_eq!(1, first.variable("tmp2m").unwrap().len_of(Axis(0)));

        accessor.pool().evict_run(&run());
        assert!(accessor.pool().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_open_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        write_temperature(root.path());
        let files = dataset_files(root.path()).await;
        let accessor = Arc::new(accessor(4));
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let accessor = accessor.clone();
                let file = files[0].clone();
                tokio::spawn(async move {
                    let handle = accessor.open(&file).await.unwrap();
                    let range = TimeRange::new(file.first_valid_time(), file.last_valid_time());
                    accessor
                        .extract(&handle, "temperature", &range, Point::new(45.0, 84.0))
                        .await
                        .unwrap()
                })
            })
            .collect();
        let mut results = vec![];
        for task in tasks {
            results.push(task.await.unwrap());
        }
        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(1, accessor.pool().len());
    }

    #[tokio::test]
    async fn test_extract_with_rayon() {
        let root = tempfile::tempdir().unwrap();
        write_temperature(root.path());
        let files = dataset_files(root.path()).await;
        let accessor = accessor(4)
            .with_rayon(true)
            .with_interpolation(TimeInterpolation::Nearest, SpatialInterpolation::Nearest);
        let handle = accessor.open(&files[0]).await.unwrap();
        let values = accessor
            .extract_at(
                &handle,
                "temperature",
                &[datetime(2022, 11, 6, 18) + chrono::Duration::minutes(20)],
                Point::new(44.6, 83.7),
            )
            .await
            .unwrap();
        // Nearest time index 0, latitude index 1, longitude index 1.
        assert_eq!(Some(270.75), values[0].1);
    }
}
