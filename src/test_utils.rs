use bytes::Bytes;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use flate2::read::{GzEncoder, ZlibEncoder};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::axis::RegularAxis;
use crate::filters::shuffle;
use crate::manifest::{GridManifest, VariableEncoding, MANIFEST_SUFFIX};
use crate::models::*;
use crate::types::{ByteOrder, DValue, Missing};

/// Missing-value sentinel written by [GridFixture].
pub(crate) const MISSING: f32 = 9.999e20;

/// Returns a timestamp on the hour.
pub(crate) fn datetime(year: i32, month: u32, day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

/// Create a QueryRequest object with only required fields set.
pub(crate) fn get_test_query_request() -> QueryRequest {
    QueryRequest::new(
        ModelRun::new(datetime(2022, 11, 6, 18)),
        datetime(2022, 11, 6, 18),
        datetime(2022, 11, 6, 18),
        vec!["temperature".to_string(), "relative_humidity".to_string()],
        45.0,
        84.0,
    )
}

pub(crate) fn compress_gzip(data: &[u8]) -> Bytes {
    // Adapated from flate2 documentation.
    let mut result = Vec::<u8>::new();
    let mut deflater = GzEncoder::new(data, flate2::Compression::fast());
    deflater.read_to_end(&mut result).unwrap();
    result.into()
}

pub(crate) fn compress_zlib(data: &[u8]) -> Bytes {
    // Adapated from flate2 documentation.
    let mut result = Vec::<u8>::new();
    let mut deflater = ZlibEncoder::new(data, flate2::Compression::fast());
    deflater.read_to_end(&mut result).unwrap();
    result.into()
}

/// Create the directory of `run` below `root` using the default layout.
pub(crate) fn run_dir(root: &Path, run: &ModelRun) -> PathBuf {
    let dir = root.join(run.init_time().format("gfs.%Y%m%d/%H").to_string());
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// How [GridFixture::with_encoded_f32] stores a variable.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Encoding {
    /// Little endian, gzip compressed
    Gzip,
    /// Little endian, byte shuffled then zlib compressed
    ZlibShuffle,
    /// Big endian, uncompressed
    BigEndian,
}

/// Builder for dataset files on a 3x3 grid with latitudes 46, 45, 44 and longitudes 83, 84, 85.
pub(crate) struct GridFixture {
    manifest: GridManifest,
    payload: Vec<u8>,
}

impl GridFixture {
    /// A surface product file of `run` with valid times at `leads` hours.
    pub(crate) fn surface(run: ModelRun, leads: &[i64]) -> Self {
        GridFixture {
            manifest: GridManifest {
                model_run: run,
                product: "gfs_0p25_1hr".to_string(),
                valid_times: leads
                    .iter()
                    .map(|lead| run.init_time() + Duration::hours(*lead))
                    .collect(),
                latitude: RegularAxis::new(46.0, -1.0, 3),
                longitude: RegularAxis::new(83.0, 1.0, 3),
                data_file: PathBuf::new(),
                variables: BTreeMap::new(),
            },
            payload: vec![],
        }
    }

    /// Values of `f(time, latitude, longitude)` indices in C order.
    fn values(&self, f: impl Fn(usize, usize, usize) -> f32) -> Vec<f32> {
        let [nt, ny, nx] = self.manifest.shape();
        let mut values = Vec::with_capacity(nt * ny * nx);
        for t in 0..nt {
            for y in 0..ny {
                for x in 0..nx {
                    values.push(f(t, y, x));
                }
            }
        }
        values
    }

    fn push(&mut self, name: &str, stored: &[u8], mut encoding: VariableEncoding) {
        encoding.offset = self.payload.len() as u64;
        encoding.size = stored.len() as u64;
        self.payload.extend_from_slice(stored);
        self.manifest.variables.insert(name.to_string(), encoding);
    }

    fn encoding(byte_order: ByteOrder) -> VariableEncoding {
        VariableEncoding {
            dtype: DType::Float32,
            byte_order: Some(byte_order),
            offset: 0,
            size: 0,
            order: None,
            compression: None,
            filters: None,
            missing: Some(Missing::MissingValue(
                DValue::from_f64(MISSING as f64).unwrap(),
            )),
        }
    }

    /// Add an uncompressed little endian float32 variable.
    pub(crate) fn with_f32(mut self, name: &str, f: impl Fn(usize, usize, usize) -> f32) -> Self {
        let stored: Vec<u8> = self
            .values(f)
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect();
        self.push(name, &stored, Self::encoding(ByteOrder::Little));
        self
    }

    /// Add a float32 variable stored with `encoding`.
    pub(crate) fn with_encoded_f32(
        mut self,
        name: &str,
        f: impl Fn(usize, usize, usize) -> f32,
        encoding: Encoding,
    ) -> Self {
        let values = self.values(f);
        let le: Vec<u8> = values.iter().flat_map(|value| value.to_le_bytes()).collect();
        match encoding {
            Encoding::Gzip => {
                let mut variable = Self::encoding(ByteOrder::Little);
                variable.compression = Some(Compression::Gzip);
                self.push(name, &compress_gzip(&le), variable);
            }
            Encoding::ZlibShuffle => {
                let mut variable = Self::encoding(ByteOrder::Little);
                variable.compression = Some(Compression::Zlib);
                variable.filters = Some(vec![Filter::Shuffle { element_size: 4 }]);
                let stored = compress_zlib(&shuffle::test_utils::shuffle(&le, 4));
                self.push(name, &stored, variable);
            }
            Encoding::BigEndian => {
                let be: Vec<u8> = values.iter().flat_map(|value| value.to_be_bytes()).collect();
                self.push(name, &be, Self::encoding(ByteOrder::Big));
            }
        }
        self
    }

    /// Write `{stem}.grid.json` and `{stem}.bin` to `dir`. Returns the manifest path.
    pub(crate) fn write(mut self, dir: &Path, stem: &str) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let data_file = format!("{}.bin", stem);
        self.manifest.data_file = PathBuf::from(&data_file);
        std::fs::write(dir.join(&data_file), &self.payload).unwrap();
        let path = dir.join(format!("{}{}", stem, MANIFEST_SUFFIX));
        std::fs::write(&path, serde_json::to_vec_pretty(&self.manifest).unwrap()).unwrap();
        path
    }
}

#[test]
fn test_fixture_round_trip() {
    let root = tempfile::tempdir().unwrap();
    let run = ModelRun::new(datetime(2022, 11, 6, 18));
    let path = GridFixture::surface(run, &[0, 1])
        .with_f32("tmp2m", |t, _, _| 270.0 + t as f32)
        .with_encoded_f32("rh2m", |_, _, _| 50.0, Encoding::BigEndian)
        .write(&run_dir(root.path(), &run), "f000");
    let manifest = GridManifest::read(&path).unwrap();
    assert_eq!([2, 3, 3], manifest.shape());
    assert_eq!(144, manifest.payload_len());
    assert_eq!(72, manifest.variables["rh2m"].offset);
}
