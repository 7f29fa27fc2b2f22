//! Prometheus metrics.

use lazy_static::lazy_static;
use prometheus::{self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::Once;

use crate::error::WxError;

lazy_static! {
    // Registry for holding metric state
    pub static ref REGISTRY: Registry = Registry::new();
    // Query counter by outcome
    pub static ref QUERIES: IntCounterVec = IntCounterVec::new(
        Opts::new("queries", "The number of queries processed"),
        &["outcome"]
    ).unwrap();
    // No-data record counter by reason
    pub static ref NO_DATA_RECORDS: IntCounterVec = IntCounterVec::new(
        Opts::new("no_data_records", "The number of result records without a value"),
        &["reason"]
    ).unwrap();
    // Cache lookups by cache and result
    pub static ref CACHE_LOOKUPS: IntCounterVec = IntCounterVec::new(
        Opts::new("cache_lookups", "The number of scan and handle cache lookups"),
        &["cache", "result"]
    ).unwrap();
    // Corrupt dataset files by the stage at which they were detected
    pub static ref CORRUPT_FILES: IntCounterVec = IntCounterVec::new(
        Opts::new("corrupt_files", "The number of corrupt dataset files encountered"),
        &["stage"]
    ).unwrap();
    // Query histogram by processing time
    pub static ref QUERY_TIME_COLLECTOR: HistogramVec = HistogramVec::new(
        HistogramOpts{
            common_opts: Opts::new("query_time", "The time taken to process each query"),
            buckets: prometheus::DEFAULT_BUCKETS.to_vec(),
        },
        &[],
    ).unwrap();
}

static REGISTER: Once = Once::new();

/// Register all metrics with [REGISTRY]. Subsequent calls have no effect.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        REGISTRY.register(Box::new(QUERIES.clone())).unwrap();
        REGISTRY
            .register(Box::new(NO_DATA_RECORDS.clone()))
            .unwrap();
        REGISTRY.register(Box::new(CACHE_LOOKUPS.clone())).unwrap();
        REGISTRY.register(Box::new(CORRUPT_FILES.clone())).unwrap();
        REGISTRY
            .register(Box::new(QUERY_TIME_COLLECTOR.clone()))
            .unwrap();
    });
}

/// Returns the registered metrics in the Prometheus text format.
pub fn gather() -> Result<String, WxError> {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|err| WxError::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))?;
    String::from_utf8(buffer)
        .map_err(|err| WxError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err)))
}

/// Record a cache lookup.
pub fn cache_lookup(cache: &str, hit: bool) {
    CACHE_LOOKUPS
        .with_label_values(&[cache, if hit { "hit" } else { "miss" }])
        .inc();
}

/// Record a corrupt dataset file.
pub fn corrupt_file(stage: &str) {
    CORRUPT_FILES.with_label_values(&[stage]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather() {
        register_metrics();
        register_metrics();
        cache_lookup("scan", false);
        corrupt_file("scan");
        let output = gather().unwrap();
        assert!(output.contains("cache_lookups{cache=\"scan\",result=\"miss\"}"));
        assert!(output.contains("corrupt_files{stage=\"scan\"}"));
    }
}
