use crate::cli::CommandLineArgs;
use crate::engine::{EngineConfig, QueryEngine};
use crate::error::WxError;
use crate::index::{validate_run_pattern, ScanCache};
use crate::parameters::ParameterTable;

use byte_unit::Byte;
use expanduser::expanduser;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

/// Shared application state passed to each command handler.
#[derive(Debug)]
pub struct AppState {
    /// Command line arguments.
    pub args: CommandLineArgs,

    /// Query engine.
    pub engine: QueryEngine,
}

impl AppState {
    /// Create and return an [AppState].
    pub fn new(args: &CommandLineArgs) -> Result<Self, WxError> {
        let config = engine_config(args)?;
        let table = match &args.parameter_table {
            Some(path) => ParameterTable::from_file(&expanduser(path)?)?,
            None => ParameterTable::default(),
        };
        let engine = QueryEngine::from_config(&config, table, Arc::new(ScanCache::new()));
        Ok(Self {
            args: args.clone(),
            engine,
        })
    }
}

/// Build the engine configuration from command line arguments.
pub fn engine_config(args: &CommandLineArgs) -> Result<EngineConfig, WxError> {
    let data_root = expanduser(&args.data_root)?;
    if !Path::new(&data_root).is_dir() {
        return Err(WxError::Config(format!(
            "data root {} is not a directory",
            data_root.display()
        )));
    }
    validate_run_pattern(&args.run_pattern)?;
    let handle_capacity = NonZeroUsize::new(args.handle_capacity)
        .ok_or_else(|| WxError::Config("handle capacity must be greater than 0".to_string()))?;
    let memory_limit = match &args.memory_limit {
        Some(limit) => {
            let bytes = Byte::parse_str(limit, /* ignore case */ true)
                .map_err(|err| WxError::Config(format!("memory limit {}: {}", limit, err)))?
                .as_u64();
            Some(usize::try_from(bytes)?)
        }
        None => None,
    };
    let query_limit = args
        .query_limit
        .or_else(|| Some(num_cpus::get().saturating_sub(1).max(1)));
    if args.file_read_limit == Some(0) || query_limit == Some(0) {
        return Err(WxError::Config("limits must be greater than 0".to_string()));
    }
    let mut config = EngineConfig::new(data_root);
    config.run_pattern = args.run_pattern.clone();
    config.handle_capacity = handle_capacity;
    config.time_interpolation = args.time_interpolation;
    config.spatial_interpolation = args.spatial_interpolation;
    config.file_read_limit = args.file_read_limit;
    config.memory_limit = memory_limit;
    config.query_limit = query_limit;
    config.use_rayon = args.use_rayon;
    Ok(config)
}
