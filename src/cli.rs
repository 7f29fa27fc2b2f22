//! Command Line Interface (CLI) arguments.

use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::index::DEFAULT_RUN_PATTERN;
use crate::models::{
    parse_timestamp, ModelRun, QueryRequest, SpatialInterpolation, TimeInterpolation,
};

/// openwx command line interface
#[derive(Clone, Debug, Parser)]
#[command(version, about)]
pub struct CommandLineArgs {
    /// Directory holding the run directories
    #[arg(
        long,
        global = true,
        default_value = "~/.local/share/openwx",
        env = "OPENWX_DATA_ROOT"
    )]
    pub data_root: String,
    /// strftime pattern of run directories relative to the data root
    #[arg(long, global = true, default_value = DEFAULT_RUN_PATTERN, env = "OPENWX_RUN_PATTERN")]
    pub run_pattern: String,
    /// JSON file replacing the built-in parameter table
    #[arg(long, global = true, env = "OPENWX_PARAMETER_TABLE")]
    pub parameter_table: Option<String>,
    /// Maximum number of dataset files kept open
    #[arg(long, global = true, default_value_t = 64, env = "OPENWX_HANDLE_CAPACITY")]
    pub handle_capacity: usize,
    /// Maximum number of concurrent dataset file reads
    #[arg(long, global = true, env = "OPENWX_FILE_READ_LIMIT")]
    pub file_read_limit: Option<usize>,
    /// Maximum memory used to decode variables, e.g. 512MiB
    #[arg(long, global = true, env = "OPENWX_MEMORY_LIMIT")]
    pub memory_limit: Option<String>,
    /// Maximum number of concurrent queries. Defaults to one less than the number of CPUs.
    #[arg(long, global = true, env = "OPENWX_QUERY_LIMIT")]
    pub query_limit: Option<usize>,
    /// Interpolation between time axis points
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = TimeInterpolation::Linear,
        env = "OPENWX_TIME_INTERPOLATION"
    )]
    pub time_interpolation: TimeInterpolation,
    /// Interpolation between grid points
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = SpatialInterpolation::Bilinear,
        env = "OPENWX_SPATIAL_INTERPOLATION"
    )]
    pub spatial_interpolation: SpatialInterpolation,
    /// Whether to use Rayon for execution of CPU-bound tasks.
    #[arg(long, global = true, default_value_t = false, env = "OPENWX_USE_RAYON")]
    pub use_rayon: bool,
    /// Maximum time in seconds to wait for a query to complete
    #[arg(long, global = true, env = "OPENWX_TIMEOUT")]
    pub timeout: Option<u64>,
    /// Whether to print Prometheus metrics to stderr on exit
    #[arg(long, global = true, default_value_t = false, env = "OPENWX_PRINT_METRICS")]
    pub print_metrics: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Query parameter values at a point over a range of valid times
    Query(QueryArgs),
    /// List the known parameters
    Parameters,
    /// List the model runs below the data root and their coverage
    Runs,
}

/// Output shape of query results
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// One record per parameter and valid time
    #[default]
    Records,
    /// Values grouped by valid time
    Forecast,
    /// The full result with one series per parameter
    Series,
}

#[derive(Clone, Debug, Args)]
pub struct QueryArgs {
    /// Initialisation time of the model run, e.g. 2022-11-06T18:00:00Z
    #[arg(long)]
    pub model_run: ModelRun,
    /// First valid time
    #[arg(long, value_parser = parse_timestamp)]
    pub valid_time_start: NaiveDateTime,
    /// Last valid time. Defaults to the first valid time.
    #[arg(long, value_parser = parse_timestamp)]
    pub valid_time_end: Option<NaiveDateTime>,
    /// Parameter name. May be repeated.
    #[arg(long = "parameter", required = true)]
    pub parameters: Vec<String>,
    /// Latitude in decimal degrees
    #[arg(long, allow_negative_numbers = true)]
    pub latitude: f64,
    /// Longitude in decimal degrees, in either convention
    #[arg(long, allow_negative_numbers = true)]
    pub longitude: f64,
    /// Step between requested valid times, in hours
    #[arg(long)]
    pub interval_hours: Option<i64>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Records)]
    pub format: OutputFormat,
}

impl QueryArgs {
    /// The query described by the arguments.
    pub fn request(&self) -> QueryRequest {
        let mut request = QueryRequest::new(
            self.model_run,
            self.valid_time_start,
            self.valid_time_end.unwrap_or(self.valid_time_start),
            self.parameters.clone(),
            self.latitude,
            self.longitude,
        );
        request.interval_hours = self.interval_hours;
        request
    }
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
