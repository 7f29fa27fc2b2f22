//! Command handlers.

use crate::app_state::AppState;
use crate::cli::{Command, OutputFormat, QueryArgs};
use crate::error::WxError;
use crate::result;

use serde_json::Value;
use std::time::Duration;
use tracing::info;

/// Run the command selected on the command line. Returns the JSON document to print.
pub async fn run(state: &AppState) -> Result<Value, WxError> {
    match &state.args.command {
        Command::Query(query_args) => query(state, query_args).await,
        Command::Parameters => parameters(state),
        Command::Runs => runs(state).await,
    }
}

async fn query(state: &AppState, query_args: &QueryArgs) -> Result<Value, WxError> {
    let request = query_args.request();
    let result = match state.args.timeout {
        Some(seconds) => {
            state
                .engine
                .query_with_timeout(&request, Duration::from_secs(seconds))
                .await?
        }
        None => state.engine.query(&request).await?,
    };
    for warning in &result.warnings {
        info!("{}", warning);
    }
    let value = match query_args.format {
        OutputFormat::Records => serde_json::to_value(result::assemble(&result))?,
        OutputFormat::Forecast => serde_json::to_value(result::assemble_forecasts(&result))?,
        OutputFormat::Series => serde_json::to_value(&result)?,
    };
    Ok(value)
}

fn parameters(state: &AppState) -> Result<Value, WxError> {
    Ok(serde_json::to_value(state.engine.parameters().describe())?)
}

async fn runs(state: &AppState) -> Result<Value, WxError> {
    Ok(serde_json::to_value(state.engine.runs().await?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::CommandLineArgs;
    use crate::models::ModelRun;
    use crate::test_utils::{self, datetime, GridFixture};
    use clap::Parser;
    use serde_json::json;
    use std::path::Path;

    fn state(root: &Path, command: &[&str]) -> AppState {
        let mut argv = vec!["openwx", "--data-root", root.to_str().unwrap()];
        argv.extend_from_slice(command);
        AppState::new(&CommandLineArgs::try_parse_from(argv).unwrap()).unwrap()
    }

    fn write_run(root: &Path) {
        let run = ModelRun::new(datetime(2022, 11, 6, 18));
        GridFixture::surface(run, &[0, 1])
            .with_f32("tmp2m", |t, _, _| 271.5 + t as f32)
            .write(&test_utils::run_dir(root, &run), "f000");
    }

    const QUERY: [&str; 13] = [
        "query",
        "--model-run",
        "2022-11-06T18:00:00Z",
        "--valid-time-start",
        "2022-11-06T18:00:00Z",
        "--parameter",
        "temperature",
        "--parameter",
        "relative_humidity",
        "--latitude",
        "45",
        "--longitude",
        "84",
    ];

    #[tokio::test]
    async fn test_query_records() {
        let root = tempfile::tempdir().unwrap();
        write_run(root.path());
        let output = run(&state(root.path(), &QUERY)).await.unwrap();
        assert_eq!(
            json!([
                {"parameter": "temperature", "valid_time": "2022-11-06T18:00:00", "value": 271.5, "unit": "K"},
                {"parameter": "relative_humidity", "valid_time": "2022-11-06T18:00:00", "no_data": "no_coverage"}
            ]),
            output
        );
    }

    #[tokio::test]
    async fn test_query_forecast() {
        let root = tempfile::tempdir().unwrap();
        write_run(root.path());
        let mut command = QUERY.to_vec();
        command.extend_from_slice(&[
            "--valid-time-end",
            "2022-11-06T19:00:00Z",
            "--format",
            "forecast",
            "--timeout",
            "30",
        ]);
        let output = run(&state(root.path(), &command)).await.unwrap();
        assert_eq!(
            json!({
                "lat": 45.0,
                "lon": 84.0,
                "forecasts": [
                    {"valid_time": "2022-11-06T18:00:00", "parameters": {"temperature": 271.5, "relative_humidity": null}},
                    {"valid_time": "2022-11-06T19:00:00", "parameters": {"temperature": 272.5, "relative_humidity": null}}
                ]
            }),
            output
        );
    }

    #[tokio::test]
    async fn test_query_unknown_run() {
        let root = tempfile::tempdir().unwrap();
        write_run(root.path());
        let mut command = QUERY.to_vec();
        command[2] = "1999-01-01T00:00:00Z";
        assert!(matches!(
            run(&state(root.path(), &command)).await,
            Err(WxError::UnknownModelRun(_))
        ));
    }

    #[tokio::test]
    async fn test_parameters() {
        let root = tempfile::tempdir().unwrap();
        let output = run(&state(root.path(), &["parameters"])).await.unwrap();
        assert_eq!(
            json!({"parameter": "relative_humidity", "parameter_metadata": {"model_key": "rh2m", "model_unit": "%"}}),
            output[0]
        );
        assert_eq!(3, output.as_array().unwrap().len());
    }

    #[tokio::test]
    async fn test_runs() {
        let root = tempfile::tempdir().unwrap();
        write_run(root.path());
        let output = run(&state(root.path(), &["runs"])).await.unwrap();
        assert_eq!(
            json!([{
                "model_run": "2022-11-06T18:00:00",
                "files": 1,
                "products": ["gfs_0p25_1hr"],
                "valid_times": {"start": "2022-11-06T18:00:00", "end": "2022-11-06T19:00:00"},
                "issues": 0
            }]),
            output
        );
    }
}
