//! This file defines the openwx binary entry point.

use openwx::app;
use openwx::app_state::AppState;
use openwx::cli;
use openwx::error::{ErrorReport, WxError};
use openwx::metrics;
use openwx::tracing;

use std::process::exit;

async fn run(args: &cli::CommandLineArgs) -> Result<String, WxError> {
    let state = AppState::new(args)?;
    let output = app::run(&state).await?;
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Application entry point
#[tokio::main]
async fn main() {
    let args = cli::parse();
    tracing::init_tracing();
    metrics::register_metrics();
    let result = run(&args).await;
    if args.print_metrics {
        match metrics::gather() {
            Ok(text) => eprint!("{}", text),
            Err(err) => eprintln!("failed to gather metrics: {}", err),
        }
    }
    match result {
        Ok(output) => println!("{}", output),
        Err(error) => {
            let report = ErrorReport::from(error);
            match serde_json::to_string_pretty(&report) {
                Ok(body) => eprintln!("{}", body),
                Err(_) => eprintln!("{}", report.error.message),
            }
            exit(report.exit_code)
        }
    }
}
