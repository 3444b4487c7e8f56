//! Docbridge - Main entry point

use clap::Parser;
use docbridge_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use docbridge_etl::{cli, Cli};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("docbridge")
        .filter_directives("sqlx=warn,mongodb=warn")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        }
    };

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current page");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    match cli::execute(&cli, cancel).await {
        Ok(Some(summary)) => {
            println!("{}", summary);
            if summary.has_failures() {
                for report in summary.failed() {
                    error!(entity_type = %report.entity_type, status = report.status.label(), "Entity type failed");
                }
                process::exit(1);
            }
        }
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}
