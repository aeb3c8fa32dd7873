//! Server startup utilities.

use tessera_config::AppConfig;
use tessera_jobs::BootstrapReport;
use tracing::{info, warn};

/// Prints the startup banner.
pub fn print_banner() {
    info!(r#"
  ______
 /_  __/__  ______________  _________ _
  / / / _ \/ ___/ ___/ _ \/ ___/ __ `/
 / / /  __(__  |__  )  __/ /  / /_/ /
/_/  \___/____/____/\___/_/   \__,_/

                 Scheduler
    "#);
}

/// Prints the effective settings.
pub fn print_startup_info(config: &AppConfig) {
    let separator = "=".repeat(60);
    info!("{}", separator);
    info!("Environment:  {}", config.app.environment);
    info!("Backend:      {}", config.backend);
    info!("Poll every:   {}ms", config.worker.poll_interval_ms);
    info!("Job timeout:  {}s", config.worker.job_timeout_secs);
    info!("{}", separator);
}

/// Logs the outcome of catalog recovery.
pub fn print_bootstrap_report(report: &BootstrapReport) {
    info!(recovered = report.recovered.len(), "Queues recovered from catalog");
    for failure in &report.failures {
        warn!(
            key = %failure.key,
            engine_queue = %failure.engine_name,
            reason = %failure.reason,
            "Catalog entry not recovered"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_jobs::{BootstrapFailure, QueueKey};

    #[test]
    fn test_print_banner_does_not_panic() {
        let _ = tracing_subscriber::fmt::try_init();
        print_banner();
    }

    #[test]
    fn test_print_startup_info_does_not_panic() {
        let _ = tracing_subscriber::fmt::try_init();
        print_startup_info(&AppConfig::default());
    }

    #[test]
    fn test_print_bootstrap_report_with_failures() {
        let _ = tracing_subscriber::fmt::try_init();
        let report = BootstrapReport {
            recovered: vec![QueueKey::parse("t1", "alpha").unwrap()],
            failures: vec![BootstrapFailure {
                key: "garbage".to_string(),
                engine_name: "garbage-queue".to_string(),
                reason: "no separator".to_string(),
            }],
        };
        print_bootstrap_report(&report);
    }
}
