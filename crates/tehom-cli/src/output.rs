//! JSON output formatting

use serde::Serialize;
use tehom_core::certifier::CertifyReport;
use tehom_core::storage_backend::ResetSummary;

/// Print any result as pretty JSON on stdout
pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing result: {}", e),
    }
}

/// Log a certification summary
pub fn log_certify_report(report: &CertifyReport) {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("📈 Certification Summary:");
    log::info!("   Deployments:     {}", report.deployments);
    log::info!("   Already done:    {}", report.skipped);
    log::info!("   Scanned:         {} ({} resumed)", report.scanned, report.resumed);
    log::info!("   Files:           {}", report.files);
    log::info!("   Dropped files:   {}", report.dropped_files);
    log::info!("   New spans:       {}", report.spans_inserted);
    log::info!("   Extended spans:  {}", report.spans_extended);
    if report.span_conflicts > 0 {
        log::warn!("   Span conflicts:  {}", report.span_conflicts);
    }
    if report.interrupted {
        log::warn!("   Interrupted; rerun to continue from the last checkpoint");
    }
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Log what a reset removed
pub fn log_reset_summary(summary: &ResetSummary) {
    log::info!(
        "Removed {} progress entries, {} certified spans, {} coverage sets",
        summary.progress,
        summary.spans,
        summary.coverage
    );
}
