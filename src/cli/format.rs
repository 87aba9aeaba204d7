//! Output formatting for CLI display.

use crate::geodesy::Wgs84;
use crate::model::{JobSummary, MapStatus};
use crate::queue::{JobReport, Outcome};

fn format_status(status: MapStatus) -> &'static str {
    match status {
        MapStatus::Pending => "pending",
        MapStatus::Processing => "processing",
        MapStatus::Done => "done",
        MapStatus::Failed => "failed",
        MapStatus::Unknown => "unknown",
    }
}

/// One listing line. `active` marks maps loaded in this session.
pub(super) fn format_job(job: &JobSummary, active: bool) -> String {
    let marker = if active { " *" } else { "" };
    format!(
        "{:>8}  [{}] {} ({} images){marker}",
        job.id.0,
        format_status(job.status),
        job.name,
        job.image_count
    )
}

/// Format a finished job for human-readable display.
pub(super) fn format_report(report: &JobReport) -> String {
    let subject = match report.map {
        Some(id) => format!("{} {id}", report.kind),
        None => report.kind.to_string(),
    };
    match &report.outcome {
        Outcome::Succeeded => format!("{subject}: ok"),
        Outcome::Failed { reason } => format!("{subject}: failed ({reason})"),
    }
}

pub(super) fn format_location(position: &Wgs84, bearing: Option<f64>) -> String {
    let line = format!(
        "{:.7}, {:.7} at {:.2} m",
        position.latitude, position.longitude, position.altitude
    );
    match bearing {
        Some(b) => format!("{line}, facing {b:.1}°"),
        None => line,
    }
}
