use std::fmt::Write;
use std::path::Path;

use serde::Serialize;

use crate::export::{BestEffort, RunReport};

#[derive(Debug, Serialize)]
struct OutcomeRow<'a> {
    employee: &'a str,
    period: &'a str,
    status: &'static str,
    sheet_id: Option<i64>,
    error: Option<String>,
}

fn outcome_rows(report: &RunReport) -> Vec<OutcomeRow<'_>> {
    report
        .outcomes
        .iter()
        .map(|outcome| match &outcome.result {
            Ok(sheet_id) => OutcomeRow {
                employee: &outcome.employee,
                period: &report.period,
                status: "exported",
                sheet_id: Some(*sheet_id),
                error: None,
            },
            Err(err) => OutcomeRow {
                employee: &outcome.employee,
                period: &report.period,
                status: "failed",
                sheet_id: None,
                error: Some(err.to_string()),
            },
        })
        .collect()
}

pub fn build_report(report: &RunReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Evaluation Export Report");
    let _ = writeln!(
        output,
        "Period {} exported to document {} ({} to {})",
        report.period,
        report.document_id,
        report.started_at.format("%Y-%m-%d %H:%M:%S"),
        report.finished_at.format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Employees");

    if report.outcomes.is_empty() {
        let _ = writeln!(output, "No employees found for this period.");
    } else {
        let _ = writeln!(
            output,
            "{} exported, {} failed.",
            report.succeeded(),
            report.failed()
        );
        let _ = writeln!(output);
        for outcome in report.outcomes.iter() {
            match &outcome.result {
                Ok(sheet_id) => {
                    let _ = writeln!(output, "- {}: exported (sheet {})", outcome.employee, sheet_id);
                }
                Err(err) => {
                    let _ = writeln!(output, "- {}: FAILED, {}", outcome.employee, err);
                }
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Template Cleanup");
    match &report.cleanup {
        BestEffort::Done => {
            let _ = writeln!(output, "Template sheet removed.");
        }
        BestEffort::Degraded(err) => {
            let _ = writeln!(
                output,
                "Template sheet {} left in place: {}",
                report.template_sheet_id, err
            );
        }
    }

    output
}

/// One CSV row per employee: `employee,period,status,sheet_id,error`.
pub fn write_outcomes_csv(report: &RunReport, path: &Path) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in outcome_rows(report) {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
