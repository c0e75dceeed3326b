//! Per-employee sheet generation.
//!
//! A run copies the template document, resolves employee names, and for each
//! employee duplicates the template sheet, renames it and writes the projected
//! values in one batch. Only a missing template sheet (or a document that
//! cannot be provisioned) aborts the run. Per-employee failures are logged and
//! collected. Removing the template sheet at the end is best effort.

use std::fmt;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::ExportConfig;
use crate::identity::resolve_identities;
use crate::layout::employee_blocks;
use crate::models::{RecordSet, SheetProjection};
use crate::projection::project;
use crate::store::{DocumentStore, FileId, SheetId, StoreError, ValueInputMode};

/// Errors that abort a whole run.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("template sheet {title:?} not found in document {document_id}")]
    TemplateSheetNotFound { document_id: FileId, title: String },

    #[error("failed to provision document from template {template_file_id}")]
    Provision {
        template_file_id: String,
        #[source]
        source: StoreError,
    },
}

/// Where an employee's sheet generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetStage {
    Duplicate,
    Rename,
    WriteValues,
}

impl fmt::Display for SheetStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SheetStage::Duplicate => "duplicate",
            SheetStage::Rename => "rename",
            SheetStage::WriteValues => "write values",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {source}")]
pub struct SheetError {
    pub stage: SheetStage,
    #[source]
    pub source: StoreError,
}

impl SheetError {
    fn at(stage: SheetStage) -> impl FnOnce(StoreError) -> Self {
        move |source| SheetError { stage, source }
    }
}

#[derive(Debug)]
pub struct EmployeeOutcome {
    pub employee: String,
    pub result: Result<SheetId, SheetError>,
}

/// Result of an operation whose failure degrades the output but never fails the run.
#[derive(Debug)]
pub enum BestEffort {
    Done,
    Degraded(StoreError),
}

impl BestEffort {
    pub fn is_degraded(&self) -> bool {
        matches!(self, BestEffort::Degraded(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedDocument {
    pub document_id: FileId,
    pub template_sheet_id: SheetId,
}

#[derive(Debug)]
pub struct RunReport {
    pub period: String,
    pub document_id: FileId,
    pub template_sheet_id: SheetId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<EmployeeOutcome>,
    pub cleanup: BestEffort,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Copies the template file and locates the template sheet inside the copy.
pub async fn provision_document<S: DocumentStore + ?Sized>(
    store: &S,
    config: &ExportConfig,
    folder_id: &str,
) -> Result<ProvisionedDocument, ExportError> {
    let provision_error = |source| ExportError::Provision {
        template_file_id: config.template_file_id.clone(),
        source,
    };

    let document_id = store
        .copy_file(&config.template_file_id, folder_id, &config.document_name)
        .await
        .map_err(provision_error)?;
    let sheets = store
        .get_sheets(&document_id)
        .await
        .map_err(provision_error)?;

    let template_sheet_id = sheets
        .iter()
        .find(|sheet| sheet.title == config.template_sheet_title)
        .map(|sheet| sheet.sheet_id)
        .ok_or_else(|| ExportError::TemplateSheetNotFound {
            document_id: document_id.clone(),
            title: config.template_sheet_title.clone(),
        })?;

    info!(
        document_id = %document_id,
        template_sheet_id,
        folder_id,
        "document provisioned"
    );
    Ok(ProvisionedDocument {
        document_id,
        template_sheet_id,
    })
}

pub async fn duplicate_template_sheet<S: DocumentStore + ?Sized>(
    store: &S,
    document: &ProvisionedDocument,
) -> Result<SheetId, StoreError> {
    store
        .duplicate_sheet(&document.document_id, document.template_sheet_id)
        .await
}

/// Renames `sheet_id` to the employee name and writes every block in one request.
///
/// Nothing is rolled back: a failed write leaves the sheet renamed but unpopulated.
pub async fn write_employee_sheet<S: DocumentStore + ?Sized>(
    store: &S,
    document_id: &str,
    sheet_id: SheetId,
    employee: &str,
    period: &str,
    projection: &SheetProjection,
) -> Result<(), SheetError> {
    store
        .rename_sheet(document_id, sheet_id, employee)
        .await
        .map_err(SheetError::at(SheetStage::Rename))?;

    let blocks = employee_blocks(employee, period, projection);
    store
        .batch_write_values(document_id, &blocks, ValueInputMode::Literal)
        .await
        .map_err(SheetError::at(SheetStage::WriteValues))
}

pub async fn delete_template_sheet<S: DocumentStore + ?Sized>(
    store: &S,
    document: &ProvisionedDocument,
) -> BestEffort {
    match store
        .delete_sheet(&document.document_id, document.template_sheet_id)
        .await
    {
        Ok(()) => {
            info!(
                document_id = %document.document_id,
                sheet_id = document.template_sheet_id,
                "template sheet deleted"
            );
            BestEffort::Done
        }
        Err(err) => {
            warn!(
                document_id = %document.document_id,
                sheet_id = document.template_sheet_id,
                error = %err,
                "template sheet could not be deleted"
            );
            BestEffort::Degraded(err)
        }
    }
}

async fn export_employee<S: DocumentStore + ?Sized>(
    store: &S,
    document: &ProvisionedDocument,
    period: &str,
    records: &RecordSet,
    employee: &str,
) -> EmployeeOutcome {
    let result = async {
        let sheet_id = duplicate_template_sheet(store, document)
            .await
            .map_err(SheetError::at(SheetStage::Duplicate))?;

        let projection = project(employee, period, records);
        debug!(
            employee,
            period,
            sheet_id,
            peer_rows = projection.peer_rows.len(),
            "projected records"
        );

        write_employee_sheet(
            store,
            &document.document_id,
            sheet_id,
            employee,
            period,
            &projection,
        )
        .await?;
        Ok::<SheetId, SheetError>(sheet_id)
    }
    .await;

    match &result {
        Ok(sheet_id) => info!(employee, period, sheet_id, "employee sheet exported"),
        Err(err) => error!(
            employee,
            period,
            stage = %err.stage,
            error = %err.source,
            "employee sheet export failed"
        ),
    }

    EmployeeOutcome {
        employee: employee.to_string(),
        result,
    }
}

/// Runs one export of `period` into a fresh copy of the template in `folder_id`.
///
/// Returns `Err` only for fatal provisioning errors. The template sheet is
/// removed after every employee has settled, whatever their outcome.
pub async fn run_export<S: DocumentStore + ?Sized>(
    store: &S,
    config: &ExportConfig,
    period: &str,
    records: &RecordSet,
    folder_id: &str,
) -> Result<RunReport, ExportError> {
    let started_at = Utc::now();
    let document = provision_document(store, config, folder_id).await?;

    let employees = resolve_identities(records);
    info!(period, employees = employees.len(), "exporting employee sheets");

    let outcomes: Vec<EmployeeOutcome> = stream::iter(employees.iter())
        .map(|employee| export_employee(store, &document, period, records, employee))
        .buffered(config.concurrency.max(1))
        .collect()
        .await;

    let cleanup = delete_template_sheet(store, &document).await;

    let report = RunReport {
        period: period.to_string(),
        document_id: document.document_id,
        template_sheet_id: document.template_sheet_id,
        started_at,
        finished_at: Utc::now(),
        outcomes,
        cleanup,
    };
    info!(
        period,
        succeeded = report.succeeded(),
        failed = report.failed(),
        "export finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::{FailOn, MemoryDocumentStore, SheetSnapshot, StoreOp};
    use crate::models::{
        AverageRecord, CellValue, Field, PeerAssessmentRecord, SelfAssessmentRecord, UserRef,
    };
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    const TEMPLATE_FILE: &str = "template-file";
    const TITLE: &str = "テンプレート";

    fn config() -> ExportConfig {
        ExportConfig::new(TEMPLATE_FILE)
    }

    fn store() -> MemoryDocumentStore {
        let mut template = SheetSnapshot::blank(TITLE);
        template
            .cells
            .insert("B2".to_string(), CellValue::from("多面評価"));
        template
            .cells
            .insert("C8".to_string(), CellValue::from("stale"));
        MemoryDocumentStore::new().with_template(TEMPLATE_FILE, vec![template])
    }

    fn period(value: &str) -> Option<Field<String>> {
        Some(Field::new(value.to_string()))
    }

    fn records() -> RecordSet {
        RecordSet {
            self_records: vec![
                SelfAssessmentRecord {
                    name: Some(Field::new("Sato".to_string())),
                    evaluation_period: period("2024-H1"),
                    skill: Some(Field::new(json!("A"))),
                    ..Default::default()
                },
                SelfAssessmentRecord {
                    name: Some(Field::new("Kato".to_string())),
                    evaluation_period: period("2024-H1"),
                    total_average: Some(Field::new(json!(4.2))),
                    ..Default::default()
                },
            ],
            peer_records: ["Kato", "Ito"]
                .into_iter()
                .map(|rater| PeerAssessmentRecord {
                    created_by: Some(Field::new(UserRef::named(rater))),
                    select_employee: Some(Field::new(vec![UserRef::named("Sato")])),
                    evaluation_period: period("2024-H1"),
                    comment: Some(Field::new(json!(format!("from {rater}")))),
                    ..Default::default()
                })
                .collect(),
            average_records: vec![AverageRecord {
                select_employee: Some(Field::new(vec![UserRef::named("Abe")])),
                evaluation_period: period("2024-H1"),
                evaluation_skill: Some(Field::new(json!(3))),
                ..Default::default()
            }],
        }
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .lines()
                .map(str::to_string)
                .collect()
        }

        fn count(&self, message: &str, employee: &str) -> usize {
            self.lines()
                .iter()
                .filter(|line| line.contains(message) && line.contains(employee))
                .count()
        }
    }

    fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    fn position(ops: &[StoreOp], pred: impl Fn(&StoreOp) -> bool) -> Vec<usize> {
        ops.iter()
            .enumerate()
            .filter(|(_, op)| pred(op))
            .map(|(idx, _)| idx)
            .collect()
    }

    #[tokio::test]
    async fn exports_one_sheet_per_employee() {
        let store = store();
        let report = run_export(&store, &config(), "2024-H1", &records(), "folder")
            .await
            .unwrap();

        let names: Vec<&str> = report.outcomes.iter().map(|o| o.employee.as_str()).collect();
        assert_eq!(names, vec!["Sato", "Kato", "Abe"]);
        assert_eq!(report.succeeded(), 3);
        assert!(!report.cleanup.is_degraded());

        let document = store.document(&report.document_id).unwrap();
        assert_eq!(document.folder_id, "folder");
        assert_eq!(document.name, "（管理者）多面評価閲覧");
        let titles: Vec<&str> = document.sheets.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Sato", "Kato", "Abe"]);

        let sato = document.sheet("Sato").unwrap();
        assert_eq!(sato.cells.get("C3"), Some(&CellValue::from("2024-H1")));
        assert_eq!(sato.cells.get("C4"), Some(&CellValue::from("Sato")));
        assert_eq!(sato.cells.get("B2"), Some(&CellValue::from("多面評価")));
        assert_eq!(sato.cells.get("C8"), None);
        assert_eq!(sato.cells.get("E8"), Some(&CellValue::from("A")));
        assert_eq!(sato.cells.get("B10"), Some(&CellValue::from("Kato")));
        assert_eq!(sato.cells.get("I11"), Some(&CellValue::from("from Ito")));
        assert_eq!(sato.cells.get("B12"), None);

        let kato = document.sheet("Kato").unwrap();
        assert_eq!(kato.cells.get("H8"), Some(&CellValue::Number(4.2)));
        let abe = document.sheet("Abe").unwrap();
        assert_eq!(abe.cells.get("E9"), Some(&CellValue::Number(3.0)));
    }

    #[tokio::test]
    async fn peer_region_is_sized_to_matching_records() {
        let store = store();
        run_export(&store, &config(), "2024-H1", &records(), "folder")
            .await
            .unwrap();

        let writes: Vec<Vec<String>> = store
            .operations()
            .into_iter()
            .filter_map(|op| match op {
                StoreOp::BatchWrite { ranges, mode, .. } => {
                    assert_eq!(mode, ValueInputMode::Literal);
                    Some(ranges)
                }
                _ => None,
            })
            .collect();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0].last().map(String::as_str), Some("'Sato'!B10:I11"));
        assert_eq!(writes[1].len(), 4);
        assert_eq!(writes[2].len(), 4);
    }

    #[tokio::test]
    async fn missing_template_sheet_is_fatal() {
        let store = MemoryDocumentStore::new()
            .with_template(TEMPLATE_FILE, vec![SheetSnapshot::blank("Sheet1")]);
        let err = run_export(&store, &config(), "2024-H1", &records(), "folder")
            .await
            .unwrap_err();

        assert!(matches!(err, ExportError::TemplateSheetNotFound { .. }));
        assert!(!store
            .operations()
            .iter()
            .any(|op| matches!(op, StoreOp::DuplicateSheet { .. })));
    }

    #[tokio::test]
    async fn missing_template_file_is_fatal() {
        let store = MemoryDocumentStore::new();
        let err = run_export(&store, &config(), "2024-H1", &records(), "folder")
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Provision { .. }));
    }

    #[tokio::test]
    async fn failed_employee_does_not_stop_the_run() {
        let (logs, _guard) = capture_logs();
        let store = store();
        store.fail_on(FailOn::Write("Sato".to_string()));
        store.fail_on(FailOn::Rename("Kato".to_string()));

        let report = run_export(&store, &config(), "2024-H1", &records(), "folder")
            .await
            .unwrap();

        let sato = &report.outcomes[0];
        assert_eq!(sato.result.as_ref().unwrap_err().stage, SheetStage::WriteValues);
        let kato = &report.outcomes[1];
        assert_eq!(kato.result.as_ref().unwrap_err().stage, SheetStage::Rename);
        assert!(report.outcomes[2].result.is_ok());
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 2);

        let document = store.document(&report.document_id).unwrap();
        let sato_sheet = document.sheet("Sato").unwrap();
        assert_eq!(sato_sheet.cells.get("C8"), Some(&CellValue::from("stale")));
        assert!(document.sheet("Abe").is_some());

        assert_eq!(logs.count("employee sheet exported", "Abe"), 1);
        assert_eq!(logs.count("employee sheet exported", "Sato"), 0);
        assert_eq!(logs.count("employee sheet export failed", "Sato"), 1);
        assert_eq!(logs.count("employee sheet export failed", "Kato"), 1);
    }

    #[tokio::test]
    async fn template_with_declared_sheet_id_keeps_employee_sheets() {
        let mut template = SheetSnapshot::blank(TITLE);
        template.sheet_id = 1;
        let store = MemoryDocumentStore::new().with_template(TEMPLATE_FILE, vec![template]);
        let records = RecordSet {
            self_records: vec![SelfAssessmentRecord {
                name: Some(Field::new("Sato".to_string())),
                evaluation_period: period("2024-H1"),
                skill: Some(Field::new(json!("A"))),
                ..Default::default()
            }],
            ..Default::default()
        };

        let report = run_export(&store, &config(), "2024-H1", &records, "folder")
            .await
            .unwrap();

        assert_eq!(report.template_sheet_id, 1);
        let sheet_id = *report.outcomes[0].result.as_ref().unwrap();
        assert_ne!(sheet_id, 1);
        assert!(!report.cleanup.is_degraded());

        let document = store.document(&report.document_id).unwrap();
        assert_eq!(document.sheets.len(), 1);
        let sato = document.sheet("Sato").unwrap();
        assert_eq!(sato.sheet_id, sheet_id);
        assert_eq!(sato.cells.get("E8"), Some(&CellValue::from("A")));
    }

    #[tokio::test]
    async fn cleanup_runs_once_after_every_employee() {
        let store = store();
        store.fail_on(FailOn::Write("Abe".to_string()));
        let report = run_export(&store, &config(), "2024-H1", &records(), "folder")
            .await
            .unwrap();

        let ops = store.operations();
        let deletes = position(&ops, |op| matches!(op, StoreOp::DeleteSheet { .. }));
        let writes = position(&ops, |op| matches!(op, StoreOp::BatchWrite { .. }));
        assert_eq!(deletes.len(), 1);
        assert!(writes.iter().all(|idx| *idx < deletes[0]));
        assert_eq!(deletes[0], ops.len() - 1);
        assert!(store
            .document(&report.document_id)
            .unwrap()
            .sheet(TITLE)
            .is_none());
    }

    #[tokio::test]
    async fn cleanup_failure_is_degraded_not_fatal() {
        let store = store();
        let probe = store.copy_file(TEMPLATE_FILE, "scratch", "probe").await.unwrap();
        let template_id = store.get_sheets(&probe).await.unwrap()[0].sheet_id;
        // Sheet ids are allocated per store, so the run's template gets the next one.
        let run_template_id = template_id + 1;
        store.fail_on(FailOn::Delete(run_template_id));

        let report = run_export(&store, &config(), "2024-H1", &records(), "folder")
            .await
            .unwrap();
        assert_eq!(report.template_sheet_id, run_template_id);
        assert!(report.cleanup.is_degraded());
        assert_eq!(report.succeeded(), 3);
        assert!(store
            .document(&report.document_id)
            .unwrap()
            .sheet(TITLE)
            .is_some());
    }

    #[tokio::test]
    async fn empty_records_create_no_sheets() {
        let store = store();
        let report = run_export(&store, &config(), "2024-H1", &RecordSet::default(), "folder")
            .await
            .unwrap();

        assert!(report.outcomes.is_empty());
        assert!(!store
            .operations()
            .iter()
            .any(|op| matches!(op, StoreOp::DuplicateSheet { .. })));
        // The template is the only sheet left, which the backend refuses to delete.
        assert!(report.cleanup.is_degraded());
    }

    #[tokio::test]
    async fn employees_without_records_for_the_period_get_placeholder_sheets() {
        let store = store();
        let report = run_export(&store, &config(), "2023-H2", &records(), "folder")
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 3);
        let document = store.document(&report.document_id).unwrap();
        let sato = document.sheet("Sato").unwrap();
        assert_eq!(sato.cells.get("C3"), Some(&CellValue::from("2023-H2")));
        assert_eq!(sato.cells.get("C8"), None);
        assert_eq!(sato.cells.get("B10"), None);
    }

    #[tokio::test]
    async fn concurrent_runs_keep_order_and_isolation() {
        let store = store();
        store.fail_on(FailOn::Write("Kato".to_string()));
        let report = run_export(
            &store,
            &config().with_concurrency(3),
            "2024-H1",
            &records(),
            "folder",
        )
        .await
        .unwrap();

        let names: Vec<&str> = report.outcomes.iter().map(|o| o.employee.as_str()).collect();
        assert_eq!(names, vec!["Sato", "Kato", "Abe"]);
        let sheet_ids: Vec<SheetId> = report
            .outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().copied())
            .collect();
        assert_eq!(sheet_ids.len(), 2);
        assert_ne!(sheet_ids[0], sheet_ids[1]);

        let ops = store.operations();
        let deletes = position(&ops, |op| matches!(op, StoreOp::DeleteSheet { .. }));
        assert_eq!(deletes, vec![ops.len() - 1]);
    }
}
