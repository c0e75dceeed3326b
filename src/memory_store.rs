//! In-memory [`DocumentStore`] that records every operation.
//!
//! Backs the CLI's local export and the engine tests. Failures can be
//! injected per operation, and the operation log lets callers assert
//! exactly what reached the backend and in which order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::layout::{cell_name, parse_cell_range, split_qualified};
use crate::models::{CellBlock, CellValue};
use crate::store::{DocumentStore, FileId, Result, SheetId, SheetMeta, StoreError, ValueInputMode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetSnapshot {
    #[serde(default)]
    pub sheet_id: SheetId,
    pub title: String,
    /// Non-empty cells keyed by A1 reference.
    #[serde(default)]
    pub cells: BTreeMap<String, CellValue>,
}

impl SheetSnapshot {
    pub fn blank(title: &str) -> Self {
        Self {
            sheet_id: 0,
            title: title.to_string(),
            cells: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSnapshot {
    pub document_id: FileId,
    pub name: String,
    pub folder_id: String,
    pub sheets: Vec<SheetSnapshot>,
}

impl DocumentSnapshot {
    pub fn sheet(&self, title: &str) -> Option<&SheetSnapshot> {
        self.sheets.iter().find(|sheet| sheet.title == title)
    }
}

/// Record of a storage operation for assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    CopyFile {
        source_file_id: String,
        folder_id: String,
        name: String,
    },
    GetSheets {
        document_id: String,
    },
    DuplicateSheet {
        document_id: String,
        sheet_id: SheetId,
    },
    RenameSheet {
        document_id: String,
        sheet_id: SheetId,
        title: String,
    },
    BatchWrite {
        document_id: String,
        ranges: Vec<String>,
        mode: ValueInputMode,
    },
    DeleteSheet {
        document_id: String,
        sheet_id: SheetId,
    },
}

/// Failure to inject into the next matching call.
#[derive(Debug, Clone, PartialEq)]
pub enum FailOn {
    /// Every duplication of the given sheet.
    Duplicate(SheetId),
    /// Renames to the given title.
    Rename(String),
    /// Batch writes touching the given sheet title.
    Write(String),
    /// Every deletion of the given sheet.
    Delete(SheetId),
}

#[derive(Debug, Default)]
struct State {
    templates: HashMap<FileId, Vec<SheetSnapshot>>,
    documents: HashMap<FileId, DocumentSnapshot>,
    next_sheet_id: SheetId,
    operations: Vec<StoreOp>,
    failures: Vec<FailOn>,
}

impl State {
    fn allocate_sheet_id(&mut self) -> SheetId {
        self.next_sheet_id += 1;
        self.next_sheet_id
    }

    fn document_mut(&mut self, document_id: &str) -> Result<&mut DocumentSnapshot> {
        self.documents
            .get_mut(document_id)
            .ok_or_else(|| StoreError::not_found("document", document_id))
    }

    fn injected(&self, failure: &FailOn) -> Result<()> {
        if self.failures.contains(failure) {
            return Err(StoreError::Rejected(format!("injected failure: {failure:?}")));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    state: Mutex<State>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a template file that `copy_file` can copy from.
    pub fn with_template(self, file_id: &str, sheets: Vec<SheetSnapshot>) -> Self {
        self.lock().templates.insert(file_id.to_string(), sheets);
        self
    }

    pub fn fail_on(&self, failure: FailOn) {
        self.lock().failures.push(failure);
    }

    pub fn operations(&self) -> Vec<StoreOp> {
        self.lock().operations.clone()
    }

    pub fn document(&self, document_id: &str) -> Option<DocumentSnapshot> {
        self.lock().documents.get(document_id).cloned()
    }

    /// Every operation validates before it mutates, so state behind a
    /// poisoned lock is still consistent and is used as is.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn unique_copy_title(sheets: &[SheetSnapshot], source_title: &str) -> String {
    let base = format!("Copy of {source_title}");
    let taken = |title: &str| sheets.iter().any(|sheet| sheet.title == title);
    if !taken(&base) {
        return base;
    }
    (2..)
        .map(|n| format!("{base} {n}"))
        .find(|title| !taken(title))
        .unwrap_or(base)
}

fn interpret(value: &CellValue, mode: ValueInputMode) -> CellValue {
    match (mode, value) {
        (ValueInputMode::UserEntered, CellValue::Text(text)) => text
            .trim()
            .parse::<f64>()
            .map(CellValue::Number)
            .unwrap_or_else(|_| value.clone()),
        _ => value.clone(),
    }
}

/// Resolves every block to (sheet index, cell, value) before anything is applied.
fn plan_writes(
    document: &DocumentSnapshot,
    blocks: &[CellBlock],
    mode: ValueInputMode,
) -> Result<Vec<(usize, String, CellValue)>> {
    let mut planned = Vec::new();
    for block in blocks {
        let (title, a1) = split_qualified(&block.range)
            .ok_or_else(|| StoreError::Rejected(format!("unqualified range {}", block.range)))?;
        let sheet_index = document
            .sheets
            .iter()
            .position(|sheet| sheet.title == title)
            .ok_or_else(|| StoreError::not_found("sheet", &title))?;
        let (start_row, start_col, end_row, end_col) = parse_cell_range(a1)
            .ok_or_else(|| StoreError::Rejected(format!("invalid range {}", block.range)))?;

        let height = (end_row.saturating_sub(start_row) + 1) as usize;
        let width = (end_col.saturating_sub(start_col) + 1) as usize;
        if block.values.len() > height || block.values.iter().any(|row| row.len() > width) {
            return Err(StoreError::Rejected(format!(
                "values exceed range {}",
                block.range
            )));
        }

        for (row_offset, row) in block.values.iter().enumerate() {
            for (col_offset, value) in row.iter().enumerate() {
                let cell = cell_name(start_col + col_offset as u32, start_row + row_offset as u32);
                planned.push((sheet_index, cell, interpret(value, mode)));
            }
        }
    }
    Ok(planned)
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn copy_file(
        &self,
        source_file_id: &str,
        destination_folder_id: &str,
        new_name: &str,
    ) -> Result<FileId> {
        let mut state = self.lock();
        state.operations.push(StoreOp::CopyFile {
            source_file_id: source_file_id.to_string(),
            folder_id: destination_folder_id.to_string(),
            name: new_name.to_string(),
        });

        let mut sheets = state
            .templates
            .get(source_file_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("file", source_file_id))?;
        let mut declared = HashSet::new();
        for sheet in sheets.iter().filter(|sheet| sheet.sheet_id != 0) {
            if !declared.insert(sheet.sheet_id) {
                return Err(StoreError::Rejected(format!(
                    "template {source_file_id} declares sheet id {} twice",
                    sheet.sheet_id
                )));
            }
        }
        // Allocated ids must stay clear of the ids the template declares.
        if let Some(highest) = declared.iter().max() {
            state.next_sheet_id = state.next_sheet_id.max(*highest);
        }
        for sheet in sheets.iter_mut().filter(|sheet| sheet.sheet_id == 0) {
            sheet.sheet_id = state.allocate_sheet_id();
        }

        let document_id = Uuid::new_v4().to_string();
        state.documents.insert(
            document_id.clone(),
            DocumentSnapshot {
                document_id: document_id.clone(),
                name: new_name.to_string(),
                folder_id: destination_folder_id.to_string(),
                sheets,
            },
        );
        Ok(document_id)
    }

    async fn get_sheets(&self, document_id: &str) -> Result<Vec<SheetMeta>> {
        let mut state = self.lock();
        state.operations.push(StoreOp::GetSheets {
            document_id: document_id.to_string(),
        });

        let document = state.document_mut(document_id)?;
        Ok(document
            .sheets
            .iter()
            .map(|sheet| SheetMeta {
                sheet_id: sheet.sheet_id,
                title: sheet.title.clone(),
            })
            .collect())
    }

    async fn duplicate_sheet(&self, document_id: &str, sheet_id: SheetId) -> Result<SheetId> {
        let mut state = self.lock();
        state.operations.push(StoreOp::DuplicateSheet {
            document_id: document_id.to_string(),
            sheet_id,
        });
        state.injected(&FailOn::Duplicate(sheet_id))?;

        let new_id = state.allocate_sheet_id();
        let document = state.document_mut(document_id)?;
        let source = document
            .sheets
            .iter()
            .find(|sheet| sheet.sheet_id == sheet_id)
            .ok_or_else(|| StoreError::not_found("sheet", sheet_id))?;
        let copy = SheetSnapshot {
            sheet_id: new_id,
            title: unique_copy_title(&document.sheets, &source.title),
            cells: source.cells.clone(),
        };
        document.sheets.push(copy);
        Ok(new_id)
    }

    async fn rename_sheet(
        &self,
        document_id: &str,
        sheet_id: SheetId,
        new_title: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        state.operations.push(StoreOp::RenameSheet {
            document_id: document_id.to_string(),
            sheet_id,
            title: new_title.to_string(),
        });
        state.injected(&FailOn::Rename(new_title.to_string()))?;

        let document = state.document_mut(document_id)?;
        if document
            .sheets
            .iter()
            .any(|sheet| sheet.title == new_title && sheet.sheet_id != sheet_id)
        {
            return Err(StoreError::Rejected(format!(
                "a sheet named {new_title} already exists"
            )));
        }
        let sheet = document
            .sheets
            .iter_mut()
            .find(|sheet| sheet.sheet_id == sheet_id)
            .ok_or_else(|| StoreError::not_found("sheet", sheet_id))?;
        sheet.title = new_title.to_string();
        Ok(())
    }

    async fn batch_write_values(
        &self,
        document_id: &str,
        blocks: &[CellBlock],
        mode: ValueInputMode,
    ) -> Result<()> {
        let mut state = self.lock();
        state.operations.push(StoreOp::BatchWrite {
            document_id: document_id.to_string(),
            ranges: blocks.iter().map(|block| block.range.clone()).collect(),
            mode,
        });
        for block in blocks {
            if let Some((title, _)) = split_qualified(&block.range) {
                state.injected(&FailOn::Write(title))?;
            }
        }

        let document = state.document_mut(document_id)?;
        let planned = plan_writes(document, blocks, mode)?;
        for (sheet_index, cell, value) in planned {
            let cells = &mut document.sheets[sheet_index].cells;
            if value.is_empty() {
                cells.remove(&cell);
            } else {
                cells.insert(cell, value);
            }
        }
        Ok(())
    }

    async fn delete_sheet(&self, document_id: &str, sheet_id: SheetId) -> Result<()> {
        let mut state = self.lock();
        state.operations.push(StoreOp::DeleteSheet {
            document_id: document_id.to_string(),
            sheet_id,
        });
        state.injected(&FailOn::Delete(sheet_id))?;

        let document = state.document_mut(document_id)?;
        let index = document
            .sheets
            .iter()
            .position(|sheet| sheet.sheet_id == sheet_id)
            .ok_or_else(|| StoreError::not_found("sheet", sheet_id))?;
        if document.sheets.len() == 1 {
            return Err(StoreError::Rejected(
                "a document must keep at least one sheet".to_string(),
            ));
        }
        document.sheets.remove(index);
        Ok(())
    }
}
