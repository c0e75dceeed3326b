//! Document-storage collaborator.
//!
//! The export engine only needs six primitives from the spreadsheet backend:
//! copy a file, list its sheets, duplicate / rename / delete a sheet, and
//! write a batch of ranges. Backends implement [`DocumentStore`]; the engine
//! never talks to a concrete service directly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::CellBlock;

pub type FileId = String;
pub type SheetId = i64;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetMeta {
    pub sheet_id: SheetId,
    pub title: String,
}

/// How written values are interpreted by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ValueInputMode {
    /// Values are stored as their given type; text is never parsed.
    #[default]
    Literal,
    /// Values are parsed as if typed into the sheet.
    UserEntered,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {kind} with id {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("storage error: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        StoreError::Backend {
            message: message.into(),
            source: None,
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Copies `source_file_id` into `destination_folder_id` as `new_name`.
    async fn copy_file(
        &self,
        source_file_id: &str,
        destination_folder_id: &str,
        new_name: &str,
    ) -> Result<FileId>;

    async fn get_sheets(&self, document_id: &str) -> Result<Vec<SheetMeta>>;

    /// Copies a sheet within the same document and returns the new sheet's id.
    async fn duplicate_sheet(&self, document_id: &str, sheet_id: SheetId) -> Result<SheetId>;

    async fn rename_sheet(&self, document_id: &str, sheet_id: SheetId, new_title: &str)
        -> Result<()>;

    /// Writes all blocks in one request. Either every block lands or none does.
    async fn batch_write_values(
        &self,
        document_id: &str,
        blocks: &[CellBlock],
        mode: ValueInputMode,
    ) -> Result<()>;

    async fn delete_sheet(&self, document_id: &str, sheet_id: SheetId) -> Result<()>;
}
