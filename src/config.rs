use anyhow::Context;

pub const TEMPLATE_FILE_ENV: &str = "ADMIN_VIEW_TEMPLATE_FILE_ID";
pub const DOCUMENT_NAME_ENV: &str = "EXPORT_DOCUMENT_NAME";
pub const TEMPLATE_SHEET_TITLE_ENV: &str = "EXPORT_TEMPLATE_SHEET_TITLE";

pub const DEFAULT_DOCUMENT_NAME: &str = "（管理者）多面評価閲覧";
pub const DEFAULT_TEMPLATE_SHEET_TITLE: &str = "テンプレート";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportConfig {
    /// File copied to create the output document.
    pub template_file_id: String,
    pub document_name: String,
    /// Title of the sheet duplicated once per employee.
    pub template_sheet_title: String,
    /// Employees processed at once. 1 means strictly sequential.
    pub concurrency: usize,
}

impl ExportConfig {
    pub fn new(template_file_id: impl Into<String>) -> Self {
        Self {
            template_file_id: template_file_id.into(),
            document_name: DEFAULT_DOCUMENT_NAME.to_string(),
            template_sheet_title: DEFAULT_TEMPLATE_SHEET_TITLE.to_string(),
            concurrency: 1,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let template_file_id = get(TEMPLATE_FILE_ENV)
            .with_context(|| format!("{TEMPLATE_FILE_ENV} must be set to the template file id"))?;

        let mut config = Self::new(template_file_id);
        if let Some(name) = get(DOCUMENT_NAME_ENV) {
            config.document_name = name;
        }
        if let Some(title) = get(TEMPLATE_SHEET_TITLE_ENV) {
            config.template_sheet_title = title;
        }
        Ok(config)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}
